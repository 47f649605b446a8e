use crate::api::api_root;
use crate::console::{ChannelEvent, EventSink};
use crate::error::{ApiError, TransportError};
use crate::session::SessionContext;
use async_trait::async_trait;
use crawl_core::{
    decode_push_frame, Credential, LogEntry, LogLevel, PushFrame, HEARTBEAT_ACK_TOKEN,
};
use futures_util::{SinkExt, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    Connecting,
    Open,
    #[default]
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opens push connections. Swapped for a scripted connector in tests.
#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Box<dyn PushConnection>, TransportError>;
}

/// One open push connection carrying text frames.
#[async_trait]
pub trait PushConnection: Send {
    /// Next text frame; `None` once the peer has closed.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    async fn send_text(&mut self, text: &str) -> Result<(), TransportError>;

    async fn close(&mut self);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl PushConnector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn PushConnection>, TransportError> {
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| TransportError::Handshake(err.to_string()))?;
        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushConnection for WsConnection {
    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(err) => return Some(Err(TransportError::Stream(err.to_string()))),
            }
        }
    }

    async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text.to_string()))
            .await
            .map_err(|err| TransportError::Send(err.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

/// `{base}/api/ws/logs` with the scheme switched to ws/wss.
pub fn log_stream_endpoint(base_url: &Url) -> Result<Url, ApiError> {
    let mut url = api_root(base_url)?
        .join("ws/logs")
        .map_err(|err| ApiError::InvalidResponse(format!("bad stream endpoint: {err}")))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ApiError::InvalidResponse(format!(
                "unsupported scheme for log stream: {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| ApiError::InvalidResponse(format!("cannot switch scheme to {scheme}")))?;
    Ok(url)
}

fn authorized_url(endpoint: &Url, credential: &Credential) -> Url {
    let mut url = endpoint.clone();
    url.query_pairs_mut()
        .clear()
        .append_pair("token", credential.as_str());
    url
}

enum PumpExit {
    Cancelled,
    Closed(Option<TransportError>),
}

/// Push log reader. Reconnects forever on a fixed delay until cancelled or the session ends.
pub struct LogStreamClient {
    connector: Arc<dyn PushConnector>,
    ctx: SessionContext,
    endpoint: Url,
    reconnect_delay: Duration,
}

impl LogStreamClient {
    pub fn new(
        connector: Arc<dyn PushConnector>,
        ctx: SessionContext,
        endpoint: Url,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            connector,
            ctx,
            endpoint,
            reconnect_delay,
        }
    }

    pub async fn run(&self, sink: EventSink, cancel: CancellationToken) {
        let retry_secs = self.reconnect_delay.as_secs_f64();
        loop {
            let Some(credential) = self.ctx.credential() else {
                debug!("log_stream_stopped: session ended");
                return;
            };
            let url = authorized_url(&self.endpoint, &credential);
            sink.emit(ChannelEvent::Connection(ConnectionState::Connecting))
                .await;

            let connect = tokio::select! {
                _ = cancel.cancelled() => return,
                connect = self.connector.connect(&url) => connect,
            };
            match connect {
                Ok(mut connection) => {
                    info!("log_stream_connected");
                    sink.emit(ChannelEvent::Connection(ConnectionState::Open))
                        .await;
                    sink.emit(ChannelEvent::Log(LogEntry::system(
                        LogLevel::Info,
                        "Log stream connected",
                    )))
                    .await;
                    let exit = self.pump(connection.as_mut(), &sink, &cancel).await;
                    connection.close().await;
                    match exit {
                        PumpExit::Cancelled => return,
                        PumpExit::Closed(Some(err)) => warn!("log_stream_error: {err}"),
                        PumpExit::Closed(None) => info!("log_stream_closed"),
                    }
                }
                Err(err) => warn!("log_stream_connect_error: {err}"),
            }

            sink.emit(ChannelEvent::Connection(ConnectionState::Closed))
                .await;
            sink.emit(ChannelEvent::Log(LogEntry::system(
                LogLevel::Warning,
                format!("Log stream disconnected, reconnecting in {retry_secs}s"),
            )))
            .await;

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
    }

    async fn pump(
        &self,
        connection: &mut dyn PushConnection,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> PumpExit {
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => return PumpExit::Cancelled,
                frame = connection.recv() => frame,
            };
            let text = match frame {
                None => return PumpExit::Closed(None),
                Some(Err(err)) => return PumpExit::Closed(Some(err)),
                Some(Ok(text)) => text,
            };
            match decode_push_frame(&text) {
                Ok(PushFrame::Heartbeat) => {
                    if let Err(err) = connection.send_text(HEARTBEAT_ACK_TOKEN).await {
                        return PumpExit::Closed(Some(err));
                    }
                }
                Ok(PushFrame::HeartbeatAck) => {}
                Ok(PushFrame::Record(record)) => match record.into_entry() {
                    Ok(entry) => {
                        sink.emit(ChannelEvent::Log(entry)).await;
                    }
                    Err(err) => debug!("log_frame_dropped: {err}"),
                },
                Err(err) => debug!("log_frame_dropped: {err}"),
            }
        }
    }
}

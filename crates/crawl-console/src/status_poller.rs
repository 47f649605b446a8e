use crate::api::CrawlerApi;
use crate::console::{ChannelEvent, EventSink};
use crate::error::FetchError;
use crate::session::SessionContext;
use crawl_core::CrawlerStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(3);

pub struct StatusPoller {
    api: Arc<dyn CrawlerApi>,
    ctx: SessionContext,
    interval: Duration,
}

impl StatusPoller {
    pub fn new(api: Arc<dyn CrawlerApi>, ctx: SessionContext, interval: Duration) -> Self {
        Self { api, ctx, interval }
    }

    pub async fn fetch(&self) -> Result<CrawlerStatus, FetchError> {
        let credential = self.ctx.credential().ok_or(FetchError::NotAuthenticated)?;
        Ok(self.api.get_status(&credential).await?)
    }

    /// Fixed-cadence poll starting immediately. Failures are reported and the loop
    /// carries on; it ends on cancellation or when the session is gone.
    pub async fn run(&self, sink: EventSink, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.fetch() => result,
            };
            match &result {
                Err(FetchError::NotAuthenticated) => {
                    debug!("status_poll_stopped: session ended");
                    return;
                }
                Err(err) => warn!("status_fetch_error: {err}"),
                Ok(_) => {}
            }
            if !sink.emit(ChannelEvent::Status(result)).await {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::ConsoleEvent;
    use crate::error::ApiError;
    use crate::testing::{signed_in_context, StubApi};
    use crawl_core::RunState;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn polls_immediately_then_every_interval() {
        let api = Arc::new(StubApi::default());
        let poller = Arc::new(StatusPoller::new(
            api.clone(),
            signed_in_context(),
            DEFAULT_STATUS_INTERVAL,
        ));
        let (tx, mut rx) = mpsc::channel::<ConsoleEvent>(16);
        let cancel = CancellationToken::new();
        let task = {
            let poller = poller.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { poller.run(EventSink::new(tx, 1), cancel).await })
        };

        let first = rx.recv().await.expect("first poll");
        assert_eq!(first.epoch, 1);
        assert_eq!(api.count("get_status"), 1);

        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert_eq!(api.count("get_status"), 1);
        rx.recv().await.expect("second poll");
        assert_eq!(api.count("get_status"), 2);

        cancel.cancel();
        task.await.expect("poller task");
    }

    #[tokio::test(start_paused = true)]
    async fn failures_do_not_stop_the_loop() {
        let api = Arc::new(StubApi::default());
        api.set_status(Err(ApiError::Transport("connection refused".to_string())));
        let poller = StatusPoller::new(api.clone(), signed_in_context(), DEFAULT_STATUS_INTERVAL);
        let (tx, mut rx) = mpsc::channel::<ConsoleEvent>(16);
        let cancel = CancellationToken::new();
        let run = poller.run(EventSink::new(tx, 1), cancel.clone());
        tokio::pin!(run);

        let mut seen = Vec::new();
        while seen.len() < 3 {
            tokio::select! {
                _ = &mut run => panic!("poller exited early"),
                event = rx.recv() => seen.push(event.expect("event")),
            }
            if seen.len() == 2 {
                api.set_status(Ok(CrawlerStatus {
                    state: RunState::Running,
                    ..CrawlerStatus::default()
                }));
            }
        }
        assert!(matches!(seen[0].event, ChannelEvent::Status(Err(_))));
        assert!(matches!(seen[1].event, ChannelEvent::Status(Err(_))));
        assert!(matches!(
            &seen[2].event,
            ChannelEvent::Status(Ok(status)) if status.state == RunState::Running
        ));
    }

    #[tokio::test]
    async fn anonymous_session_ends_the_loop() {
        let api = Arc::new(StubApi::default());
        let poller = StatusPoller::new(api.clone(), SessionContext::new(), DEFAULT_STATUS_INTERVAL);
        let (tx, mut rx) = mpsc::channel::<ConsoleEvent>(4);
        poller.run(EventSink::new(tx, 1), CancellationToken::new()).await;
        assert!(rx.recv().await.is_none());
        assert!(api.calls().is_empty());
    }
}

use crate::log_entry::{generate_entry_id, LogEntry, LogLevel};
use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;

pub const HEARTBEAT_TOKEN: &str = "ping";
pub const HEARTBEAT_ACK_TOKEN: &str = "pong";

/// One text frame received on the push log channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushFrame {
    Heartbeat,
    HeartbeatAck,
    Record(LogRecord),
}

/// Structured log payload as emitted by the server. Every field is optional on the wire.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct LogRecord {
    #[serde(default, deserialize_with = "crate::deserialize_optional_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame decode failed: {0}")]
    Malformed(String),
    #[error("structured frame has no message")]
    MissingMessage,
}

pub fn decode_push_frame(text: &str) -> Result<PushFrame, FrameError> {
    match text {
        HEARTBEAT_TOKEN => return Ok(PushFrame::Heartbeat),
        HEARTBEAT_ACK_TOKEN => return Ok(PushFrame::HeartbeatAck),
        _ => {}
    }
    let record: LogRecord =
        serde_json::from_str(text).map_err(|err| FrameError::Malformed(err.to_string()))?;
    Ok(PushFrame::Record(record))
}

impl LogRecord {
    /// Fills defaults for id, timestamp and level. Records without a message are rejected.
    pub fn into_entry(self) -> Result<LogEntry, FrameError> {
        let message = match self.message {
            Some(message) if !message.is_empty() => message,
            _ => return Err(FrameError::MissingMessage),
        };
        let id = self
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(generate_entry_id);
        let timestamp = self
            .timestamp
            .filter(|ts| !ts.trim().is_empty())
            .unwrap_or_else(|| Utc::now().to_rfc3339());
        let level = LogLevel::normalize(self.level.as_deref());
        Ok(LogEntry::new(id, timestamp, level, message))
    }
}

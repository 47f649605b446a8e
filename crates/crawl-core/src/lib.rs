pub mod crawl_config;
pub mod identity;
pub mod log_entry;
pub mod push_frame;
pub mod snapshot;
pub mod status;

pub use crawl_config::{
    CrawlConfig, CrawlMode, LoginMethod, Platform, SaveFormat, ValidationError,
};
pub use identity::{Credential, Identity};
pub use log_entry::{LogEntry, LogLevel, SYSTEM_PREFIX};
pub use push_frame::{
    decode_push_frame, FrameError, LogRecord, PushFrame, HEARTBEAT_ACK_TOKEN, HEARTBEAT_TOKEN,
};
pub use snapshot::{
    select_preview_file, DataSnapshot, FileContent, FileDescriptor, FileListing, PRIMARY_FILE_MARKER,
};
pub use status::{CrawlerStatus, RunState};

use serde::{Deserialize, Deserializer};

/// Deserialize an ID that can be either a string or a number into a String
pub(crate) fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let val: serde_json::Value = serde_json::Value::deserialize(deserializer)?;
    match val {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        _ => Err(serde::de::Error::custom("expected string or number for id")),
    }
}

/// Same as [`deserialize_id`] but tolerates an absent or null id.
pub(crate) fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    match val {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(serde::de::Error::custom("expected string or number for id")),
    }
}

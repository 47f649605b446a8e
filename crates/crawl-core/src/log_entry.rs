use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Prefix carried by every locally synthesized entry.
pub const SYSTEM_PREFIX: &str = "[System] ";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }

    /// Upper-cases a wire level and falls back to INFO for anything unknown.
    pub fn normalize(raw: Option<&str>) -> Self {
        raw.and_then(|value| value.parse().ok()).unwrap_or_default()
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_uppercase();
        match normalized.as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            other => Err(format!("Unknown log level: {other}")),
        }
    }
}

/// A single line of the operator log. Fields are fixed at construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    id: String,
    timestamp: String,
    level: LogLevel,
    message: String,
}

impl LogEntry {
    pub fn new(
        id: impl Into<String>,
        timestamp: impl Into<String>,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp: timestamp.into(),
            level,
            message: message.into(),
        }
    }

    /// Locally narrated entry (connection lifecycle, commands, buffer clears).
    pub fn system(level: LogLevel, message: impl AsRef<str>) -> Self {
        Self {
            id: generate_entry_id(),
            timestamp: Utc::now().to_rfc3339(),
            level,
            message: format!("{SYSTEM_PREFIX}{}", message.as_ref()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_system(&self) -> bool {
        self.message.starts_with(SYSTEM_PREFIX)
    }
}

pub(crate) fn generate_entry_id() -> String {
    format!("local-{}", Uuid::new_v4())
}

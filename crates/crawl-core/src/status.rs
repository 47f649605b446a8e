use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Stopping,
    Error,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Stopping => "stopping",
            RunState::Error => "error",
        }
    }

    /// True while the crawler process is alive, including a pending stop.
    pub fn is_active(&self) -> bool {
        matches!(self, RunState::Running | RunState::Stopping)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunState {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "idle" => Ok(RunState::Idle),
            "running" => Ok(RunState::Running),
            "stopping" => Ok(RunState::Stopping),
            "error" => Ok(RunState::Error),
            other => Err(format!("Unknown run state: {other}")),
        }
    }
}

/// Server-owned crawler status. Always replaced as a whole, never merged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CrawlerStatus {
    #[serde(rename = "status", alias = "state")]
    pub state: RunState,
    #[serde(default)]
    pub notes_count: u64,
    #[serde(default)]
    pub comments_count: u64,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub crawler_type: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl CrawlerStatus {
    pub fn is_running_view(&self) -> bool {
        self.state.is_active()
    }
}

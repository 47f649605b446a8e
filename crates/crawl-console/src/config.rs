use crate::run_control::DEFAULT_OPTIMISTIC_WINDOW;
use crate::scheduler::DEFAULT_SNAPSHOT_INTERVAL;
use crate::status_poller::DEFAULT_STATUS_INTERVAL;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080/";
pub const DEFAULT_SOURCE: &str = "xhs";
pub const DEFAULT_LOG_DIR: &str = ".crawl-console/logs";
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

const STATE_DB_FILE: &str = "client.db";
const APP_DIR: &str = "crawl-console";

/// Cadences of the three channels plus the optimistic run-state window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTimings {
    pub status_interval: Duration,
    pub snapshot_interval: Duration,
    pub reconnect_delay: Duration,
    pub optimistic_window: Duration,
}

impl Default for ChannelTimings {
    fn default() -> Self {
        Self {
            status_interval: DEFAULT_STATUS_INTERVAL,
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            optimistic_window: DEFAULT_OPTIMISTIC_WINDOW,
        }
    }
}

pub fn resolve_base_url(flag: &str) -> Result<Url, url::ParseError> {
    let raw = pick(flag, "CRAWL_CONSOLE_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    Url::parse(raw.trim())
}

pub fn resolve_state_db(flag: &str) -> PathBuf {
    if let Some(path) = pick(flag, "CRAWL_CONSOLE_STATE_DB") {
        return PathBuf::from(path);
    }
    default_state_db(
        env::var("XDG_STATE_HOME").ok().as_deref(),
        dirs::home_dir().as_deref(),
    )
}

pub fn resolve_log_dir(flag: &str) -> String {
    pick(flag, "CRAWL_CONSOLE_LOG_DIR").unwrap_or_else(|| DEFAULT_LOG_DIR.to_string())
}

pub fn resolve_log_level() -> String {
    pick("", "CRAWL_CONSOLE_LOG_LEVEL").unwrap_or_else(|| "info".to_string())
}

pub fn resolve_log_stderr() -> bool {
    env::var("CRAWL_CONSOLE_LOG_STDERR")
        .ok()
        .and_then(|value| parse_bool(&value))
        .unwrap_or(false)
}

/// Flag wins over the environment; blank values count as unset.
fn pick(flag: &str, env_key: &str) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.to_string());
    }
    env::var(env_key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn default_state_db(xdg_state_home: Option<&str>, home: Option<&Path>) -> PathBuf {
    let base = match (xdg_state_home, home) {
        (Some(xdg), _) if !xdg.trim().is_empty() => PathBuf::from(xdg),
        (_, Some(home)) => home.join(".local/state"),
        _ => PathBuf::from(".crawl-console"),
    };
    base.join(APP_DIR).join(STATE_DB_FILE)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}

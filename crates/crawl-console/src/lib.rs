//! Realtime sync core of the crawler operator console: session gating, the push log
//! stream, the status and data-preview pollers, and the run-state reconciliation that
//! ties them together.

pub mod api;
pub mod config;
pub mod console;
pub mod error;
pub mod log_buffer;
pub mod log_stream;
pub mod run_control;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod snapshot_loader;
pub mod status_poller;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{CrawlerApi, HttpCrawlerApi, LoginGrant};
pub use config::ChannelTimings;
pub use console::{ChannelEvent, Console, ConsoleEvent, ConsoleView, EventSink, ViewUpdate};
pub use error::{
    ApiError, AuthError, CommandError, ControlError, FetchError, RuntimeStopped, TransportError,
};
pub use log_buffer::{FollowState, LogBuffer, LOG_BUFFER_CAPACITY};
pub use log_stream::{
    log_stream_endpoint, ConnectionState, LogStreamClient, PushConnection, PushConnector,
    WsConnector,
};
pub use run_control::{reconcile, RunController, RunView};
pub use runtime::{ConsoleHandle, ConsoleRuntime, RuntimeSettings};
pub use scheduler::{Channel, ChannelScheduler};
pub use session::{Session, SessionContext, SessionStore};
pub use snapshot_loader::{DataSnapshotLoader, LoadOutcome};
pub use status_poller::StatusPoller;

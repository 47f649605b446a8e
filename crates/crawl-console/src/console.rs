use crate::error::{ControlError, CommandError, FetchError};
use crate::log_buffer::{FollowState, LogBuffer};
use crate::log_stream::ConnectionState;
use crate::run_control::RunView;
use crate::snapshot_loader::LoadOutcome;
use crawl_core::{CrawlerStatus, DataSnapshot, Identity, LogEntry, LogLevel, RunState};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

/// Something a channel task observed.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Connection(ConnectionState),
    Log(LogEntry),
    Status(Result<CrawlerStatus, FetchError>),
    Snapshot(LoadOutcome),
}

impl ChannelEvent {
    pub fn is_auth_failure(&self) -> bool {
        match self {
            ChannelEvent::Status(Err(err)) => err.is_auth_failure(),
            ChannelEvent::Snapshot(outcome) => outcome
                .result
                .as_ref()
                .err()
                .map(FetchError::is_auth_failure)
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// Channel event stamped with the session epoch its task was started in.
#[derive(Debug, Clone)]
pub struct ConsoleEvent {
    pub epoch: u64,
    pub event: ChannelEvent,
}

/// Sending half handed to a channel task.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<ConsoleEvent>,
    epoch: u64,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<ConsoleEvent>, epoch: u64) -> Self {
        Self { tx, epoch }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Returns false once the console has gone away.
    pub async fn emit(&self, event: ChannelEvent) -> bool {
        self.tx
            .send(ConsoleEvent {
                epoch: self.epoch,
                event,
            })
            .await
            .is_ok()
    }
}

/// Change pushed to whatever renders the console.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewUpdate {
    LogAppended(LogEntry),
    LogCleared,
    Resumed { backlog: Vec<LogEntry> },
    Connection(ConnectionState),
    RunState(RunState),
    Status(CrawlerStatus),
    Snapshot(DataSnapshot),
    Session(Option<Identity>),
}

/// Point-in-time copy of the console state.
#[derive(Debug, Clone)]
pub struct ConsoleView {
    pub identity: Option<Identity>,
    pub connection: ConnectionState,
    pub run_state: RunState,
    pub status: Option<CrawlerStatus>,
    pub snapshot: Option<DataSnapshot>,
    pub selected_source: String,
    pub following: bool,
    /// Entries appended since the view was paused that are still held.
    pub unseen: usize,
    pub logs: Vec<LogEntry>,
}

/// Operator-facing state. Only the runtime task mutates it.
pub struct Console {
    logs: LogBuffer,
    follow: FollowState,
    connection: ConnectionState,
    run_view: RunView,
    last_run_state: RunState,
    status_failing: bool,
    snapshot_failing: bool,
    selected_source: String,
    snapshot: Option<DataSnapshot>,
    settled_generation: u64,
    epoch: u64,
}

impl Console {
    pub fn new(source: impl Into<String>, optimistic_window: Duration) -> Self {
        Self {
            logs: LogBuffer::new(),
            follow: FollowState::default(),
            connection: ConnectionState::Closed,
            run_view: RunView::new(optimistic_window),
            last_run_state: RunState::Idle,
            status_failing: false,
            snapshot_failing: false,
            selected_source: source.into(),
            snapshot: None,
            settled_generation: 0,
            epoch: 0,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Starts a new session epoch; anything tagged with an older one is ignored from now on.
    pub fn begin_epoch(&mut self) -> (u64, Vec<ViewUpdate>) {
        self.epoch += 1;
        self.run_view = RunView::new(self.run_view.window());
        self.status_failing = false;
        self.snapshot_failing = false;
        self.snapshot = None;
        let mut updates = Vec::new();
        if self.connection != ConnectionState::Closed {
            self.connection = ConnectionState::Closed;
            updates.push(ViewUpdate::Connection(ConnectionState::Closed));
        }
        updates.extend(self.refresh_run_state(Instant::now()));
        (self.epoch, updates)
    }

    pub fn apply(&mut self, event: ConsoleEvent, now: Instant) -> Vec<ViewUpdate> {
        if event.epoch != self.epoch {
            debug!(
                "stale_event_dropped: epoch={} current={}",
                event.epoch, self.epoch
            );
            return Vec::new();
        }
        match event.event {
            ChannelEvent::Connection(state) => {
                if state == self.connection {
                    return Vec::new();
                }
                self.connection = state;
                vec![ViewUpdate::Connection(state)]
            }
            ChannelEvent::Log(entry) => self.ingest(entry),
            ChannelEvent::Status(Ok(status)) => {
                let mut updates = Vec::new();
                if self.status_failing {
                    self.status_failing = false;
                    updates.extend(self.narrate(LogLevel::Info, "Status refresh recovered"));
                }
                self.run_view.apply_authoritative(status.clone());
                updates.push(ViewUpdate::Status(status));
                updates.extend(self.refresh_run_state(now));
                updates
            }
            ChannelEvent::Status(Err(err)) => {
                if self.status_failing {
                    return Vec::new();
                }
                self.status_failing = true;
                self.narrate(LogLevel::Warning, format!("Status refresh failed: {err}"))
            }
            ChannelEvent::Snapshot(outcome) => self.apply_snapshot(outcome),
        }
    }

    fn apply_snapshot(&mut self, outcome: LoadOutcome) -> Vec<ViewUpdate> {
        if outcome.source != self.selected_source {
            debug!("snapshot_dropped: source={} no longer selected", outcome.source);
            return Vec::new();
        }
        if outcome.generation <= self.settled_generation {
            debug!(
                "snapshot_dropped: generation={} settled={}",
                outcome.generation, self.settled_generation
            );
            return Vec::new();
        }
        self.settled_generation = outcome.generation;
        match outcome.result {
            Ok(snapshot) => {
                let mut updates = Vec::new();
                if self.snapshot_failing {
                    self.snapshot_failing = false;
                    updates.extend(self.narrate(LogLevel::Info, "Data preview recovered"));
                }
                self.snapshot = Some(snapshot.clone());
                updates.push(ViewUpdate::Snapshot(snapshot));
                updates
            }
            Err(err) => {
                if self.snapshot_failing {
                    return Vec::new();
                }
                self.snapshot_failing = true;
                self.narrate(LogLevel::Warning, format!("Data preview failed: {err}"))
            }
        }
    }

    /// Appends unless an identical entry is already held; the server replays history on
    /// reconnect. Ids alone are not enough since the server restarts them with every run.
    fn ingest(&mut self, entry: LogEntry) -> Vec<ViewUpdate> {
        if self.logs.contains(&entry) {
            debug!("log_entry_duplicate: id={}", entry.id());
            return Vec::new();
        }
        self.logs.append(entry.clone());
        if self.follow.is_following() {
            vec![ViewUpdate::LogAppended(entry)]
        } else {
            Vec::new()
        }
    }

    pub fn narrate(&mut self, level: LogLevel, message: impl AsRef<str>) -> Vec<ViewUpdate> {
        self.ingest(LogEntry::system(level, message))
    }

    pub fn clear_logs(&mut self) -> Vec<ViewUpdate> {
        self.logs.clear();
        let mut updates = vec![ViewUpdate::LogCleared];
        updates.extend(self.narrate(LogLevel::Info, "Log cleared"));
        updates
    }

    pub fn pause_follow(&mut self) {
        self.follow.pause(&self.logs);
    }

    pub fn resume_follow(&mut self) -> Vec<ViewUpdate> {
        if self.follow.is_following() {
            return Vec::new();
        }
        let backlog = self.follow.resume(&self.logs);
        vec![ViewUpdate::Resumed { backlog }]
    }

    /// Returns true when the selection actually changed.
    pub fn select_source(&mut self, source: &str) -> bool {
        if self.selected_source == source {
            return false;
        }
        self.selected_source = source.to_string();
        self.snapshot = None;
        self.snapshot_failing = false;
        true
    }

    pub fn record_start(
        &mut self,
        result: &Result<(), ControlError>,
        now: Instant,
    ) -> Vec<ViewUpdate> {
        match result {
            Ok(()) => {
                self.run_view.set_optimistic(RunState::Running, now);
                let mut updates = self.narrate(LogLevel::Info, "Crawler start requested");
                updates.extend(self.refresh_run_state(now));
                updates
            }
            Err(err) => self.narrate(LogLevel::Error, format!("Start failed: {err}")),
        }
    }

    pub fn record_stop(
        &mut self,
        result: &Result<(), CommandError>,
        now: Instant,
    ) -> Vec<ViewUpdate> {
        match result {
            Ok(()) => {
                self.run_view.set_optimistic(RunState::Idle, now);
                let mut updates = self.narrate(LogLevel::Info, "Crawler stop requested");
                updates.extend(self.refresh_run_state(now));
                updates
            }
            Err(err) => self.narrate(LogLevel::Error, format!("Stop failed: {err}")),
        }
    }

    /// Re-derives the run state, dropping an expired optimistic value.
    pub fn refresh_run_state(&mut self, now: Instant) -> Vec<ViewUpdate> {
        self.run_view.expire(now);
        let state = self.run_view.state(now);
        if state == self.last_run_state {
            return Vec::new();
        }
        self.last_run_state = state;
        vec![ViewUpdate::RunState(state)]
    }

    pub fn optimistic_deadline(&self) -> Option<Instant> {
        self.run_view.optimistic_deadline()
    }

    pub fn is_running_view(&self) -> bool {
        self.last_run_state.is_active()
    }

    pub fn run_state(&self) -> RunState {
        self.last_run_state
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn selected_source(&self) -> &str {
        &self.selected_source
    }

    pub fn snapshot(&self) -> Option<&DataSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn logs(&self) -> &LogBuffer {
        &self.logs
    }

    pub fn view(&self, identity: Option<Identity>) -> ConsoleView {
        ConsoleView {
            identity,
            connection: self.connection,
            run_state: self.last_run_state,
            status: self.run_view.authoritative().cloned(),
            snapshot: self.snapshot.clone(),
            selected_source: self.selected_source.clone(),
            following: self.follow.is_following(),
            unseen: self.follow.unseen(&self.logs),
            logs: self.logs.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;

    const WINDOW: Duration = Duration::from_secs(6);

    fn console() -> Console {
        let mut console = Console::new("xhs", WINDOW);
        console.begin_epoch();
        console
    }

    fn event(console: &Console, event: ChannelEvent) -> ConsoleEvent {
        ConsoleEvent {
            epoch: console.epoch(),
            event,
        }
    }

    fn server_entry(id: &str) -> LogEntry {
        LogEntry::new(id, "2026-02-07 21:00:00", LogLevel::Info, format!("crawl {id}"))
    }

    fn status(state: RunState) -> CrawlerStatus {
        CrawlerStatus {
            state,
            ..CrawlerStatus::default()
        }
    }

    fn outcome(generation: u64, source: &str, total: u64) -> LoadOutcome {
        LoadOutcome {
            generation,
            source: source.to_string(),
            result: Ok(DataSnapshot {
                source: source.to_string(),
                items: Vec::new(),
                total,
                file: None,
            }),
        }
    }

    #[test]
    fn stale_epoch_events_are_ignored() {
        let mut console = console();
        let stale = ConsoleEvent {
            epoch: console.epoch() - 1,
            event: ChannelEvent::Log(server_entry("1")),
        };
        assert!(console.apply(stale, Instant::now()).is_empty());
        assert!(console.logs().is_empty());
    }

    #[test]
    fn replayed_history_is_not_duplicated() {
        let mut console = console();
        let now = Instant::now();
        for id in ["1", "2", "1", "2", "3"] {
            let ev = event(&console, ChannelEvent::Log(server_entry(id)));
            console.apply(ev, now);
        }
        let ids: Vec<&str> = console.logs().iter().map(LogEntry::id).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn next_run_reusing_ids_is_still_logged() {
        let mut console = console();
        let now = Instant::now();
        let run_line = |id: &str, at: &str, run: u32| {
            LogEntry::new(id, at, LogLevel::Info, format!("run {run} line {id}"))
        };
        for id in ["1", "2", "3"] {
            let ev = event(&console, ChannelEvent::Log(run_line(id, "2026-02-07 21:00:00", 1)));
            console.apply(ev, now);
        }
        console.record_start(&Ok(()), now);

        let mut appended = 0;
        for id in ["1", "2", "3"] {
            let ev = event(&console, ChannelEvent::Log(run_line(id, "2026-02-07 22:00:00", 2)));
            appended += console
                .apply(ev, now)
                .iter()
                .filter(|update| matches!(update, ViewUpdate::LogAppended(_)))
                .count();
        }
        // reconnect replays both runs
        for (id, at, run) in [("1", "2026-02-07 21:00:00", 1), ("3", "2026-02-07 22:00:00", 2)] {
            let ev = event(&console, ChannelEvent::Log(run_line(id, at, run)));
            assert!(console.apply(ev, now).is_empty());
        }

        assert_eq!(appended, 3);
        let messages: Vec<&str> = console
            .logs()
            .iter()
            .filter(|entry| !entry.is_system())
            .map(LogEntry::message)
            .collect();
        assert_eq!(
            messages,
            vec![
                "run 1 line 1",
                "run 1 line 2",
                "run 1 line 3",
                "run 2 line 1",
                "run 2 line 2",
                "run 2 line 3",
            ]
        );
    }

    #[test]
    fn status_failure_is_narrated_once_until_recovery() {
        let mut console = console();
        let now = Instant::now();
        let failure = || {
            ChannelEvent::Status(Err(FetchError::Api(ApiError::Transport(
                "connection refused".to_string(),
            ))))
        };
        for _ in 0..3 {
            let ev = event(&console, failure());
            console.apply(ev, now);
        }
        assert_eq!(console.logs().len(), 1);
        let ev = event(&console, ChannelEvent::Status(Ok(status(RunState::Idle))));
        console.apply(ev, now);
        assert_eq!(console.logs().len(), 2);
        let ev = event(&console, ChannelEvent::Status(Ok(status(RunState::Idle))));
        console.apply(ev, now);
        assert_eq!(console.logs().len(), 2);
    }

    #[test]
    fn stop_then_idle_poll_ends_running_view() {
        let mut console = console();
        let now = Instant::now();
        let ev = event(&console, ChannelEvent::Status(Ok(status(RunState::Running))));
        console.apply(ev, now);
        assert!(console.is_running_view());

        console.record_stop(&Ok(()), now);
        assert!(!console.is_running_view());

        let ev = event(&console, ChannelEvent::Status(Ok(status(RunState::Idle))));
        let updates = console.apply(ev, now + Duration::from_secs(3));
        assert!(!console.is_running_view());
        assert!(updates.contains(&ViewUpdate::Status(status(RunState::Idle))));
    }

    #[test]
    fn optimistic_running_does_not_outlive_next_tick() {
        let mut console = console();
        let now = Instant::now();
        console.record_start(&Ok(()), now);
        assert_eq!(console.run_state(), RunState::Running);
        let ev = event(&console, ChannelEvent::Status(Ok(status(RunState::Idle))));
        let updates = console.apply(ev, now + Duration::from_secs(1));
        assert_eq!(console.run_state(), RunState::Idle);
        assert!(updates.contains(&ViewUpdate::RunState(RunState::Idle)));
        assert!(console.optimistic_deadline().is_none());
    }

    #[test]
    fn optimistic_state_expires_without_authoritative_data() {
        let mut console = console();
        let now = Instant::now();
        console.record_start(&Ok(()), now);
        assert!(console.refresh_run_state(now + Duration::from_secs(5)).is_empty());
        let updates = console.refresh_run_state(now + WINDOW);
        assert_eq!(updates, vec![ViewUpdate::RunState(RunState::Idle)]);
        assert!(console.optimistic_deadline().is_none());
    }

    #[test]
    fn later_initiated_snapshot_wins() {
        let mut console = console();
        let now = Instant::now();
        let ev = event(&console, ChannelEvent::Snapshot(outcome(2, "xhs", 20)));
        console.apply(ev, now);
        let ev = event(&console, ChannelEvent::Snapshot(outcome(1, "xhs", 10)));
        assert!(console.apply(ev, now).is_empty());
        assert_eq!(console.snapshot().map(|s| s.total), Some(20));
    }

    #[test]
    fn snapshot_for_deselected_source_is_dropped() {
        let mut console = console();
        let now = Instant::now();
        assert!(console.select_source("zhihu"));
        let ev = event(&console, ChannelEvent::Snapshot(outcome(1, "xhs", 5)));
        assert!(console.apply(ev, now).is_empty());
        assert!(console.snapshot().is_none());
        let ev = event(&console, ChannelEvent::Snapshot(outcome(2, "zhihu", 0)));
        console.apply(ev, now);
        assert_eq!(console.snapshot().map(|s| s.total), Some(0));
    }

    #[test]
    fn failed_snapshot_keeps_previous_one() {
        let mut console = console();
        let now = Instant::now();
        let ev = event(&console, ChannelEvent::Snapshot(outcome(1, "xhs", 7)));
        console.apply(ev, now);
        let failed = LoadOutcome {
            generation: 2,
            source: "xhs".to_string(),
            result: Err(FetchError::Api(ApiError::Transport("timeout".to_string()))),
        };
        let ev = event(&console, ChannelEvent::Snapshot(failed));
        console.apply(ev, now);
        assert_eq!(console.snapshot().map(|s| s.total), Some(7));
    }

    #[test]
    fn clear_leaves_only_the_cleared_notice() {
        let mut console = console();
        let now = Instant::now();
        let ev = event(&console, ChannelEvent::Log(server_entry("1")));
        console.apply(ev, now);
        let updates = console.clear_logs();
        assert_eq!(updates[0], ViewUpdate::LogCleared);
        assert_eq!(console.logs().len(), 1);
        let only = console.logs().iter().next().expect("entry");
        assert_eq!(only.message(), "[System] Log cleared");
    }

    #[test]
    fn paused_view_gets_backlog_on_resume() {
        let mut console = console();
        let now = Instant::now();
        console.pause_follow();
        let ev = event(&console, ChannelEvent::Log(server_entry("9")));
        assert!(console.apply(ev, now).is_empty());
        assert_eq!(console.logs().len(), 1);
        assert_eq!(console.view(None).unseen, 1);
        match console.resume_follow().as_slice() {
            [ViewUpdate::Resumed { backlog }] => assert_eq!(backlog.len(), 1),
            other => panic!("unexpected updates: {other:?}"),
        }
        assert_eq!(console.view(None).unseen, 0);
    }

    #[test]
    fn auth_failures_are_detected_on_both_polled_channels() {
        let unauthorized = FetchError::Api(ApiError::Unauthorized("expired".to_string()));
        assert!(ChannelEvent::Status(Err(unauthorized.clone())).is_auth_failure());
        let snapshot = ChannelEvent::Snapshot(LoadOutcome {
            generation: 1,
            source: "xhs".to_string(),
            result: Err(unauthorized),
        });
        assert!(snapshot.is_auth_failure());
        assert!(!ChannelEvent::Connection(ConnectionState::Open).is_auth_failure());
    }
}

use crate::console::{ChannelEvent, ConsoleEvent, EventSink};
use crate::log_stream::LogStreamClient;
use crate::snapshot_loader::{DataSnapshotLoader, LoadOutcome};
use crate::status_poller::StatusPoller;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    LogStream,
    Status,
    Snapshot,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::LogStream, Channel::Status, Channel::Snapshot];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::LogStream => "log_stream",
            Channel::Status => "status",
            Channel::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct ChannelTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the three channel tasks and their cancellation.
pub struct ChannelScheduler {
    root: CancellationToken,
    tasks: HashMap<Channel, ChannelTask>,
    selected_source: Option<watch::Sender<String>>,
    refresh: Option<Arc<Notify>>,
    log_stream: Arc<LogStreamClient>,
    status: Arc<StatusPoller>,
    loader: Arc<DataSnapshotLoader>,
    snapshot_interval: Duration,
}

impl ChannelScheduler {
    pub fn new(
        log_stream: Arc<LogStreamClient>,
        status: Arc<StatusPoller>,
        loader: Arc<DataSnapshotLoader>,
        snapshot_interval: Duration,
    ) -> Self {
        Self {
            root: CancellationToken::new(),
            tasks: HashMap::new(),
            selected_source: None,
            refresh: None,
            log_stream,
            status,
            loader,
            snapshot_interval,
        }
    }

    /// (Re)starts every channel for a freshly authenticated session epoch.
    pub fn start(
        &mut self,
        events: mpsc::Sender<ConsoleEvent>,
        epoch: u64,
        source: String,
        running: watch::Receiver<bool>,
    ) {
        self.stop_all();
        let sink = EventSink::new(events, epoch);
        info!("channels_start: epoch={epoch}");

        let log_stream = self.log_stream.clone();
        self.spawn(Channel::LogStream, sink.clone(), move |sink, cancel| async move {
            log_stream.run(sink, cancel).await;
        });

        let status = self.status.clone();
        self.spawn(Channel::Status, sink.clone(), move |sink, cancel| async move {
            status.run(sink, cancel).await;
        });

        let (source_tx, source_rx) = watch::channel(source);
        let refresh = Arc::new(Notify::new());
        self.selected_source = Some(source_tx);
        self.refresh = Some(refresh.clone());
        let loader = self.loader.clone();
        let interval = self.snapshot_interval;
        self.spawn(Channel::Snapshot, sink, move |sink, cancel| {
            snapshot_loop(loader, sink, cancel, source_rx, refresh, running, interval)
        });
    }

    fn spawn<F, Fut>(&mut self, channel: Channel, sink: EventSink, task: F)
    where
        F: FnOnce(EventSink, CancellationToken) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let cancel = self.root.child_token();
        let handle = tokio::spawn(task(sink, cancel.clone()));
        self.tasks.insert(channel, ChannelTask { cancel, handle });
    }

    /// Cancels one channel, leaving the others running.
    pub fn cancel(&mut self, channel: Channel) {
        if let Some(task) = self.tasks.remove(&channel) {
            task.cancel.cancel();
            debug!("channel_cancelled: {channel}");
        }
        if channel == Channel::Snapshot {
            self.selected_source = None;
            self.refresh = None;
        }
    }

    pub fn stop_all(&mut self) {
        for channel in Channel::ALL {
            self.cancel(channel);
        }
    }

    pub fn is_active(&self, channel: Channel) -> bool {
        self.tasks
            .get(&channel)
            .map(|task| !task.handle.is_finished())
            .unwrap_or(false)
    }

    /// Points the snapshot channel at another source. Only the latest selection is kept, so
    /// a burst of changes ends with a load of the last one. False when the channel is down.
    pub fn select_source(&self, source: &str) -> bool {
        match &self.selected_source {
            Some(tx) => {
                tx.send_replace(source.to_string());
                true
            }
            None => false,
        }
    }

    /// Requests an extra load of the current source. Pending requests coalesce.
    pub fn refresh_snapshot(&self) -> bool {
        match &self.refresh {
            Some(refresh) => {
                refresh.notify_one();
                true
            }
            None => false,
        }
    }

    pub fn shutdown(&mut self) {
        self.root.cancel();
        self.tasks.clear();
        self.selected_source = None;
        self.refresh = None;
    }
}

impl Drop for ChannelScheduler {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

/// Loads once up front, on every source change or refresh, and on a fixed cadence while the
/// run view is active.
async fn snapshot_loop(
    loader: Arc<DataSnapshotLoader>,
    sink: EventSink,
    cancel: CancellationToken,
    mut selected: watch::Receiver<String>,
    refresh: Arc<Notify>,
    mut running: watch::Receiver<bool>,
    interval: Duration,
) {
    let mut source = selected.borrow_and_update().clone();
    spawn_load(&loader, &sink, &cancel, &source);
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        let is_running = *running.borrow();
        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = selected.changed() => {
                if changed.is_err() {
                    return;
                }
                source = selected.borrow_and_update().clone();
                spawn_load(&loader, &sink, &cancel, &source);
            }
            _ = refresh.notified() => spawn_load(&loader, &sink, &cancel, &source),
            changed = running.changed() => {
                if changed.is_err() {
                    return;
                }
                if *running.borrow_and_update() {
                    ticker.reset();
                }
            }
            _ = ticker.tick(), if is_running => spawn_load(&loader, &sink, &cancel, &source),
        }
    }
}

/// Each load runs on its own task so a slow one never delays the next trigger.
fn spawn_load(
    loader: &Arc<DataSnapshotLoader>,
    sink: &EventSink,
    cancel: &CancellationToken,
    source: &str,
) {
    let generation = loader.begin();
    let loader = loader.clone();
    let sink = sink.clone();
    let cancel = cancel.clone();
    let source = source.to_string();
    tokio::spawn(async move {
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = loader.load(&source) => result,
        };
        if let Err(err) = &result {
            debug!("snapshot_load_error: source={source} {err}");
        }
        sink.emit(ChannelEvent::Snapshot(LoadOutcome {
            generation,
            source,
            result,
        }))
        .await;
    });
}

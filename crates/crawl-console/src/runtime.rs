use crate::api::CrawlerApi;
use crate::config::ChannelTimings;
use crate::console::{Console, ConsoleEvent, ConsoleView, ViewUpdate};
use crate::error::{AuthError, CommandError, ControlError, RuntimeStopped};
use crate::log_stream::{LogStreamClient, PushConnector};
use crate::run_control::RunController;
use crate::scheduler::ChannelScheduler;
use crate::session::{Session, SessionStore};
use crate::snapshot_loader::DataSnapshotLoader;
use crate::status_poller::StatusPoller;
use crawl_core::{CrawlConfig, Identity, LogLevel, SaveFormat};
use crawl_storage::ClientStateStore;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{info, warn};
use url::Url;

const COMMAND_QUEUE: usize = 64;
const EVENT_QUEUE: usize = 1024;
const UPDATE_QUEUE: usize = 1024;

/// Everything the runtime needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub stream_endpoint: Url,
    pub source: String,
    pub save_format: SaveFormat,
    pub preview_limit: usize,
    pub timings: ChannelTimings,
}

pub enum ConsoleCommand {
    Login {
        username: String,
        password: String,
        reply: oneshot::Sender<Result<Identity, AuthError>>,
    },
    Logout {
        reply: oneshot::Sender<()>,
    },
    Start {
        config: CrawlConfig,
        reply: oneshot::Sender<Result<(), ControlError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<(), CommandError>>,
    },
    SelectSource(String),
    Refresh,
    PauseFollow,
    ResumeFollow,
    ClearLogs,
    View {
        reply: oneshot::Sender<ConsoleView>,
    },
    Shutdown,
}

/// Cloneable front door to a running console.
#[derive(Clone)]
pub struct ConsoleHandle {
    commands: mpsc::Sender<ConsoleCommand>,
    updates: broadcast::Sender<ViewUpdate>,
}

impl ConsoleHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<ViewUpdate> {
        self.updates.subscribe()
    }

    pub async fn login(
        &self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Result<Identity, AuthError>, RuntimeStopped> {
        let username = username.into();
        let password = password.into();
        self.request(|reply| ConsoleCommand::Login {
            username,
            password,
            reply,
        })
        .await
    }

    pub async fn logout(&self) -> Result<(), RuntimeStopped> {
        self.request(|reply| ConsoleCommand::Logout { reply }).await
    }

    pub async fn start(
        &self,
        config: CrawlConfig,
    ) -> Result<Result<(), ControlError>, RuntimeStopped> {
        self.request(|reply| ConsoleCommand::Start { config, reply })
            .await
    }

    pub async fn stop(&self) -> Result<Result<(), CommandError>, RuntimeStopped> {
        self.request(|reply| ConsoleCommand::Stop { reply }).await
    }

    pub async fn view(&self) -> Result<ConsoleView, RuntimeStopped> {
        self.request(|reply| ConsoleCommand::View { reply }).await
    }

    pub async fn select_source(&self, source: impl Into<String>) -> Result<(), RuntimeStopped> {
        self.send(ConsoleCommand::SelectSource(source.into())).await
    }

    pub async fn refresh(&self) -> Result<(), RuntimeStopped> {
        self.send(ConsoleCommand::Refresh).await
    }

    pub async fn pause_follow(&self) -> Result<(), RuntimeStopped> {
        self.send(ConsoleCommand::PauseFollow).await
    }

    pub async fn resume_follow(&self) -> Result<(), RuntimeStopped> {
        self.send(ConsoleCommand::ResumeFollow).await
    }

    pub async fn clear_logs(&self) -> Result<(), RuntimeStopped> {
        self.send(ConsoleCommand::ClearLogs).await
    }

    pub async fn shutdown(&self) -> Result<(), RuntimeStopped> {
        self.send(ConsoleCommand::Shutdown).await
    }

    async fn send(&self, command: ConsoleCommand) -> Result<(), RuntimeStopped> {
        self.commands.send(command).await.map_err(|_| RuntimeStopped)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ConsoleCommand,
    ) -> Result<T, RuntimeStopped> {
        let (reply, response) = oneshot::channel();
        self.send(build(reply)).await?;
        response.await.map_err(|_| RuntimeStopped)
    }
}

/// Single writer of console state. Channel tasks only ever talk to it through events.
pub struct ConsoleRuntime {
    console: Console,
    sessions: SessionStore,
    controller: RunController,
    scheduler: ChannelScheduler,
    commands: mpsc::Receiver<ConsoleCommand>,
    events_tx: mpsc::Sender<ConsoleEvent>,
    events_rx: mpsc::Receiver<ConsoleEvent>,
    updates: broadcast::Sender<ViewUpdate>,
    running: watch::Sender<bool>,
    session_rx: watch::Receiver<Session>,
    channels_live: bool,
}

impl ConsoleRuntime {
    pub fn new(
        api: Arc<dyn CrawlerApi>,
        connector: Arc<dyn PushConnector>,
        storage: ClientStateStore,
        settings: RuntimeSettings,
    ) -> (Self, ConsoleHandle) {
        let timings = settings.timings;
        let sessions = SessionStore::new(api.clone(), storage);
        let ctx = sessions.context();
        let scheduler = ChannelScheduler::new(
            Arc::new(LogStreamClient::new(
                connector,
                ctx.clone(),
                settings.stream_endpoint,
                timings.reconnect_delay,
            )),
            Arc::new(StatusPoller::new(
                api.clone(),
                ctx.clone(),
                timings.status_interval,
            )),
            Arc::new(DataSnapshotLoader::new(
                api.clone(),
                ctx.clone(),
                settings.save_format,
                settings.preview_limit,
            )),
            timings.snapshot_interval,
        );
        let (commands_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let (updates, _) = broadcast::channel(UPDATE_QUEUE);
        let (running, _) = watch::channel(false);
        let runtime = Self {
            console: Console::new(settings.source, timings.optimistic_window),
            controller: RunController::new(api, ctx.clone()),
            session_rx: ctx.subscribe(),
            sessions,
            scheduler,
            commands,
            events_tx,
            events_rx,
            updates: updates.clone(),
            running,
            channels_live: false,
        };
        let handle = ConsoleHandle {
            commands: commands_tx,
            updates,
        };
        (runtime, handle)
    }

    pub async fn run(mut self) {
        self.sessions.restore().await;
        self.on_session_changed();
        loop {
            let deadline = self.console.optimistic_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(ConsoleCommand::Shutdown) | None => break,
                    Some(command) => {
                        self.handle_command(command).await;
                        self.sync_session();
                    }
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event),
                changed = self.session_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.on_session_changed();
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    let updates = self.console.refresh_run_state(Instant::now());
                    self.publish(updates);
                }
            }
        }
        self.scheduler.shutdown();
        info!("console_runtime_stopped");
    }

    fn on_session_changed(&mut self) {
        let session = self.session_rx.borrow_and_update().clone();
        if !session.is_authenticated() && !self.channels_live {
            self.publish(vec![ViewUpdate::Session(None)]);
            return;
        }
        let (epoch, mut updates) = self.console.begin_epoch();
        match session.identity() {
            Some(identity) if session.is_authenticated() => {
                self.scheduler.start(
                    self.events_tx.clone(),
                    epoch,
                    self.console.selected_source().to_string(),
                    self.running.subscribe(),
                );
                self.channels_live = true;
                updates.extend(self.console.narrate(
                    LogLevel::Info,
                    format!("Signed in as {}", identity.display_name),
                ));
            }
            _ => {
                self.scheduler.stop_all();
                self.channels_live = false;
                updates.extend(
                    self.console
                        .narrate(LogLevel::Warning, "Signed out, live channels stopped"),
                );
            }
        }
        updates.push(ViewUpdate::Session(session.identity().cloned()));
        self.publish(updates);
    }

    /// Applies a session change made on this task before anything else is processed, so no
    /// queued event of the ended epoch reaches the console.
    fn sync_session(&mut self) {
        if self.session_rx.has_changed().unwrap_or(false) {
            self.on_session_changed();
        }
    }

    fn handle_event(&mut self, event: ConsoleEvent) {
        if event.epoch == self.console.epoch() && event.event.is_auth_failure() {
            warn!("channel_auth_rejected");
            self.sessions.invalidate();
            self.sync_session();
        }
        let updates = self.console.apply(event, Instant::now());
        self.publish(updates);
    }

    async fn handle_command(&mut self, command: ConsoleCommand) {
        match command {
            ConsoleCommand::Login {
                username,
                password,
                reply,
            } => {
                let result = self
                    .sessions
                    .login(&username, &password)
                    .await
                    .and_then(|session| session.identity().cloned().ok_or(AuthError::Expired));
                if let Err(err) = &result {
                    let updates = self
                        .console
                        .narrate(LogLevel::Error, format!("Login failed: {err}"));
                    self.publish(updates);
                }
                let _ = reply.send(result);
            }
            ConsoleCommand::Logout { reply } => {
                self.sessions.logout().await;
                let _ = reply.send(());
            }
            ConsoleCommand::Start { config, reply } => {
                let result = self.controller.start(&config).await;
                if matches!(&result, Err(ControlError::Command(err)) if err.is_auth_failure()) {
                    self.sessions.invalidate();
                }
                let updates = self.console.record_start(&result, Instant::now());
                self.publish(updates);
                let _ = reply.send(result);
            }
            ConsoleCommand::Stop { reply } => {
                let result = self.controller.stop().await;
                if matches!(&result, Err(err) if err.is_auth_failure()) {
                    self.sessions.invalidate();
                }
                let updates = self.console.record_stop(&result, Instant::now());
                self.publish(updates);
                let _ = reply.send(result);
            }
            ConsoleCommand::SelectSource(source) => {
                if self.console.select_source(&source) {
                    self.scheduler.select_source(&source);
                }
            }
            ConsoleCommand::Refresh => {
                self.scheduler.refresh_snapshot();
            }
            ConsoleCommand::PauseFollow => self.console.pause_follow(),
            ConsoleCommand::ResumeFollow => {
                let updates = self.console.resume_follow();
                self.publish(updates);
            }
            ConsoleCommand::ClearLogs => {
                let updates = self.console.clear_logs();
                self.publish(updates);
            }
            ConsoleCommand::View { reply } => {
                let identity = self.sessions.current().identity().cloned();
                let _ = reply.send(self.console.view(identity));
            }
            ConsoleCommand::Shutdown => {}
        }
    }

    fn publish(&mut self, updates: Vec<ViewUpdate>) {
        for update in updates {
            let _ = self.updates.send(update);
        }
        let running = self.console.is_running_view();
        self.running.send_if_modified(|current| {
            if *current == running {
                return false;
            }
            *current = running;
            true
        });
    }
}

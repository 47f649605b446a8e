use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use crawl_console::config::{
    resolve_base_url, resolve_log_dir, resolve_log_level, resolve_log_stderr, resolve_state_db,
    ChannelTimings, DEFAULT_SOURCE,
};
use crawl_console::snapshot_loader::DEFAULT_PREVIEW_LIMIT;
use crawl_console::{
    log_stream_endpoint, ConsoleHandle, ConsoleRuntime, CrawlerApi, HttpCrawlerApi,
    RunController, RuntimeSettings, SessionStore, StatusPoller, ViewUpdate, WsConnector,
};
use crawl_core::{CrawlConfig, CrawlMode, LoginMethod, Platform, SaveFormat};
use crawl_storage::ClientStateStore;
use std::{
    fs::OpenOptions,
    io::{self, Write},
    path::PathBuf,
    sync::{Arc, Mutex as StdMutex},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "crawl-console")]
#[command(about = "Operator console for the crawler service", long_about = None)]
struct Cli {
    #[arg(long, global = true, default_value = "")]
    base_url: String,
    #[arg(long, global = true, default_value = "")]
    state_db: String,
    #[arg(long, global = true, default_value = "")]
    log_dir: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sign in and remember the session
    Login {
        #[arg(long)]
        username: String,
        #[arg(long, env = "CRAWL_CONSOLE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Sign out and forget the session
    Logout,
    /// Show the signed-in operator
    Whoami,
    /// Print the crawler status once
    Status,
    /// Start a crawl job
    Start(StartArgs),
    /// Stop the running crawl job
    Stop,
    /// Follow logs, status and data previews live
    Watch(WatchArgs),
}

#[derive(Args, Debug)]
struct StartArgs {
    #[arg(long, default_value = "xhs")]
    platform: Platform,
    #[arg(long = "type", default_value = "search")]
    crawler_type: CrawlMode,
    #[arg(long, default_value = "qrcode")]
    login_type: LoginMethod,
    #[arg(long, default_value = "json")]
    save_option: SaveFormat,
    #[arg(long, default_value = "")]
    keywords: String,
    #[arg(long, default_value = "")]
    specified_ids: String,
    #[arg(long, default_value = "")]
    creator_ids: String,
    #[arg(long, default_value_t = 1)]
    start_page: u32,
    #[arg(long)]
    max_pages: Option<u32>,
    #[arg(long)]
    no_comments: bool,
    #[arg(long)]
    sub_comments: bool,
    #[arg(long, default_value = "")]
    cookies: String,
    #[arg(long)]
    headless: bool,
}

impl StartArgs {
    fn into_config(self) -> CrawlConfig {
        CrawlConfig {
            platform: self.platform,
            crawler_type: self.crawler_type,
            login_type: self.login_type,
            save_option: self.save_option,
            keywords: self.keywords,
            specified_ids: self.specified_ids,
            creator_ids: self.creator_ids,
            start_page: self.start_page,
            max_pages: self.max_pages,
            enable_comments: !self.no_comments,
            enable_sub_comments: self.sub_comments,
            cookies: self.cookies,
            headless: self.headless,
        }
    }
}

#[derive(Args, Debug)]
struct WatchArgs {
    #[arg(long, default_value = DEFAULT_SOURCE)]
    source: String,
    #[arg(long, default_value = "json")]
    save_format: SaveFormat,
    #[arg(long, default_value_t = DEFAULT_PREVIEW_LIMIT)]
    preview_limit: usize,
}

struct LogGuard {
    file: Option<Arc<StdMutex<std::fs::File>>>,
}

struct MultiWriter {
    stderr_enabled: bool,
    file: Option<Arc<StdMutex<std::fs::File>>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(&resolve_log_dir(&cli.log_dir));

    let base_url = resolve_base_url(&cli.base_url).context("invalid base url")?;
    let state_db = resolve_state_db(&cli.state_db);
    let storage = ClientStateStore::open(&state_db)
        .with_context(|| format!("failed to open state db {}", state_db.display()))?;
    let api: Arc<dyn CrawlerApi> = Arc::new(HttpCrawlerApi::new(&base_url)?);
    let timings = ChannelTimings::default();

    match cli.command {
        Commands::Login { username, password } => {
            let sessions = SessionStore::new(api, storage);
            let session = sessions.login(&username, &password).await?;
            if let Some(identity) = session.identity() {
                println!("Signed in as {}", identity.display_name);
            }
        }
        Commands::Logout => {
            let sessions = SessionStore::new(api, storage);
            sessions.restore().await;
            sessions.logout().await;
            println!("Signed out");
        }
        Commands::Whoami => {
            let sessions = SessionStore::new(api, storage);
            match sessions.restore().await.identity() {
                Some(identity) => println!("{} (id {})", identity.display_name, identity.id),
                None => println!("Not signed in"),
            }
        }
        Commands::Status => {
            let sessions = signed_in(api.clone(), storage).await?;
            let poller = StatusPoller::new(api, sessions.context(), timings.status_interval);
            let status = poller.fetch().await?;
            println!(
                "{} notes={} comments={}",
                status.state, status.notes_count, status.comments_count
            );
            if let Some(platform) = &status.platform {
                println!("platform={platform}");
            }
            if let Some(started_at) = &status.started_at {
                println!("started_at={started_at}");
            }
            if let Some(message) = &status.error_message {
                println!("error={message}");
            }
        }
        Commands::Start(args) => {
            let config = args.into_config();
            config.validate()?;
            let sessions = signed_in(api.clone(), storage).await?;
            RunController::new(api, sessions.context())
                .start(&config)
                .await?;
            println!(
                "Crawler start requested: {} {}",
                config.platform, config.crawler_type
            );
        }
        Commands::Stop => {
            let sessions = signed_in(api.clone(), storage).await?;
            RunController::new(api, sessions.context()).stop().await?;
            println!("Crawler stop requested");
        }
        Commands::Watch(args) => {
            let settings = RuntimeSettings {
                stream_endpoint: log_stream_endpoint(&base_url)?,
                source: args.source,
                save_format: args.save_format,
                preview_limit: args.preview_limit,
                timings,
            };
            run_watch(api, storage, settings).await?;
        }
    }

    Ok(())
}

async fn signed_in(api: Arc<dyn CrawlerApi>, storage: ClientStateStore) -> Result<SessionStore> {
    if !storage.has_session()? {
        bail!("not signed in; run `crawl-console login` first");
    }
    let sessions = SessionStore::new(api, storage);
    if !sessions.restore().await.is_authenticated() {
        bail!("stored session was rejected; run `crawl-console login` again");
    }
    Ok(sessions)
}

async fn run_watch(
    api: Arc<dyn CrawlerApi>,
    storage: ClientStateStore,
    settings: RuntimeSettings,
) -> Result<()> {
    let (runtime, handle) = ConsoleRuntime::new(api, Arc::new(WsConnector), storage, settings);
    let mut updates = handle.subscribe();
    let runtime_task = tokio::spawn(runtime.run());
    let mut operator = tokio::spawn(read_operator_commands(handle.clone()));
    let mut operator_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = updates.recv() => match update {
                Ok(update) => render(&update),
                Err(RecvError::Lagged(skipped)) => warn!("view_updates_lagged: {skipped}"),
                Err(RecvError::Closed) => break,
            },
            quit = &mut operator, if operator_open => {
                operator_open = false;
                if matches!(quit, Ok(true)) {
                    break;
                }
            }
        }
    }

    let _ = handle.shutdown().await;
    runtime_task.await.context("console runtime panicked")?;
    Ok(())
}

/// Reads operator commands from stdin. Returns true when the operator asked to quit.
async fn read_operator_commands(handle: ConsoleHandle) -> bool {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return false,
            Err(err) => {
                warn!("stdin_read_error: {err}");
                return false;
            }
        };
        let mut parts = line.split_whitespace();
        let sent = match (parts.next(), parts.next()) {
            (Some("pause"), _) => handle.pause_follow().await,
            (Some("resume"), _) => handle.resume_follow().await,
            (Some("clear"), _) => handle.clear_logs().await,
            (Some("refresh"), _) => handle.refresh().await,
            (Some("source"), Some(source)) => handle.select_source(source).await,
            (Some("stop"), _) => match handle.stop().await {
                Ok(Err(err)) => {
                    eprintln!("stop failed: {err}");
                    Ok(())
                }
                other => other.map(|_| ()),
            },
            (Some("quit"), _) | (Some("exit"), _) => return true,
            (None, _) => Ok(()),
            (Some(other), _) => {
                eprintln!(
                    "unknown command: {other} (pause, resume, clear, refresh, source <name>, stop, quit)"
                );
                Ok(())
            }
        };
        if sent.is_err() {
            return true;
        }
    }
}

fn render(update: &ViewUpdate) {
    match update {
        ViewUpdate::LogAppended(entry) => {
            println!("{} [{}] {}", entry.timestamp(), entry.level(), entry.message())
        }
        ViewUpdate::LogCleared => println!("-- log cleared --"),
        ViewUpdate::Resumed { backlog } => {
            for entry in backlog {
                println!("{} [{}] {}", entry.timestamp(), entry.level(), entry.message());
            }
        }
        ViewUpdate::Connection(state) => println!("== log stream {state}"),
        ViewUpdate::RunState(state) => println!("== crawler {state}"),
        ViewUpdate::Status(status) => {
            if let Some(message) = &status.error_message {
                println!("== crawler error: {message}");
            }
        }
        ViewUpdate::Snapshot(snapshot) => println!(
            "== {} preview: {} of {} records{}",
            snapshot.source,
            snapshot.items.len(),
            snapshot.total,
            snapshot
                .file
                .as_deref()
                .map(|file| format!(" from {file}"))
                .unwrap_or_default()
        ),
        ViewUpdate::Session(Some(identity)) => println!("== signed in as {}", identity.display_name),
        ViewUpdate::Session(None) => println!("== not signed in; run `crawl-console login`"),
    }
}

fn init_logging(log_dir: &str) -> Option<LogGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(resolve_log_level()));
    let writer = match open_log_file(log_dir) {
        Ok(log_guard) => log_guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = writer.file.clone();
    let stderr_enabled = resolve_log_stderr();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone(), stderr_enabled));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(writer)
}

impl MultiWriter {
    fn new(file: Option<Arc<StdMutex<std::fs::File>>>, stderr_enabled: bool) -> Self {
        Self {
            stderr_enabled,
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.stderr_enabled {
            let _ = io::stderr().write_all(buf);
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.stderr_enabled {
            let _ = io::stderr().flush();
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

fn open_log_file(log_dir: &str) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard { file: None });
    }
    let dir = PathBuf::from(log_dir);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(format!(
        "crawl-console-{}-{}.log",
        Utc::now().format("%Y%m%d"),
        std::process::id()
    ));
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(LogGuard {
        file: Some(Arc::new(StdMutex::new(file))),
    })
}

use crate::api::CrawlerApi;
use crate::error::{CommandError, ControlError};
use crate::session::SessionContext;
use crawl_core::{CrawlConfig, CrawlerStatus, RunState};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

pub const DEFAULT_OPTIMISTIC_WINDOW: Duration = Duration::from_secs(6);

/// Locally assumed run state after a successful command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimisticRun {
    pub state: RunState,
    pub set_at: Instant,
}

/// Optimistic and authoritative run state side by side.
#[derive(Debug, Clone)]
pub struct RunView {
    authoritative: Option<CrawlerStatus>,
    optimistic: Option<OptimisticRun>,
    window: Duration,
}

impl RunView {
    pub fn new(window: Duration) -> Self {
        Self {
            authoritative: None,
            optimistic: None,
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Any authoritative result replaces the status and discards the optimistic value.
    pub fn apply_authoritative(&mut self, status: CrawlerStatus) {
        self.authoritative = Some(status);
        self.optimistic = None;
    }

    pub fn set_optimistic(&mut self, state: RunState, now: Instant) {
        self.optimistic = Some(OptimisticRun { state, set_at: now });
    }

    pub fn expire(&mut self, now: Instant) {
        if let Some(optimistic) = self.optimistic {
            if now.saturating_duration_since(optimistic.set_at) >= self.window {
                self.optimistic = None;
            }
        }
    }

    pub fn state(&self, now: Instant) -> RunState {
        reconcile(
            self.optimistic.as_ref(),
            self.authoritative.as_ref(),
            now,
            self.window,
        )
    }

    pub fn is_running_view(&self, now: Instant) -> bool {
        self.state(now).is_active()
    }

    pub fn authoritative(&self) -> Option<&CrawlerStatus> {
        self.authoritative.as_ref()
    }

    pub fn optimistic(&self) -> Option<&OptimisticRun> {
        self.optimistic.as_ref()
    }

    pub fn optimistic_deadline(&self) -> Option<Instant> {
        self.optimistic
            .map(|optimistic| optimistic.set_at + self.window)
    }
}

/// Optimistic state wins only inside its window; otherwise the last authoritative
/// state, or idle when nothing has been heard yet.
pub fn reconcile(
    optimistic: Option<&OptimisticRun>,
    authoritative: Option<&CrawlerStatus>,
    now: Instant,
    window: Duration,
) -> RunState {
    if let Some(optimistic) = optimistic {
        if now.saturating_duration_since(optimistic.set_at) < window {
            return optimistic.state;
        }
    }
    authoritative
        .map(|status| status.state)
        .unwrap_or_default()
}

/// Issues start/stop commands. The resulting optimistic state is applied by the console.
pub struct RunController {
    api: Arc<dyn CrawlerApi>,
    ctx: SessionContext,
}

impl RunController {
    pub fn new(api: Arc<dyn CrawlerApi>, ctx: SessionContext) -> Self {
        Self { api, ctx }
    }

    /// Validates locally first; an invalid config never reaches the network.
    pub async fn start(&self, config: &CrawlConfig) -> Result<(), ControlError> {
        config.validate()?;
        let credential = self.ctx.credential().ok_or(CommandError::NotAuthenticated)?;
        self.api
            .start_crawl(&credential, config)
            .await
            .map_err(|err| {
                warn!("crawl_start_error: {err}");
                CommandError::from(err)
            })?;
        info!(
            "crawl_started: platform={} mode={}",
            config.platform, config.crawler_type
        );
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), CommandError> {
        let credential = self.ctx.credential().ok_or(CommandError::NotAuthenticated)?;
        self.api.stop_crawl(&credential).await.map_err(|err| {
            warn!("crawl_stop_error: {err}");
            CommandError::from(err)
        })?;
        info!("crawl_stop_requested");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::testing::{signed_in_context, StubApi};
    use crawl_core::{CrawlMode, ValidationError};

    const WINDOW: Duration = Duration::from_secs(6);

    fn status(state: RunState) -> CrawlerStatus {
        CrawlerStatus {
            state,
            ..CrawlerStatus::default()
        }
    }

    #[test]
    fn reconcile_prefers_fresh_optimistic_state() {
        let now = Instant::now();
        let optimistic = OptimisticRun {
            state: RunState::Running,
            set_at: now,
        };
        let idle = status(RunState::Idle);
        assert_eq!(
            reconcile(Some(&optimistic), Some(&idle), now + Duration::from_secs(2), WINDOW),
            RunState::Running
        );
        assert_eq!(
            reconcile(Some(&optimistic), Some(&idle), now + WINDOW, WINDOW),
            RunState::Idle
        );
        assert_eq!(reconcile(None, None, now, WINDOW), RunState::Idle);
    }

    #[test]
    fn authoritative_result_clears_optimistic_value() {
        let now = Instant::now();
        let mut view = RunView::new(WINDOW);
        view.set_optimistic(RunState::Running, now);
        assert!(view.is_running_view(now));
        view.apply_authoritative(status(RunState::Idle));
        assert!(view.optimistic().is_none());
        assert!(!view.is_running_view(now));
    }

    #[test]
    fn stopping_counts_as_running_view() {
        let mut view = RunView::new(WINDOW);
        view.apply_authoritative(status(RunState::Stopping));
        assert!(view.is_running_view(Instant::now()));
    }

    #[tokio::test]
    async fn search_without_keywords_never_hits_network() {
        let api = Arc::new(StubApi::default());
        let controller = RunController::new(api.clone(), signed_in_context());
        let config = CrawlConfig {
            crawler_type: CrawlMode::Search,
            keywords: "  ".to_string(),
            ..CrawlConfig::default()
        };
        let err = controller.start(&config).await.expect_err("invalid");
        assert_eq!(err, ControlError::Validation(ValidationError::MissingKeywords));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn start_requires_a_session() {
        let api = Arc::new(StubApi::default());
        let controller = RunController::new(api.clone(), SessionContext::new());
        let config = CrawlConfig {
            keywords: "coffee".to_string(),
            ..CrawlConfig::default()
        };
        let err = controller.start(&config).await.expect_err("anonymous");
        assert_eq!(err, ControlError::Command(CommandError::NotAuthenticated));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn remote_rejection_is_propagated() {
        let api = Arc::new(StubApi::default());
        api.set_start_result(Err(ApiError::Rejected {
            status: 400,
            detail: "crawler already running".to_string(),
        }));
        let controller = RunController::new(api.clone(), signed_in_context());
        let config = CrawlConfig {
            keywords: "coffee".to_string(),
            ..CrawlConfig::default()
        };
        let err = controller.start(&config).await.expect_err("rejected");
        assert!(matches!(
            err,
            ControlError::Command(CommandError::Rejected { status: 400, .. })
        ));
        assert_eq!(api.calls(), vec!["start_crawl".to_string()]);
    }

    #[tokio::test]
    async fn stop_has_no_preconditions_beyond_session() {
        let api = Arc::new(StubApi::default());
        let controller = RunController::new(api.clone(), signed_in_context());
        controller.stop().await.expect("stop");
        assert_eq!(api.calls(), vec!["stop_crawl".to_string()]);
    }
}

use crate::api::CrawlerApi;
use crate::error::AuthError;
use crawl_core::{Credential, Identity};
use crawl_storage::{ClientStateStore, StorageError};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{info, warn};

/// Who the console is acting as. Identity is only held alongside a validated credential.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Session {
    credential: Option<Credential>,
    identity: Option<Identity>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(credential: Credential, identity: Identity) -> Self {
        Self {
            credential: Some(credential),
            identity: Some(identity),
        }
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.credential.is_some()
    }
}

/// Shared, observable view of the current session handed to every channel.
#[derive(Clone)]
pub struct SessionContext {
    tx: Arc<watch::Sender<Session>>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Session::anonymous());
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Session {
        self.tx.borrow().clone()
    }

    /// Read fresh on every use so a cleared session is seen immediately.
    pub fn credential(&self) -> Option<Credential> {
        self.tx.borrow().credential().cloned()
    }

    pub fn is_authenticated(&self) -> bool {
        self.tx.borrow().is_authenticated()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.tx.subscribe()
    }

    pub(crate) fn replace(&self, session: Session) {
        self.tx.send_replace(session);
    }
}

pub struct SessionStore {
    api: Arc<dyn CrawlerApi>,
    storage: Mutex<ClientStateStore>,
    ctx: SessionContext,
}

impl SessionStore {
    pub fn new(api: Arc<dyn CrawlerApi>, storage: ClientStateStore) -> Self {
        Self {
            api,
            storage: Mutex::new(storage),
            ctx: SessionContext::new(),
        }
    }

    pub fn context(&self) -> SessionContext {
        self.ctx.clone()
    }

    pub fn current(&self) -> Session {
        self.ctx.current()
    }

    /// Revalidates a persisted credential. Anything short of a confirmed identity
    /// leaves the console anonymous with storage wiped.
    pub async fn restore(&self) -> Session {
        let stored = match self.with_storage(|store| store.load_credential()) {
            Ok(credential) => credential,
            Err(err) => {
                warn!("session_restore_storage_error: {err}");
                None
            }
        };
        let Some(credential) = stored else {
            self.ctx.replace(Session::anonymous());
            return Session::anonymous();
        };

        match self.api.get_identity(&credential).await {
            Ok(identity) => {
                if let Err(err) = self.with_storage(|store| store.save_session(&credential, &identity))
                {
                    warn!("session_persist_error: {err}");
                }
                info!("session_restored: user={}", identity.display_name);
                let session = Session::authenticated(credential, identity);
                self.ctx.replace(session.clone());
                session
            }
            Err(err) => {
                warn!("session_restore_rejected: {err}");
                self.clear();
                Session::anonymous()
            }
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Session, AuthError> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(AuthError::InvalidCredentials(
                "username and password are required".to_string(),
            ));
        }
        let grant = self.api.authenticate(username, password).await?;
        self.with_storage(|store| store.save_session(&grant.credential, &grant.identity))?;
        info!("session_login: user={}", grant.identity.display_name);
        let session = Session::authenticated(grant.credential, grant.identity);
        self.ctx.replace(session.clone());
        Ok(session)
    }

    /// Best-effort remote logout; local state is cleared regardless.
    pub async fn logout(&self) {
        if let Some(credential) = self.ctx.credential() {
            if let Err(err) = self.api.invalidate_session(&credential).await {
                warn!("session_logout_remote_error: {err}");
            }
        }
        self.clear();
        info!("session_logout");
    }

    /// Drops the session after a channel saw the server reject it.
    pub fn invalidate(&self) {
        if !self.ctx.is_authenticated() {
            return;
        }
        warn!("session_invalidated");
        self.clear();
    }

    fn clear(&self) {
        if let Err(err) = self.with_storage(|store| store.clear_session()) {
            warn!("session_clear_storage_error: {err}");
        }
        self.ctx.replace(Session::anonymous());
    }

    fn with_storage<T>(
        &self,
        op: impl FnOnce(&ClientStateStore) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let store = self
            .storage
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        op(&store)
    }

    #[cfg(test)]
    pub(crate) fn persisted_credential(&self) -> Option<Credential> {
        self.with_storage(|store| store.load_credential())
            .ok()
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::LoginGrant;
    use crate::error::ApiError;
    use async_trait::async_trait;
    use crawl_core::{CrawlConfig, CrawlerStatus, FileContent, FileDescriptor, SaveFormat};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct AuthApi {
        accept: Option<String>,
        logout_fails: bool,
        logout_calls: AtomicUsize,
    }

    fn admin() -> Identity {
        Identity {
            id: "1".to_string(),
            display_name: "admin".to_string(),
        }
    }

    #[async_trait]
    impl CrawlerApi for AuthApi {
        async fn authenticate(&self, username: &str, password: &str) -> Result<LoginGrant, ApiError> {
            if username == "admin" && password == "admin123" {
                Ok(LoginGrant {
                    credential: Credential::new("fresh-token"),
                    identity: admin(),
                })
            } else {
                Err(ApiError::Unauthorized("bad password".to_string()))
            }
        }

        async fn get_identity(&self, credential: &Credential) -> Result<Identity, ApiError> {
            match &self.accept {
                Some(token) if token == credential.as_str() => Ok(admin()),
                _ => Err(ApiError::Unauthorized("expired".to_string())),
            }
        }

        async fn invalidate_session(&self, _credential: &Credential) -> Result<(), ApiError> {
            self.logout_calls.fetch_add(1, Ordering::SeqCst);
            if self.logout_fails {
                Err(ApiError::Transport("connection reset".to_string()))
            } else {
                Ok(())
            }
        }

        async fn get_status(&self, _credential: &Credential) -> Result<CrawlerStatus, ApiError> {
            Ok(CrawlerStatus::default())
        }

        async fn start_crawl(
            &self,
            _credential: &Credential,
            _config: &CrawlConfig,
        ) -> Result<(), ApiError> {
            Ok(())
        }

        async fn stop_crawl(&self, _credential: &Credential) -> Result<(), ApiError> {
            Ok(())
        }

        async fn list_files(
            &self,
            _credential: &Credential,
            _source: &str,
            _format: SaveFormat,
        ) -> Result<Vec<FileDescriptor>, ApiError> {
            Ok(Vec::new())
        }

        async fn get_file_content(
            &self,
            _credential: &Credential,
            _path: &str,
            _preview_limit: usize,
        ) -> Result<FileContent, ApiError> {
            Ok(FileContent::default())
        }
    }

    fn store_with(api: AuthApi, persisted: Option<&str>) -> SessionStore {
        let storage = ClientStateStore::open_in_memory().expect("open db");
        if let Some(token) = persisted {
            storage
                .save_session(&Credential::new(token), &admin())
                .expect("seed session");
        }
        SessionStore::new(Arc::new(api), storage)
    }

    #[tokio::test]
    async fn restore_with_valid_credential_authenticates() {
        let api = AuthApi {
            accept: Some("good".to_string()),
            ..AuthApi::default()
        };
        let store = store_with(api, Some("good"));
        let session = store.restore().await;
        assert!(session.is_authenticated());
        assert_eq!(session.identity(), Some(&admin()));
        assert!(store.context().is_authenticated());
    }

    #[tokio::test]
    async fn restore_with_rejected_credential_clears_storage() {
        let store = store_with(AuthApi::default(), Some("stale"));
        let session = store.restore().await;
        assert!(!session.is_authenticated());
        assert!(session.identity().is_none());
        assert!(store.persisted_credential().is_none());
    }

    #[tokio::test]
    async fn restore_without_credential_is_anonymous() {
        let store = store_with(AuthApi::default(), None);
        assert_eq!(store.restore().await, Session::anonymous());
    }

    #[tokio::test]
    async fn login_persists_and_publishes_session() {
        let store = store_with(AuthApi::default(), None);
        let mut rx = store.context().subscribe();
        let session = store.login("admin", "admin123").await.expect("login");
        assert!(session.is_authenticated());
        assert_eq!(
            store.persisted_credential(),
            Some(Credential::new("fresh-token"))
        );
        rx.changed().await.expect("session change");
        assert!(rx.borrow().is_authenticated());
    }

    #[tokio::test]
    async fn login_failure_is_propagated_and_keeps_anonymous() {
        let store = store_with(AuthApi::default(), None);
        let err = store.login("admin", "wrong").await.expect_err("should fail");
        assert!(matches!(err, AuthError::InvalidCredentials(_)));
        assert!(!store.current().is_authenticated());
        assert!(store.persisted_credential().is_none());
    }

    #[tokio::test]
    async fn logout_clears_even_when_remote_fails() {
        let api = Arc::new(AuthApi {
            logout_fails: true,
            ..AuthApi::default()
        });
        let storage = ClientStateStore::open_in_memory().expect("open db");
        let store = SessionStore::new(api.clone(), storage);
        store.login("admin", "admin123").await.expect("login");
        store.logout().await;
        assert_eq!(api.logout_calls.load(Ordering::SeqCst), 1);
        assert!(!store.current().is_authenticated());
        assert!(store.persisted_credential().is_none());
    }

    #[tokio::test]
    async fn invalidate_skips_remote_call() {
        let api = Arc::new(AuthApi::default());
        let storage = ClientStateStore::open_in_memory().expect("open db");
        let store = SessionStore::new(api.clone(), storage);
        store.login("admin", "admin123").await.expect("login");
        store.invalidate();
        assert_eq!(api.logout_calls.load(Ordering::SeqCst), 0);
        assert!(store.context().credential().is_none());
        assert!(store.persisted_credential().is_none());
    }
}

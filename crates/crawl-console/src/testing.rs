use crate::api::{CrawlerApi, LoginGrant};
use crate::error::ApiError;
use crate::session::{Session, SessionContext};
use async_trait::async_trait;
use crawl_core::{
    CrawlConfig, CrawlerStatus, Credential, FileContent, FileDescriptor, Identity, SaveFormat,
};
use std::collections::HashMap;
use std::sync::Mutex;

/// Scriptable in-memory `CrawlerApi` that records each call by name.
pub(crate) struct StubApi {
    calls: Mutex<Vec<String>>,
    status: Mutex<Result<CrawlerStatus, ApiError>>,
    start_result: Mutex<Result<(), ApiError>>,
    files: Mutex<HashMap<String, Vec<FileDescriptor>>>,
    contents: Mutex<HashMap<String, FileContent>>,
}

impl Default for StubApi {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            status: Mutex::new(Ok(CrawlerStatus::default())),
            start_result: Mutex::new(Ok(())),
            files: Mutex::new(HashMap::new()),
            contents: Mutex::new(HashMap::new()),
        }
    }
}

impl StubApi {
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub(crate) fn count(&self, name: &str) -> usize {
        self.calls().iter().filter(|call| call.as_str() == name).count()
    }

    pub(crate) fn set_status(&self, status: Result<CrawlerStatus, ApiError>) {
        *self.status.lock().expect("status lock") = status;
    }

    pub(crate) fn set_start_result(&self, result: Result<(), ApiError>) {
        *self.start_result.lock().expect("start lock") = result;
    }

    pub(crate) fn add_file(&self, source: &str, name: &str, rows: serde_json::Value) {
        let path = format!("{source}/json/{name}");
        let total = rows.as_array().map(|rows| rows.len() as u64).unwrap_or(1);
        self.files
            .lock()
            .expect("files lock")
            .entry(source.to_string())
            .or_default()
            .push(FileDescriptor {
                name: name.to_string(),
                path: path.clone(),
                size: 0,
                modified_at: None,
                record_count: Some(total),
                kind: Some("json".to_string()),
            });
        self.contents
            .lock()
            .expect("contents lock")
            .insert(path, FileContent { data: rows, total });
    }

    fn record(&self, name: &str) {
        self.calls.lock().expect("calls lock").push(name.to_string());
    }
}

pub(crate) fn admin() -> Identity {
    Identity {
        id: "1".to_string(),
        display_name: "admin".to_string(),
    }
}

pub(crate) fn signed_in_context() -> SessionContext {
    let ctx = SessionContext::new();
    ctx.replace(Session::authenticated(Credential::new("tok"), admin()));
    ctx
}

#[async_trait]
impl CrawlerApi for StubApi {
    async fn authenticate(&self, _username: &str, _password: &str) -> Result<LoginGrant, ApiError> {
        self.record("authenticate");
        Ok(LoginGrant {
            credential: Credential::new("tok"),
            identity: admin(),
        })
    }

    async fn get_identity(&self, _credential: &Credential) -> Result<Identity, ApiError> {
        self.record("get_identity");
        Ok(admin())
    }

    async fn invalidate_session(&self, _credential: &Credential) -> Result<(), ApiError> {
        self.record("invalidate_session");
        Ok(())
    }

    async fn get_status(&self, _credential: &Credential) -> Result<CrawlerStatus, ApiError> {
        self.record("get_status");
        self.status.lock().expect("status lock").clone()
    }

    async fn start_crawl(
        &self,
        _credential: &Credential,
        _config: &CrawlConfig,
    ) -> Result<(), ApiError> {
        self.record("start_crawl");
        self.start_result.lock().expect("start lock").clone()
    }

    async fn stop_crawl(&self, _credential: &Credential) -> Result<(), ApiError> {
        self.record("stop_crawl");
        Ok(())
    }

    async fn list_files(
        &self,
        _credential: &Credential,
        source: &str,
        _format: SaveFormat,
    ) -> Result<Vec<FileDescriptor>, ApiError> {
        self.record("list_files");
        Ok(self
            .files
            .lock()
            .expect("files lock")
            .get(source)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_file_content(
        &self,
        _credential: &Credential,
        path: &str,
        _preview_limit: usize,
    ) -> Result<FileContent, ApiError> {
        self.record("get_file_content");
        self.contents
            .lock()
            .expect("contents lock")
            .get(path)
            .cloned()
            .ok_or_else(|| ApiError::Rejected {
                status: 404,
                detail: format!("file not found: {path}"),
            })
    }
}

use crate::error::ApiError;
use async_trait::async_trait;
use crawl_core::{
    CrawlConfig, CrawlerStatus, Credential, FileContent, FileDescriptor, FileListing, Identity,
    SaveFormat,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

/// Credential and identity issued by a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginGrant {
    pub credential: Credential,
    pub identity: Identity,
}

/// Remote operations of the crawler service.
#[async_trait]
pub trait CrawlerApi: Send + Sync {
    async fn authenticate(&self, username: &str, password: &str) -> Result<LoginGrant, ApiError>;

    async fn get_identity(&self, credential: &Credential) -> Result<Identity, ApiError>;

    async fn invalidate_session(&self, credential: &Credential) -> Result<(), ApiError>;

    async fn get_status(&self, credential: &Credential) -> Result<CrawlerStatus, ApiError>;

    async fn start_crawl(
        &self,
        credential: &Credential,
        config: &CrawlConfig,
    ) -> Result<(), ApiError>;

    async fn stop_crawl(&self, credential: &Credential) -> Result<(), ApiError>;

    async fn list_files(
        &self,
        credential: &Credential,
        source: &str,
        format: SaveFormat,
    ) -> Result<Vec<FileDescriptor>, ApiError>;

    async fn get_file_content(
        &self,
        credential: &Credential,
        path: &str,
        preview_limit: usize,
    ) -> Result<FileContent, ApiError>;
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    access_token: String,
    #[serde(default)]
    user: Option<Identity>,
}

/// `CrawlerApi` over the service's JSON HTTP interface.
#[derive(Clone)]
pub struct HttpCrawlerApi {
    http: Client,
    api_root: Url,
}

impl HttpCrawlerApi {
    pub fn new(base_url: &Url) -> Result<Self, ApiError> {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: &Url) -> Result<Self, ApiError> {
        let api_root = api_root(base_url)?;
        Ok(Self { http, api_root })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.api_root
            .join(path)
            .map_err(|err| ApiError::InvalidResponse(format!("bad endpoint {path}: {err}")))
    }

    fn file_endpoint(&self, file_path: &str) -> Result<Url, ApiError> {
        let mut url = self.endpoint("data/files/")?;
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidResponse("base url cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(file_path.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        request
            .send()
            .await
            .map_err(|err| ApiError::Transport(err.to_string()))
    }
}

#[async_trait]
impl CrawlerApi for HttpCrawlerApi {
    async fn authenticate(&self, username: &str, password: &str) -> Result<LoginGrant, ApiError> {
        let url = self.endpoint("auth/login")?;
        let response = self
            .send(self.http.post(url).json(&LoginRequest { username, password }))
            .await?;
        let login: LoginResponse = decode(response).await?;
        let credential = Credential::new(login.access_token);
        let identity = match login.user {
            Some(identity) => identity,
            None => self.get_identity(&credential).await?,
        };
        Ok(LoginGrant {
            credential,
            identity,
        })
    }

    async fn get_identity(&self, credential: &Credential) -> Result<Identity, ApiError> {
        let url = self.endpoint("auth/me")?;
        let response = self
            .send(self.http.get(url).bearer_auth(credential.as_str()))
            .await?;
        decode(response).await
    }

    async fn invalidate_session(&self, credential: &Credential) -> Result<(), ApiError> {
        let url = self.endpoint("auth/logout")?;
        let response = self
            .send(self.http.post(url).bearer_auth(credential.as_str()))
            .await?;
        expect_success(response).await
    }

    async fn get_status(&self, credential: &Credential) -> Result<CrawlerStatus, ApiError> {
        let url = self.endpoint("crawler/status")?;
        let response = self
            .send(self.http.get(url).bearer_auth(credential.as_str()))
            .await?;
        decode(response).await
    }

    async fn start_crawl(
        &self,
        credential: &Credential,
        config: &CrawlConfig,
    ) -> Result<(), ApiError> {
        let url = self.endpoint("crawler/start")?;
        let response = self
            .send(
                self.http
                    .post(url)
                    .bearer_auth(credential.as_str())
                    .json(&config.normalized()),
            )
            .await?;
        expect_success(response).await
    }

    async fn stop_crawl(&self, credential: &Credential) -> Result<(), ApiError> {
        let url = self.endpoint("crawler/stop")?;
        let response = self
            .send(self.http.post(url).bearer_auth(credential.as_str()))
            .await?;
        expect_success(response).await
    }

    async fn list_files(
        &self,
        credential: &Credential,
        source: &str,
        format: SaveFormat,
    ) -> Result<Vec<FileDescriptor>, ApiError> {
        let url = self.endpoint("data/files")?;
        let response = self
            .send(
                self.http
                    .get(url)
                    .bearer_auth(credential.as_str())
                    .query(&[("platform", source), ("file_type", format.as_str())]),
            )
            .await?;
        let listing: FileListing = decode(response).await?;
        Ok(listing.files)
    }

    async fn get_file_content(
        &self,
        credential: &Credential,
        path: &str,
        preview_limit: usize,
    ) -> Result<FileContent, ApiError> {
        let url = self.file_endpoint(path)?;
        let limit = preview_limit.to_string();
        let response = self
            .send(
                self.http
                    .get(url)
                    .bearer_auth(credential.as_str())
                    .query(&[("preview", "true"), ("limit", limit.as_str())]),
            )
            .await?;
        decode(response).await
    }
}

/// `{base}/api/` with the base treated as a directory.
pub fn api_root(base_url: &Url) -> Result<Url, ApiError> {
    let mut base = base_url.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join("api/")
        .map_err(|err| ApiError::InvalidResponse(format!("bad base url {base_url}: {err}")))
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let response = check_status(response).await?;
    response
        .json::<T>()
        .await
        .map_err(|err| ApiError::InvalidResponse(err.to_string()))
}

async fn expect_success(response: Response) -> Result<(), ApiError> {
    check_status(response).await.map(|_| ())
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = extract_detail(&body);
    debug!("api_rejected: status={} detail={detail}", status.as_u16());
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized(detail));
    }
    Err(ApiError::Rejected {
        status: status.as_u16(),
        detail,
    })
}

/// Pulls the `detail` field out of an error body, falling back to the raw text.
fn extract_detail(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => match map.get("detail") {
            Some(Value::String(detail)) => detail.clone(),
            Some(other) => other.to_string(),
            None => body.trim().to_string(),
        },
        _ => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(base: &str) -> HttpCrawlerApi {
        HttpCrawlerApi::new(&Url::parse(base).expect("url")).expect("api")
    }

    #[test]
    fn api_root_handles_trailing_slash_and_prefix() {
        let root = api_root(&Url::parse("http://127.0.0.1:8080").expect("url")).expect("root");
        assert_eq!(root.as_str(), "http://127.0.0.1:8080/api/");
        let root = api_root(&Url::parse("https://ops.example/crawler").expect("url")).expect("root");
        assert_eq!(root.as_str(), "https://ops.example/crawler/api/");
    }

    #[test]
    fn endpoints_resolve_under_api_prefix() {
        let api = api("http://localhost:8080/");
        assert_eq!(
            api.endpoint("crawler/status").expect("url").as_str(),
            "http://localhost:8080/api/crawler/status"
        );
    }

    #[test]
    fn file_endpoint_escapes_each_segment() {
        let api = api("http://localhost:8080/");
        let url = api
            .file_endpoint("xhs/json/search contents.json")
            .expect("url");
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/api/data/files/xhs/json/search%20contents.json"
        );
    }

    #[test]
    fn detail_is_extracted_from_error_bodies() {
        assert_eq!(
            extract_detail(r#"{"detail": "crawler already running"}"#),
            "crawler already running"
        );
        assert_eq!(
            extract_detail(r#"{"detail": [{"loc": ["body"]}]}"#),
            r#"[{"loc":["body"]}]"#
        );
        assert_eq!(extract_detail("Bad Gateway\n"), "Bad Gateway");
    }
}

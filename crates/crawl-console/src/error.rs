use crawl_core::ValidationError;
use crawl_storage::StorageError;
use thiserror::Error;

/// Failure of a single remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("request rejected ({status}): {detail}")]
    Rejected { status: u16, detail: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("session expired")]
    Expired,
    #[error("auth transport failure: {0}")]
    Transport(ApiError),
    #[error("session storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl From<ApiError> for AuthError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized(detail) => AuthError::InvalidCredentials(detail),
            ApiError::Rejected { status, detail } if status == 400 || status == 403 => {
                AuthError::InvalidCredentials(detail)
            }
            other => AuthError::Transport(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("no authenticated session")]
    NotAuthenticated,
    #[error("session rejected by server")]
    Unauthorized,
    #[error("command rejected ({status}): {detail}")]
    Rejected { status: u16, detail: String },
    #[error("command transport failure: {0}")]
    Transport(String),
}

impl CommandError {
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, CommandError::Unauthorized)
    }
}

impl From<ApiError> for CommandError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized(_) => CommandError::Unauthorized,
            ApiError::Rejected { status, detail } => CommandError::Rejected { status, detail },
            ApiError::Transport(message) | ApiError::InvalidResponse(message) => {
                CommandError::Transport(message)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("no authenticated session")]
    NotAuthenticated,
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl FetchError {
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, FetchError::Api(err) if err.is_unauthorized())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("stream error: {0}")]
    Stream(String),
    #[error("send failed: {0}")]
    Send(String),
}

/// Outcome of a start command: rejected locally or remotely.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// The console runtime task is gone; no command can be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("console runtime stopped")]
pub struct RuntimeStopped;

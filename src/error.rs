use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::session::state::Phase;
use crate::store::StoreError;
use crate::token::DecodeError;

/// Request-level failure category, one per row of the status table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Authentication,
    Authorization,
    NotFound,
    Transport,
    Server,
    Unknown,
}

impl ErrorKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            0 => Self::Transport,
            400 => Self::Validation,
            401 => Self::Authentication,
            403 => Self::Authorization,
            404 => Self::NotFound,
            500 => Self::Server,
            _ => Self::Unknown,
        }
    }

    fn default_message(self) -> &'static str {
        match self {
            Self::Validation => "Invalid data",
            Self::Authentication => "Session expired, please sign in again",
            Self::Authorization => "Access denied",
            Self::NotFound => "Resource not found",
            Self::Transport => "Unable to reach the server",
            Self::Server => "Server error, please try again later",
            Self::Unknown => "An error occurred",
        }
    }

    /// Whether the server's own message is shown instead of the generic one.
    fn prefers_server_message(self) -> bool {
        matches!(self, Self::Validation | Self::NotFound | Self::Unknown)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Authentication => write!(f, "authentication"),
            Self::Authorization => write!(f, "authorization"),
            Self::NotFound => write!(f, "not_found"),
            Self::Transport => write!(f, "transport"),
            Self::Server => write!(f, "server"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Error document returned by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    /// Field name -> validation message.
    #[serde(default)]
    pub errors: BTreeMap<String, String>,
}

/// Uniform `{message, status}` shape for every failed request.
///
/// `status` is 0 when the server could not be reached.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message} ({kind}, status {status})")]
pub struct RequestError {
    pub kind: ErrorKind,
    pub status: u16,
    pub message: String,
    pub body: Option<ApiErrorBody>,
}

impl RequestError {
    /// Normalize an HTTP status and raw response body.
    pub fn from_response(status: u16, raw_body: &[u8]) -> Self {
        let kind = ErrorKind::from_status(status);
        let body = serde_json::from_slice::<ApiErrorBody>(raw_body).ok();
        let server_message = body
            .as_ref()
            .and_then(|b| b.message.clone().or_else(|| b.detail.clone()))
            .filter(|m| !m.trim().is_empty());

        let message = match server_message {
            Some(m) if kind.prefers_server_message() => m,
            _ => kind.default_message().to_string(),
        };

        Self {
            kind,
            status,
            message,
            body,
        }
    }

    /// A request that never produced a response.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        tracing::debug!(error = %err, "Transport failure");
        Self {
            kind: ErrorKind::Transport,
            status: 0,
            message: ErrorKind::Transport.default_message().to_string(),
            body: None,
        }
    }

    /// A 2xx response whose body did not match the expected shape.
    pub fn invalid_body(status: u16, err: impl std::fmt::Display) -> Self {
        Self {
            kind: ErrorKind::Unknown,
            status,
            message: format!("Unexpected response body: {err}"),
            body: None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind == ErrorKind::Authentication
    }

    pub fn is_forbidden(&self) -> bool {
        self.kind == ErrorKind::Authorization
    }

    /// Field validation messages attached by the server, if any.
    pub fn field_errors(&self) -> Option<&BTreeMap<String, String>> {
        self.body.as_ref().map(|b| &b.errors).filter(|e| !e.is_empty())
    }
}

/// Failures of the session lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Malformed token: {0}")]
    Decode(#[from] DecodeError),

    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Refresh rejected: {0}")]
    RefreshRejected(RequestError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("Credential storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Invalid session transition: {event} while {from:?}")]
    InvalidTransition { from: Phase, event: &'static str },

    #[error("Not authenticated")]
    NotAuthenticated,

    /// The credential changed (logout or another login) while a refresh was
    /// in flight, so its result was discarded.
    #[error("Session changed during refresh")]
    Superseded,
}

impl SessionError {
    /// Message suitable for showing to a user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Request(e) | Self::RefreshRejected(e) => e.message.clone(),
            Self::NoRefreshToken | Self::NotAuthenticated | Self::Superseded => {
                ErrorKind::Authentication.default_message().to_string()
            }
            other => other.to_string(),
        }
    }
}

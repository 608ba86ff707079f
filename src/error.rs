//! Error types shared by every component of the client.

use thiserror::Error;

/// Client-side name validation failure. Never reaches the network.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Name must not be empty")]
    EmptyName,

    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },
}

impl ValidationError {
    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        ValidationError::InvalidName {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Breadcrumb/path transition failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NavigationError {
    #[error("Cannot descend into '{0}'")]
    InvalidSegment(#[source] ValidationError),

    #[error("Breadcrumb index {index} out of bounds (trail has {len} entries)")]
    InvalidIndex { index: usize, len: usize },
}

/// Reason a login attempt failed. Session state is untouched in every case.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoginError {
    #[error("Username and password are required")]
    MissingCredentials,

    #[error("Login rejected: {0}")]
    BadCredentials(String),

    #[error("Server error during login: {0}")]
    ServerError(String),

    #[error("Network error during login: {0}")]
    Network(String),
}

/// Persisted session / config storage failure.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error returned by every remote operation.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The server answered 401; the session has been torn down and the
    /// operation resolved as cancelled-by-auth.
    #[error("Session expired, please log in again")]
    AuthExpired,

    #[error("Not logged in")]
    NotAuthenticated,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Navigation(#[from] NavigationError),

    #[error("{}", with_detail(.message, .detail))]
    NotFound { message: String, detail: Option<String> },

    #[error("{}", with_detail(.message, .detail))]
    Conflict { message: String, detail: Option<String> },

    #[error("Server rejected request ({status}): {}", with_detail(.message, .detail))]
    Rejected {
        status: u16,
        message: String,
        detail: Option<String>,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Another upload is already in progress")]
    Busy,

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn with_detail(message: &str, detail: &Option<String>) -> String {
    match detail {
        Some(d) if !d.is_empty() => format!("{} ({})", message, d),
        _ => message.to_string(),
    }
}

impl ClientError {
    /// True when the failure came from session expiry rather than from the
    /// operation itself.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, ClientError::AuthExpired)
    }

    /// Server-provided reason, verbatim, when there is one.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ClientError::NotFound { message, .. }
            | ClientError::Conflict { message, .. }
            | ClientError::Rejected { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Optional detail field attached by the server.
    pub fn server_detail(&self) -> Option<&str> {
        match self {
            ClientError::NotFound { detail, .. }
            | ClientError::Conflict { detail, .. }
            | ClientError::Rejected { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}

//! Error types for the reconciliation engine.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or interpreting the target configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file does not exist.
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Configuration file exists but could not be read.
    #[error("failed to read configuration file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A section header names a target type this engine does not know.
    #[error("line {line}: unknown target type '{kind}'")]
    UnknownTargetType { line: usize, kind: String },

    /// A section header is missing its identifier.
    #[error("line {line}: malformed section header '{text}'")]
    MalformedHeader { line: usize, text: String },

    /// A target section lacks a key it cannot operate without.
    #[error("target '{target}': missing required key '{key}'")]
    MissingKey { target: String, key: &'static str },

    /// A value that cannot be interpreted for its key.
    #[error("invalid value for '{key}': '{value}'")]
    InvalidValue { key: &'static str, value: String },

    /// A target section does not name any fabric scope.
    #[error("target '{target}': no fabric scope configured (set 'fabric_names')")]
    NoScopes { target: String },
}

/// Errors raised by adapters during a reconciliation cycle.
///
/// None of these are fatal to a worker: every class aborts at most one cycle,
/// one scope, or one plan item.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The source-of-truth secret is absent; fetching fails closed.
    #[error("source secret not found (checked: {checked})")]
    MissingSecret { checked: String },

    /// The fabric controller rejected or did not complete authentication.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// An HTTP call exceeded its per-target timeout.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote answered with a non-success status.
    #[error("HTTP {status} from {url}: {body}")]
    Status { status: u16, url: String, body: String },

    /// Create on a resource that is already present.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Delete on a resource that is already gone.
    #[error("not found: {0}")]
    NotFound(String),

    /// The response lacked a field the adapter depends on.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The target's configuration is unusable for this cycle.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SyncError {
    /// Errors that mean the mutation's goal already holds.
    pub fn is_idempotent(&self) -> bool {
        matches!(self, SyncError::AlreadyExists(_) | SyncError::NotFound(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SyncError::Timeout(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SyncError::Timeout(e.to_string())
        } else if e.is_decode() {
            SyncError::Malformed(e.to_string())
        } else if let Some(status) = e.status() {
            SyncError::Status {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
                body: String::new(),
            }
        } else {
            SyncError::Transport(e.to_string())
        }
    }
}

/// Result type for adapter operations.
pub type Result<T> = std::result::Result<T, SyncError>;

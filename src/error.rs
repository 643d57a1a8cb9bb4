//! Error taxonomy for serverkeeper

use thiserror::Error;

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, KeeperError>;

/// Errors raised while coordinating a server run
#[derive(Debug, Error)]
pub enum KeeperError {
    /// The shared status database could not be reached or queried.
    /// Always fatal; the run aborts without retrying.
    #[error("status database unavailable: {0}")]
    StorageUnavailable(String),

    /// A remote artifact could not be resolved by title. Soft failure:
    /// callers log it and continue provisioning.
    #[error("artifact '{title}' not found in remote folder")]
    ArtifactNotFound { title: String },

    /// The shared secret does not match the protocol token this build
    /// expects. An out-of-date host must not act against a newer protocol.
    #[error("shared token does not match this build's protocol version")]
    AuthorizationMismatch,

    /// Another host holds the execution claim. Benign abort; no state
    /// is mutated.
    #[error("server is already running{}", host_suffix(.host.as_deref()))]
    AlreadyRunning { host: Option<String> },

    #[error("drive api error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("transfer failed: {0}")]
    Transfer(#[from] reqwest::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("token signing failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The workload process could not be launched at all. A process that
    /// launched and exited, with any code, is not an error.
    #[error("failed to launch workload: {0}")]
    Launch(String),
}

fn host_suffix(host: Option<&str>) -> String {
    match host {
        Some(h) if !h.is_empty() => format!(" on host '{h}'"),
        _ => String::new(),
    }
}

impl KeeperError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        KeeperError::StorageUnavailable(err.to_string())
    }

    /// Benign aborts end the run but are expected outcomes, not faults.
    pub fn is_benign(&self) -> bool {
        matches!(self, KeeperError::AlreadyRunning { .. })
    }

    /// Soft failures are logged and never abort provisioning on their own.
    pub fn is_soft(&self) -> bool {
        matches!(self, KeeperError::ArtifactNotFound { .. })
    }
}

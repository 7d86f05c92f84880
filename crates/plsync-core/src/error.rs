use thiserror::Error;

use crate::types::ErrorKind;

#[derive(Debug, Error)]
pub enum PlsyncError {
    #[error("policy file not found: {0}")]
    PolicyFileNotFound(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("prefix-list generation failed for {policy}: {source}")]
    Generation {
        policy: String,
        #[source]
        source: crate::generator::GenerationError,
    },

    #[error("transport error on {router}: {reason}")]
    Transport { router: String, reason: String },

    #[error("commit rejected by {router}: {output}")]
    CommitRejected { router: String, output: String },

    #[error("commit already pending on {router} (deadline {deadline}); confirm or query first")]
    CommitInProgress { router: String, deadline: String },

    #[error("connection to {router} lost after commit was sent; outcome unknown, verify on the device")]
    PartialApplyUnknown { router: String },

    #[error("pending-commit store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PlsyncError {
    /// Taxonomy bucket used in per-router reports.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlsyncError::PolicyFileNotFound(_) | PlsyncError::Config(_) | PlsyncError::Yaml(_) => {
                ErrorKind::Config
            }
            PlsyncError::Generation { .. } => ErrorKind::Generation,
            PlsyncError::Transport { .. } => ErrorKind::Transport,
            PlsyncError::CommitRejected { .. } => ErrorKind::CommitRejected,
            PlsyncError::CommitInProgress { .. } => ErrorKind::CommitInProgress,
            PlsyncError::PartialApplyUnknown { .. } => ErrorKind::PartialApplyUnknown,
            PlsyncError::Store(_) | PlsyncError::Io(_) | PlsyncError::Json(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, PlsyncError>;

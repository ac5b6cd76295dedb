use std::path::PathBuf;
use thiserror::Error;
use tokio::task::JoinError;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("invalid cron expression '{expr}': {reason}")]
    Cron { expr: String, reason: String },
    #[error("mirror '{0}' not found in config")]
    MirrorNotFound(String),
    #[error("invalid repository name '{0}'")]
    InvalidName(String),
    #[error("repository '{}' has no remotes configured", .0.display())]
    NoRemotes(PathBuf),
    #[error("could not persist config to '{}': {source}", .path.display())]
    Persist { path: PathBuf, source: std::io::Error },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("git error: {0}")]
    Git(#[from] git2::Error),
    #[error("task join error: {0}")]
    Join(#[from] JoinError),
}

impl SyncError {
    pub(crate) fn cron(expr: &str, reason: impl Into<String>) -> Self {
        SyncError::Cron {
            expr: expr.to_string(),
            reason: reason.into(),
        }
    }
}

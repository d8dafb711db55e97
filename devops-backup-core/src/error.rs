use std::path::PathBuf;
use thiserror::Error;

/// Errors raised anywhere in the backup pipeline or by its collaborators.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("git {operation} failed for {target}: {message}")]
    Git {
        operation: &'static str,
        target: String,
        message: String,
    },

    #[error("catalog request failed: {0}")]
    Catalog(String),

    #[error("snapshot download failed for project '{project}': {message}")]
    Snapshot { project: String, message: String },

    #[error("remote store error: {0}")]
    Remote(String),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("failed to walk directory tree: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("invalid path {}: {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: &'static str },
}

impl BackupError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BackupError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

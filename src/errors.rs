use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Remote storage is not enabled or configured")]
    NotConfigured,

    #[error("Local file not found: {}", .0.display())]
    LocalFileMissing(PathBuf),

    #[error("Local I/O error on {}: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Object not found in remote storage: {0}")]
    ObjectNotFound(String),

    #[error("Remote storage operation failed: {0}")]
    StoreIo(String),

    #[error("Invalid archive name: {0}")]
    InvalidName(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    pub fn local_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AppError::LocalIo {
            path: path.into(),
            source,
        }
    }

    /// Coarse classification used in run reports.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NotConfigured => ErrorKind::NotConfigured,
            AppError::LocalFileMissing(_) => ErrorKind::LocalFileMissing,
            AppError::LocalIo { .. } => ErrorKind::LocalIoError,
            AppError::ObjectNotFound(_) => ErrorKind::ObjectNotFound,
            AppError::StoreIo(_) => ErrorKind::StoreIoError,
            AppError::InvalidName(_) => ErrorKind::InvalidName,
            AppError::Config(_) => ErrorKind::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    NotConfigured,
    LocalFileMissing,
    LocalIoError,
    ObjectNotFound,
    StoreIoError,
    InvalidName,
    Other,
}

pub type Result<T> = std::result::Result<T, AppError>;

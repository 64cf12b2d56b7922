use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Invalid download request: {0}")]
    InvalidRequest(String),

    #[error("Backend rejected download {content_id}: {reason}")]
    BackendRejected { content_id: String, reason: String },

    #[error("Download {0} is not tracked")]
    NotFound(String),

    #[error("Storage error ({context}): {message}")]
    Storage { context: String, message: String },

    #[error("Stored record for {content_id} is corrupted: {reason}")]
    Corrupted { content_id: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Backend error: {0}")]
    Bridge(#[from] BridgeError),
}

impl DownloadError {
    pub(crate) fn storage(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Storage {
            context: context.into(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;

use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    /// The on-disk or remote dataset does not have the expected structure.
    /// Never retryable: the operator has to fix paths or flags.
    #[error("Dataset layout error: {0}")]
    DatasetLayout(String),
    /// Talking to the remote dataset repository failed.
    #[error("Remote fetch error: {message}")]
    RemoteFetch { message: String, retryable: bool },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    pub fn layout(message: impl Into<String>) -> Self {
        Self::DatasetLayout(message.into())
    }

    pub fn fetch(message: impl Into<String>, retryable: bool) -> Self {
        Self::RemoteFetch {
            message: message.into(),
            retryable,
        }
    }

    /// Whether repeating the failed operation could plausibly succeed.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::RemoteFetch { retryable, .. } => *retryable,
            Self::Io(_) | Self::Join(_) => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        let retryable = err
            .status()
            .map_or(true, |status| status.is_server_error());
        Self::RemoteFetch {
            message: err.to_string(),
            retryable,
        }
    }
}

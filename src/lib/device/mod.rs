pub mod command_source;
pub mod file_source;
pub mod json;

use std::time::Duration;

use async_trait::async_trait;

use crate::{
    history::{HistoryError, RawHistorySnapshot},
    status::DishStatus,
};

pub use command_source::CommandSource;
pub use file_source::JsonFileSource;

/// Default time to wait for the terminal to answer a request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Failed reading {path:?}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Command {command:?} failed: {reason}")]
    Command { command: String, reason: String },

    #[error("No answer from the terminal after {0:?}")]
    Timeout(Duration),

    #[error("Invalid JSON answer: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid sample counter: {0:?}")]
    InvalidCounter(String),

    #[error("Invalid number for {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("{0} can not answer status requests")]
    StatusUnsupported(String),

    #[error(transparent)]
    History(#[from] HistoryError),
}

/// Anything able to query the terminal, or to stand in for it.
#[async_trait]
pub trait DishSource: Send + Sync {
    async fn get_history(&self) -> Result<RawHistorySnapshot, DeviceError>;

    async fn get_status(&self) -> Result<DishStatus, DeviceError> {
        Err(DeviceError::StatusUnsupported(self.describe()))
    }

    /// Human readable description of where the answers come from.
    fn describe(&self) -> String;
}

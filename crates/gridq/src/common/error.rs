use thiserror::Error;

use crate::common::error::GridqError::GenericError;

#[derive(Debug, Error)]
pub enum GridqError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] schedd::Error),
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<serde_json::error::Error> for GridqError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

impl From<anyhow::Error> for GridqError {
    fn from(error: anyhow::Error) -> Self {
        Self::GenericError(error.to_string())
    }
}

impl From<toml::de::Error> for GridqError {
    fn from(error: toml::de::Error) -> Self {
        Self::DeserializationError(error.to_string())
    }
}

pub fn error<T>(message: String) -> crate::Result<T> {
    Err(GenericError(message))
}

impl From<String> for GridqError {
    fn from(e: String) -> Self {
        GenericError(e)
    }
}

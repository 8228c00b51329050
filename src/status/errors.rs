use crate::models::AccessKey;
use crate::state_machine::StateMachineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StatusStoreError {
    #[error("Access key already registered: {access_key}")]
    DuplicateAccessKey { access_key: AccessKey },

    #[error("Document not found: {access_key}")]
    DocumentNotFound { access_key: AccessKey },

    #[error("Rejected mutation: {0}")]
    Transition(#[from] StateMachineError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl StatusStoreError {
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StatusStoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

pub type StatusStoreResult<T> = Result<T, StatusStoreError>;

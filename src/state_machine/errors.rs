use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("Invalid state transition from {from:?} on {event}")]
    InvalidTransition { from: Option<String>, event: String },

    #[error("Document {access_key} already has a {operation} in flight")]
    OperationInFlight {
        access_key: String,
        operation: String,
    },

    #[error("Document {access_key} is {state}, {operation} requires an authorized document")]
    NotAuthorized {
        access_key: String,
        operation: String,
        state: String,
    },

    #[error("Unknown operation {correlation_id} on document {access_key}")]
    UnknownOperation {
        access_key: String,
        correlation_id: String,
    },
}

impl StateMachineError {
    pub fn invalid_transition(from: impl ToString, event: &str) -> Self {
        Self::InvalidTransition {
            from: Some(from.to_string()),
            event: event.to_string(),
        }
    }
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;

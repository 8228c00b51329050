use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of a fiscal document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    /// Record created, emission message published
    Pending,
    /// A worker holds the message and is talking to the authority
    Processing,
    /// Authority accepted the document
    Authorized,
    /// Authority refused the document on business grounds
    Rejected,
    /// Authorized document voided by an explicit cancellation
    Cancelled,
    /// Technical failure, may be retried
    Error,
    /// Retries exhausted; message parked in the dead-letter queue
    DeadLettered,
}

impl DocumentState {
    pub const ALL: [DocumentState; 7] = [
        DocumentState::Pending,
        DocumentState::Processing,
        DocumentState::Authorized,
        DocumentState::Rejected,
        DocumentState::Cancelled,
        DocumentState::Error,
        DocumentState::DeadLettered,
    ];

    /// Terminal for the emission pipeline. `Authorized` still accepts a
    /// cancellation, which arrives through its own VOID operation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Authorized | Self::Rejected | Self::Cancelled | Self::DeadLettered
        )
    }

    /// Accepted and still moving through the pipeline
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing | Self::Error)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Authorized | Self::Cancelled)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Rejected | Self::DeadLettered)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Authorized => "authorized",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
            Self::DeadLettered => "dead_lettered",
        }
    }
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "authorized" => Ok(Self::Authorized),
            "rejected" => Ok(Self::Rejected),
            "cancelled" => Ok(Self::Cancelled),
            "error" => Ok(Self::Error),
            "dead_lettered" => Ok(Self::DeadLettered),
            _ => Err(format!("Invalid document state: {s}")),
        }
    }
}

/// States of a QUERY/EVENT/VOID sub-record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Pending,
    Processing,
    /// Authority answered successfully
    Succeeded,
    Rejected,
    Error,
    DeadLettered,
}

impl OperationState {
    pub const ALL: [OperationState; 6] = [
        OperationState::Pending,
        OperationState::Processing,
        OperationState::Succeeded,
        OperationState::Rejected,
        OperationState::Error,
        OperationState::DeadLettered,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Rejected | Self::DeadLettered)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Rejected => "rejected",
            Self::Error => "error",
            Self::DeadLettered => "dead_lettered",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "succeeded" => Ok(Self::Succeeded),
            "rejected" => Ok(Self::Rejected),
            "error" => Ok(Self::Error),
            "dead_lettered" => Ok(Self::DeadLettered),
            _ => Err(format!("Invalid operation state: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_state_classification() {
        for state in DocumentState::ALL {
            // Every state is exactly one of in-progress, success or failure
            let buckets = [state.is_in_progress(), state.is_success(), state.is_failure()];
            assert_eq!(buckets.iter().filter(|b| **b).count(), 1, "{state}");
        }
        assert!(DocumentState::DeadLettered.is_terminal());
        assert!(!DocumentState::Error.is_terminal());
    }

    #[test]
    fn test_state_string_round_trip() {
        for state in DocumentState::ALL {
            assert_eq!(state.to_string().parse::<DocumentState>().unwrap(), state);
        }
        for state in OperationState::ALL {
            assert_eq!(state.to_string().parse::<OperationState>().unwrap(), state);
        }
        assert!("in_progress".parse::<DocumentState>().is_err());
    }
}

// State machines for fiscal documents and their operation sub-records.
//
// Both machines are pure transition tables plus field effects; persistence
// and event publishing happen in the status store and the worker pool.

pub mod document_state_machine;
pub mod errors;
pub mod events;
pub mod operation_state_machine;
pub mod states;

pub use document_state_machine::DocumentStateMachine;
pub use errors::{StateMachineError, StateMachineResult};
pub use events::{DocumentEvent, OperationEvent};
pub use operation_state_machine::OperationStateMachine;
pub use states::{DocumentState, OperationState};

/// A transition that was applied to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition<S> {
    pub from: S,
    pub to: S,
    pub event: &'static str,
}

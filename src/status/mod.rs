//! # Status Store
//!
//! Durable lifecycle records for fiscal documents. Every mutation goes
//! through [`apply_mutation`], which drives the state machines, so the
//! transition rules are identical across storage backends.

pub mod errors;
pub mod in_memory;
pub mod mutation;
pub mod store;

pub use errors::{StatusStoreError, StatusStoreResult};
pub use in_memory::InMemoryStatusStore;
pub use mutation::{apply_mutation, AppliedTransition, StatusMutation, StatusUpdate};
pub use store::StatusStore;

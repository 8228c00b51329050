//! # Orchestration
//!
//! The emission pipeline proper:
//!
//! - [`Dispatcher`] publishes logical operations into priority queues
//! - [`WorkerPool`] consumes them, calls the [`AuthorityClient`] and settles
//!   each message through the status store
//! - [`RetryScheduler`] turns failures into retry, reject or dead-letter
//!   decisions using the [`ErrorClassifier`] and [`BackoffCalculator`]
//! - [`EmissionService`] is the facade used by the HTTP layer
//! - [`FiscalOrchestrator`] wires everything from configuration

pub mod authority;
pub mod backoff_calculator;
pub mod bootstrap;
pub mod dispatcher;
pub mod emission_service;
pub mod error_classifier;
pub mod retry_scheduler;
pub mod worker_pool;

pub use authority::{AuthorityClient, AuthorityError, AuthorityReceipt, AuthorityRequest};
pub use backoff_calculator::{BackoffCalculator, BackoffCalculatorConfig};
pub use bootstrap::{Collaborators, FiscalOrchestrator};
pub use dispatcher::Dispatcher;
pub use emission_service::{
    EmissionRequest, EmissionService, StatusOutcome, StatusSnapshot, SubmittedEmission,
};
pub use error_classifier::{
    ErrorCategory, ErrorClassification, ErrorClassifier, StandardErrorClassifier,
};
pub use retry_scheduler::{RetryDecision, RetryOutcome, RetryScheduler};
pub use worker_pool::WorkerPool;

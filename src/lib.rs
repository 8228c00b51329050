#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Fiscal Queue Core
//!
//! Asynchronous emission-queue orchestrator for multi-tenant fiscal document
//! issuance.
//!
//! ## Overview
//!
//! Every fiscal document a tenant issues gets a gap-free number from its
//! `(tenant, series)` sequence, a 44-digit access key, and a status record.
//! The document is then pushed through priority-tiered queues to workers
//! that talk to the tax authority. Transient failures are retried with
//! exponential backoff, permanent ones rejected, and anything that runs out
//! of attempts is parked in a dead-letter queue for manual resolution.
//!
//! ## Module Organization
//!
//! - [`models`] - Access keys, tenant configuration, document records
//! - [`state_machine`] - Document and operation lifecycles
//! - [`status`] - Status store trait, mutations and in-memory store
//! - [`tenancy`] - Tenant registry and cursor persistence
//! - [`sequence`] - Gap-free document number allocation
//! - [`routing`] - Priority tiers and queue descriptors
//! - [`messaging`] - Queue messages and the broker transport seam
//! - [`orchestration`] - Dispatcher, retry scheduler, worker pool, facade
//! - [`events`] - Orchestration event broadcast
//! - [`config`] - Layered configuration
//! - [`database`] - PostgreSQL stores (feature `postgres`)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fiscal_core::config::FiscalConfig;
//! use fiscal_core::events::EventPublisher;
//! use fiscal_core::messaging::InMemoryTransport;
//! use fiscal_core::orchestration::{AuthorityClient, Collaborators, EmissionRequest, FiscalOrchestrator};
//! use fiscal_core::status::InMemoryStatusStore;
//! use fiscal_core::tenancy::InMemoryTenantStore;
//! use fiscal_core::models::TenantId;
//! use std::sync::Arc;
//!
//! # async fn example(authority: Arc<dyn AuthorityClient>) -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = FiscalOrchestrator::bootstrap(
//!     &FiscalConfig::default(),
//!     Collaborators {
//!         tenant_store: Arc::new(InMemoryTenantStore::new()),
//!         status_store: Arc::new(InMemoryStatusStore::new()),
//!         transport: Arc::new(InMemoryTransport::new()),
//!         authority,
//!         events: EventPublisher::default(),
//!     },
//! )
//! .await?;
//!
//! orchestrator.workers.start();
//! let submitted = orchestrator
//!     .service
//!     .submit_emission(&TenantId::new("acme"), EmissionRequest::new("<NFe/>"))
//!     .await?;
//! println!("queued {}", submitted.access_key);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
#[cfg(feature = "postgres")]
pub mod database;
pub mod error;
pub mod events;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod routing;
pub mod sequence;
pub mod state_machine;
pub mod status;
pub mod tenancy;

pub use config::{ConfigManager, FiscalConfig};
pub use error::{FiscalError, FiscalResult};
pub use events::{EventPublisher, OrchestrationEvent};
pub use models::{AccessKey, CorrelationId, Operation, Priority, TenantConfig, TenantId};
pub use orchestration::{
    AuthorityClient, Collaborators, EmissionRequest, EmissionService, FiscalOrchestrator,
};
pub use state_machine::{DocumentState, OperationState};

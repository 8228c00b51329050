//! # Data Model
//!
//! Identity types, tenant configuration and the document status record that
//! the orchestrator persists for every fiscal document.
//!
//! - [`AccessKey`] - 44-digit fiscal document identifier
//! - [`TenantConfig`] - per-tenant issuing configuration
//! - [`DocumentDraft`] / [`DocumentStatusRecord`] - submission input and lifecycle record
//! - [`OperationRecord`] - sub-record for query/event/void operations on a document
//! - [`Operation`] / [`Priority`] - routing dimensions

pub mod access_key;
pub mod document;
pub mod identifiers;
pub mod operation;
pub mod tenant;

pub use access_key::{AccessKey, AccessKeyParts};
pub use document::{DocumentDraft, DocumentStatusRecord, ErrorEntry, OperationRecord};
pub use identifiers::{CorrelationId, TenantId};
pub use operation::{Operation, Priority};
pub use tenant::{CertificateRef, FiscalEnvironment, SequenceKey, TenantConfig};

//! Tenant configuration, its cache and the allocation-cursor persistence.

pub mod registry;
pub mod store;

pub use registry::TenantRegistry;
pub use store::{InMemoryTenantStore, TenantStore};

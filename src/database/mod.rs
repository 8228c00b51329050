//! # Database Operations
//!
//! PostgreSQL implementations of the orchestrator's persistence seams.
//!
//! ## Key Components
//!
//! - [`connection`] - Pool setup and health checks
//! - [`migrations`] - Schema migrations serialized by an advisory lock
//! - [`tenant_store`] - Tenant configuration and compare-and-set cursors
//! - [`status_store`] - Document status records with row-level locking
//!
//! Records are stored as JSONB next to the handful of columns the stores
//! filter on; every state change still goes through
//! [`crate::status::apply_mutation`] inside a `SELECT ... FOR UPDATE`
//! transaction.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use fiscal_core::database::{DatabaseConnection, DatabaseMigrations, PgStatusStore, PgTenantStore};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = DatabaseConnection::new().await?;
//! DatabaseMigrations::run_all(db.pool(), Path::new("migrations")).await?;
//!
//! let tenants = PgTenantStore::new(db.pool().clone());
//! let statuses = PgStatusStore::new(db.pool().clone());
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod migrations;
pub mod status_store;
pub mod tenant_store;

pub use connection::DatabaseConnection;
pub use migrations::{DatabaseMigrations, Migration};
pub use status_store::PgStatusStore;
pub use tenant_store::PgTenantStore;

use crate::error::{FiscalError, FiscalResult};

/// Narrow an unsigned domain value into a signed column type
pub(crate) fn to_column<T, C>(value: T, column: &str) -> FiscalResult<C>
where
    T: Copy + std::fmt::Display + TryInto<C>,
{
    value
        .try_into()
        .map_err(|_| FiscalError::persistence(format!("{column} value {value} out of range")))
}

/// Widen a signed column value back into its unsigned domain type
pub(crate) fn from_column<C, T>(value: C, column: &str) -> FiscalResult<T>
where
    C: Copy + std::fmt::Display + TryInto<T>,
{
    value
        .try_into()
        .map_err(|_| FiscalError::persistence(format!("{column} holds invalid value {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_conversions() {
        let series: i32 = to_column(999_u32, "series").unwrap();
        assert_eq!(series, 999);
        let number: i64 = to_column(999_999_999_u64, "last_number").unwrap();
        assert_eq!(number, 999_999_999);
        assert!(to_column::<u64, i64>(u64::MAX, "last_number").is_err());

        let back: u64 = from_column(42_i64, "last_number").unwrap();
        assert_eq!(back, 42);
        let err = from_column::<i64, u64>(-1, "last_number").unwrap_err();
        assert!(err.to_string().contains("last_number"));
    }
}

//! # Database Migrations
//!
//! Incremental SQL migrations with version tracking.
//!
//! Migrations are discovered from a directory using a timestamp-based naming
//! convention: `YYYYMMDDHHMMSS_description.sql`. Every replica runs
//! [`DatabaseMigrations::run_all`] at startup; a session-level advisory lock
//! makes sure only one of them applies outstanding files at a time:
//!
//! ```sql
//! SELECT pg_advisory_lock(7_305_118_220_431_905)
//! ```

use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres, Row};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Advisory lock key for schema changes
const MIGRATION_LOCK_KEY: i64 = 7_305_118_220_431_905;

/// A single database migration file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Version timestamp (YYYYMMDDHHMMSS format)
    pub version: String,
    /// Human-readable migration name
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug)]
pub struct DatabaseMigrations;

impl DatabaseMigrations {
    /// Apply every migration in `directory` that is not recorded yet.
    ///
    /// Returns the versions applied by this call, in order.
    pub async fn run_all(pool: &PgPool, directory: &Path) -> Result<Vec<String>, sqlx::Error> {
        let migrations = Self::discover_migrations(directory)?;

        // The advisory lock is per session, so everything runs on one connection
        let mut conn = pool.acquire().await?;
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        let result = Self::apply_outstanding(&mut conn, &migrations).await;

        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        let applied = result?;
        info!(
            discovered = migrations.len(),
            applied = applied.len(),
            "🗄️ MIGRATIONS: Schema up to date"
        );
        Ok(applied)
    }

    async fn apply_outstanding(
        conn: &mut PoolConnection<Postgres>,
        migrations: &BTreeMap<String, Migration>,
    ) -> Result<Vec<String>, sqlx::Error> {
        Self::ensure_migration_table(conn).await?;
        let already_applied = Self::get_applied_migrations(conn).await?;

        let mut applied = Vec::new();
        for migration in migrations.values() {
            if already_applied.contains(&migration.version) {
                continue;
            }
            info!(
                version = %migration.version,
                name = %migration.name,
                "🗄️ MIGRATIONS: Applying"
            );
            let sql = fs::read_to_string(&migration.path).map_err(sqlx::Error::Io)?;
            sqlx::raw_sql(&sql).execute(&mut **conn).await?;
            sqlx::query("INSERT INTO fiscal_schema_migrations (version, name) VALUES ($1, $2)")
                .bind(&migration.version)
                .bind(&migration.name)
                .execute(&mut **conn)
                .await?;
            applied.push(migration.version.clone());
        }
        Ok(applied)
    }

    /// Discover all migration files in `directory`, ordered by version
    pub fn discover_migrations(directory: &Path) -> Result<BTreeMap<String, Migration>, sqlx::Error> {
        let mut migrations = BTreeMap::new();
        if !directory.exists() {
            debug!(directory = %directory.display(), "No migrations directory");
            return Ok(migrations);
        }

        for entry in fs::read_dir(directory).map_err(sqlx::Error::Io)? {
            let path = entry.map_err(sqlx::Error::Io)?.path();
            if !path.is_file() || path.extension().map(|s| s != "sql").unwrap_or(true) {
                continue;
            }
            let parsed = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(Self::parse_migration_filename);
            if let Some((version, name)) = parsed {
                migrations.insert(
                    version.clone(),
                    Migration {
                        version,
                        name,
                        path,
                    },
                );
            }
        }

        Ok(migrations)
    }

    /// Parse `YYYYMMDDHHMMSS_migration_name` into version and name
    fn parse_migration_filename(filename: &str) -> Option<(String, String)> {
        if filename.len() < 15 || !filename.is_char_boundary(14) {
            return None;
        }

        let (version_part, name_part) = filename.split_at(14);
        if !version_part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }

        let name = name_part.strip_prefix('_').unwrap_or(name_part).replace('_', " ");
        Some((version_part.to_string(), name))
    }

    async fn ensure_migration_table(conn: &mut PoolConnection<Postgres>) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS fiscal_schema_migrations (
                version VARCHAR(14) PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
        "#,
        )
        .execute(&mut **conn)
        .await?;

        Ok(())
    }

    async fn get_applied_migrations(
        conn: &mut PoolConnection<Postgres>,
    ) -> Result<HashSet<String>, sqlx::Error> {
        let rows = sqlx::query("SELECT version FROM fiscal_schema_migrations")
            .fetch_all(&mut **conn)
            .await?;

        rows.into_iter()
            .map(|row| row.try_get::<String, _>("version"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_migration_filename() {
        assert_eq!(
            DatabaseMigrations::parse_migration_filename("20261019000000_fiscal_core"),
            Some(("20261019000000".to_string(), "fiscal core".to_string()))
        );
        assert_eq!(DatabaseMigrations::parse_migration_filename("0001_init"), None);
        assert_eq!(
            DatabaseMigrations::parse_migration_filename("2026101900000x_bad_version"),
            None
        );
    }

    #[test]
    fn test_discover_orders_by_version_and_skips_other_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("20261020000000_second.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("20261019000000_first.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("README.md"), "not a migration").unwrap();
        fs::write(dir.path().join("notes.sql"), "SELECT 1;").unwrap();

        let migrations = DatabaseMigrations::discover_migrations(dir.path()).unwrap();
        let versions: Vec<&String> = migrations.keys().collect();
        assert_eq!(versions, ["20261019000000", "20261020000000"]);
        assert_eq!(migrations["20261019000000"].name, "first");
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let migrations =
            DatabaseMigrations::discover_migrations(&dir.path().join("absent")).unwrap();
        assert!(migrations.is_empty());
    }
}

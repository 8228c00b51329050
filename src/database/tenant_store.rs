//! PostgreSQL tenant store.
//!
//! Cursors live in `fiscal_sequence_cursors`, one row per `(tenant, series)`.
//! A missing row reads as zero; the first allocation inserts it with
//! `ON CONFLICT DO NOTHING` so two racing first allocations cannot both win.

use super::{from_column, to_column};
use crate::error::FiscalResult;
use crate::models::{SequenceKey, TenantConfig, TenantId};
use crate::tenancy::TenantStore;
use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

#[derive(Debug, Clone)]
pub struct PgTenantStore {
    pool: PgPool,
}

impl PgTenantStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn decode_config(row: &sqlx::postgres::PgRow) -> FiscalResult<TenantConfig> {
    let Json(config) = row.try_get::<Json<TenantConfig>, _>("config")?;
    Ok(config)
}

#[async_trait]
impl TenantStore for PgTenantStore {
    async fn get_tenant(&self, tenant_id: &TenantId) -> FiscalResult<Option<TenantConfig>> {
        let row = sqlx::query("SELECT config FROM fiscal_tenants WHERE tenant_id = $1")
            .bind(tenant_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(decode_config).transpose()
    }

    async fn put_tenant(&self, config: TenantConfig) -> FiscalResult<()> {
        sqlx::query(
            r#"
            INSERT INTO fiscal_tenants (tenant_id, config, active, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id) DO UPDATE
            SET config = EXCLUDED.config,
                active = EXCLUDED.active,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(config.tenant_id.as_str())
        .bind(Json(&config))
        .bind(config.active)
        .bind(config.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_tenants(&self) -> FiscalResult<Vec<TenantConfig>> {
        let rows = sqlx::query("SELECT config FROM fiscal_tenants ORDER BY tenant_id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_config).collect()
    }

    async fn current_cursor(&self, key: &SequenceKey) -> FiscalResult<u64> {
        let series: i32 = to_column(key.series, "series")?;
        let row = sqlx::query(
            "SELECT last_number FROM fiscal_sequence_cursors WHERE tenant_id = $1 AND series = $2",
        )
        .bind(key.tenant_id.as_str())
        .bind(series)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => from_column(row.try_get::<i64, _>("last_number")?, "last_number"),
            None => Ok(0),
        }
    }

    async fn compare_and_set_cursor(
        &self,
        key: &SequenceKey,
        expected: u64,
        new: u64,
    ) -> FiscalResult<bool> {
        let series: i32 = to_column(key.series, "series")?;
        let expected_number: i64 = to_column(expected, "last_number")?;
        let new_number: i64 = to_column(new, "last_number")?;

        if expected == 0 {
            let inserted = sqlx::query(
                r#"
                INSERT INTO fiscal_sequence_cursors (tenant_id, series, last_number)
                VALUES ($1, $2, $3)
                ON CONFLICT (tenant_id, series) DO NOTHING
                "#,
            )
            .bind(key.tenant_id.as_str())
            .bind(series)
            .bind(new_number)
            .execute(&self.pool)
            .await?
            .rows_affected();
            if inserted == 1 {
                return Ok(true);
            }
        }

        let updated = sqlx::query(
            r#"
            UPDATE fiscal_sequence_cursors
            SET last_number = $4, updated_at = NOW()
            WHERE tenant_id = $1 AND series = $2 AND last_number = $3
            "#,
        )
        .bind(key.tenant_id.as_str())
        .bind(series)
        .bind(expected_number)
        .bind(new_number)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated == 1)
    }
}

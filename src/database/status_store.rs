//! PostgreSQL status store.
//!
//! Each document is one row in `fiscal_documents` with the full record as
//! JSONB. `update` locks the row with `SELECT ... FOR UPDATE`, applies the
//! mutation in memory and writes the result back in the same transaction,
//! so concurrent mutations of one document serialize on the row lock. The
//! `fiscal_correlations` table maps every emission and sub-operation
//! correlation id to its document.

use super::to_column;
use crate::models::{AccessKey, CorrelationId, DocumentStatusRecord, TenantId};
use crate::state_machine::DocumentState;
use crate::status::{
    apply_mutation, StatusMutation, StatusStore, StatusStoreError, StatusStoreResult,
    StatusUpdate,
};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Row};

#[derive(Debug, Clone)]
pub struct PgStatusStore {
    pool: PgPool,
}

impl PgStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn index_correlation(
        conn: &mut PgConnection,
        correlation_id: CorrelationId,
        access_key: &AccessKey,
    ) -> StatusStoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO fiscal_correlations (correlation_id, access_key)
            VALUES ($1, $2)
            ON CONFLICT (correlation_id) DO NOTHING
            "#,
        )
        .bind(correlation_id.as_uuid())
        .bind(access_key.as_str())
        .execute(conn)
        .await?;
        Ok(())
    }
}

fn decode_record(row: &PgRow) -> StatusStoreResult<DocumentStatusRecord> {
    let Json(record) = row.try_get::<Json<DocumentStatusRecord>, _>("record")?;
    Ok(record)
}

#[async_trait]
impl StatusStore for PgStatusStore {
    async fn create(&self, record: DocumentStatusRecord) -> StatusStoreResult<()> {
        let series: i32 = to_column(record.series, "series")
            .map_err(|e| StatusStoreError::persistence(e.to_string()))?;
        let number: i64 = to_column(record.document_number, "document_number")
            .map_err(|e| StatusStoreError::persistence(e.to_string()))?;

        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO fiscal_documents
                (access_key, tenant_id, series, document_number, state, record, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (access_key) DO NOTHING
            "#,
        )
        .bind(record.access_key.as_str())
        .bind(record.tenant_id.as_str())
        .bind(series)
        .bind(number)
        .bind(record.state.as_str())
        .bind(Json(&record))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(StatusStoreError::DuplicateAccessKey {
                access_key: record.access_key,
            });
        }

        Self::index_correlation(&mut *tx, record.correlation_id, &record.access_key).await?;
        for operation in &record.operations {
            Self::index_correlation(&mut *tx, operation.correlation_id, &record.access_key).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, access_key: &AccessKey) -> StatusStoreResult<Option<DocumentStatusRecord>> {
        let row = sqlx::query("SELECT record FROM fiscal_documents WHERE access_key = $1")
            .bind(access_key.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(decode_record).transpose()
    }

    async fn find_by_correlation(
        &self,
        correlation_id: &CorrelationId,
    ) -> StatusStoreResult<Option<DocumentStatusRecord>> {
        let row = sqlx::query(
            r#"
            SELECT d.record
            FROM fiscal_correlations c
            JOIN fiscal_documents d ON d.access_key = c.access_key
            WHERE c.correlation_id = $1
            "#,
        )
        .bind(correlation_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(decode_record).transpose()
    }

    async fn update(
        &self,
        access_key: &AccessKey,
        mutation: StatusMutation,
    ) -> StatusStoreResult<StatusUpdate> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT record FROM fiscal_documents WHERE access_key = $1 FOR UPDATE")
            .bind(access_key.as_str())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StatusStoreError::DocumentNotFound {
                access_key: access_key.clone(),
            })?;

        // A rejected mutation drops the transaction, which rolls back
        let mut record = decode_record(&row)?;
        let transitions = apply_mutation(&mut record, &mutation)?;

        sqlx::query(
            r#"
            UPDATE fiscal_documents
            SET state = $2, record = $3, updated_at = $4
            WHERE access_key = $1
            "#,
        )
        .bind(access_key.as_str())
        .bind(record.state.as_str())
        .bind(Json(&record))
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?;

        for correlation_id in mutation.appended_operations() {
            Self::index_correlation(&mut *tx, correlation_id, access_key).await?;
        }

        tx.commit().await?;
        Ok(StatusUpdate {
            record,
            transitions,
        })
    }

    async fn list_by_state(
        &self,
        tenant_id: &TenantId,
        state: DocumentState,
    ) -> StatusStoreResult<Vec<DocumentStatusRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT record
            FROM fiscal_documents
            WHERE tenant_id = $1 AND state = $2
            ORDER BY series, document_number
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_record).collect()
    }
}

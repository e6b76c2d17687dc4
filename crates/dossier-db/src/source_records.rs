//! Source record repository implementation.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use dossier_core::{
    Error, NewSourceRecord, ProcessingStage, ProcessingStatus, Result, SourceCategory,
    SourceRecord, SourceRecordRepository, StagePayload, StatusUpdate,
};

const SELECT_COLUMNS: &str = "id, owner_id, category, file_name, declared_mime_type, byte_size, \
     checksum, storage_path, status, raw_text, structured_data, processing_error, retryable, \
     failed_stage, data_source, created_at, updated_at";

/// PostgreSQL implementation of [`SourceRecordRepository`].
#[derive(Clone)]
pub struct PgSourceRecordRepository {
    pool: Pool<Postgres>,
}

impl PgSourceRecordRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::postgres::PgRow) -> Result<SourceRecord> {
        let category: String = row.get("category");
        let status: String = row.get("status");
        let failed_stage: Option<String> = row.get("failed_stage");

        Ok(SourceRecord {
            id: row.get("id"),
            owner_id: row.get("owner_id"),
            category: category
                .parse::<SourceCategory>()
                .map_err(Error::Internal)?,
            file_name: row.get("file_name"),
            declared_mime_type: row.get("declared_mime_type"),
            byte_size: row.get("byte_size"),
            checksum: row.get("checksum"),
            storage_path: row.get("storage_path"),
            status: status
                .parse::<ProcessingStatus>()
                .map_err(Error::Internal)?,
            raw_text: row.get("raw_text"),
            structured_data: row.get("structured_data"),
            processing_error: row.get("processing_error"),
            retryable: row.get("retryable"),
            failed_stage: failed_stage
                .map(|s| s.parse::<ProcessingStage>())
                .transpose()
                .map_err(Error::Internal)?,
            data_source: row.get("data_source"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl SourceRecordRepository for PgSourceRecordRepository {
    #[instrument(skip(self, record), fields(subsystem = "db", component = "source_records", op = "create", owner_id = %record.owner_id))]
    async fn create(&self, record: NewSourceRecord) -> Result<Uuid> {
        let id = Uuid::now_v7();

        sqlx::query(
            "INSERT INTO source_records
                (id, owner_id, category, file_name, declared_mime_type, byte_size, checksum,
                 storage_path, status, retryable, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'PENDING', FALSE, NOW(), NOW())",
        )
        .bind(id)
        .bind(&record.owner_id)
        .bind(record.category.as_str())
        .bind(&record.file_name)
        .bind(&record.declared_mime_type)
        .bind(record.byte_size)
        .bind(&record.checksum)
        .bind(&record.storage_path)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(record_id = %id, "Source record created");
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<SourceRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM source_records WHERE id = $1",
            SELECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    #[instrument(skip(self, update), fields(subsystem = "db", component = "source_records", op = "update_status", record_id = %id, status = %update.status))]
    async fn update_status(&self, id: Uuid, update: StatusUpdate) -> Result<SourceRecord> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM source_records WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(Error::Database)?;

        let current = current
            .ok_or(Error::SourceNotFound(id))?
            .parse::<ProcessingStatus>()
            .map_err(Error::Internal)?;

        if !current.can_transition_to(update.status) {
            return Err(Error::InvalidTransition {
                from: current,
                to: update.status,
            });
        }

        let (raw_text, structured) = match update.payload {
            Some(StagePayload::RawText(text)) => (Some(text), None),
            Some(StagePayload::Structured(json)) => (None, Some(json)),
            None => (None, None),
        };

        let row = sqlx::query(&format!(
            "UPDATE source_records SET
                status = $2,
                raw_text = COALESCE($3, raw_text),
                structured_data = COALESCE($4, structured_data),
                processing_error = $5,
                retryable = $6,
                failed_stage = $7,
                data_source = COALESCE($8, data_source),
                updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            SELECT_COLUMNS
        ))
        .bind(id)
        .bind(update.status.as_str())
        .bind(raw_text)
        .bind(structured)
        .bind(update.error)
        .bind(update.retryable)
        .bind(update.failed_stage.map(|s| s.as_str()))
        .bind(update.data_source)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Self::parse_row(&row)
    }

    async fn list_for_owner(&self, owner_id: &str, limit: i64) -> Result<Vec<SourceRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM source_records
             WHERE owner_id = $1
             ORDER BY created_at DESC
             LIMIT $2",
            SELECT_COLUMNS
        ))
        .bind(owner_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(Self::parse_row).collect()
    }

    async fn find_by_checksum(
        &self,
        owner_id: &str,
        checksum: &str,
    ) -> Result<Option<SourceRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM source_records
             WHERE owner_id = $1 AND checksum = $2
             ORDER BY created_at DESC
             LIMIT 1",
            SELECT_COLUMNS
        ))
        .bind(owner_id)
        .bind(checksum)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_row).transpose()
    }
}

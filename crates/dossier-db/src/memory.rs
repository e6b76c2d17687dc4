//! In-memory source record repository.
//!
//! Same contract as the PostgreSQL repository, including the status
//! transition guard. Used by tests and by the API when no `DATABASE_URL`
//! is configured.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use dossier_core::{
    Error, NewSourceRecord, ProcessingStatus, Result, SourceRecord, SourceRecordRepository,
    StagePayload, StatusUpdate,
};

/// Apply a status patch to a record, enforcing the state machine.
pub fn apply_status_update(record: &mut SourceRecord, update: StatusUpdate) -> Result<()> {
    if !record.status.can_transition_to(update.status) {
        return Err(Error::InvalidTransition {
            from: record.status,
            to: update.status,
        });
    }

    record.status = update.status;
    match update.payload {
        Some(StagePayload::RawText(text)) => record.raw_text = Some(text),
        Some(StagePayload::Structured(json)) => record.structured_data = Some(json),
        None => {}
    }
    record.processing_error = update.error;
    record.retryable = update.retryable;
    record.failed_stage = update.failed_stage;
    if update.data_source.is_some() {
        record.data_source = update.data_source;
    }
    record.updated_at = Utc::now();
    Ok(())
}

#[derive(Default)]
pub struct MemorySourceRecordRepository {
    records: RwLock<HashMap<Uuid, SourceRecord>>,
}

impl MemorySourceRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl SourceRecordRepository for MemorySourceRecordRepository {
    async fn create(&self, record: NewSourceRecord) -> Result<Uuid> {
        let id = Uuid::now_v7();
        let now = Utc::now();
        let stored = SourceRecord {
            id,
            owner_id: record.owner_id,
            category: record.category,
            file_name: record.file_name,
            declared_mime_type: record.declared_mime_type,
            byte_size: record.byte_size,
            checksum: record.checksum,
            storage_path: record.storage_path,
            status: ProcessingStatus::Pending,
            raw_text: None,
            structured_data: None,
            processing_error: None,
            retryable: false,
            failed_stage: None,
            data_source: None,
            created_at: now,
            updated_at: now,
        };
        self.records.write().await.insert(id, stored);
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<SourceRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn update_status(&self, id: Uuid, update: StatusUpdate) -> Result<SourceRecord> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(Error::SourceNotFound(id))?;
        apply_status_update(record, update)?;
        Ok(record.clone())
    }

    async fn list_for_owner(&self, owner_id: &str, limit: i64) -> Result<Vec<SourceRecord>> {
        let records = self.records.read().await;
        let mut owned: Vec<SourceRecord> = records
            .values()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();
        // v7 ids sort by creation time and break same-instant ties
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        owned.truncate(limit.max(0) as usize);
        Ok(owned)
    }

    async fn find_by_checksum(
        &self,
        owner_id: &str,
        checksum: &str,
    ) -> Result<Option<SourceRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.owner_id == owner_id && r.checksum == checksum)
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .cloned())
    }
}

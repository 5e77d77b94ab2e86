//! Append-only in-memory learning record.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use recsys_core::{LearningRecord, LearningRecordRepository, Result};

#[derive(Debug, Clone, Default)]
pub struct MemoryLearningRecordRepository {
    records: Arc<RwLock<Vec<LearningRecord>>>,
}

impl MemoryLearningRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl LearningRecordRepository for MemoryLearningRecordRepository {
    async fn log_record(&self, mut record: LearningRecord) -> Result<LearningRecord> {
        let mut records = self.records.write().await;
        record.id = records.len() as i64 + 1;
        records.push(record.clone());
        tracing::trace!(
            record_id = record.id,
            action = ?record.action,
            document = %record.document_name,
            "Learning record appended"
        );
        Ok(record)
    }

    async fn list_records(
        &self,
        user: &str,
        project_id: i64,
        layer_id: Option<i64>,
    ) -> Result<Vec<LearningRecord>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.user == user && r.project_id == project_id)
            .filter(|r| layer_id.map_or(true, |l| r.layer_id == l))
            .cloned()
            .collect())
    }
}

//! Persistence seam for queue state and download history.
//!
//! The scheduler treats storage as write-behind: persistence failures are
//! logged and dropped, never propagated into queue operations, so a
//! broken disk degrades durability rather than availability.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use crate::app::queue::{HistoryItem, QueueItem, QueueItemId};
use crate::errors::Result;

/// Backing store for queue items and history records
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist the current state of one live queue item
    async fn persist(&self, item: &QueueItem) -> Result<()>;

    /// Append a finished item to the download history
    async fn archive(&self, record: &HistoryItem) -> Result<()>;

    /// All archived history records, newest last
    async fn history(&self) -> Result<Vec<HistoryItem>>;
}

/// Persist an item, downgrading any failure to a warning
pub async fn persist_best_effort(storage: &dyn Storage, item: &QueueItem) {
    if let Err(e) = storage.persist(item).await {
        warn!("Failed to persist queue item {}: {}", item.id, e);
    }
}

/// Archive a record, downgrading any failure to a warning
pub async fn archive_best_effort(storage: &dyn Storage, record: &HistoryItem) {
    if let Err(e) = storage.archive(record).await {
        warn!("Failed to archive history for item {}: {}", record.id, e);
    }
}

/// In-memory storage used by tests and as the default backend
#[derive(Default)]
pub struct MemoryStorage {
    items: Mutex<Vec<QueueItem>>,
    records: Mutex<Vec<HistoryItem>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recently persisted state of one item, if any
    pub async fn persisted(&self, id: QueueItemId) -> Option<QueueItem> {
        self.items.lock().await.iter().find(|i| i.id == id).cloned()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn persist(&self, item: &QueueItem) -> Result<()> {
        let mut items = self.items.lock().await;
        items.retain(|i| i.id != item.id);
        items.push(item.clone());
        Ok(())
    }

    async fn archive(&self, record: &HistoryItem) -> Result<()> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }

    async fn history(&self) -> Result<Vec<HistoryItem>> {
        Ok(self.records.lock().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::models::BookFormat;
    use crate::app::queue::QueueStatus;
    use chrono::Utc;

    fn item(id: u64) -> QueueItem {
        QueueItem {
            id: QueueItemId(id),
            title: "book".to_string(),
            author: None,
            download_url: "https://dl.example.com/book".to_string(),
            format: BookFormat::Epub,
            file_size_bytes: None,
            priority: 5,
            status: QueueStatus::Pending,
            retry_count: 0,
            max_retries: 3,
            error_message: None,
            progress_percent: 0,
            bytes_downloaded: 0,
            download_speed_kbps: None,
            eta_seconds: None,
            next_eligible_at: None,
            timeout_seconds: None,
            indexer_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn test_persist_replaces_by_id() {
        let storage = MemoryStorage::new();
        let mut first = item(1);
        storage.persist(&first).await.unwrap();

        first.status = QueueStatus::Downloading;
        storage.persist(&first).await.unwrap();
        storage.persist(&item(2)).await.unwrap();

        let items = storage.items.lock().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].status, QueueStatus::Downloading);
    }

    #[tokio::test]
    async fn test_archive_appends() {
        let storage = MemoryStorage::new();
        let record = HistoryItem {
            id: QueueItemId(1),
            title: "book".to_string(),
            author: None,
            download_url: "https://dl.example.com/book".to_string(),
            final_status: QueueStatus::Completed,
            file_size_bytes: Some(100),
            error_message: None,
            created_at: Utc::now(),
            completed_at: Utc::now(),
        };
        storage.archive(&record).await.unwrap();
        storage.archive(&record).await.unwrap();
        assert_eq!(storage.history().await.unwrap().len(), 2);
    }
}

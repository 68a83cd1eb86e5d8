//! Download queue: persistent item state machine and scheduling order.
//!
//! The queue is the single source of truth for download state. Workers
//! claim work through [`DownloadQueue::claim_next`], which atomically
//! selects the highest-priority eligible Pending item and moves it to
//! Downloading, so an item can never be claimed twice. Retry backoff is
//! expressed as a `next_eligible_at` timestamp checked at claim time
//! rather than with per-item timers.
//!
//! Lock design: all mutable state sits behind one async Mutex; aggregate
//! counters are mirrored into an RwLock so status displays never contend
//! with scheduling.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use url::Url;

use crate::app::events::{Event, EventBus};
use crate::app::models::{BookFormat, IndexerId};
use crate::app::retry::RetryPolicy;
use crate::constants::queue as queue_consts;
use crate::errors::{DownloadError, QueueError, QueueResult};

/// Unique identifier for a queue item, assigned at enqueue time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueItemId(pub u64);

impl std::fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl QueueStatus {
    /// Terminal items never re-enter scheduling and are eligible for archival
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueStatus::Completed | QueueStatus::Failed | QueueStatus::Cancelled
        )
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Downloading => "downloading",
            QueueStatus::Paused => "paused",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
            QueueStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Request to add one download to the queue
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub title: String,
    pub author: Option<String>,
    pub download_url: String,
    pub format: BookFormat,
    pub file_size_bytes: Option<u64>,
    /// 1 (most urgent) to 10; defaults to 5
    pub priority: Option<u8>,
    pub max_retries: Option<u32>,
    /// Override the pool-wide download watchdog for this item
    pub timeout_seconds: Option<u64>,
    pub indexer_id: Option<IndexerId>,
}

impl DownloadRequest {
    pub fn new(title: impl Into<String>, download_url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: None,
            download_url: download_url.into(),
            format: BookFormat::Epub,
            file_size_bytes: None,
            priority: None,
            max_retries: None,
            timeout_seconds: None,
            indexer_id: None,
        }
    }
}

/// One item in the download queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: QueueItemId,
    pub title: String,
    pub author: Option<String>,
    pub download_url: String,
    pub format: BookFormat,
    pub file_size_bytes: Option<u64>,
    pub priority: u8,
    pub status: QueueStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
    pub progress_percent: u8,
    pub bytes_downloaded: u64,
    pub download_speed_kbps: Option<u64>,
    pub eta_seconds: Option<u64>,
    /// Not dequeued before this instant; None means immediately eligible
    pub next_eligible_at: Option<DateTime<Utc>>,
    /// Per-item watchdog override in seconds
    pub timeout_seconds: Option<u64>,
    pub indexer_id: Option<IndexerId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    fn eligible_now(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Pending
            && self.next_eligible_at.map(|at| at <= now).unwrap_or(true)
    }
}

/// Immutable record of a finished item, moved out of the live queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: QueueItemId,
    pub title: String,
    pub author: Option<String>,
    pub download_url: String,
    pub final_status: QueueStatus,
    pub file_size_bytes: Option<u64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl HistoryItem {
    fn from_item(item: &QueueItem) -> Self {
        Self {
            id: item.id,
            title: item.title.clone(),
            author: item.author.clone(),
            download_url: item.download_url.clone(),
            final_status: item.status,
            file_size_bytes: item.file_size_bytes,
            error_message: item.error_message.clone(),
            created_at: item.created_at,
            completed_at: item.completed_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Aggregate queue counters, cached for cheap reads
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub downloading: usize,
    pub paused: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    items: HashMap<QueueItemId, QueueItem>,
    next_id: u64,
}

impl QueueState {
    fn compute_stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            total: self.items.len(),
            ..Default::default()
        };
        for item in self.items.values() {
            match item.status {
                QueueStatus::Pending => stats.pending += 1,
                QueueStatus::Downloading => stats.downloading += 1,
                QueueStatus::Paused => stats.paused += 1,
                QueueStatus::Completed => stats.completed += 1,
                QueueStatus::Failed => stats.failed += 1,
                QueueStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    fn live_count(&self) -> usize {
        self.items
            .values()
            .filter(|i| !i.status.is_terminal())
            .count()
    }
}

/// Priority download queue with retry scheduling
pub struct DownloadQueue {
    state: Mutex<QueueState>,
    stats: RwLock<QueueStats>,
    policy: RetryPolicy,
    max_size: usize,
    events: Arc<EventBus>,
}

impl DownloadQueue {
    pub fn new(policy: RetryPolicy, events: Arc<EventBus>) -> Self {
        Self::with_capacity(policy, events, queue_consts::MAX_QUEUE_SIZE)
    }

    pub fn with_capacity(policy: RetryPolicy, events: Arc<EventBus>, max_size: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            stats: RwLock::new(QueueStats::default()),
            policy,
            max_size,
            events,
        }
    }

    /// Validate and add a download, returning the created item
    pub async fn enqueue(&self, request: DownloadRequest) -> QueueResult<QueueItem> {
        if request.title.trim().is_empty() {
            return Err(QueueError::Validation {
                reason: "title must not be empty".to_string(),
            });
        }
        if Url::parse(&request.download_url).is_err() {
            return Err(QueueError::Validation {
                reason: format!("invalid download URL: {}", request.download_url),
            });
        }
        let priority = request.priority.unwrap_or(queue_consts::DEFAULT_PRIORITY);
        validate_priority(priority)?;

        let mut state = self.state.lock().await;
        let live = state.live_count();
        if live >= self.max_size {
            return Err(QueueError::CapacityExceeded {
                current: live,
                limit: self.max_size,
            });
        }

        state.next_id += 1;
        let now = Utc::now();
        let item = QueueItem {
            id: QueueItemId(state.next_id),
            title: request.title,
            author: request.author,
            download_url: request.download_url,
            format: request.format,
            file_size_bytes: request.file_size_bytes,
            priority,
            status: QueueStatus::Pending,
            retry_count: 0,
            max_retries: request.max_retries.unwrap_or(self.policy.max_retries),
            error_message: None,
            progress_percent: 0,
            bytes_downloaded: 0,
            download_speed_kbps: None,
            eta_seconds: None,
            next_eligible_at: None,
            timeout_seconds: request.timeout_seconds,
            indexer_id: request.indexer_id,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };
        state.items.insert(item.id, item.clone());
        info!("Enqueued \"{}\" as item {}", item.title, item.id);
        self.after_mutation(&state).await;
        Ok(item)
    }

    /// Claim the next eligible item for a worker, if the concurrency
    /// budget allows one.
    ///
    /// Selection is priority ascending (1 is most urgent), then FIFO by
    /// creation time. The selected item atomically moves to Downloading.
    pub async fn claim_next(&self, max_concurrent: usize) -> Option<QueueItem> {
        let mut state = self.state.lock().await;
        let downloading = state
            .items
            .values()
            .filter(|i| i.status == QueueStatus::Downloading)
            .count();
        if downloading >= max_concurrent {
            return None;
        }

        let now = Utc::now();
        let chosen = state
            .items
            .values()
            .filter(|i| i.eligible_now(now))
            .min_by_key(|i| (i.priority, i.created_at, i.id))?
            .id;

        let item = state.items.get_mut(&chosen)?;
        item.status = QueueStatus::Downloading;
        item.started_at = Some(now);
        item.updated_at = now;
        item.download_speed_kbps = None;
        item.eta_seconds = None;
        let claimed = item.clone();
        debug!("Claimed item {} (priority {})", claimed.id, claimed.priority);
        self.after_mutation(&state).await;
        Some(claimed)
    }

    /// Record transfer progress for an active item
    pub async fn update_progress(
        &self,
        id: QueueItemId,
        bytes_downloaded: u64,
        progress_percent: u8,
        download_speed_kbps: Option<u64>,
        eta_seconds: Option<u64>,
    ) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        let item = state
            .items
            .get_mut(&id)
            .ok_or(QueueError::ItemNotFound { id: id.0 })?;
        // Late progress from a cancelled transfer is dropped silently
        if item.status != QueueStatus::Downloading {
            return Ok(());
        }
        item.bytes_downloaded = bytes_downloaded;
        item.progress_percent = progress_percent.min(100);
        item.download_speed_kbps = download_speed_kbps;
        item.eta_seconds = eta_seconds;
        item.updated_at = Utc::now();

        self.events.publish(Event::DownloadProgress {
            item_id: id.0,
            progress_percent: item.progress_percent,
            bytes_downloaded,
            download_speed_kbps,
            eta_seconds,
        });
        Ok(())
    }

    /// Mark an active item as successfully completed
    pub async fn mark_completed(
        &self,
        id: QueueItemId,
        file_size_bytes: u64,
    ) -> QueueResult<QueueItem> {
        let mut state = self.state.lock().await;
        let item = state
            .items
            .get_mut(&id)
            .ok_or(QueueError::ItemNotFound { id: id.0 })?;
        if item.status != QueueStatus::Downloading {
            return Err(QueueError::InvalidTransition {
                id: id.0,
                from: item.status.to_string(),
                to: QueueStatus::Completed.to_string(),
            });
        }
        let now = Utc::now();
        item.status = QueueStatus::Completed;
        item.progress_percent = 100;
        item.bytes_downloaded = file_size_bytes;
        item.file_size_bytes = Some(file_size_bytes);
        item.error_message = None;
        item.completed_at = Some(now);
        item.updated_at = now;
        let done = item.clone();
        info!("Item {} completed ({} bytes)", id, file_size_bytes);

        self.events.publish(Event::DownloadCompleted {
            item_id: id.0,
            file_size_bytes,
        });
        self.after_mutation(&state).await;
        Ok(done)
    }

    /// Record a failed download attempt.
    ///
    /// Retryable errors under the retry budget re-queue the item as
    /// Pending with exponential backoff; anything else is terminal.
    /// Cancellation maps to the Cancelled state and never counts as a
    /// failure.
    pub async fn mark_failed(
        &self,
        id: QueueItemId,
        error: &DownloadError,
    ) -> QueueResult<QueueItem> {
        let mut state = self.state.lock().await;
        let item = state
            .items
            .get_mut(&id)
            .ok_or(QueueError::ItemNotFound { id: id.0 })?;
        // Tolerate races with cancel(): the transfer result of an item
        // that already left Downloading is irrelevant
        if item.status != QueueStatus::Downloading {
            return Ok(item.clone());
        }

        let now = Utc::now();
        item.updated_at = now;

        if matches!(error, DownloadError::Cancelled) {
            item.status = QueueStatus::Cancelled;
            item.completed_at = Some(now);
            let cancelled = item.clone();
            self.after_mutation(&state).await;
            return Ok(cancelled);
        }

        item.error_message = Some(error.to_string());
        // Each retryable failure within the per-item budget consumes one
        // retry; the failure that spends the last one is terminal, so
        // `retry_count` never exceeds `max_retries`
        if self
            .policy
            .should_retry(error, item.retry_count, item.max_retries)
        {
            item.retry_count += 1;
        }
        let will_retry = error.is_retryable() && item.retry_count < item.max_retries;
        if will_retry {
            item.status = QueueStatus::Pending;
            item.next_eligible_at = Some(self.policy.next_eligible_at(item.retry_count));
            item.progress_percent = 0;
            item.bytes_downloaded = 0;
            info!(
                "Item {} failed ({}), retry {}/{} after backoff",
                id, error, item.retry_count, item.max_retries
            );
        } else {
            item.status = QueueStatus::Failed;
            item.completed_at = Some(now);
            info!("Item {} permanently failed: {}", id, error);
        }
        let updated = item.clone();

        self.events.publish(Event::DownloadFailed {
            item_id: id.0,
            error: error.to_string(),
            will_retry,
        });
        self.after_mutation(&state).await;
        Ok(updated)
    }

    /// Pause a live item so the scheduler skips it.
    ///
    /// Pausing a Downloading item is allowed; the caller is responsible
    /// for cancelling the in-flight transfer, whose late result the
    /// queue drops as a race (see [`DownloadQueue::mark_failed`]). The
    /// item restarts from the beginning when resumed.
    pub async fn pause(&self, id: QueueItemId) -> QueueResult<QueueItem> {
        let mut state = self.state.lock().await;
        let item = state
            .items
            .get_mut(&id)
            .ok_or(QueueError::ItemNotFound { id: id.0 })?;
        if !matches!(
            item.status,
            QueueStatus::Pending | QueueStatus::Downloading
        ) {
            return Err(QueueError::InvalidTransition {
                id: id.0,
                from: item.status.to_string(),
                to: QueueStatus::Paused.to_string(),
            });
        }
        item.status = QueueStatus::Paused;
        item.download_speed_kbps = None;
        item.eta_seconds = None;
        item.updated_at = Utc::now();
        let paused = item.clone();
        info!("Item {} paused", id);
        self.after_mutation(&state).await;
        Ok(paused)
    }

    /// Resume a Paused item back into scheduling
    pub async fn resume(&self, id: QueueItemId) -> QueueResult<QueueItem> {
        self.transition(id, QueueStatus::Pending, |status| {
            status == QueueStatus::Paused
        })
        .await
    }

    /// Cancel a live item.
    ///
    /// For Downloading items the caller is responsible for cancelling the
    /// in-flight transfer; the queue state changes immediately.
    pub async fn cancel(&self, id: QueueItemId) -> QueueResult<QueueItem> {
        let mut state = self.state.lock().await;
        let item = state
            .items
            .get_mut(&id)
            .ok_or(QueueError::ItemNotFound { id: id.0 })?;
        if item.status.is_terminal() {
            return Err(QueueError::InvalidTransition {
                id: id.0,
                from: item.status.to_string(),
                to: QueueStatus::Cancelled.to_string(),
            });
        }
        let now = Utc::now();
        item.status = QueueStatus::Cancelled;
        item.completed_at = Some(now);
        item.updated_at = now;
        let cancelled = item.clone();
        info!("Item {} cancelled", id);
        self.after_mutation(&state).await;
        Ok(cancelled)
    }

    /// Change the priority of a live item
    pub async fn set_priority(&self, id: QueueItemId, priority: u8) -> QueueResult<QueueItem> {
        validate_priority(priority)?;
        let mut state = self.state.lock().await;
        let item = state
            .items
            .get_mut(&id)
            .ok_or(QueueError::ItemNotFound { id: id.0 })?;
        if item.status.is_terminal() {
            return Err(QueueError::InvalidTransition {
                id: id.0,
                from: item.status.to_string(),
                to: format!("priority {}", priority),
            });
        }
        item.priority = priority;
        item.updated_at = Utc::now();
        let updated = item.clone();
        self.after_mutation(&state).await;
        Ok(updated)
    }

    /// Make an item immediately eligible again.
    ///
    /// For a Failed item this resets the retry budget; for a Pending item
    /// it clears any backoff delay.
    pub async fn retry_now(&self, id: QueueItemId) -> QueueResult<QueueItem> {
        let mut state = self.state.lock().await;
        let item = state
            .items
            .get_mut(&id)
            .ok_or(QueueError::ItemNotFound { id: id.0 })?;
        match item.status {
            QueueStatus::Failed => {
                item.status = QueueStatus::Pending;
                item.retry_count = 0;
                item.error_message = None;
                item.completed_at = None;
            }
            QueueStatus::Pending => {}
            other => {
                return Err(QueueError::InvalidTransition {
                    id: id.0,
                    from: other.to_string(),
                    to: QueueStatus::Pending.to_string(),
                });
            }
        }
        item.next_eligible_at = None;
        item.updated_at = Utc::now();
        let updated = item.clone();
        self.after_mutation(&state).await;
        Ok(updated)
    }

    /// Look up one item
    pub async fn get(&self, id: QueueItemId) -> Option<QueueItem> {
        self.state.lock().await.items.get(&id).cloned()
    }

    /// List items in scheduling order, optionally filtered by status,
    /// with offset/limit pagination
    pub async fn snapshot(
        &self,
        status: Option<QueueStatus>,
        offset: usize,
        limit: usize,
    ) -> Vec<QueueItem> {
        let state = self.state.lock().await;
        let mut items: Vec<QueueItem> = state
            .items
            .values()
            .filter(|i| status.map(|s| i.status == s).unwrap_or(true))
            .cloned()
            .collect();
        items.sort_by_key(|i| (i.priority, i.created_at, i.id));
        items.into_iter().skip(offset).take(limit).collect()
    }

    /// Move terminal items out of the live queue, returning their records
    pub async fn archive_terminal(&self) -> Vec<HistoryItem> {
        let mut state = self.state.lock().await;
        let terminal: Vec<QueueItemId> = state
            .items
            .values()
            .filter(|i| i.status.is_terminal())
            .map(|i| i.id)
            .collect();
        let mut archived = Vec::with_capacity(terminal.len());
        for id in terminal {
            if let Some(item) = state.items.remove(&id) {
                archived.push(HistoryItem::from_item(&item));
            }
        }
        if !archived.is_empty() {
            debug!("Archived {} terminal queue items", archived.len());
            self.after_mutation(&state).await;
        }
        archived
    }

    /// Current counters from the stats cache
    pub async fn stats(&self) -> QueueStats {
        *self.stats.read().await
    }

    async fn after_mutation(&self, state: &QueueState) {
        let stats = state.compute_stats();
        *self.stats.write().await = stats;
        self.events.publish(Event::QueueUpdated {
            pending: stats.pending,
            active: stats.downloading,
        });
    }

    async fn transition(
        &self,
        id: QueueItemId,
        to: QueueStatus,
        allowed_from: impl Fn(QueueStatus) -> bool,
    ) -> QueueResult<QueueItem> {
        let mut state = self.state.lock().await;
        let item = state
            .items
            .get_mut(&id)
            .ok_or(QueueError::ItemNotFound { id: id.0 })?;
        if !allowed_from(item.status) {
            return Err(QueueError::InvalidTransition {
                id: id.0,
                from: item.status.to_string(),
                to: to.to_string(),
            });
        }
        item.status = to;
        item.updated_at = Utc::now();
        let updated = item.clone();
        self.after_mutation(&state).await;
        Ok(updated)
    }
}

fn validate_priority(priority: u8) -> QueueResult<()> {
    if !(queue_consts::MIN_PRIORITY..=queue_consts::MAX_PRIORITY).contains(&priority) {
        return Err(QueueError::Validation {
            reason: format!(
                "priority {} outside {}..={}",
                priority,
                queue_consts::MIN_PRIORITY,
                queue_consts::MAX_PRIORITY
            ),
        });
    }
    Ok(())
}

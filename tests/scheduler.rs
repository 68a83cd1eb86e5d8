//! Integration tests for the download scheduler
//!
//! These drive the queue and worker pool together through a mock
//! transport to verify end-to-end scheduling behavior: priority order,
//! the concurrency bound, retry exhaustion and cancellation.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use foliofox::app::queue::{DownloadQueue, DownloadRequest, QueueItemId, QueueStatus};
use foliofox::app::worker::{Transport, WorkerPool};
use foliofox::app::{EventBus, RetryPolicy};
use foliofox::errors::{DownloadError, DownloadResult};

/// Transport whose behavior is selected by the download URL:
/// URLs containing "block" wait for cancellation, "fail" always error,
/// anything else completes immediately.
struct MockTransport {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    completions: Mutex<Vec<String>>,
}

impl MockTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            completions: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch(
        &self,
        url: &str,
        _dest: &Path,
        _progress: mpsc::Sender<u64>,
        cancel: CancellationToken,
    ) -> DownloadResult<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let result = if url.contains("block") {
            cancel.cancelled().await;
            Err(DownloadError::Cancelled)
        } else if url.contains("fail") {
            Err(DownloadError::TransientNetwork("connection reset".into()))
        } else {
            // Small delay so concurrent claims overlap
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.completions.lock().await.push(url.to_string());
            Ok(1024)
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    }
}

fn scheduler(
    max_concurrent: usize,
    policy: RetryPolicy,
) -> (Arc<DownloadQueue>, Arc<WorkerPool>, Arc<MockTransport>) {
    let queue = Arc::new(DownloadQueue::new(policy, Arc::new(EventBus::new())));
    let transport = MockTransport::new();
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(WorkerPool::new(
        Arc::clone(&queue),
        transport.clone(),
        dir.into_path(),
        max_concurrent,
    ));
    (queue, pool, transport)
}

async fn wait_for_status(
    queue: &DownloadQueue,
    id: QueueItemId,
    status: QueueStatus,
) -> bool {
    for _ in 0..200 {
        match queue.get(id).await {
            Some(item) if item.status == status => return true,
            _ => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
    false
}

#[tokio::test]
async fn test_priority_order_with_single_worker() {
    let (queue, pool, transport) = scheduler(1, fast_policy(0));

    let mut low = DownloadRequest::new("low", "https://dl.example.com/low");
    low.priority = Some(5);
    let low = queue.enqueue(low).await.unwrap();

    let mut urgent = DownloadRequest::new("urgent", "https://dl.example.com/urgent");
    urgent.priority = Some(1);
    let urgent = queue.enqueue(urgent).await.unwrap();

    Arc::clone(&pool).start().await;
    assert!(wait_for_status(&queue, low.id, QueueStatus::Completed).await);
    assert!(wait_for_status(&queue, urgent.id, QueueStatus::Completed).await);
    pool.shutdown().await;

    let order = transport.completions.lock().await.clone();
    assert_eq!(
        order,
        vec![
            "https://dl.example.com/urgent".to_string(),
            "https://dl.example.com/low".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_concurrency_never_exceeds_pool_size() {
    let (queue, pool, transport) = scheduler(2, fast_policy(0));

    let mut ids = Vec::new();
    for i in 0..6 {
        let item = queue
            .enqueue(DownloadRequest::new(
                format!("book-{}", i),
                format!("https://dl.example.com/book-{}", i),
            ))
            .await
            .unwrap();
        ids.push(item.id);
    }

    Arc::clone(&pool).start().await;
    for id in ids {
        assert!(wait_for_status(&queue, id, QueueStatus::Completed).await);
    }
    pool.shutdown().await;

    assert!(transport.max_in_flight.load(Ordering::SeqCst) <= 2);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn test_retry_exhaustion_marks_item_failed() {
    let (queue, pool, transport) = scheduler(1, fast_policy(3));

    let item = queue
        .enqueue(DownloadRequest::new("bad", "https://dl.example.com/fail"))
        .await
        .unwrap();

    Arc::clone(&pool).start().await;
    assert!(wait_for_status(&queue, item.id, QueueStatus::Failed).await);
    pool.shutdown().await;

    let failed = queue.get(item.id).await.unwrap();
    assert_eq!(failed.retry_count, 3);
    assert!(failed.error_message.is_some());
    // The third failure spends the last retry and is terminal
    assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_cancel_pending_item_never_reaches_transport() {
    let (queue, pool, transport) = scheduler(1, fast_policy(0));

    let item = queue
        .enqueue(DownloadRequest::new("book", "https://dl.example.com/book"))
        .await
        .unwrap();
    queue.cancel(item.id).await.unwrap();

    Arc::clone(&pool).start().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    pool.shutdown().await;

    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        queue.get(item.id).await.unwrap().status,
        QueueStatus::Cancelled
    );
}

#[tokio::test]
async fn test_cancelling_active_transfer_frees_the_slot() {
    let (queue, pool, _transport) = scheduler(1, fast_policy(0));

    let stuck = queue
        .enqueue(DownloadRequest::new("stuck", "https://dl.example.com/block"))
        .await
        .unwrap();

    Arc::clone(&pool).start().await;
    assert!(wait_for_status(&queue, stuck.id, QueueStatus::Downloading).await);

    // Cancel queue-side, then abort the in-flight transfer
    queue.cancel(stuck.id).await.unwrap();
    assert!(pool.cancel_item(stuck.id).await);

    // The freed worker must pick up new work
    let next = queue
        .enqueue(DownloadRequest::new("next", "https://dl.example.com/next"))
        .await
        .unwrap();
    assert!(wait_for_status(&queue, next.id, QueueStatus::Completed).await);
    pool.shutdown().await;

    assert_eq!(
        queue.get(stuck.id).await.unwrap().status,
        QueueStatus::Cancelled
    );
}

#[tokio::test]
async fn test_pausing_active_transfer_frees_the_slot() {
    let (queue, pool, _transport) = scheduler(1, fast_policy(3));

    let stuck = queue
        .enqueue(DownloadRequest::new("stuck", "https://dl.example.com/block"))
        .await
        .unwrap();

    Arc::clone(&pool).start().await;
    assert!(wait_for_status(&queue, stuck.id, QueueStatus::Downloading).await);

    // Pause queue-side, then abort the in-flight transfer
    queue.pause(stuck.id).await.unwrap();
    assert!(pool.cancel_item(stuck.id).await);

    // The freed worker must pick up new work
    let next = queue
        .enqueue(DownloadRequest::new("next", "https://dl.example.com/next"))
        .await
        .unwrap();
    assert!(wait_for_status(&queue, next.id, QueueStatus::Completed).await);
    pool.shutdown().await;

    // The paused item survives the aborted transfer untouched
    let paused = queue.get(stuck.id).await.unwrap();
    assert_eq!(paused.status, QueueStatus::Paused);
    assert_eq!(paused.retry_count, 0);
}

#[tokio::test]
async fn test_cancellation_does_not_consume_retries() {
    let (queue, pool, _transport) = scheduler(1, fast_policy(3));

    let stuck = queue
        .enqueue(DownloadRequest::new("stuck", "https://dl.example.com/block"))
        .await
        .unwrap();

    Arc::clone(&pool).start().await;
    assert!(wait_for_status(&queue, stuck.id, QueueStatus::Downloading).await);
    assert!(pool.cancel_item(stuck.id).await);
    assert!(wait_for_status(&queue, stuck.id, QueueStatus::Cancelled).await);
    pool.shutdown().await;

    let item = queue.get(stuck.id).await.unwrap();
    assert_eq!(item.retry_count, 0);
    assert!(item.error_message.is_none());
}

//! Download workers: transport abstraction and the worker pool.
//!
//! A fixed pool of workers claims items from the queue, so global
//! download concurrency is bounded by the pool size. Each transfer runs
//! under a watchdog timeout and a per-item cancellation token; the worker
//! reports exactly one outcome per claim back to the queue. Transfers
//! stream to disk and emit byte counts over a bounded channel, which the
//! worker turns into throttled progress updates.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app::queue::{DownloadQueue, QueueItem, QueueItemId};
use crate::app::storage::{persist_best_effort, MemoryStorage, Storage};
use crate::constants::workers;
use crate::errors::{DownloadError, DownloadResult};

/// Byte-level transfer of one URL to a destination file.
///
/// Implementations send cumulative byte counts over `progress` (dropped
/// counts are fine, the channel is lossy by design) and must return
/// [`DownloadError::Cancelled`] promptly when the token fires.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        progress: mpsc::Sender<u64>,
        cancel: CancellationToken,
    ) -> DownloadResult<u64>;
}

/// HTTP transport streaming response bodies to disk
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        progress: mpsc::Sender<u64>,
        cancel: CancellationToken,
    ) -> DownloadResult<u64> {
        let parsed = url::Url::parse(url).map_err(|_| DownloadError::InvalidUrl {
            url: url.to_string(),
        })?;

        let response = self.client.get(parsed).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::ServerError {
                status: status.as_u16(),
            });
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut total: u64 = 0;

        loop {
            tokio::select! {
                chunk = stream.next() => {
                    match chunk {
                        Some(Ok(bytes)) => {
                            file.write_all(&bytes).await?;
                            total += bytes.len() as u64;
                            let _ = progress.try_send(total);
                        }
                        Some(Err(e)) => return Err(DownloadError::Http(e)),
                        None => break,
                    }
                }
                _ = cancel.cancelled() => {
                    return Err(DownloadError::Cancelled);
                }
            }
        }

        file.flush().await?;
        Ok(total)
    }
}

/// Derive percent, speed and ETA from a progress sample.
///
/// Percent is only meaningful when the expected size is known; speed is
/// the average over the window since the previous sample.
fn progress_snapshot(
    bytes: u64,
    expected_size: Option<u64>,
    window_bytes: u64,
    window: Duration,
) -> (u8, Option<u64>, Option<u64>) {
    let percent = match expected_size {
        Some(total) if total > 0 => ((bytes.min(total) * 100) / total) as u8,
        _ => 0,
    };
    let speed_kbps = if window.as_millis() > 0 && window_bytes > 0 {
        Some(window_bytes * 1000 / window.as_millis() as u64 / 1024)
    } else {
        None
    };
    let eta_seconds = match (expected_size, speed_kbps) {
        (Some(total), Some(kbps)) if kbps > 0 && total > bytes => {
            Some((total - bytes) / (kbps * 1024))
        }
        _ => None,
    };
    (percent, speed_kbps, eta_seconds)
}

/// Replace filesystem-hostile characters in a title
fn sanitize_filename(title: &str) -> String {
    title
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Fixed-size pool of download workers over one shared queue
pub struct WorkerPool {
    queue: Arc<DownloadQueue>,
    transport: Arc<dyn Transport>,
    storage: Arc<dyn Storage>,
    download_dir: PathBuf,
    max_concurrent: usize,
    download_timeout: Duration,
    shutdown: CancellationToken,
    active: Arc<Mutex<HashMap<QueueItemId, CancellationToken>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<DownloadQueue>,
        transport: Arc<dyn Transport>,
        download_dir: PathBuf,
        max_concurrent: usize,
    ) -> Self {
        Self {
            queue,
            transport,
            storage: Arc::new(MemoryStorage::new()),
            download_dir,
            max_concurrent: max_concurrent.max(1),
            download_timeout: workers::DOWNLOAD_TIMEOUT,
            shutdown: CancellationToken::new(),
            active: Arc::new(Mutex::new(HashMap::new())),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Override the per-item watchdog timeout
    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    /// Share a storage backend so worker-driven transitions (claim,
    /// completion, failure) are persisted as they happen, not only by
    /// the periodic housekeeping pass
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = storage;
        self
    }

    /// Spawn the worker tasks
    pub async fn start(self: Arc<Self>) {
        let mut handles = self.handles.lock().await;
        for worker_id in 0..self.max_concurrent {
            let pool = Arc::clone(&self);
            handles.push(tokio::spawn(async move {
                pool.worker_loop(worker_id).await;
            }));
        }
        info!("Started {} download workers", self.max_concurrent);
    }

    /// Cancel the in-flight transfer for an item, if any.
    ///
    /// Returns false when the item is not currently being transferred;
    /// queue-state cancellation is the caller's job either way.
    pub async fn cancel_item(&self, id: QueueItemId) -> bool {
        let active = self.active.lock().await;
        match active.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop all workers, cancelling in-flight transfers
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            if tokio::time::timeout(crate::constants::coordinator::SHUTDOWN_TIMEOUT, handle)
                .await
                .is_err()
            {
                warn!("Worker did not stop within the shutdown timeout");
            }
        }
        info!("Worker pool stopped");
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        debug!("Worker {} started", worker_id);
        let mut idle_sleep = workers::IDLE_SLEEP;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            match self.queue.claim_next(self.max_concurrent).await {
                Some(item) => {
                    idle_sleep = workers::IDLE_SLEEP;
                    persist_best_effort(self.storage.as_ref(), &item).await;
                    self.process_item(worker_id, item).await;
                }
                None => {
                    // Exponential idle backoff with jitter so idle workers
                    // don't poll the queue in lockstep
                    let jitter = Duration::from_millis(fastrand::u64(0..50));
                    tokio::select! {
                        _ = tokio::time::sleep(idle_sleep + jitter) => {}
                        _ = self.shutdown.cancelled() => break,
                    }
                    idle_sleep = (idle_sleep * 2).min(Duration::from_secs(5));
                }
            }
        }
        debug!("Worker {} stopped", worker_id);
    }

    async fn process_item(&self, worker_id: usize, item: QueueItem) {
        let token = self.shutdown.child_token();
        self.active.lock().await.insert(item.id, token.clone());

        debug!(
            "Worker {} transferring item {} (\"{}\")",
            worker_id, item.id, item.title
        );
        let result = self.run_transfer(&item, token).await;

        self.active.lock().await.remove(&item.id);

        // Exactly one outcome per claim; queue errors here mean the item
        // was cancelled or archived out from under us, which is fine
        let report = match result {
            Ok(bytes) => self.queue.mark_completed(item.id, bytes).await,
            Err(error) => self.queue.mark_failed(item.id, &error).await,
        };
        match report {
            Ok(updated) => persist_best_effort(self.storage.as_ref(), &updated).await,
            Err(e) => warn!("Could not record outcome for item {}: {}", item.id, e),
        }
    }

    async fn run_transfer(&self, item: &QueueItem, token: CancellationToken) -> DownloadResult<u64> {
        let filename = format!(
            "{}-{}.{}",
            item.id,
            sanitize_filename(&item.title),
            item.format.as_str()
        );
        let dest = self.download_dir.join(filename);

        let (progress_tx, mut progress_rx) =
            mpsc::channel::<u64>(workers::PROGRESS_BUFFER_SIZE);
        let transport = Arc::clone(&self.transport);
        let url = item.download_url.clone();
        let transfer_token = token.clone();
        let mut transfer = tokio::spawn(async move {
            transport
                .fetch(&url, &dest, progress_tx, transfer_token)
                .await
        });

        let watchdog = item
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.download_timeout);
        let deadline = tokio::time::sleep(watchdog);
        tokio::pin!(deadline);

        let mut last_sample = Instant::now();
        let mut last_bytes: u64 = 0;

        loop {
            tokio::select! {
                joined = &mut transfer => {
                    return match joined {
                        Ok(result) => result,
                        Err(_) => Err(DownloadError::TransientNetwork(
                            "transfer task panicked".to_string(),
                        )),
                    };
                }
                Some(bytes) = progress_rx.recv() => {
                    let elapsed = last_sample.elapsed();
                    if elapsed < workers::PROGRESS_UPDATE_INTERVAL {
                        continue;
                    }
                    let (percent, speed, eta) = progress_snapshot(
                        bytes,
                        item.file_size_bytes,
                        bytes.saturating_sub(last_bytes),
                        elapsed,
                    );
                    last_sample = Instant::now();
                    last_bytes = bytes;
                    let _ = self
                        .queue
                        .update_progress(item.id, bytes, percent, speed, eta)
                        .await;
                }
                _ = &mut deadline => {
                    warn!(
                        "Item {} hit the {}s download watchdog",
                        item.id,
                        watchdog.as_secs()
                    );
                    token.cancel();
                    transfer.abort();
                    return Err(DownloadError::Timeout {
                        seconds: watchdog.as_secs(),
                    });
                }
            }
        }
    }
}

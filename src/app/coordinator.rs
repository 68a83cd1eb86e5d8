//! Coordinator: owns every subsystem and exposes the public API.
//!
//! The coordinator wires the registry, search aggregator, queue, worker
//! pool and storage together, runs the periodic housekeeping task (cache
//! purge, history archival, write-behind persistence) and handles
//! graceful shutdown. CLI commands and embedding applications go through
//! this type rather than the subsystems directly.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::app::cache::{CacheStats, ResultCache};
use crate::app::clients::{build_http_client, client_for, IndexerClient};
use crate::app::events::{Event, EventBus};
use crate::app::models::{
    Indexer, IndexerHealth, IndexerId, IndexerKind, SearchRequest, SearchResponse,
};
use crate::app::queue::{
    DownloadQueue, DownloadRequest, HistoryItem, QueueItem, QueueItemId, QueueStats, QueueStatus,
};
use crate::app::registry::IndexerRegistry;
use crate::app::search::SearchAggregator;
use crate::app::storage::{archive_best_effort, persist_best_effort, MemoryStorage, Storage};
use crate::app::worker::{HttpTransport, WorkerPool};
use crate::config::AppConfig;
use crate::constants::coordinator as coordinator_consts;
use crate::errors::{IndexerError, Result};

/// Application coordinator over all scheduler subsystems
pub struct Coordinator {
    registry: Arc<IndexerRegistry>,
    cache: Arc<ResultCache>,
    aggregator: Arc<SearchAggregator>,
    queue: Arc<DownloadQueue>,
    pool: Arc<WorkerPool>,
    storage: Arc<dyn Storage>,
    events: Arc<EventBus>,
    clients: HashMap<IndexerKind, Arc<dyn IndexerClient>>,
    shutdown: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    /// Build a coordinator from configuration with in-memory storage
    pub async fn new(config: &AppConfig) -> Result<Self> {
        Self::with_storage(config, Arc::new(MemoryStorage::new())).await
    }

    /// Build a coordinator with a caller-supplied storage backend
    pub async fn with_storage(config: &AppConfig, storage: Arc<dyn Storage>) -> Result<Self> {
        let events = Arc::new(EventBus::new());
        let registry = Arc::new(IndexerRegistry::new());
        for indexer_config in &config.indexers {
            registry.upsert(Indexer::from(indexer_config)).await?;
        }

        let cache = Arc::new(ResultCache::with_ttl(config.search_cache_ttl));
        let http = build_http_client()?;
        let clients: HashMap<IndexerKind, Arc<dyn IndexerClient>> = [
            IndexerKind::Prowlarr,
            IndexerKind::Jackett,
            IndexerKind::OpenLibrary,
        ]
        .into_iter()
        .map(|kind| (kind, client_for(kind, http.clone())))
        .collect();

        let aggregator = Arc::new(
            SearchAggregator::with_clients(
                Arc::clone(&registry),
                Arc::clone(&cache),
                Arc::clone(&events),
                clients.clone(),
            )
            .with_ceiling_timeout(config.search_ceiling_timeout),
        );

        let queue = Arc::new(DownloadQueue::with_capacity(
            config.retry.clone(),
            Arc::clone(&events),
            config.max_queue_size,
        ));
        let pool = Arc::new(
            WorkerPool::new(
                Arc::clone(&queue),
                Arc::new(HttpTransport::new(http)),
                config.download_dir.clone(),
                config.max_concurrent_downloads,
            )
            .with_storage(Arc::clone(&storage)),
        );

        Ok(Self {
            registry,
            cache,
            aggregator,
            queue,
            pool,
            storage,
            events,
            clients,
            shutdown: CancellationToken::new(),
            background: Mutex::new(Vec::new()),
        })
    }

    /// Start workers and background housekeeping
    pub async fn start(&self) {
        Arc::clone(&self.pool).start().await;

        let cache = Arc::clone(&self.cache);
        let queue = Arc::clone(&self.queue);
        let storage = Arc::clone(&self.storage);
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(coordinator_consts::HOUSEKEEPING_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        housekeeping_pass(&cache, &queue, storage.as_ref()).await;
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        });
        self.background.lock().await.push(handle);
        info!("Coordinator started");
    }

    /// Run one search through the aggregator
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        Ok(self.aggregator.search(request).await?)
    }

    /// Add a download to the queue
    pub async fn enqueue_download(&self, request: DownloadRequest) -> Result<QueueItem> {
        let item = self.queue.enqueue(request).await?;
        persist_best_effort(self.storage.as_ref(), &item).await;
        Ok(item)
    }

    /// List queue items with optional status filter and pagination
    pub async fn queue_snapshot(
        &self,
        status: Option<QueueStatus>,
        offset: usize,
        limit: usize,
    ) -> Vec<QueueItem> {
        self.queue.snapshot(status, offset, limit).await
    }

    pub async fn queue_stats(&self) -> QueueStats {
        self.queue.stats().await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Look up one queue item
    pub async fn queue_item(&self, id: QueueItemId) -> Option<QueueItem> {
        self.queue.get(id).await
    }

    /// Pause an item, aborting its transfer when one is in flight
    pub async fn pause(&self, id: QueueItemId) -> Result<QueueItem> {
        let item = self.queue.pause(id).await?;
        if self.pool.cancel_item(id).await {
            debug!("Cancelled in-flight transfer for paused item {}", id);
        }
        persist_best_effort(self.storage.as_ref(), &item).await;
        Ok(item)
    }

    pub async fn resume(&self, id: QueueItemId) -> Result<QueueItem> {
        let item = self.queue.resume(id).await?;
        persist_best_effort(self.storage.as_ref(), &item).await;
        Ok(item)
    }

    /// Cancel an item, aborting its transfer when one is in flight
    pub async fn cancel(&self, id: QueueItemId) -> Result<QueueItem> {
        let item = self.queue.cancel(id).await?;
        if self.pool.cancel_item(id).await {
            debug!("Cancelled in-flight transfer for item {}", id);
        }
        persist_best_effort(self.storage.as_ref(), &item).await;
        Ok(item)
    }

    pub async fn retry_now(&self, id: QueueItemId) -> Result<QueueItem> {
        let item = self.queue.retry_now(id).await?;
        persist_best_effort(self.storage.as_ref(), &item).await;
        Ok(item)
    }

    pub async fn set_priority(&self, id: QueueItemId, priority: u8) -> Result<QueueItem> {
        let item = self.queue.set_priority(id, priority).await?;
        persist_best_effort(self.storage.as_ref(), &item).await;
        Ok(item)
    }

    /// Download history from storage
    pub async fn history(&self) -> Result<Vec<HistoryItem>> {
        self.storage.history().await
    }

    /// All configured indexers with current health
    pub async fn indexers(&self) -> Vec<(Indexer, IndexerHealth)> {
        self.registry.snapshot().await
    }

    /// Toggle operator maintenance for one indexer
    pub async fn set_indexer_maintenance(&self, id: IndexerId, enabled: bool) -> Result<()> {
        if let Some((old_status, new_status)) =
            self.registry.set_maintenance(id, enabled).await?
        {
            self.events.publish(Event::IndexerStatusChanged {
                indexer_id: id,
                old_status,
                new_status,
            });
        }
        Ok(())
    }

    /// Probe an indexer's API, returning the response time in ms
    pub async fn test_indexer(&self, id: IndexerId) -> Result<u64> {
        let indexer = self
            .registry
            .get(id)
            .await
            .ok_or(IndexerError::UnknownIndexer { id: id.0 })?;
        let client = self
            .clients
            .get(&indexer.kind)
            .ok_or_else(|| IndexerError::InvalidConfig {
                reason: format!("no client for kind {}", indexer.kind),
            })?;
        Ok(client.test_connection(&indexer).await?)
    }

    /// Subscribe to application events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Stop workers and background tasks
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.shutdown.cancel();
        self.pool.shutdown().await;
        let mut background = self.background.lock().await;
        for handle in background.drain(..) {
            let _ = tokio::time::timeout(coordinator_consts::SHUTDOWN_TIMEOUT, handle).await;
        }
        // Final write-behind pass so restart state is as fresh as possible
        self.run_housekeeping_pass().await;
        info!("Shutdown complete");
    }

    async fn run_housekeeping_pass(&self) {
        housekeeping_pass(&self.cache, &self.queue, self.storage.as_ref()).await;
    }
}

/// One housekeeping cycle: cache purge, history archival and
/// write-behind persistence of the live queue.
async fn housekeeping_pass(cache: &ResultCache, queue: &DownloadQueue, storage: &dyn Storage) {
    let purged = cache.purge_expired().await;
    if purged > 0 {
        debug!("Housekeeping purged {} cache entries", purged);
    }

    for record in queue.archive_terminal().await {
        archive_best_effort(storage, &record).await;
    }

    for item in queue.snapshot(None, 0, usize::MAX).await {
        persist_best_effort(storage, &item).await;
    }
}

//! Core application components
//!
//! The scheduler is split along its two halves: search (registry,
//! clients, cache, aggregator, profiles) and downloads (queue, retry,
//! workers, storage), with the coordinator tying both to the event bus.

pub mod cache;
pub mod clients;
pub mod coordinator;
pub mod events;
pub mod models;
pub mod profile;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod search;
pub mod storage;
pub mod worker;

pub use cache::{CacheStats, ResultCache};
pub use clients::{build_http_client, client_for, IndexerClient};
pub use coordinator::Coordinator;
pub use events::{Event, EventBus};
pub use models::{
    BookFormat, BookSearchResult, HealthStatus, Indexer, IndexerHealth, IndexerId, IndexerKind,
    IndexerSearchMeta, QualityProfile, SearchFilters, SearchRequest, SearchResponse,
};
pub use profile::{apply_profile, select_best};
pub use queue::{
    DownloadQueue, DownloadRequest, HistoryItem, QueueItem, QueueItemId, QueueStats, QueueStatus,
};
pub use registry::{CallOutcome, HealthThresholds, IndexerRegistry};
pub use retry::RetryPolicy;
pub use search::SearchAggregator;
pub use storage::{MemoryStorage, Storage};
pub use worker::{HttpTransport, Transport, WorkerPool};

//! Prelude module for the FolioFox library
//!
//! Re-exports the most commonly used items so typical embedding code can
//! start from a single `use foliofox::prelude::*;` statement.
//!
//! # Usage
//!
//! ```rust,no_run
//! use foliofox::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = AppConfig::default();
//!     let coordinator = Arc::new(Coordinator::new(&config).await?);
//!     coordinator.start().await;
//!
//!     let response = coordinator.search(&SearchRequest::new("dune")).await?;
//!     println!("{} results", response.total_results);
//!
//!     coordinator.shutdown().await;
//!     Ok(())
//! }
//! ```

// Core result types
pub use crate::errors::{AppError, Result};

// Essential app components
pub use crate::app::{
    BookFormat, BookSearchResult, Coordinator, DownloadQueue, DownloadRequest, Event, EventBus,
    HealthStatus, HistoryItem, Indexer, IndexerId, IndexerKind, IndexerRegistry, QualityProfile,
    QueueItem, QueueItemId, QueueStats, QueueStatus, ResultCache, RetryPolicy, SearchAggregator,
    SearchFilters, SearchRequest, SearchResponse, Storage, WorkerPool,
};

// Configuration
pub use crate::config::AppConfig;

// Commonly used constants
pub use crate::constants::{DEFAULT_MAX_CONCURRENT_DOWNLOADS, DEFAULT_PRIORITY, USER_AGENT};

// Standard library re-exports that are commonly needed
pub use std::path::{Path, PathBuf};
pub use std::sync::Arc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prelude_imports() {
        let _config = AppConfig::default();
        let _policy = RetryPolicy::default();
        let _profile = QualityProfile::default();

        assert_eq!(DEFAULT_MAX_CONCURRENT_DOWNLOADS, 3);
        assert!(USER_AGENT.contains("FolioFox"));
    }

    #[tokio::test]
    async fn test_prelude_integration_pattern() {
        let registry = Arc::new(IndexerRegistry::new());
        let queue = Arc::new(DownloadQueue::new(
            RetryPolicy::default(),
            Arc::new(EventBus::new()),
        ));

        assert!(registry.eligible_indexers(None).await.is_empty());
        assert_eq!(queue.stats().await.total, 0);
    }
}

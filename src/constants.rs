//! Application constants for FolioFox
//!
//! This module centralizes all constants used throughout the application,
//! organized by functional domain for maintainability and clarity.

use std::time::Duration;

/// HTTP client configuration constants
pub mod http {
    use super::Duration;

    /// Default user agent for all HTTP requests
    pub const USER_AGENT: &str = "FolioFox/0.1.0 (eBook Acquisition Manager)";

    /// Default HTTP request timeout
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    /// Connection establishment timeout
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

    /// Connection pool idle timeout
    pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

    /// Maximum connections per host in pool
    pub const POOL_MAX_PER_HOST: usize = 8;
}

/// Indexer defaults and health thresholds
pub mod indexers {
    /// Default per-indexer rate limit: requests per window
    pub const DEFAULT_RATE_LIMIT_REQUESTS: u32 = 60;

    /// Default rate-limit window in seconds
    pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;

    /// Default per-indexer search timeout in seconds
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

    /// Consecutive failures before Healthy degrades to Degraded
    pub const DEGRADED_FAILURE_THRESHOLD: u32 = 3;

    /// Further consecutive failures before Degraded drops to Down
    pub const DOWN_FAILURE_THRESHOLD: u32 = 6;

    /// Response time above which a successful call still counts as slow
    pub const SLOW_RESPONSE_THRESHOLD_MS: u64 = 10_000;
}

/// Search aggregation and result cache configuration
pub mod search {
    use super::Duration;

    /// Ceiling timeout for an entire search, independent of per-indexer timeouts
    pub const CEILING_TIMEOUT: Duration = Duration::from_secs(45);

    /// Default TTL for cached merged search responses
    pub const CACHE_TTL: Duration = Duration::from_secs(60 * 60);

    /// Maximum results retained per indexer before merging
    pub const MAX_RESULTS_PER_INDEXER: usize = 200;
}

/// Download queue configuration
pub mod queue {
    /// Maximum live items the queue will hold before rejecting enqueues
    pub const MAX_QUEUE_SIZE: usize = 1_000;

    /// Default priority for new items (1 = most urgent, 10 = least)
    pub const DEFAULT_PRIORITY: u8 = 5;

    /// Lowest legal priority value (most urgent)
    pub const MIN_PRIORITY: u8 = 1;

    /// Highest legal priority value (least urgent)
    pub const MAX_PRIORITY: u8 = 10;

    /// Default maximum retry attempts per item
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
}

/// Worker and retry configuration
pub mod workers {
    use super::Duration;

    /// Default number of concurrent download workers
    pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 3;

    /// Per-item download timeout enforced by the worker watchdog
    pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

    /// Base delay for exponential retry backoff
    pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(30);

    /// Cap on retry backoff growth
    pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(30 * 60);

    /// Sleep duration when a worker finds no eligible work
    pub const IDLE_SLEEP: Duration = Duration::from_millis(200);

    /// Channel buffer size for worker progress reporting
    pub const PROGRESS_BUFFER_SIZE: usize = 100;

    /// Minimum interval between progress updates for one item
    pub const PROGRESS_UPDATE_INTERVAL: Duration = Duration::from_millis(500);
}

/// Event bus configuration
pub mod events {
    /// Broadcast channel capacity; lagging subscribers miss events
    pub const BUS_CAPACITY: usize = 256;
}

/// Coordinator and background task configuration
pub mod coordinator {
    use super::Duration;

    /// Interval for the cache purge and queue archive pass
    pub const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(120);

    /// Timeout for worker pool shutdown
    pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);
}

// Re-export commonly used constants for convenience
pub use http::USER_AGENT;
pub use queue::{DEFAULT_MAX_RETRIES, DEFAULT_PRIORITY};
pub use search::CACHE_TTL;
pub use workers::DEFAULT_MAX_CONCURRENT_DOWNLOADS;

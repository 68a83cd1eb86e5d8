//! Error types for FolioFox
//!
//! Errors are split by domain so each subsystem propagates a focused type,
//! with a top-level [`AppError`] for the CLI boundary. The taxonomy mirrors
//! the operational categories the scheduler cares about: transient failures
//! are retried, rate limiting is a skip-this-cycle condition rather than a
//! failure, and cancellation is terminal but never counted as an error.

use thiserror::Error;

/// Errors from a single indexer call or from registry operations
#[derive(Error, Debug)]
pub enum IndexerError {
    /// Transient network failure - connection reset, DNS, etc.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// HTTP request failed
    #[error("HTTP request failed")]
    Http(#[from] reqwest::Error),

    /// Indexer refused the request due to rate limiting (HTTP 429)
    #[error("indexer rate limited the request")]
    RateLimited,

    /// API key rejected or missing - indexer misconfiguration
    #[error("authentication failed: {reason}")]
    Authentication { reason: String },

    /// Indexer call exceeded its configured timeout
    #[error("indexer timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// Response body could not be parsed
    #[error("invalid response from indexer: {reason}")]
    InvalidResponse { reason: String },

    /// Server returned an unexpected error status
    #[error("indexer returned HTTP {status}")]
    ServerError { status: u16 },

    /// Referenced indexer does not exist in the registry
    #[error("unknown indexer: {id}")]
    UnknownIndexer { id: u32 },

    /// Indexer configuration is invalid
    #[error("invalid indexer configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl IndexerError {
    /// Whether a retry of the same call could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IndexerError::TransientNetwork(_)
                | IndexerError::Http(_)
                | IndexerError::Timeout { .. }
                | IndexerError::ServerError { .. }
        )
    }

    /// Short string recorded in per-indexer search metadata
    pub fn metadata_label(&self) -> String {
        match self {
            IndexerError::RateLimited => "rate_limited".to_string(),
            IndexerError::Timeout { .. } => "timeout".to_string(),
            IndexerError::Authentication { .. } => "authentication_failed".to_string(),
            other => other.to_string(),
        }
    }
}

/// Errors from the search aggregator as a whole
#[derive(Error, Debug)]
pub enum SearchError {
    /// Every eligible indexer failed; per-indexer reasons live in metadata
    #[error("all {attempted} eligible indexers failed")]
    AllIndexersFailed { attempted: usize },

    /// No indexer was active, healthy and within its rate limit
    #[error("no eligible indexers for this search")]
    NoEligibleIndexers,

    /// Query rejected before any indexer was contacted
    #[error("invalid search request: {reason}")]
    InvalidQuery { reason: String },
}

/// Errors from the download queue
#[derive(Error, Debug)]
pub enum QueueError {
    /// Enqueue request failed validation
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// Queue is at its configured maximum
    #[error("queue capacity exceeded: {current} items (limit {limit})")]
    CapacityExceeded { current: usize, limit: usize },

    /// Referenced item does not exist in the live queue
    #[error("queue item not found: {id}")]
    ItemNotFound { id: u64 },

    /// Requested transition is not legal from the item's current state
    #[error("invalid transition for item {id}: {from} -> {to}")]
    InvalidTransition { id: u64, from: String, to: String },
}

/// Errors from a single download attempt
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Transient network failure during transfer
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// HTTP request failed
    #[error("HTTP request failed")]
    Http(#[from] reqwest::Error),

    /// Server returned an error status for the download URL
    #[error("server error: HTTP {status}")]
    ServerError { status: u16 },

    /// Per-item timeout elapsed (worker watchdog)
    #[error("download timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// Transfer was cancelled via the cancellation token
    #[error("download cancelled")]
    Cancelled,

    /// I/O failure writing the destination file
    #[error("file I/O error")]
    Io(#[from] std::io::Error),

    /// Download URL could not be parsed
    #[error("invalid download URL: {url}")]
    InvalidUrl { url: String },
}

impl DownloadError {
    /// Whether the failure counts against `max_retries` and may be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::TransientNetwork(_)
            | DownloadError::Http(_)
            | DownloadError::Timeout { .. }
            | DownloadError::Io(_) => true,
            DownloadError::ServerError { status } => *status >= 500,
            DownloadError::Cancelled | DownloadError::InvalidUrl { .. } => false,
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("failed to read configuration file")]
    Io(#[from] std::io::Error),

    /// Configuration file is not valid TOML
    #[error("invalid configuration format")]
    InvalidFormat(#[from] toml::de::Error),

    /// Configuration could not be serialized back to TOML
    #[error("failed to serialize configuration")]
    Serialize(#[from] toml::ser::Error),

    /// A value is out of range or inconsistent
    #[error("invalid configuration value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// No config directory could be determined for this platform
    #[error("could not determine a configuration directory")]
    NoConfigDir,
}

/// Top-level application error spanning all domains
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Indexer(#[from] IndexerError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic application error with context
    #[error("application error: {message}")]
    Generic { message: String },
}

impl AppError {
    /// Create a generic application error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Check if the error is recoverable (transient)
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Indexer(e) => e.is_retryable(),
            AppError::Download(e) => e.is_retryable(),
            AppError::Search(SearchError::AllIndexersFailed { .. }) => true,
            _ => false,
        }
    }

    /// Get error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Indexer(_) => "indexer",
            AppError::Search(_) => "search",
            AppError::Queue(_) => "queue",
            AppError::Download(_) => "download",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::Generic { .. } => "generic",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Indexer result type alias
pub type IndexerResult<T> = std::result::Result<T, IndexerError>;

/// Queue result type alias
pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Download result type alias
pub type DownloadResult<T> = std::result::Result<T, DownloadError>;

/// Config result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(IndexerError::Timeout { seconds: 30 }.is_retryable());
        assert!(IndexerError::TransientNetwork("reset".into()).is_retryable());
        assert!(!IndexerError::RateLimited.is_retryable());
        assert!(!IndexerError::Authentication {
            reason: "bad key".into()
        }
        .is_retryable());

        assert!(DownloadError::Timeout { seconds: 60 }.is_retryable());
        assert!(DownloadError::ServerError { status: 503 }.is_retryable());
        assert!(!DownloadError::ServerError { status: 404 }.is_retryable());
        assert!(!DownloadError::Cancelled.is_retryable());
    }

    #[test]
    fn test_metadata_labels() {
        assert_eq!(IndexerError::RateLimited.metadata_label(), "rate_limited");
        assert_eq!(
            IndexerError::Timeout { seconds: 10 }.metadata_label(),
            "timeout"
        );
    }

    #[test]
    fn test_app_error_category() {
        let err = AppError::Queue(QueueError::CapacityExceeded {
            current: 100,
            limit: 100,
        });
        assert_eq!(err.category(), "queue");
        assert!(!err.is_recoverable());

        let err = AppError::Download(DownloadError::Timeout { seconds: 5 });
        assert_eq!(err.category(), "download");
        assert!(err.is_recoverable());
    }
}

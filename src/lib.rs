//! FolioFox Library
//!
//! Core of an eBook acquisition manager: concurrent multi-indexer search
//! aggregation with per-source rate limiting and health tracking, plus a
//! prioritized download queue with bounded worker concurrency and
//! automatic retry.

pub mod app;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;
pub mod prelude;

// Re-export commonly used types for convenience
pub use errors::{AppError, Result};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::*;

    #[test]
    fn test_constants_accessible() {
        assert_eq!(DEFAULT_MAX_CONCURRENT_DOWNLOADS, 3);
        assert_eq!(DEFAULT_PRIORITY, 5);
        assert!(USER_AGENT.contains("FolioFox"));
    }

    #[test]
    fn test_error_types() {
        let queue_error = errors::QueueError::ItemNotFound { id: 9 };
        let app_error = AppError::Queue(queue_error);

        assert_eq!(app_error.category(), "queue");
        assert!(!app_error.is_recoverable());
    }
}

//! TTL-keyed cache of merged search responses.
//!
//! One live entry per cache key; a superseding write simply replaces the
//! previous entry. Reads are concurrent (RwLock) since overlapping searches
//! consult the cache while only completed searches write to it.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::app::models::{normalize_text, SearchFilters, SearchResponse};
use crate::constants::search;

/// A cached merged response with its expiry
#[derive(Debug, Clone)]
struct CacheEntry {
    response: SearchResponse,
    expires_at: DateTime<Utc>,
}

/// Counters for cache effectiveness, read by stats reporting
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// TTL store of merged search responses keyed by query+filter hash
#[derive(Debug)]
pub struct ResultCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
    stats: RwLock<CacheStats>,
}

impl ResultCache {
    /// Create a cache with the default TTL
    pub fn new() -> Self {
        Self::with_ttl(search::CACHE_TTL)
    }

    /// Create a cache with a custom TTL
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            stats: RwLock::new(CacheStats::default()),
        }
    }

    /// Compute the cache key for a query and filter set.
    ///
    /// The query is normalized (case, whitespace) and the filters are
    /// canonically JSON-encoded so logically identical requests share a key.
    pub fn cache_key(query: &str, filters: &SearchFilters) -> String {
        let normalized = normalize_text(query);
        let filters_encoded =
            serde_json::to_string(filters).unwrap_or_else(|_| String::from("{}"));
        format!("{:x}", md5::compute(format!("{}\n{}", normalized, filters_encoded)))
    }

    /// Look up a non-expired entry, recording hit/miss counters
    pub async fn get(&self, key: &str) -> Option<SearchResponse> {
        let found = {
            let entries = self.entries.read().await;
            entries
                .get(key)
                .filter(|entry| entry.expires_at > Utc::now())
                .map(|entry| entry.response.clone())
        };

        let mut stats = self.stats.write().await;
        if found.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        found
    }

    /// Insert or replace the entry for a key
    pub async fn insert(&self, key: String, response: SearchResponse) {
        let entry = CacheEntry {
            response,
            expires_at: Utc::now()
                + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::hours(1)),
        };
        let mut entries = self.entries.write().await;
        entries.insert(key, entry);
        self.stats.write().await.entries = entries.len();
    }

    /// Drop expired entries; returns how many were removed
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let now = Utc::now();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Purged {} expired search cache entries", removed);
        }
        self.stats.write().await.entries = entries.len();
        removed
    }

    /// Current counters
    pub async fn stats(&self) -> CacheStats {
        let mut stats = *self.stats.read().await;
        stats.entries = self.entries.read().await.len();
        stats
    }

    /// Remove all entries
    pub async fn clear(&self) {
        self.entries.write().await.clear();
        self.stats.write().await.entries = 0;
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::models::BookFormat;

    fn empty_response(key: &str) -> SearchResponse {
        SearchResponse {
            results: Vec::new(),
            total_results: 0,
            cached: false,
            cache_key: key.to_string(),
            response_time_ms: 12,
            indexers_searched: Vec::new(),
        }
    }

    #[test]
    fn test_cache_key_normalizes_query() {
        let filters = SearchFilters::default();
        let a = ResultCache::cache_key("The  Rust Book", &filters);
        let b = ResultCache::cache_key("the rust book", &filters);
        assert_eq!(a, b);
    }

    #[test]
    fn test_cache_key_varies_with_filters() {
        let plain = SearchFilters::default();
        let epub_only = SearchFilters {
            formats: vec![BookFormat::Epub],
            ..Default::default()
        };
        let a = ResultCache::cache_key("dune", &plain);
        let b = ResultCache::cache_key("dune", &epub_only);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let cache = ResultCache::new();
        let key = ResultCache::cache_key("dune", &SearchFilters::default());

        assert!(cache.get(&key).await.is_none());
        cache.insert(key.clone(), empty_response(&key)).await;
        assert!(cache.get(&key).await.is_some());

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_not_returned() {
        let cache = ResultCache::with_ttl(Duration::ZERO);
        let key = "deadbeef".to_string();
        cache.insert(key.clone(), empty_response(&key)).await;

        assert!(cache.get(&key).await.is_none());
        assert_eq!(cache.purge_expired().await, 1);
    }

    #[tokio::test]
    async fn test_replace_supersedes() {
        let cache = ResultCache::new();
        let key = "k".to_string();

        let mut first = empty_response(&key);
        first.response_time_ms = 1;
        cache.insert(key.clone(), first).await;

        let mut second = empty_response(&key);
        second.response_time_ms = 2;
        cache.insert(key.clone(), second).await;

        let got = cache.get(&key).await.unwrap();
        assert_eq!(got.response_time_ms, 2);
        assert_eq!(cache.stats().await.entries, 1);
    }
}

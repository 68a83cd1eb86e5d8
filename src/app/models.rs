//! Data models for FolioFox
//!
//! This module defines the core data structures shared across the search
//! aggregator and the indexer registry: indexer configuration and health,
//! search results and responses, and quality profiles. Queue item types
//! live with the queue in [`crate::app::queue`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::indexers;

/// Unique identifier for a configured indexer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexerId(pub u32);

impl std::fmt::Display for IndexerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Capability variant of an indexer, selected at runtime for dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexerKind {
    /// Prowlarr aggregation API (v1)
    Prowlarr,
    /// Jackett torznab-style results API (v2.0)
    Jackett,
    /// Open Library public search API
    OpenLibrary,
}

impl IndexerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexerKind::Prowlarr => "prowlarr",
            IndexerKind::Jackett => "jackett",
            IndexerKind::OpenLibrary => "openlibrary",
        }
    }
}

impl std::fmt::Display for IndexerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration for one external indexer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Indexer {
    pub id: IndexerId,
    pub name: String,
    pub base_url: String,
    /// API key where the indexer requires one (Prowlarr, Jackett)
    pub api_key: Option<String>,
    pub kind: IndexerKind,
    pub is_active: bool,
    /// Relative ordering among indexers; informational, not scheduling
    pub priority: u8,
    /// Requests admitted per rate-limit window
    pub rate_limit_requests: u32,
    /// Rate-limit window length in seconds
    pub rate_limit_window_secs: u64,
    /// Per-call search timeout in seconds
    pub timeout_seconds: u64,
}

impl Indexer {
    /// Create an indexer with default rate limit and timeout settings
    pub fn new(id: IndexerId, name: impl Into<String>, base_url: impl Into<String>, kind: IndexerKind) -> Self {
        Self {
            id,
            name: name.into(),
            base_url: base_url.into(),
            api_key: None,
            kind,
            is_active: true,
            priority: 5,
            rate_limit_requests: indexers::DEFAULT_RATE_LIMIT_REQUESTS,
            rate_limit_window_secs: indexers::DEFAULT_RATE_LIMIT_WINDOW_SECS,
            timeout_seconds: indexers::DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

/// Health status of an indexer, driven by call outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
    /// Operator-set; excludes the indexer regardless of call outcomes
    Maintenance,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Down => "down",
            HealthStatus::Maintenance => "maintenance",
        };
        write!(f, "{}", s)
    }
}

/// Mutable health state tracked per indexer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerHealth {
    pub status: HealthStatus,
    pub last_response_time_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub last_checked: Option<DateTime<Utc>>,
}

impl Default for IndexerHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::Healthy,
            last_response_time_ms: None,
            consecutive_failures: 0,
            last_checked: None,
        }
    }
}

/// eBook file format carried by a search result
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookFormat {
    Epub,
    Mobi,
    Azw3,
    Pdf,
    Djvu,
    /// Formats we pass through without special handling
    Other(String),
}

impl BookFormat {
    /// Parse a format string as reported by an indexer
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "epub" => BookFormat::Epub,
            "mobi" => BookFormat::Mobi,
            "azw3" | "azw" => BookFormat::Azw3,
            "pdf" => BookFormat::Pdf,
            "djvu" => BookFormat::Djvu,
            other => BookFormat::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            BookFormat::Epub => "epub",
            BookFormat::Mobi => "mobi",
            BookFormat::Azw3 => "azw3",
            BookFormat::Pdf => "pdf",
            BookFormat::Djvu => "djvu",
            BookFormat::Other(s) => s,
        }
    }
}

impl std::fmt::Display for BookFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One search hit produced by a single indexer call
///
/// Ephemeral: never persisted unless promoted into the download queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSearchResult {
    pub indexer_id: IndexerId,
    pub title: String,
    pub author: Option<String>,
    pub format: BookFormat,
    pub isbn: Option<String>,
    pub file_size_bytes: Option<u64>,
    /// Indexer-reported quality in 0-100
    pub quality_score: f32,
    pub download_url: String,
    pub language: Option<String>,
    pub found_at: DateTime<Utc>,
}

impl BookSearchResult {
    /// Identity key used for deduplication across indexers
    ///
    /// ISBN (hyphens stripped) when present, otherwise normalized
    /// title + author + format.
    pub fn identity_key(&self) -> String {
        if let Some(isbn) = &self.isbn {
            let cleaned: String = isbn.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
            if !cleaned.is_empty() {
                return format!("isbn:{}", cleaned.to_ascii_lowercase());
            }
        }
        format!(
            "{}|{}|{}",
            normalize_text(&self.title),
            normalize_text(self.author.as_deref().unwrap_or("")),
            self.format.as_str(),
        )
    }
}

/// Lowercase a string and collapse internal whitespace
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Filters applied by the aggregator before merging
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Accepted formats; empty means any
    #[serde(default)]
    pub formats: Vec<BookFormat>,
    pub language: Option<String>,
    pub min_quality: Option<f32>,
    pub max_size_mb: Option<u64>,
}

impl SearchFilters {
    /// Whether a result passes these filters
    pub fn accepts(&self, result: &BookSearchResult) -> bool {
        if !self.formats.is_empty() && !self.formats.contains(&result.format) {
            return false;
        }
        if let (Some(lang), Some(result_lang)) = (&self.language, &result.language) {
            if !lang.eq_ignore_ascii_case(result_lang) {
                return false;
            }
        }
        if let Some(min) = self.min_quality {
            if result.quality_score < min {
                return false;
            }
        }
        if let (Some(max_mb), Some(size)) = (self.max_size_mb, result.file_size_bytes) {
            if size > max_mb * 1024 * 1024 {
                return false;
            }
        }
        true
    }
}

/// A search request as issued by a client
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: String,
    pub filters: SearchFilters,
    /// Restrict the fan-out to these indexers; None means all eligible
    pub indexers: Option<Vec<IndexerId>>,
    /// Ranking hints; does not affect the queue
    pub profile: Option<QualityProfile>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// Outcome of one indexer's participation in a search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerSearchMeta {
    pub indexer_id: IndexerId,
    pub indexer_name: String,
    pub result_count: usize,
    pub response_time_ms: u64,
    /// None on success; a short label such as "rate_limited" or "timeout" otherwise
    pub error: Option<String>,
}

/// Merged, ranked, deduplicated response for one search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<BookSearchResult>,
    /// Deduplicated result count
    pub total_results: usize,
    /// True when served from the result cache with zero indexer calls
    pub cached: bool,
    pub cache_key: String,
    pub response_time_ms: u64,
    pub indexers_searched: Vec<IndexerSearchMeta>,
}

/// Per-user ranking and filter criteria for choosing among equivalent results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityProfile {
    pub name: String,
    /// Formats in preference order; results in other formats are filtered out
    pub preferred_formats: Vec<BookFormat>,
    pub min_quality_score: f32,
    pub max_file_size_mb: Option<u64>,
}

impl Default for QualityProfile {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            preferred_formats: vec![BookFormat::Epub, BookFormat::Mobi, BookFormat::Pdf],
            min_quality_score: 0.0,
            max_file_size_mb: None,
        }
    }
}

impl QualityProfile {
    /// Position of a format in the preference list, if any
    pub fn format_rank(&self, format: &BookFormat) -> Option<usize> {
        self.preferred_formats.iter().position(|f| f == format)
    }
}

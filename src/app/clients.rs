//! HTTP clients for the supported indexer APIs.
//!
//! Each indexer kind speaks a different wire format (Prowlarr v1, Jackett
//! v2.0 results, Open Library search), so parsing lives in a small client
//! per kind behind the [`IndexerClient`] trait. All clients share one
//! connection-pooled reqwest client; per-call timeouts are enforced by the
//! aggregator, not here.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, trace};
use url::Url;

use crate::app::models::{
    BookFormat, BookSearchResult, Indexer, IndexerKind, SearchFilters,
};
use crate::constants::{http, search};
use crate::errors::{IndexerError, IndexerResult};

/// A client capable of searching one kind of indexer
#[async_trait]
pub trait IndexerClient: Send + Sync {
    /// Search the indexer; returns raw (unfiltered, unranked) results
    async fn search(
        &self,
        indexer: &Indexer,
        query: &str,
        filters: &SearchFilters,
    ) -> IndexerResult<Vec<BookSearchResult>>;

    /// Issue a cheap authenticated request; returns the response time in ms
    async fn test_connection(&self, indexer: &Indexer) -> IndexerResult<u64>;
}

/// Build the shared HTTP client with connection pooling and timeouts
pub fn build_http_client() -> IndexerResult<Client> {
    let client = Client::builder()
        .user_agent(http::USER_AGENT)
        .timeout(http::DEFAULT_TIMEOUT)
        .connect_timeout(http::CONNECT_TIMEOUT)
        .pool_idle_timeout(http::POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(http::POOL_MAX_PER_HOST)
        .build()?;
    Ok(client)
}

/// Select the client implementation for an indexer kind
pub fn client_for(kind: IndexerKind, http_client: Client) -> Arc<dyn IndexerClient> {
    match kind {
        IndexerKind::Prowlarr => Arc::new(ProwlarrClient::new(http_client)),
        IndexerKind::Jackett => Arc::new(JackettClient::new(http_client)),
        IndexerKind::OpenLibrary => Arc::new(OpenLibraryClient::new(http_client)),
    }
}

/// Map an error status code onto the indexer error taxonomy
fn check_status(status: StatusCode) -> IndexerResult<()> {
    if status.is_success() {
        return Ok(());
    }
    match status.as_u16() {
        429 => Err(IndexerError::RateLimited),
        401 | 403 => Err(IndexerError::Authentication {
            reason: format!("HTTP {}", status.as_u16()),
        }),
        code => Err(IndexerError::ServerError { status: code }),
    }
}

fn parse_base_url(indexer: &Indexer) -> IndexerResult<Url> {
    Url::parse(&indexer.base_url).map_err(|e| IndexerError::InvalidConfig {
        reason: format!("invalid base URL for {}: {}", indexer.name, e),
    })
}

fn api_key(indexer: &Indexer) -> IndexerResult<&str> {
    indexer
        .api_key
        .as_deref()
        .ok_or_else(|| IndexerError::Authentication {
            reason: format!("{} requires an API key", indexer.name),
        })
}

/// Guess the book format from a release title, e.g. "Dune - Herbert [EPUB]"
fn format_from_title(title: &str) -> BookFormat {
    let lower = title.to_ascii_lowercase();
    for format in [
        BookFormat::Epub,
        BookFormat::Mobi,
        BookFormat::Azw3,
        BookFormat::Pdf,
        BookFormat::Djvu,
    ] {
        if lower.contains(format.as_str()) {
            return format;
        }
    }
    BookFormat::Other("unknown".to_string())
}

/// Split "Author - Title" release naming into (author, title)
fn split_author_title(raw: &str) -> (Option<String>, String) {
    match raw.split_once(" - ") {
        Some((author, title)) if !author.trim().is_empty() && !title.trim().is_empty() => {
            (Some(author.trim().to_string()), title.trim().to_string())
        }
        _ => (None, raw.trim().to_string()),
    }
}

/// Heuristic quality score in 0-100 from format desirability and seeders
fn score_result(format: &BookFormat, seeders: Option<u32>) -> f32 {
    let base: f32 = match format {
        BookFormat::Epub => 70.0,
        BookFormat::Mobi | BookFormat::Azw3 => 60.0,
        BookFormat::Pdf => 50.0,
        BookFormat::Djvu => 40.0,
        BookFormat::Other(_) => 30.0,
    };
    let seeder_bonus = seeders.unwrap_or(0).min(30) as f32;
    (base + seeder_bonus).min(100.0)
}

// ---------------------------------------------------------------------------
// Prowlarr
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProwlarrRelease {
    title: String,
    size: Option<u64>,
    download_url: Option<String>,
    info_url: Option<String>,
    seeders: Option<u32>,
}

/// Client for the Prowlarr v1 aggregation API
pub struct ProwlarrClient {
    http: Client,
}

impl ProwlarrClient {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    fn parse_releases(indexer: &Indexer, releases: Vec<ProwlarrRelease>) -> Vec<BookSearchResult> {
        releases
            .into_iter()
            .filter_map(|release| {
                let download_url = release.download_url.or(release.info_url)?;
                let format = format_from_title(&release.title);
                let (author, title) = split_author_title(&release.title);
                let quality_score = score_result(&format, release.seeders);
                Some(BookSearchResult {
                    indexer_id: indexer.id,
                    title,
                    author,
                    format,
                    isbn: None,
                    file_size_bytes: release.size,
                    quality_score,
                    download_url,
                    language: None,
                    found_at: Utc::now(),
                })
            })
            .take(search::MAX_RESULTS_PER_INDEXER)
            .collect()
    }
}

#[async_trait]
impl IndexerClient for ProwlarrClient {
    async fn search(
        &self,
        indexer: &Indexer,
        query: &str,
        _filters: &SearchFilters,
    ) -> IndexerResult<Vec<BookSearchResult>> {
        let key = api_key(indexer)?;
        let mut url = parse_base_url(indexer)?;
        url.set_path("/api/v1/search");
        url.query_pairs_mut()
            .append_pair("query", query)
            .append_pair("type", "search");

        trace!("Prowlarr search: {}", url);
        let response = self.http.get(url).header("X-Api-Key", key).send().await?;
        check_status(response.status())?;

        let releases: Vec<ProwlarrRelease> =
            response
                .json()
                .await
                .map_err(|e| IndexerError::InvalidResponse {
                    reason: e.to_string(),
                })?;
        debug!(
            "Prowlarr {} returned {} releases",
            indexer.name,
            releases.len()
        );
        Ok(Self::parse_releases(indexer, releases))
    }

    async fn test_connection(&self, indexer: &Indexer) -> IndexerResult<u64> {
        let key = api_key(indexer)?;
        let mut url = parse_base_url(indexer)?;
        url.set_path("/api/v1/health");

        let started = Instant::now();
        let response = self.http.get(url).header("X-Api-Key", key).send().await?;
        check_status(response.status())?;
        Ok(started.elapsed().as_millis() as u64)
    }
}

// ---------------------------------------------------------------------------
// Jackett
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct JackettEnvelope {
    #[serde(rename = "Results", default)]
    results: Vec<JackettRelease>,
}

#[derive(Debug, Deserialize)]
struct JackettRelease {
    #[serde(rename = "Title")]
    title: String,
    #[serde(rename = "Size")]
    size: Option<u64>,
    #[serde(rename = "Link")]
    link: Option<String>,
    #[serde(rename = "Seeders")]
    seeders: Option<u32>,
}

/// Client for Jackett's v2.0 aggregated results API
pub struct JackettClient {
    http: Client,
}

impl JackettClient {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    fn parse_envelope(indexer: &Indexer, envelope: JackettEnvelope) -> Vec<BookSearchResult> {
        envelope
            .results
            .into_iter()
            .filter_map(|release| {
                let download_url = release.link?;
                let format = format_from_title(&release.title);
                let (author, title) = split_author_title(&release.title);
                let quality_score = score_result(&format, release.seeders);
                Some(BookSearchResult {
                    indexer_id: indexer.id,
                    title,
                    author,
                    format,
                    isbn: None,
                    file_size_bytes: release.size,
                    quality_score,
                    download_url,
                    language: None,
                    found_at: Utc::now(),
                })
            })
            .take(search::MAX_RESULTS_PER_INDEXER)
            .collect()
    }

    fn results_url(indexer: &Indexer, key: &str, query: &str) -> IndexerResult<Url> {
        let mut url = parse_base_url(indexer)?;
        url.set_path("/api/v2.0/indexers/all/results");
        url.query_pairs_mut()
            .append_pair("apikey", key)
            .append_pair("Query", query);
        Ok(url)
    }
}

#[async_trait]
impl IndexerClient for JackettClient {
    async fn search(
        &self,
        indexer: &Indexer,
        query: &str,
        _filters: &SearchFilters,
    ) -> IndexerResult<Vec<BookSearchResult>> {
        let key = api_key(indexer)?;
        let url = Self::results_url(indexer, key, query)?;

        trace!("Jackett search: {}", url);
        let response = self.http.get(url).send().await?;
        check_status(response.status())?;

        let envelope: JackettEnvelope =
            response
                .json()
                .await
                .map_err(|e| IndexerError::InvalidResponse {
                    reason: e.to_string(),
                })?;
        debug!(
            "Jackett {} returned {} releases",
            indexer.name,
            envelope.results.len()
        );
        Ok(Self::parse_envelope(indexer, envelope))
    }

    async fn test_connection(&self, indexer: &Indexer) -> IndexerResult<u64> {
        let key = api_key(indexer)?;
        // No dedicated health endpoint; an empty query is cheap and exercises auth
        let url = Self::results_url(indexer, key, "")?;

        let started = Instant::now();
        let response = self.http.get(url).send().await?;
        check_status(response.status())?;
        Ok(started.elapsed().as_millis() as u64)
    }
}

// ---------------------------------------------------------------------------
// Open Library
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OpenLibraryEnvelope {
    #[serde(default)]
    docs: Vec<OpenLibraryDoc>,
}

#[derive(Debug, Deserialize)]
struct OpenLibraryDoc {
    title: Option<String>,
    key: Option<String>,
    #[serde(default)]
    author_name: Vec<String>,
    #[serde(default)]
    isbn: Vec<String>,
    #[serde(default)]
    language: Vec<String>,
    ebook_access: Option<String>,
}

/// Client for the Open Library public search API; no API key required
pub struct OpenLibraryClient {
    http: Client,
}

impl OpenLibraryClient {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    fn parse_envelope(indexer: &Indexer, envelope: OpenLibraryEnvelope) -> Vec<BookSearchResult> {
        envelope
            .docs
            .into_iter()
            .filter_map(|doc| {
                let title = doc.title?;
                let key = doc.key?;
                // Open Library scores on availability rather than seeders
                let quality_score = match doc.ebook_access.as_deref() {
                    Some("public") => 80.0,
                    Some("borrowable") => 55.0,
                    _ => 35.0,
                };
                Some(BookSearchResult {
                    indexer_id: indexer.id,
                    title,
                    author: doc.author_name.into_iter().next(),
                    format: BookFormat::Epub,
                    isbn: doc.isbn.into_iter().next(),
                    file_size_bytes: None,
                    quality_score,
                    download_url: format!("https://openlibrary.org{}", key),
                    language: doc.language.into_iter().next(),
                    found_at: Utc::now(),
                })
            })
            .take(search::MAX_RESULTS_PER_INDEXER)
            .collect()
    }
}

#[async_trait]
impl IndexerClient for OpenLibraryClient {
    async fn search(
        &self,
        indexer: &Indexer,
        query: &str,
        _filters: &SearchFilters,
    ) -> IndexerResult<Vec<BookSearchResult>> {
        let mut url = parse_base_url(indexer)?;
        url.set_path("/search.json");
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("limit", &search::MAX_RESULTS_PER_INDEXER.to_string());

        trace!("Open Library search: {}", url);
        let response = self.http.get(url).send().await?;
        check_status(response.status())?;

        let envelope: OpenLibraryEnvelope =
            response
                .json()
                .await
                .map_err(|e| IndexerError::InvalidResponse {
                    reason: e.to_string(),
                })?;
        debug!(
            "Open Library {} returned {} docs",
            indexer.name,
            envelope.docs.len()
        );
        Ok(Self::parse_envelope(indexer, envelope))
    }

    async fn test_connection(&self, indexer: &Indexer) -> IndexerResult<u64> {
        let mut url = parse_base_url(indexer)?;
        url.set_path("/search.json");
        url.query_pairs_mut().append_pair("q", "the").append_pair("limit", "1");

        let started = Instant::now();
        let response = self.http.get(url).send().await?;
        check_status(response.status())?;
        Ok(started.elapsed().as_millis() as u64)
    }
}

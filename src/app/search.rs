//! Multi-indexer search aggregation.
//!
//! One search fans out to every eligible indexer concurrently, each call
//! bounded by its indexer's own timeout and the whole cycle bounded by a
//! ceiling timeout. Results are filtered, deduplicated by identity key and
//! ranked; the merged response is cached by query+filter hash. Partial
//! failure is normal: per-indexer outcomes are reported in response
//! metadata, and the search only errors when every indexer failed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::app::cache::ResultCache;
use crate::app::clients::{build_http_client, client_for, IndexerClient};
use crate::app::events::{Event, EventBus};
use crate::app::models::{
    normalize_text, BookSearchResult, IndexerId, IndexerKind, IndexerSearchMeta, SearchRequest,
    SearchResponse,
};
use crate::app::registry::{CallOutcome, IndexerRegistry};
use crate::constants::search as search_consts;
use crate::errors::{IndexerError, IndexerResult, SearchError};

type IndexerReply = (IndexerId, String, u64, IndexerResult<Vec<BookSearchResult>>);

/// Fans searches out to indexers and merges the results
pub struct SearchAggregator {
    registry: Arc<IndexerRegistry>,
    cache: Arc<ResultCache>,
    events: Arc<EventBus>,
    clients: HashMap<IndexerKind, Arc<dyn IndexerClient>>,
    ceiling_timeout: Duration,
}

impl SearchAggregator {
    /// Create an aggregator with real HTTP clients for every indexer kind
    pub fn new(
        registry: Arc<IndexerRegistry>,
        cache: Arc<ResultCache>,
        events: Arc<EventBus>,
    ) -> IndexerResult<Self> {
        let http = build_http_client()?;
        let clients = [
            IndexerKind::Prowlarr,
            IndexerKind::Jackett,
            IndexerKind::OpenLibrary,
        ]
        .into_iter()
        .map(|kind| (kind, client_for(kind, http.clone())))
        .collect();
        Ok(Self::with_clients(registry, cache, events, clients))
    }

    /// Create an aggregator with caller-supplied clients
    pub fn with_clients(
        registry: Arc<IndexerRegistry>,
        cache: Arc<ResultCache>,
        events: Arc<EventBus>,
        clients: HashMap<IndexerKind, Arc<dyn IndexerClient>>,
    ) -> Self {
        Self {
            registry,
            cache,
            events,
            clients,
            ceiling_timeout: search_consts::CEILING_TIMEOUT,
        }
    }

    /// Override the whole-search ceiling timeout
    pub fn with_ceiling_timeout(mut self, timeout: Duration) -> Self {
        self.ceiling_timeout = timeout;
        self
    }

    /// Execute one search end to end.
    ///
    /// Serves from cache when a fresh entry exists (zero indexer calls),
    /// otherwise fans out, merges and caches the response.
    pub async fn search(
        &self,
        request: &SearchRequest,
    ) -> std::result::Result<SearchResponse, SearchError> {
        let started = Instant::now();
        let query = request.query.trim();
        if query.is_empty() {
            return Err(SearchError::InvalidQuery {
                reason: "query must not be empty".to_string(),
            });
        }

        let cache_key = ResultCache::cache_key(query, &request.filters);
        if let Some(mut hit) = self.cache.get(&cache_key).await {
            debug!("Search cache hit for key {}", cache_key);
            hit.cached = true;
            return Ok(hit);
        }

        let eligible = self
            .registry
            .eligible_indexers(request.indexers.as_deref())
            .await;
        if eligible.is_empty() {
            return Err(SearchError::NoEligibleIndexers);
        }
        let attempted = eligible.len();

        let mut metas: Vec<IndexerSearchMeta> = Vec::with_capacity(attempted);
        let (tx, mut rx) = mpsc::channel::<IndexerReply>(attempted);
        let mut in_flight: Vec<(IndexerId, String)> = Vec::new();

        for indexer in eligible {
            // Admission denial is a skip, never an error
            if !self.registry.admit(indexer.id).await {
                debug!("Indexer {} over its rate limit, skipping", indexer.name);
                metas.push(IndexerSearchMeta {
                    indexer_id: indexer.id,
                    indexer_name: indexer.name,
                    result_count: 0,
                    response_time_ms: 0,
                    error: Some("rate_limited".to_string()),
                });
                continue;
            }

            let client = match self.clients.get(&indexer.kind) {
                Some(client) => Arc::clone(client),
                None => {
                    metas.push(IndexerSearchMeta {
                        indexer_id: indexer.id,
                        indexer_name: indexer.name.clone(),
                        result_count: 0,
                        response_time_ms: 0,
                        error: Some(format!("no client for kind {}", indexer.kind)),
                    });
                    continue;
                }
            };

            in_flight.push((indexer.id, indexer.name.clone()));
            let tx = tx.clone();
            let query = query.to_string();
            let filters = request.filters.clone();
            tokio::spawn(async move {
                let call_started = Instant::now();
                let per_call = Duration::from_secs(indexer.timeout_seconds);
                let outcome =
                    match tokio::time::timeout(per_call, client.search(&indexer, &query, &filters))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(IndexerError::Timeout {
                            seconds: indexer.timeout_seconds,
                        }),
                    };
                let elapsed = call_started.elapsed().as_millis() as u64;
                let _ = tx.send((indexer.id, indexer.name, elapsed, outcome)).await;
            });
        }
        drop(tx);

        let mut raw_results: Vec<BookSearchResult> = Vec::new();
        let mut successes = 0usize;
        let mut responded: HashSet<IndexerId> = HashSet::new();

        let collection = tokio::time::timeout(self.ceiling_timeout, async {
            while let Some((id, name, elapsed, outcome)) = rx.recv().await {
                responded.insert(id);
                match outcome {
                    Ok(results) => {
                        successes += 1;
                        self.record_outcome(
                            id,
                            CallOutcome::Success {
                                response_time_ms: elapsed,
                            },
                        )
                        .await;
                        metas.push(IndexerSearchMeta {
                            indexer_id: id,
                            indexer_name: name,
                            result_count: results.len(),
                            response_time_ms: elapsed,
                            error: None,
                        });
                        raw_results.extend(results.into_iter().filter(|r| request.filters.accepts(r)));
                    }
                    Err(error) => {
                        warn!("Indexer {} search failed: {}", name, error);
                        // A server-side 429 is a skip condition, not a health failure
                        if !matches!(error, IndexerError::RateLimited) {
                            self.record_outcome(
                                id,
                                CallOutcome::Failure {
                                    authentication: matches!(
                                        error,
                                        IndexerError::Authentication { .. }
                                    ),
                                },
                            )
                            .await;
                        }
                        metas.push(IndexerSearchMeta {
                            indexer_id: id,
                            indexer_name: name,
                            result_count: 0,
                            response_time_ms: elapsed,
                            error: Some(error.metadata_label()),
                        });
                    }
                }
            }
        })
        .await;

        if collection.is_err() {
            // Ceiling elapsed; laggards are recorded as timeouts
            for (id, name) in in_flight {
                if !responded.contains(&id) {
                    warn!("Indexer {} missed the search ceiling", name);
                    self.record_outcome(id, CallOutcome::Failure { authentication: false })
                        .await;
                    metas.push(IndexerSearchMeta {
                        indexer_id: id,
                        indexer_name: name,
                        result_count: 0,
                        response_time_ms: self.ceiling_timeout.as_millis() as u64,
                        error: Some("timeout".to_string()),
                    });
                }
            }
        }

        if successes == 0 {
            return Err(SearchError::AllIndexersFailed { attempted });
        }

        let results = merge_and_rank(raw_results, query, request);
        let response = SearchResponse {
            total_results: results.len(),
            results,
            cached: false,
            cache_key: cache_key.clone(),
            response_time_ms: started.elapsed().as_millis() as u64,
            indexers_searched: metas,
        };
        info!(
            "Search \"{}\": {} results from {} indexers in {}ms",
            query,
            response.total_results,
            successes,
            response.response_time_ms
        );
        self.cache.insert(cache_key, response.clone()).await;
        Ok(response)
    }

    async fn record_outcome(&self, id: IndexerId, outcome: CallOutcome) {
        if let Some((old_status, new_status)) = self.registry.record_outcome(id, outcome).await {
            self.events.publish(Event::IndexerStatusChanged {
                indexer_id: id,
                old_status,
                new_status,
            });
        }
    }
}

/// Deduplicate by identity key (keeping the best-scored duplicate) and rank.
///
/// Quality score descending is the primary key; a title match (the
/// normalized title contains the normalized query) only breaks ties,
/// followed by profile format preference and discovery time.
fn merge_and_rank(
    raw: Vec<BookSearchResult>,
    query: &str,
    request: &SearchRequest,
) -> Vec<BookSearchResult> {
    let mut by_identity: HashMap<String, BookSearchResult> = HashMap::new();
    for result in raw {
        match by_identity.entry(result.identity_key()) {
            std::collections::hash_map::Entry::Occupied(mut slot) => {
                if result.quality_score > slot.get().quality_score {
                    slot.insert(result);
                }
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(result);
            }
        }
    }

    let normalized_query = normalize_text(query);
    let title_matches =
        |r: &BookSearchResult| normalize_text(&r.title).contains(&normalized_query);

    let mut merged: Vec<BookSearchResult> = by_identity.into_values().collect();
    merged.sort_by(|a, b| {
        b.quality_score
            .partial_cmp(&a.quality_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| title_matches(b).cmp(&title_matches(a)))
            .then_with(|| {
                let rank = |r: &BookSearchResult| {
                    request
                        .profile
                        .as_ref()
                        .and_then(|p| p.format_rank(&r.format))
                        .unwrap_or(usize::MAX)
                };
                rank(a).cmp(&rank(b))
            })
            .then_with(|| a.found_at.cmp(&b.found_at))
    });
    merged
}

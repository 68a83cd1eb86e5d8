//! Indexer registry: configuration, request admission and health tracking.
//!
//! The registry owns all per-indexer mutable state. Admission control is a
//! token-bucket check per indexer (capacity `rate_limit_requests`, refilled
//! over `rate_limit_window_secs`); denial is never an error, the indexer is
//! simply skipped for the current search cycle.
//!
//! Health transitions are driven exclusively by call outcomes reported from
//! the search aggregator: Healthy degrades after repeated consecutive
//! failures or a slow response, Degraded drops to Down after further
//! failures, and any successful call fully recovers the indexer.
//! Maintenance is operator-set and overrides everything.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::time::Duration;

use chrono::Utc;
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::app::models::{HealthStatus, Indexer, IndexerHealth, IndexerId};
use crate::constants::indexers as limits;
use crate::errors::{IndexerError, IndexerResult};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Thresholds driving the health state machine
#[derive(Debug, Clone)]
pub struct HealthThresholds {
    /// Consecutive failures before Healthy becomes Degraded
    pub degraded_failures: u32,
    /// Consecutive failures before Degraded becomes Down
    pub down_failures: u32,
    /// Successful responses slower than this still count as degradation
    pub slow_response_ms: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            degraded_failures: limits::DEGRADED_FAILURE_THRESHOLD,
            down_failures: limits::DOWN_FAILURE_THRESHOLD,
            slow_response_ms: limits::SLOW_RESPONSE_THRESHOLD_MS,
        }
    }
}

/// Outcome of one indexer call, reported by the aggregator
#[derive(Debug, Clone)]
pub enum CallOutcome {
    /// Call succeeded with the given response time
    Success { response_time_ms: u64 },
    /// Call failed; authentication failures degrade immediately
    Failure { authentication: bool },
}

struct IndexerEntry {
    config: Indexer,
    health: IndexerHealth,
    limiter: DirectLimiter,
}

impl IndexerEntry {
    fn new(config: Indexer) -> IndexerResult<Self> {
        let limiter = build_limiter(&config)?;
        Ok(Self {
            config,
            health: IndexerHealth::default(),
            limiter,
        })
    }
}

fn build_limiter(config: &Indexer) -> IndexerResult<DirectLimiter> {
    let requests =
        NonZeroU32::new(config.rate_limit_requests).ok_or_else(|| IndexerError::InvalidConfig {
            reason: "rate_limit_requests must be non-zero".to_string(),
        })?;
    let window = Duration::from_secs(config.rate_limit_window_secs.max(1));
    let period = window / requests.get();
    let quota = Quota::with_period(period)
        .ok_or_else(|| IndexerError::InvalidConfig {
            reason: "rate limit window too small".to_string(),
        })?
        .allow_burst(requests);
    Ok(RateLimiter::direct(quota))
}

/// Registry of configured indexers with admission and health state
pub struct IndexerRegistry {
    thresholds: HealthThresholds,
    entries: RwLock<HashMap<IndexerId, IndexerEntry>>,
}

impl IndexerRegistry {
    /// Create an empty registry with default thresholds
    pub fn new() -> Self {
        Self::with_thresholds(HealthThresholds::default())
    }

    pub fn with_thresholds(thresholds: HealthThresholds) -> Self {
        Self {
            thresholds,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register an indexer, replacing any existing entry with the same id.
    ///
    /// Replacing resets the indexer's health and rate-limit state.
    pub async fn upsert(&self, config: Indexer) -> IndexerResult<()> {
        let id = config.id;
        let entry = IndexerEntry::new(config)?;
        self.entries.write().await.insert(id, entry);
        debug!("Registered indexer {}", id);
        Ok(())
    }

    /// Remove an indexer entirely
    pub async fn remove(&self, id: IndexerId) -> bool {
        self.entries.write().await.remove(&id).is_some()
    }

    /// Look up the configuration for one indexer
    pub async fn get(&self, id: IndexerId) -> Option<Indexer> {
        self.entries.read().await.get(&id).map(|e| e.config.clone())
    }

    /// All configured indexers with their current health
    pub async fn snapshot(&self) -> Vec<(Indexer, IndexerHealth)> {
        self.entries
            .read()
            .await
            .values()
            .map(|e| (e.config.clone(), e.health.clone()))
            .collect()
    }

    /// Indexers eligible for a search cycle.
    ///
    /// Eligible means active, not in Maintenance and not Down, optionally
    /// restricted to a caller-supplied subset. A Down indexer named
    /// explicitly in the subset is included so a successful probe can
    /// recover it without operator action.
    pub async fn eligible_indexers(&self, subset: Option<&[IndexerId]>) -> Vec<Indexer> {
        let entries = self.entries.read().await;
        let mut eligible: Vec<Indexer> = entries
            .values()
            .filter(|e| e.config.is_active)
            .filter(|e| match e.health.status {
                HealthStatus::Maintenance => false,
                HealthStatus::Down => {
                    subset.map(|ids| ids.contains(&e.config.id)).unwrap_or(false)
                }
                _ => true,
            })
            .filter(|e| {
                subset
                    .map(|ids| ids.contains(&e.config.id))
                    .unwrap_or(true)
            })
            .map(|e| e.config.clone())
            .collect();
        eligible.sort_by_key(|i| (i.priority, i.id));
        eligible
    }

    /// Rate-limit admission check for one indexer.
    ///
    /// Returns false when the indexer's window is exhausted; the caller
    /// records it as `rate_limited` in search metadata and moves on.
    pub async fn admit(&self, id: IndexerId) -> bool {
        let entries = self.entries.read().await;
        match entries.get(&id) {
            Some(entry) => entry.limiter.check().is_ok(),
            None => false,
        }
    }

    /// Report the outcome of an indexer call and apply health transitions.
    ///
    /// Returns `Some((old, new))` when the status changed, for event
    /// emission by the caller.
    pub async fn record_outcome(
        &self,
        id: IndexerId,
        outcome: CallOutcome,
    ) -> Option<(HealthStatus, HealthStatus)> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&id)?;
        let health = &mut entry.health;
        let old = health.status;
        health.last_checked = Some(Utc::now());

        // Operator-set maintenance is never changed by call outcomes
        if old == HealthStatus::Maintenance {
            return None;
        }

        let new = match outcome {
            CallOutcome::Success { response_time_ms } => {
                health.consecutive_failures = 0;
                health.last_response_time_ms = Some(response_time_ms);
                if response_time_ms > self.thresholds.slow_response_ms
                    && old == HealthStatus::Healthy
                {
                    warn!(
                        "Indexer {} responded in {}ms, marking degraded",
                        entry.config.name, response_time_ms
                    );
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                }
            }
            CallOutcome::Failure { authentication } => {
                health.consecutive_failures += 1;
                if old == HealthStatus::Down {
                    // Failures never move an indexer back up; only a
                    // successful call recovers Down
                    HealthStatus::Down
                } else if authentication {
                    // Misconfiguration: retrying is pointless until fixed
                    HealthStatus::Degraded
                } else if health.consecutive_failures >= self.thresholds.down_failures {
                    HealthStatus::Down
                } else if health.consecutive_failures >= self.thresholds.degraded_failures {
                    HealthStatus::Degraded
                } else {
                    old
                }
            }
        };

        health.status = new;
        if old != new {
            info!(
                "Indexer {} health: {} -> {}",
                entry.config.name, old, new
            );
            Some((old, new))
        } else {
            None
        }
    }

    /// Enter or leave operator-set maintenance.
    ///
    /// Leaving maintenance resets the indexer to Healthy with a clean
    /// failure counter.
    pub async fn set_maintenance(
        &self,
        id: IndexerId,
        enabled: bool,
    ) -> IndexerResult<Option<(HealthStatus, HealthStatus)>> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(&id)
            .ok_or(IndexerError::UnknownIndexer { id: id.0 })?;
        let old = entry.health.status;
        let new = if enabled {
            HealthStatus::Maintenance
        } else {
            entry.health.consecutive_failures = 0;
            HealthStatus::Healthy
        };
        entry.health.status = new;
        Ok(if old != new { Some((old, new)) } else { None })
    }

    /// Current health for one indexer
    pub async fn health(&self, id: IndexerId) -> Option<IndexerHealth> {
        self.entries.read().await.get(&id).map(|e| e.health.clone())
    }
}

impl Default for IndexerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::models::IndexerKind;

    fn test_indexer(id: u32) -> Indexer {
        Indexer::new(
            IndexerId(id),
            format!("indexer-{}", id),
            format!("https://indexer{}.example.com", id),
            IndexerKind::Prowlarr,
        )
    }

    async fn registry_with(ids: &[u32]) -> IndexerRegistry {
        let registry = IndexerRegistry::new();
        for id in ids {
            registry.upsert(test_indexer(*id)).await.unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn test_eligible_filters_inactive() {
        let registry = registry_with(&[1]).await;
        let mut inactive = test_indexer(2);
        inactive.is_active = false;
        registry.upsert(inactive).await.unwrap();

        let eligible = registry.eligible_indexers(None).await;
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, IndexerId(1));
    }

    #[tokio::test]
    async fn test_eligible_respects_subset() {
        let registry = registry_with(&[1, 2, 3]).await;
        let subset = vec![IndexerId(2)];
        let eligible = registry.eligible_indexers(Some(&subset)).await;
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, IndexerId(2));
    }

    #[tokio::test]
    async fn test_admit_exhausts_window() {
        let registry = IndexerRegistry::new();
        let mut indexer = test_indexer(1);
        indexer.rate_limit_requests = 2;
        indexer.rate_limit_window_secs = 3600;
        registry.upsert(indexer).await.unwrap();

        assert!(registry.admit(IndexerId(1)).await);
        assert!(registry.admit(IndexerId(1)).await);
        assert!(!registry.admit(IndexerId(1)).await);
    }

    #[tokio::test]
    async fn test_admit_unknown_indexer() {
        let registry = IndexerRegistry::new();
        assert!(!registry.admit(IndexerId(99)).await);
    }

    #[tokio::test]
    async fn test_health_degrades_then_goes_down() {
        let registry = IndexerRegistry::with_thresholds(HealthThresholds {
            degraded_failures: 2,
            down_failures: 4,
            slow_response_ms: 10_000,
        });
        registry.upsert(test_indexer(1)).await.unwrap();
        let id = IndexerId(1);
        let fail = CallOutcome::Failure {
            authentication: false,
        };

        assert!(registry.record_outcome(id, fail.clone()).await.is_none());
        let change = registry.record_outcome(id, fail.clone()).await;
        assert_eq!(change, Some((HealthStatus::Healthy, HealthStatus::Degraded)));

        registry.record_outcome(id, fail.clone()).await;
        let change = registry.record_outcome(id, fail).await;
        assert_eq!(change, Some((HealthStatus::Degraded, HealthStatus::Down)));

        // Down indexers leave the default eligibility set
        assert!(registry.eligible_indexers(None).await.is_empty());
        // But an explicit request can still probe them
        let subset = vec![id];
        assert_eq!(registry.eligible_indexers(Some(&subset)).await.len(), 1);
    }

    #[tokio::test]
    async fn test_success_fully_recovers_down_indexer() {
        let registry = IndexerRegistry::with_thresholds(HealthThresholds {
            degraded_failures: 1,
            down_failures: 2,
            slow_response_ms: 10_000,
        });
        registry.upsert(test_indexer(1)).await.unwrap();
        let id = IndexerId(1);
        let fail = CallOutcome::Failure {
            authentication: false,
        };
        registry.record_outcome(id, fail.clone()).await;
        registry.record_outcome(id, fail).await;
        assert_eq!(registry.health(id).await.unwrap().status, HealthStatus::Down);

        let change = registry
            .record_outcome(
                id,
                CallOutcome::Success {
                    response_time_ms: 120,
                },
            )
            .await;
        assert_eq!(change, Some((HealthStatus::Down, HealthStatus::Healthy)));
        assert_eq!(registry.health(id).await.unwrap().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_slow_success_degrades() {
        let registry = IndexerRegistry::with_thresholds(HealthThresholds {
            degraded_failures: 3,
            down_failures: 6,
            slow_response_ms: 1_000,
        });
        registry.upsert(test_indexer(1)).await.unwrap();

        let change = registry
            .record_outcome(
                IndexerId(1),
                CallOutcome::Success {
                    response_time_ms: 5_000,
                },
            )
            .await;
        assert_eq!(change, Some((HealthStatus::Healthy, HealthStatus::Degraded)));
    }

    #[tokio::test]
    async fn test_auth_failure_degrades_immediately() {
        let registry = registry_with(&[1]).await;
        let change = registry
            .record_outcome(IndexerId(1), CallOutcome::Failure { authentication: true })
            .await;
        assert_eq!(change, Some((HealthStatus::Healthy, HealthStatus::Degraded)));
    }

    #[tokio::test]
    async fn test_auth_failure_never_revives_down_indexer() {
        let registry = IndexerRegistry::with_thresholds(HealthThresholds {
            degraded_failures: 1,
            down_failures: 2,
            slow_response_ms: 10_000,
        });
        registry.upsert(test_indexer(1)).await.unwrap();
        let id = IndexerId(1);
        let fail = CallOutcome::Failure {
            authentication: false,
        };
        registry.record_outcome(id, fail.clone()).await;
        registry.record_outcome(id, fail).await;
        assert_eq!(registry.health(id).await.unwrap().status, HealthStatus::Down);

        // An auth failure must not lift the indexer back to Degraded
        let change = registry
            .record_outcome(id, CallOutcome::Failure { authentication: true })
            .await;
        assert!(change.is_none());
        assert_eq!(registry.health(id).await.unwrap().status, HealthStatus::Down);
    }

    #[tokio::test]
    async fn test_maintenance_excludes_and_overrides_outcomes() {
        let registry = registry_with(&[1]).await;
        let id = IndexerId(1);
        registry.set_maintenance(id, true).await.unwrap();

        assert!(registry.eligible_indexers(None).await.is_empty());
        // Even an explicit subset never includes a maintenance indexer
        let subset = vec![id];
        assert!(registry.eligible_indexers(Some(&subset)).await.is_empty());

        // Outcomes do not move a maintenance indexer
        let change = registry
            .record_outcome(
                id,
                CallOutcome::Success {
                    response_time_ms: 50,
                },
            )
            .await;
        assert!(change.is_none());
        assert_eq!(
            registry.health(id).await.unwrap().status,
            HealthStatus::Maintenance
        );

        registry.set_maintenance(id, false).await.unwrap();
        assert_eq!(registry.eligible_indexers(None).await.len(), 1);
    }
}

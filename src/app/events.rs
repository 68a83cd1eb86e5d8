//! Application event bus.
//!
//! Events fan out over a tokio broadcast channel. Delivery is best-effort:
//! a slow subscriber lags and misses events rather than applying
//! backpressure to workers, and sending with no subscribers is not an
//! error. All event-driven consumers must tolerate gaps.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::app::models::{HealthStatus, IndexerId};
use crate::constants::events;

/// Events published by the scheduler, workers and registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Periodic progress for an active download
    DownloadProgress {
        item_id: u64,
        progress_percent: u8,
        bytes_downloaded: u64,
        download_speed_kbps: Option<u64>,
        eta_seconds: Option<u64>,
    },
    /// A download finished successfully
    DownloadCompleted { item_id: u64, file_size_bytes: u64 },
    /// A download failed; `will_retry` distinguishes backoff from permanent failure
    DownloadFailed {
        item_id: u64,
        error: String,
        will_retry: bool,
    },
    /// Queue membership or ordering changed (enqueue, cancel, priority, ...)
    QueueUpdated { pending: usize, active: usize },
    /// An indexer's health status transitioned
    IndexerStatusChanged {
        indexer_id: IndexerId,
        old_status: HealthStatus,
        new_status: HealthStatus,
    },
}

/// Broadcast-backed event bus shared across components
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(events::BUS_CAPACITY);
        Self { sender }
    }

    /// Publish an event; silently dropped when nobody is subscribed
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::new();
        bus.publish(Event::QueueUpdated {
            pending: 1,
            active: 0,
        });
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(Event::DownloadCompleted {
            item_id: 7,
            file_size_bytes: 1024,
        });

        match rx.recv().await.unwrap() {
            Event::DownloadCompleted { item_id, .. } => assert_eq!(item_id, 7),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_event_serializes_tagged() {
        let event = Event::IndexerStatusChanged {
            indexer_id: IndexerId(3),
            old_status: HealthStatus::Healthy,
            new_status: HealthStatus::Degraded,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"indexer_status_changed\""));
        assert!(json.contains("\"degraded\""));
    }
}

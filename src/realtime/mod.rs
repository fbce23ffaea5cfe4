//! Per-exhibition publish/subscribe fan-out. Every accepted state transition
//! is published to the topic of its exhibition; delivery is best-effort and
//! at-most-once per subscriber. No event is authoritative on its own — the
//! Reservation Store always is — so a subscriber that observes a gap must
//! re-fetch full state.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::StallStatus;

/// Events carry the post-transition version so subscribers can drop stale
/// messages: for one stall, versions only ever move forward.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StallEvent {
    #[serde(rename_all = "camelCase")]
    StallStatusChanged {
        stall_id: i64,
        status: StallStatus,
        version: i64,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    StallBooked {
        stall_id: i64,
        booking_id: Uuid,
        status: StallStatus,
        version: i64,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    StallReleased {
        stall_id: i64,
        version: i64,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    LayoutUpdate {
        stall_ids: Vec<i64>,
        timestamp: DateTime<Utc>,
    },
}

impl StallEvent {
    pub fn status_changed(stall_id: i64, status: StallStatus, version: i64) -> Self {
        StallEvent::StallStatusChanged {
            stall_id,
            status,
            version,
            timestamp: Utc::now(),
        }
    }

    pub fn booked(stall_id: i64, booking_id: Uuid, status: StallStatus, version: i64) -> Self {
        StallEvent::StallBooked {
            stall_id,
            booking_id,
            status,
            version,
            timestamp: Utc::now(),
        }
    }

    pub fn released(stall_id: i64, version: i64) -> Self {
        StallEvent::StallReleased {
            stall_id,
            version,
            timestamp: Utc::now(),
        }
    }

    pub fn layout_update(stall_ids: Vec<i64>) -> Self {
        StallEvent::LayoutUpdate {
            stall_ids,
            timestamp: Utc::now(),
        }
    }

    /// Post-transition version, where the event refers to a single stall.
    pub fn version(&self) -> Option<i64> {
        match self {
            StallEvent::StallStatusChanged { version, .. }
            | StallEvent::StallBooked { version, .. }
            | StallEvent::StallReleased { version, .. } => Some(*version),
            StallEvent::LayoutUpdate { .. } => None,
        }
    }
}

/// Fan-out hub keyed by exhibition. `join`/`leave` churn only touches the
/// topic registry; publishing takes a read lock and a lock-free broadcast
/// send, so connect/disconnect storms cannot stall publishers.
pub struct BroadcastHub {
    topics: RwLock<HashMap<i64, broadcast::Sender<StallEvent>>>,
    capacity: usize,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Subscribe to one exhibition's topic, creating it on first join.
    pub fn join(&self, exhibition_id: i64) -> broadcast::Receiver<StallEvent> {
        let mut topics = self.topics.write().unwrap();
        topics
            .entry(exhibition_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publish to every current subscriber of the exhibition. Returns how
    /// many subscribers the event was handed to; zero when nobody listens.
    pub fn publish(&self, exhibition_id: i64, event: StallEvent) -> usize {
        let delivered = {
            let topics = self.topics.read().unwrap();
            match topics.get(&exhibition_id) {
                Some(sender) => sender.send(event).unwrap_or(0),
                None => 0,
            }
        };
        if delivered == 0 {
            self.drop_idle_topic(exhibition_id);
        }
        delivered
    }

    /// Number of live subscribers for an exhibition.
    pub fn subscriber_count(&self, exhibition_id: i64) -> usize {
        let topics = self.topics.read().unwrap();
        topics
            .get(&exhibition_id)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    fn drop_idle_topic(&self, exhibition_id: i64) {
        let mut topics = self.topics.write().unwrap();
        if let Some(sender) = topics.get(&exhibition_id) {
            if sender.receiver_count() == 0 {
                topics.remove(&exhibition_id);
            }
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_fan_out_per_exhibition() {
        let hub = BroadcastHub::default();
        let mut sub_a = hub.join(1);
        let mut sub_b = hub.join(1);
        let mut other = hub.join(2);

        let delivered = hub.publish(1, StallEvent::released(12, 4));
        assert_eq!(delivered, 2);

        for sub in [&mut sub_a, &mut sub_b] {
            match sub.recv().await.unwrap() {
                StallEvent::StallReleased { stall_id, version, .. } => {
                    assert_eq!(stall_id, 12);
                    assert_eq!(version, 4);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn idle_topics_are_dropped() {
        let hub = BroadcastHub::default();
        let sub = hub.join(7);
        assert_eq!(hub.subscriber_count(7), 1);
        drop(sub);
        // Next publish notices the empty topic and reaps it.
        assert_eq!(hub.publish(7, StallEvent::layout_update(vec![1])), 0);
        assert_eq!(hub.subscriber_count(7), 0);
    }
}

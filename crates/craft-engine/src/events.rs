//! Event bus for cross-component notifications.
//!
//! The Settings Resolver publishes `SettingsChanged` so the Pattern
//! Library can invalidate its compiled matchers (§4.1, §4.2); the Router
//! publishes `ModelDegraded`/`BudgetRefused`; the Tournament Orchestrator
//! publishes `VariantScored`/`TournamentCompleted` so callers can stream
//! results as they arrive (§4.7, Design Notes "Streaming tournament
//! results").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 256;

/// All cross-component events flowing over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CraftEvent {
    /// A setting changed; path-prefixed subscribers (Pattern Library,
    /// Model Router) should invalidate caches keyed under this path.
    SettingsChanged {
        path: String,
        project_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// The Pattern Library finished recompiling its matcher set for a
    /// project after a `SettingsChanged`/voice bundle reload.
    PatternsRecompiled {
        project_id: String,
        anti_pattern_count: usize,
        timestamp: DateTime<Utc>,
    },
    /// The Router had to substitute the nearest available model for a
    /// requested task type (§4.3 "degradation event").
    ModelDegraded {
        task_type: String,
        requested: Option<String>,
        substituted: String,
        timestamp: DateTime<Utc>,
    },
    /// A call was refused because it would exceed the per-project budget
    /// cap (§4.3, §5).
    BudgetRefused {
        project_id: String,
        estimated_cost: f64,
        remaining_budget: f64,
        timestamp: DateTime<Utc>,
    },
    /// One Variant in a running Tournament finished scoring.
    VariantScored {
        scaffold_id: String,
        variant_id: String,
        overall: f64,
        timestamp: DateTime<Utc>,
    },
    /// A Tournament finished ranking all completed Variants.
    TournamentCompleted {
        scaffold_id: String,
        winner_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// One Enhancement pass finished (Six-Pass mode) or the single
    /// Action-Prompt fix batch was applied.
    EnhancementPassCompleted {
        pass_name: String,
        before: f64,
        after: f64,
        reverted: bool,
        timestamp: DateTime<Utc>,
    },
}

/// Error publishing to a bus with no active subscribers is not an error —
/// broadcast channels only fail to send when truly closed.
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("event bus channel closed")]
    ChannelClosed,
}

/// Shared reference to an [`EventBus`].
pub type SharedEventBus = Arc<EventBus>;

/// Pub/sub bus over [`CraftEvent`], backed by a Tokio broadcast channel.
pub struct EventBus {
    sender: broadcast::Sender<CraftEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn shared() -> SharedEventBus {
        Arc::new(Self::new())
    }

    /// Publish an event. Returns the number of live subscribers notified;
    /// publishing with zero subscribers is not an error.
    pub fn publish(&self, event: CraftEvent) -> Result<usize, EventBusError> {
        match self.sender.send(event) {
            Ok(n) => Ok(n),
            Err(_) => {
                debug!("event bus has no subscribers");
                Ok(0)
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CraftEvent> {
        self.sender.subscribe()
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
    async fn publish_without_subscribers_does_not_error() {
        let bus = EventBus::new();
        let n = bus
            .publish(CraftEvent::SettingsChanged {
                path: "scoring.voice_authenticity_weight".into(),
                project_id: None,
                timestamp: Utc::now(),
            })
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(CraftEvent::BudgetRefused {
            project_id: "p1".into(),
            estimated_cost: 10.0,
            remaining_budget: 2.0,
            timestamp: Utc::now(),
        })
        .unwrap();
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, CraftEvent::BudgetRefused { .. }));
    }
}

//! Lifecycle event fan-out.
//!
//! The orchestrator announces what happened; subscribers (a websocket
//! layer, a test harness) decide what to do with it. Publishing never
//! blocks a tick.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::model::{CompletionReason, NarrativeId};

/// Something observable happened to a narrative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    NarrativeSpawned {
        narrative_id: NarrativeId,
        title: String,
    },
    InstallmentAdded {
        narrative_id: NarrativeId,
        order: u32,
    },
    NarrativeEvaluated {
        narrative_id: NarrativeId,
        installment_order: u32,
        overall: f64,
    },
    NarrativeCompleted {
        narrative_id: NarrativeId,
        reason: CompletionReason,
    },
    CoverImageReady {
        narrative_id: NarrativeId,
        url: String,
    },
}

/// Sink for lifecycle events. Implementations must be quick and must not
/// fail the caller.
pub trait EventNotifier: Send + Sync {
    fn publish(&self, event: LifecycleEvent);
}

/// Notifier that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl EventNotifier for NullNotifier {
    fn publish(&self, _event: LifecycleEvent) {}
}

/// Notifier backed by an unbounded channel. Send failures mean the receiver
/// is gone, which is fine: nobody is listening.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl ChannelNotifier {
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventNotifier for ChannelNotifier {
    fn publish(&self, event: LifecycleEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_notifier_delivers_in_order() {
        let (notifier, mut rx) = ChannelNotifier::pair();
        let id = NarrativeId::new();
        notifier.publish(LifecycleEvent::NarrativeSpawned {
            narrative_id: id,
            title: "The Drift".to_string(),
        });
        notifier.publish(LifecycleEvent::InstallmentAdded {
            narrative_id: id,
            order: 1,
        });

        match rx.try_recv().unwrap() {
            LifecycleEvent::NarrativeSpawned { narrative_id, .. } => {
                assert_eq!(narrative_id, id)
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.try_recv().unwrap() {
            LifecycleEvent::InstallmentAdded { order, .. } => assert_eq!(order, 1),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_publish_after_receiver_dropped_is_silent() {
        let (notifier, rx) = ChannelNotifier::pair();
        drop(rx);
        notifier.publish(LifecycleEvent::NarrativeCompleted {
            narrative_id: NarrativeId::new(),
            reason: CompletionReason::MaxLength,
        });
    }

    #[test]
    fn test_event_serialization_tags() {
        let event = LifecycleEvent::NarrativeCompleted {
            narrative_id: NarrativeId(uuid::Uuid::from_u128(5)),
            reason: CompletionReason::PoolCeiling,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "narrative_completed");
        assert_eq!(json["reason"], "pool-ceiling");
    }
}

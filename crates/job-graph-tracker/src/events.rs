//! Tracker notifications
//!
//! Notifications are sent from the tracker to the host (UI, materializer,
//! bake tooling) when something happened that they may react to.

use serde::{Deserialize, Serialize};

use crate::types::{LinkId, LinkState};

/// Destination of tracker notifications
///
/// Hosts plug in their own transport (a channel, a UI callback list) so the
/// tracker does not depend on any of them.
pub trait EventSink: Send + Sync {
    /// Deliver one notification; fails if the receiving side is gone
    fn send(&self, event: TrackerEvent) -> Result<(), EventError>;
}

/// Delivery failure reported by an [`EventSink`]
#[derive(Debug, Clone, thiserror::Error)]
#[error("Tracker event not delivered: {reason}")]
pub struct EventError {
    pub reason: String,
}

impl EventError {
    /// The receiver was dropped
    pub fn disconnected() -> Self {
        Self {
            reason: "receiver disconnected".to_string(),
        }
    }
}

/// Notifications emitted by the tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TrackerEvent {
    /// An asset link changed state
    #[serde(rename_all = "camelCase")]
    LinkStateChanged { link_id: LinkId, state: LinkState },

    /// Every node of a network reported cook-complete
    #[serde(rename_all = "camelCase")]
    NetworkCookComplete {
        link_id: LinkId,
        network: String,
        any_failed: bool,
    },

    /// The materializer loaded an artifact
    #[serde(rename_all = "camelCase")]
    WorkResultObjectLoaded {
        link_id: LinkId,
        node_path: String,
        work_result_index: usize,
        result_info_index: Option<usize>,
    },

    /// An asset link needs its UI redrawn
    #[serde(rename_all = "camelCase")]
    LinkRefreshed { link_id: LinkId },
}

/// Send an event, logging instead of failing
pub(crate) fn emit(sink: &dyn EventSink, event: TrackerEvent) {
    if let Err(e) = sink.send(event) {
        log::warn!("Failed to send tracker event: {}", e);
    }
}

/// Drops every notification
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: TrackerEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// Keeps every notification in memory, in delivery order
#[derive(Default)]
pub struct VecEventSink {
    received: parking_lot::Mutex<Vec<TrackerEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the notifications received so far
    pub fn events(&self) -> Vec<TrackerEvent> {
        self.received.lock().clone()
    }

    pub fn clear(&self) {
        self.received.lock().clear();
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: TrackerEvent) -> Result<(), EventError> {
        self.received.lock().push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DisconnectedSink;

    impl EventSink for DisconnectedSink {
        fn send(&self, _event: TrackerEvent) -> Result<(), EventError> {
            Err(EventError::disconnected())
        }
    }

    #[test]
    fn test_vec_event_sink_collects() {
        let sink = VecEventSink::new();

        sink.send(TrackerEvent::NetworkCookComplete {
            link_id: "link1".to_string(),
            network: "topnet1".to_string(),
            any_failed: true,
        })
        .unwrap();

        assert!(matches!(
            sink.events().as_slice(),
            [TrackerEvent::NetworkCookComplete { network, any_failed: true, .. }] if network == "topnet1"
        ));

        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_emit_swallows_send_errors() {
        emit(
            &DisconnectedSink,
            TrackerEvent::LinkRefreshed {
                link_id: "link1".to_string(),
            },
        );
        emit(
            &NullEventSink,
            TrackerEvent::LinkRefreshed {
                link_id: "link1".to_string(),
            },
        );
    }

    #[test]
    fn test_event_json_is_tagged() {
        let event = TrackerEvent::LinkStateChanged {
            link_id: "abc".to_string(),
            state: LinkState::Linked,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "linkStateChanged");
        assert_eq!(value["linkId"], "abc");
        assert_eq!(value["state"], "linked");
    }
}

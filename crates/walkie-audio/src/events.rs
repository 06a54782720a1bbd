use serde::Serialize;
use tokio::sync::mpsc;

use crate::bridge::EngineState;
use crate::registry::DeviceId;

/// Events streamed from the engine to whatever bridges it to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "data")]
pub enum EngineEvent {
    StateChanged {
        state: EngineState,
    },
    DeviceAdded {
        device_id: DeviceId,
    },
    DeviceRemoved {
        device_id: DeviceId,
    },
    DeviceRejected {
        device_id: DeviceId,
        reason: String,
    },
    Cleared,
    StreamError {
        message: String,
    },
}

/// Non-blocking sending half of the event queue.
///
/// A full or closed queue drops the event; emitting never waits, so it is safe
/// from stream error callbacks.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<EngineEvent>,
}

impl EventSender {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: EngineEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.tx.try_send(event) {
            tracing::debug!(?event, "event queue full, dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(EngineEvent::DeviceRejected {
            device_id: DeviceId::new(4),
            reason: "registry is full (3 devices)".into(),
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "deviceRejected",
                "data": { "device_id": 4, "reason": "registry is full (3 devices)" }
            })
        );

        let json = serde_json::to_value(EngineEvent::StateChanged {
            state: EngineState::Running,
        })
        .unwrap();
        assert_eq!(json["data"]["state"], "running");
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() {
        let (events, mut rx) = EventSender::channel(1);
        events.emit(EngineEvent::Cleared);
        events.emit(EngineEvent::DeviceAdded {
            device_id: DeviceId::new(1),
        });
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::Cleared);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_queue_is_ignored() {
        let (events, rx) = EventSender::channel(4);
        drop(rx);
        events.emit(EngineEvent::Cleared);
    }
}

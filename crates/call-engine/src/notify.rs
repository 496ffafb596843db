//! Notification sink
//!
//! The engine reports every state change it makes so the operator UI can
//! refresh without polling. Delivery is fire-and-forget: a slow or absent
//! subscriber never blocks a webhook.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::database::{CallStatus, RoutingState};

/// Capacity of the broadcast channel; lagging subscribers lose old events
const BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    CallUpdated {
        session_id: String,
        status: CallStatus,
    },
    RoutingChanged {
        call_session_id: String,
        state: RoutingState,
        step: usize,
    },
    RecordingAttached {
        session_id: String,
    },
    TranscriptAttached {
        session_id: String,
        source: TranscriptSource,
    },
    SummaryAttached {
        session_id: String,
        placeholder: bool,
    },
    SmsUpdated {
        message_sid: String,
        status: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptSource {
    /// Native provider transcription webhook
    Provider,
    /// Matched conversation from the AI voice-agent platform
    Correlation,
    /// AI platform post-call webhook
    AiWebhook,
}

pub trait NotificationSink: Send + Sync {
    fn publish(&self, event: EngineEvent);
}

/// Fans events out to any number of subscribers
#[derive(Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<EngineEvent>,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationSink for BroadcastNotifier {
    fn publish(&self, event: EngineEvent) {
        debug!("📣 {:?}", event);
        // no subscribers is fine
        let _ = self.sender.send(event);
    }
}

/// Records events in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryNotifier {
    events: Arc<Mutex<Vec<EngineEvent>>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl NotificationSink for MemoryNotifier {
    fn publish(&self, event: EngineEvent) {
        self.events.lock().push(event);
    }
}

//! Status notifications emitted by the healing engine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// Healing lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealingEvent {
    AnalysisStarted,
    AnalysisComplete,
    FixPlanGenerated,
    FixStarted,
    FixSuccess,
    FixFailed,
    MaxAttemptsReached,
    Failed,
}

impl HealingEvent {
    /// Event name on the wire, e.g. `self-healing:fix_started`.
    pub fn name(&self) -> &'static str {
        match self {
            HealingEvent::AnalysisStarted => "self-healing:analysis_started",
            HealingEvent::AnalysisComplete => "self-healing:analysis_complete",
            HealingEvent::FixPlanGenerated => "self-healing:fix_plan_generated",
            HealingEvent::FixStarted => "self-healing:fix_started",
            HealingEvent::FixSuccess => "self-healing:fix_success",
            HealingEvent::FixFailed => "self-healing:fix_failed",
            HealingEvent::MaxAttemptsReached => "self-healing:max_attempts_reached",
            HealingEvent::Failed => "self-healing:failed",
        }
    }
}

impl fmt::Display for HealingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Envelope delivered to notification sinks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEnvelope {
    /// Always `"status"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Event name.
    pub event: String,
    /// Event specific data.
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl StatusEnvelope {
    /// Envelope for `event` carrying `payload`.
    pub fn new(event: HealingEvent, payload: Value) -> Self {
        Self {
            kind: "status".to_string(),
            event: event.name().to_string(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Receiver of session-scoped status notifications.
pub trait NotificationSink: Send + Sync {
    /// Deliver `envelope` for `session_id`. Must not block.
    fn notify(&self, session_id: &str, envelope: StatusEnvelope);
}

/// Discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotificationSink;

impl NotificationSink for NoopNotificationSink {
    fn notify(&self, _session_id: &str, _envelope: StatusEnvelope) {}
}

/// Notification tagged with its session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionNotification {
    pub session_id: String,
    pub envelope: StatusEnvelope,
}

/// Publishes notifications on a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastNotificationSink {
    tx: broadcast::Sender<SessionNotification>,
}

impl BroadcastNotificationSink {
    /// Create a sink buffering up to `capacity` notifications per receiver.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to notifications of every session.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotification> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotificationSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl NotificationSink for BroadcastNotificationSink {
    fn notify(&self, session_id: &str, envelope: StatusEnvelope) {
        // No subscribers is not an error.
        let _ = self.tx.send(SessionNotification {
            session_id: session_id.to_string(),
            envelope,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_shape() {
        let envelope = StatusEnvelope::new(HealingEvent::FixStarted, json!({"failureKey": "a:b"}));
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["type"], "status");
        assert_eq!(value["event"], "self-healing:fix_started");
        assert_eq!(value["payload"]["failureKey"], "a:b");
        assert!(value["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_broadcast_sink() {
        let sink = BroadcastNotificationSink::new(8);
        let mut rx = sink.subscribe();

        sink.notify("s1", StatusEnvelope::new(HealingEvent::Failed, Value::Null));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.session_id, "s1");
        assert_eq!(received.envelope.event, "self-healing:failed");
    }

    #[test]
    fn test_send_without_subscribers() {
        let sink = BroadcastNotificationSink::default();
        sink.notify("s1", StatusEnvelope::new(HealingEvent::Failed, Value::Null));
        NoopNotificationSink.notify("s1", StatusEnvelope::new(HealingEvent::Failed, Value::Null));
    }
}

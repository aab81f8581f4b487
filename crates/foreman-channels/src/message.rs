use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Recipient value addressing every subscriber.
pub const BROADCAST: &str = "broadcast";

/// Delivery status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Queued, not yet handled.
    Pending,
    /// Handled by its recipient.
    Delivered,
    /// No recipient, or the handler errored or panicked.
    Failed,
    /// Fanned out to all subscribers at send time.
    Broadcasting,
}

impl MessageStatus {
    /// Whether delivery has finished, one way or the other.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MessageStatus::Pending)
    }
}

/// A message exchanged between workers over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message id.
    pub id: Uuid,
    /// Sending worker id.
    pub sender: String,
    /// Subscriber id, or [`BROADCAST`].
    pub recipient: String,
    /// Free-form message type.
    #[serde(rename = "type")]
    pub message_type: String,
    /// Arbitrary JSON body.
    pub payload: Value,
    /// When the message was created.
    pub created_at: DateTime<Utc>,
    /// Delivery status.
    pub status: MessageStatus,
}

impl Message {
    /// A pending message with a fresh id.
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        message_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: sender.into(),
            recipient: recipient.into(),
            message_type: message_type.into(),
            payload,
            created_at: Utc::now(),
            status: MessageStatus::Pending,
        }
    }

    /// Whether the message addresses every subscriber.
    pub fn is_broadcast(&self) -> bool {
        self.recipient == BROADCAST
    }
}

/// A message shared between the queue and the history buffer.
///
/// The status leaves `Pending` at most once.
#[derive(Debug)]
pub(crate) struct Tracked {
    message: Message,
    status: Mutex<MessageStatus>,
}

impl Tracked {
    pub(crate) fn new(message: Message) -> Self {
        let status = message.status;
        Self {
            message,
            status: Mutex::new(status),
        }
    }

    pub(crate) fn message(&self) -> &Message {
        &self.message
    }

    pub(crate) fn status(&self) -> MessageStatus {
        *self.status.lock()
    }

    /// Move a pending message to `terminal`. Returns false if it already settled.
    pub(crate) fn settle(&self, terminal: MessageStatus) -> bool {
        let mut status = self.status.lock();
        if status.is_terminal() || !terminal.is_terminal() {
            return false;
        }
        *status = terminal;
        true
    }

    /// Copy of the message with its current status.
    pub(crate) fn snapshot(&self) -> Message {
        let mut message = self.message.clone();
        message.status = self.status();
        message
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_settle_only_once() {
        let tracked = Tracked::new(Message::new("a", "b", "ping", json!({})));
        assert_eq!(tracked.status(), MessageStatus::Pending);
        assert!(tracked.settle(MessageStatus::Delivered));
        assert!(!tracked.settle(MessageStatus::Failed));
        assert_eq!(tracked.status(), MessageStatus::Delivered);
    }

    #[test]
    fn test_cannot_settle_to_pending() {
        let tracked = Tracked::new(Message::new("a", "b", "ping", json!({})));
        assert!(!tracked.settle(MessageStatus::Pending));
        assert_eq!(tracked.status(), MessageStatus::Pending);
    }

    #[test]
    fn test_message_wire_shape() {
        let msg = Message::new("boss", BROADCAST, "announce", json!({"k": 1}));
        assert!(msg.is_broadcast());
        let wire = serde_json::to_value(&msg).unwrap();
        assert_eq!(wire["type"], "announce");
        assert_eq!(wire["status"], "pending");
        assert_eq!(wire["recipient"], "broadcast");
    }
}

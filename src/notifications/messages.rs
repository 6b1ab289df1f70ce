//! Support chat notifications.

use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use super::{routes, Producer};
use crate::bus::{OutboundMessage, Publisher};

/// Chat message fields the notification service needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: Uuid,
    /// Username of the sender.
    pub user: String,
    pub is_admin: bool,
    pub message_text: String,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
}

#[derive(Serialize)]
struct MessageEnvelope<'a> {
    id: Uuid,
    sender: &'a str,
    from_admin: bool,
    text: &'a str,
    timestamp: f64,
}

impl<'a> From<&'a ChatMessage> for MessageEnvelope<'a> {
    fn from(message: &'a ChatMessage) -> Self {
        Self {
            id: message.message_id,
            sender: &message.user,
            from_admin: message.is_admin,
            text: &message.message_text,
            timestamp: message.timestamp,
        }
    }
}

pub struct MessagesProducer {
    producer: Producer,
}

impl MessagesProducer {
    pub fn new(publisher: impl Publisher + 'static) -> Self {
        Self {
            producer: Producer::new(publisher),
        }
    }

    pub fn add_new_message(&self, message: &ChatMessage) -> &Self {
        match serde_json::to_string(&MessageEnvelope::from(message)) {
            Ok(body) => self
                .producer
                .publisher()
                .add_message(OutboundMessage::new(routes::MESSAGE_SENT, body)),
            Err(e) => error!(message_id = %message.message_id, error = %e, "Failed to serialize chat message"),
        }
        self
    }

    pub async fn send(&self) {
        self.producer.send().await
    }
}

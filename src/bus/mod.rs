//! Message bus for outbound notifications.
//!
//! This module contains:
//! - `Publisher` trait: buffered, fire-and-forget delivery to one exchange
//! - `BrokerTransport` trait family: the connection/channel contract a publish
//!   cycle is driven against
//! - `PublishCycle`: the explicit connection state machine
//! - Implementations: AMQP (RabbitMQ via lapin), Mock

use async_trait::async_trait;
use serde::Deserialize;

// Implementation modules
#[cfg(feature = "amqp")]
pub mod amqp;
pub mod mock;
pub mod publisher;
pub mod state;
pub mod transport;

// Re-exports
#[cfg(feature = "amqp")]
pub use amqp::AmqpTransport;
pub use mock::{MockPublisher, MockTransport};
pub use publisher::AsyncPublisher;
pub use state::{ConnectionState, CycleAction, CycleEvent, PublishCycle};
pub use transport::{BrokerChannel, BrokerConnection, BrokerTransport, MessageProperties};

/// Application identifier attached to every published notification.
pub const APP_ID: &str = "moneyger-server";

/// Exchange carrying account lifecycle events and credential requests.
pub const USERS_EXCHANGE: &str = "users_exchange";
/// Exchange carrying transaction events.
pub const TRANSACTIONS_EXCHANGE: &str = "transactions_exchange";
/// Exchange carrying chat message events.
pub const MESSAGES_EXCHANGE: &str = "messages_exchange";

// ============================================================================
// Errors
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur while publishing.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Channel failed: {0}")]
    Channel(String),

    #[error("Exchange declaration failed: {0}")]
    Exchange(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Connection closed unexpectedly: {0}")]
    Closed(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ============================================================================
// Exchanges and messages
// ============================================================================

/// AMQP exchange kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeType {
    Direct,
    Fanout,
    Headers,
    #[default]
    Topic,
}

impl ExchangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeType::Direct => "direct",
            ExchangeType::Fanout => "fanout",
            ExchangeType::Headers => "headers",
            ExchangeType::Topic => "topic",
        }
    }
}

/// A named routing surface on the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeConfig {
    pub name: String,
    pub kind: ExchangeType,
    pub durable: bool,
}

impl ExchangeConfig {
    /// Durable topic exchange, the shape every notification exchange uses.
    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeType::Topic,
            durable: true,
        }
    }

    pub fn users() -> Self {
        Self::topic(USERS_EXCHANGE)
    }

    pub fn transactions() -> Self {
        Self::topic(TRANSACTIONS_EXCHANGE)
    }

    pub fn messages() -> Self {
        Self::topic(MESSAGES_EXCHANGE)
    }
}

/// One message waiting to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub routing_key: String,
    pub body: Vec<u8>,
}

impl OutboundMessage {
    pub fn new(routing_key: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            routing_key: routing_key.into(),
            body: body.into(),
        }
    }

    /// Body as UTF-8 text, lossy for non-text payloads.
    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

// ============================================================================
// Publisher
// ============================================================================

/// Buffered publisher bound to a single exchange.
///
/// Implementations:
/// - `AsyncPublisher`: short-lived broker connection per `publish()` call
/// - `MockPublisher`: in-memory recorder for testing
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Append a message to the outbound buffer. Never touches the network.
    fn add_message(&self, message: OutboundMessage);

    /// Deliver every buffered message.
    ///
    /// Returns once the publish cycle has terminated. An empty buffer is a
    /// no-op that never opens a connection.
    async fn publish(&self) -> Result<()>;

    /// Number of messages currently buffered.
    fn pending(&self) -> usize;
}

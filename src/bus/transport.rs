//! Broker transport contract used by the publish cycle driver.
//!
//! Each step of the cycle maps to exactly one call here, so a fake transport
//! can reproduce any broker behaviour (refused connection, channel dropped
//! mid-flush) without a network.

use async_trait::async_trait;

use super::{ExchangeConfig, OutboundMessage, Result};

/// AMQP basic properties the notification layer sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    pub app_id: Option<String>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
}

impl MessageProperties {
    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }
}

/// Opens broker connections.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn BrokerConnection>>;
}

/// An open broker connection.
#[async_trait]
pub trait BrokerConnection: Send {
    async fn open_channel(&mut self) -> Result<Box<dyn BrokerChannel>>;

    fn is_closed(&self) -> bool;

    async fn close(&mut self) -> Result<()>;
}

/// An open channel on a broker connection.
#[async_trait]
pub trait BrokerChannel: Send {
    /// Declare the exchange. Idempotent for an identical declaration.
    async fn declare_exchange(&mut self, exchange: &ExchangeConfig) -> Result<()>;

    async fn publish(
        &mut self,
        exchange: &str,
        message: &OutboundMessage,
        properties: &MessageProperties,
    ) -> Result<()>;

    fn is_open(&self) -> bool;

    async fn close(&mut self) -> Result<()>;
}

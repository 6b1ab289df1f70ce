//! Correlation-based request/response over the broker.
//!
//! A caller acquires an [`RpcConnection`] from an [`RpcClient`], issues one or
//! more [`RpcConnection::call`]s, then releases it with
//! [`RpcConnection::close`]. Each call publishes the request with a fresh v4
//! correlation id and `reply_to` pointing at the connection's exclusive,
//! server-named reply queue, then waits up to [`RESPONSE_TIMEOUT`] for the
//! reply carrying the same correlation id.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{ExchangeConfig, MessageProperties, OutboundMessage};

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod mock;

#[cfg(feature = "amqp")]
pub use amqp::AmqpRpcTransport;
pub use mock::MockRpcTransport;

/// How long a call waits for its correlated reply.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Result type for RPC operations.
pub type Result<T> = std::result::Result<T, RpcError>;

/// Errors surfaced to RPC callers.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("RPC connection is not open")]
    NotConnected,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Transport failed: {0}")]
    Transport(String),

    #[error("No response received within {timeout:?}")]
    EmptyResponse { timeout: Duration },

    #[error("Unsuccessful RPC call result")]
    Unsuccessful,

    #[error("Invalid RPC response: {0}")]
    InvalidResponse(String),
}

impl RpcError {
    /// Whether the underlying session can no longer be trusted.
    fn is_transport_failure(&self) -> bool {
        matches!(self, RpcError::Connection(_) | RpcError::Transport(_))
    }
}

/// A message delivered to the reply queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub correlation_id: Option<String>,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn new(correlation_id: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            body: body.into(),
        }
    }
}

/// Opens RPC sessions: connection, channel, exchange and reply queue.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn open(&self, exchange: &ExchangeConfig) -> Result<Box<dyn RpcSession>>;
}

/// An established session consuming its private reply queue.
#[async_trait]
pub trait RpcSession: Send {
    /// Server-assigned name of the exclusive reply queue.
    fn reply_queue(&self) -> &str;

    fn is_open(&self) -> bool;

    async fn publish(
        &mut self,
        exchange: &str,
        message: &OutboundMessage,
        properties: MessageProperties,
    ) -> Result<()>;

    /// Next delivery on the reply queue; `None` once the consumer is gone.
    async fn next_reply(&mut self) -> Option<Result<Reply>>;

    async fn close(&mut self) -> Result<()>;
}

/// One in-flight round trip.
#[derive(Debug)]
pub struct PendingCall {
    pub correlation_id: Uuid,
    pub response: Option<Vec<u8>>,
}

impl PendingCall {
    pub fn new() -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            response: None,
        }
    }

    /// Capture the reply if it belongs to this call.
    pub fn accept(&mut self, reply: Reply) -> bool {
        let expected = self.correlation_id.to_string();
        if reply.correlation_id.as_deref() != Some(expected.as_str()) {
            debug!(
                expected = %expected,
                received = ?reply.correlation_id,
                "Ignoring reply for another call"
            );
            return false;
        }
        self.response = Some(reply.body);
        true
    }
}

impl Default for PendingCall {
    fn default() -> Self {
        Self::new()
    }
}

/// Client bound to one exchange.
pub struct RpcClient<T> {
    transport: T,
    exchange: ExchangeConfig,
    timeout: Duration,
}

impl<T: RpcTransport> RpcClient<T> {
    pub fn new(transport: T, exchange: ExchangeConfig) -> Self {
        Self {
            transport,
            exchange,
            timeout: RESPONSE_TIMEOUT,
        }
    }

    pub fn exchange(&self) -> &ExchangeConfig {
        &self.exchange
    }

    /// Open a connection scope. Release it with [`RpcConnection::close`].
    pub async fn connect(&self) -> Result<RpcConnection> {
        let session = self.transport.open(&self.exchange).await?;
        info!(
            exchange = %self.exchange.name,
            reply_queue = %session.reply_queue(),
            "RPC connection opened"
        );
        Ok(RpcConnection {
            session: Some(session),
            exchange: self.exchange.name.clone(),
            timeout: self.timeout,
        })
    }
}

/// An open RPC connection scope.
pub struct RpcConnection {
    session: Option<Box<dyn RpcSession>>,
    exchange: String,
    timeout: Duration,
}

impl RpcConnection {
    pub fn is_open(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_open())
    }

    /// Publish `request` and wait for its correlated reply.
    ///
    /// Liveness is checked before every call. A transport failure during the
    /// call discards the session, so later calls in the same scope fail with
    /// [`RpcError::NotConnected`] instead of reusing a broken connection.
    pub async fn call(&mut self, request: &OutboundMessage) -> Result<Vec<u8>> {
        let session = match self.session.as_mut() {
            Some(session) if session.is_open() => session,
            _ => return Err(RpcError::NotConnected),
        };

        let outcome =
            Self::round_trip(session.as_mut(), &self.exchange, request, self.timeout).await;

        if let Err(e) = &outcome {
            if e.is_transport_failure() {
                warn!(error = %e, "Discarding RPC session after transport failure");
                self.discard().await;
            }
        }
        outcome
    }

    async fn round_trip(
        session: &mut dyn RpcSession,
        exchange: &str,
        request: &OutboundMessage,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let mut pending = PendingCall::new();
        let properties = MessageProperties::default()
            .with_correlation_id(pending.correlation_id.to_string())
            .with_reply_to(session.reply_queue());

        session.publish(exchange, request, properties).await?;
        debug!(
            routing_key = %request.routing_key,
            correlation_id = %pending.correlation_id,
            "RPC request published"
        );

        let deadline = Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, session.next_reply()).await {
                Err(_) => break,
                Ok(None) => {
                    return Err(RpcError::Transport(
                        "reply consumer closed".to_string(),
                    ))
                }
                Ok(Some(Err(e))) => return Err(e),
                Ok(Some(Ok(reply))) => {
                    if pending.accept(reply) {
                        break;
                    }
                }
            }
        }

        pending.response.ok_or(RpcError::EmptyResponse { timeout })
    }

    async fn discard(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.close().await {
                debug!(error = %e, "Failed to close discarded RPC session");
            }
        }
    }

    /// Release the connection scope.
    pub async fn close(mut self) -> Result<()> {
        match self.session.take() {
            Some(mut session) if session.is_open() => session.close().await,
            _ => Ok(()),
        }
    }
}

impl Drop for RpcConnection {
    fn drop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        warn!("RPC connection dropped without close, closing in background");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = session.close().await {
                    debug!(error = %e, "Failed to close dropped RPC connection");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests;

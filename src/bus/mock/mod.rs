//! In-memory publisher and broker transport for testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::transport::{BrokerChannel, BrokerConnection, BrokerTransport, MessageProperties};
use super::{BusError, ExchangeConfig, OutboundMessage, Publisher, Result};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// MockPublisher
// ============================================================================

#[derive(Default)]
struct MockPublisherState {
    queue: Mutex<VecDeque<OutboundMessage>>,
    published: Mutex<Vec<OutboundMessage>>,
    fail_on_publish: AtomicBool,
    publish_calls: AtomicUsize,
    cycles: AtomicUsize,
}

/// Mock publisher for testing.
///
/// Clones share state, so a test can keep a handle after moving one clone
/// into a producer.
#[derive(Clone, Default)]
pub struct MockPublisher {
    state: Arc<MockPublisherState>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_on_publish(&self, fail: bool) {
        self.state.fail_on_publish.store(fail, Ordering::SeqCst);
    }

    /// Every `publish()` invocation, including empty ones.
    pub fn publish_calls(&self) -> usize {
        self.state.publish_calls.load(Ordering::SeqCst)
    }

    /// Invocations that would have opened a broker connection.
    pub fn cycles(&self) -> usize {
        self.state.cycles.load(Ordering::SeqCst)
    }

    pub fn published_count(&self) -> usize {
        lock(&self.state.published).len()
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        lock(&self.state.published).clone()
    }

    pub fn take_published(&self) -> Vec<OutboundMessage> {
        std::mem::take(&mut *lock(&self.state.published))
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    fn add_message(&self, message: OutboundMessage) {
        lock(&self.state.queue).push_back(message);
    }

    async fn publish(&self) -> Result<()> {
        self.state.publish_calls.fetch_add(1, Ordering::SeqCst);
        if lock(&self.state.queue).is_empty() {
            return Ok(());
        }
        self.state.cycles.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_on_publish.load(Ordering::SeqCst) {
            return Err(BusError::Connection("Mock publish failure".to_string()));
        }
        let drained: Vec<_> = lock(&self.state.queue).drain(..).collect();
        lock(&self.state.published).extend(drained);
        Ok(())
    }

    fn pending(&self) -> usize {
        lock(&self.state.queue).len()
    }
}

// ============================================================================
// MockTransport
// ============================================================================

/// Step at which the mock transport injects a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Connect,
    OpenChannel,
    DeclareExchange,
    /// Fail the n-th (zero-based) publish across the transport's lifetime.
    Publish(usize),
    CloseConnection,
}

/// A message accepted by a mock channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub message: OutboundMessage,
    pub properties: MessageProperties,
}

#[derive(Default)]
struct TransportState {
    fail_at: Option<FailAt>,
    published: Vec<PublishedMessage>,
    declared: Vec<ExchangeConfig>,
    publish_attempts: usize,
    connections_opened: usize,
    connections_closed: usize,
    channels_closed: usize,
}

/// Fake broker implementing the transport contract in memory.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_at(self, step: FailAt) -> Self {
        lock(&self.state).fail_at = Some(step);
        self
    }

    pub fn clear_failure(&self) {
        lock(&self.state).fail_at = None;
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.state).published.clone()
    }

    pub fn declared(&self) -> Vec<ExchangeConfig> {
        lock(&self.state).declared.clone()
    }

    pub fn connections_opened(&self) -> usize {
        lock(&self.state).connections_opened
    }

    pub fn connections_closed(&self) -> usize {
        lock(&self.state).connections_closed
    }

    pub fn channels_closed(&self) -> usize {
        lock(&self.state).channels_closed
    }

    fn fails_at(&self, step: FailAt) -> bool {
        lock(&self.state).fail_at == Some(step)
    }
}

#[async_trait]
impl BrokerTransport for MockTransport {
    async fn connect(&self) -> Result<Box<dyn BrokerConnection>> {
        if self.fails_at(FailAt::Connect) {
            return Err(BusError::Connection("Mock connection refused".to_string()));
        }
        lock(&self.state).connections_opened += 1;
        Ok(Box::new(MockConnection {
            transport: self.clone(),
            closed: false,
        }))
    }
}

struct MockConnection {
    transport: MockTransport,
    closed: bool,
}

#[async_trait]
impl BrokerConnection for MockConnection {
    async fn open_channel(&mut self) -> Result<Box<dyn BrokerChannel>> {
        if self.transport.fails_at(FailAt::OpenChannel) {
            return Err(BusError::Channel("Mock channel refused".to_string()));
        }
        Ok(Box::new(MockChannel {
            transport: self.transport.clone(),
            open: true,
        }))
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        if self.transport.fails_at(FailAt::CloseConnection) {
            return Err(BusError::Connection("Mock close failure".to_string()));
        }
        lock(&self.transport.state).connections_closed += 1;
        Ok(())
    }
}

struct MockChannel {
    transport: MockTransport,
    open: bool,
}

#[async_trait]
impl BrokerChannel for MockChannel {
    async fn declare_exchange(&mut self, exchange: &ExchangeConfig) -> Result<()> {
        if self.transport.fails_at(FailAt::DeclareExchange) {
            self.open = false;
            return Err(BusError::Exchange(format!(
                "Mock declaration of {} rejected",
                exchange.name
            )));
        }
        lock(&self.transport.state).declared.push(exchange.clone());
        Ok(())
    }

    async fn publish(
        &mut self,
        exchange: &str,
        message: &OutboundMessage,
        properties: &MessageProperties,
    ) -> Result<()> {
        let mut state = lock(&self.transport.state);
        let attempt = state.publish_attempts;
        state.publish_attempts += 1;
        if state.fail_at == Some(FailAt::Publish(attempt)) {
            self.open = false;
            return Err(BusError::Publish("Mock channel closed by broker".to_string()));
        }
        state.published.push(PublishedMessage {
            exchange: exchange.to_string(),
            message: message.clone(),
            properties: properties.clone(),
        });
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;
        lock(&self.transport.state).channels_closed += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_publisher_publish() {
        let publisher = MockPublisher::new();
        publisher.add_message(OutboundMessage::new("user.event.created", "{}"));

        publisher.publish().await.unwrap();

        assert_eq!(publisher.published_count(), 1);
        assert_eq!(publisher.pending(), 0);
    }

    #[tokio::test]
    async fn test_mock_publisher_fail_on_publish() {
        let publisher = MockPublisher::new();
        publisher.set_fail_on_publish(true);
        publisher.add_message(OutboundMessage::new("user.event.created", "{}"));

        let result = publisher.publish().await;

        assert!(result.is_err());
        assert_eq!(publisher.pending(), 1);
    }

    #[tokio::test]
    async fn test_mock_publisher_empty_publish_is_not_a_cycle() {
        let publisher = MockPublisher::new();

        publisher.publish().await.unwrap();

        assert_eq!(publisher.publish_calls(), 1);
        assert_eq!(publisher.cycles(), 0);
    }

    #[tokio::test]
    async fn test_mock_transport_counts_connections() {
        let transport = MockTransport::new();
        let mut connection = transport.connect().await.unwrap();
        connection.close().await.unwrap();

        assert_eq!(transport.connections_opened(), 1);
        assert_eq!(transport.connections_closed(), 1);
        assert!(connection.is_closed());
    }

    #[tokio::test]
    async fn test_mock_transport_refuses_connection() {
        let transport = MockTransport::new().fail_at(FailAt::Connect);
        assert!(matches!(
            transport.connect().await,
            Err(BusError::Connection(_))
        ));
    }
}

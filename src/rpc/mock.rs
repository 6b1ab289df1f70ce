//! In-memory RPC transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{Reply, Result, RpcError, RpcSession, RpcTransport};
use crate::bus::{ExchangeConfig, MessageProperties, OutboundMessage};

/// Produces the replies delivered for one request.
pub type Responder =
    Arc<dyn Fn(&OutboundMessage, &MessageProperties) -> Vec<Reply> + Send + Sync>;

/// A request seen by the mock broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub exchange: String,
    pub message: OutboundMessage,
    pub properties: MessageProperties,
}

#[derive(Default)]
struct RpcState {
    responder: Option<Responder>,
    requests: Vec<RecordedRequest>,
    declared: Vec<ExchangeConfig>,
    fail_open: bool,
    fail_publish: bool,
    end_consumer: bool,
    broken: bool,
    sessions_opened: usize,
    sessions_closed: usize,
}

fn lock(state: &Mutex<RpcState>) -> MutexGuard<'_, RpcState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fake broker answering RPC requests from a scripted responder.
///
/// Without a responder requests are never answered, so calls run into the
/// response timeout.
#[derive(Clone, Default)]
pub struct MockRpcTransport {
    state: Arc<Mutex<RpcState>>,
}

impl MockRpcTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond_with<F>(self, responder: F) -> Self
    where
        F: Fn(&OutboundMessage, &MessageProperties) -> Vec<Reply> + Send + Sync + 'static,
    {
        lock(&self.state).responder = Some(Arc::new(responder));
        self
    }

    /// Answer every request with `body` under the request's correlation id.
    pub fn replying(self, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        self.respond_with(move |_, properties| {
            vec![Reply {
                correlation_id: properties.correlation_id.clone(),
                body: body.clone(),
            }]
        })
    }

    pub fn fail_open(self) -> Self {
        lock(&self.state).fail_open = true;
        self
    }

    pub fn fail_publish(&self, fail: bool) {
        lock(&self.state).fail_publish = fail;
    }

    /// Make the reply consumer end once its inbox is drained.
    pub fn end_consumer(&self) {
        lock(&self.state).end_consumer = true;
    }

    /// Simulate the broker dropping every open session.
    pub fn break_sessions(&self) {
        lock(&self.state).broken = true;
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.state).requests.clone()
    }

    pub fn declared(&self) -> Vec<ExchangeConfig> {
        lock(&self.state).declared.clone()
    }

    pub fn sessions_opened(&self) -> usize {
        lock(&self.state).sessions_opened
    }

    pub fn sessions_closed(&self) -> usize {
        lock(&self.state).sessions_closed
    }
}

#[async_trait]
impl RpcTransport for MockRpcTransport {
    async fn open(&self, exchange: &ExchangeConfig) -> Result<Box<dyn RpcSession>> {
        let mut state = lock(&self.state);
        if state.fail_open {
            return Err(RpcError::Connection("Mock connection refused".to_string()));
        }
        state.broken = false;
        state.sessions_opened += 1;
        state.declared.push(exchange.clone());
        let reply_queue = format!("amq.gen-mock-{}", state.sessions_opened);
        Ok(Box::new(MockRpcSession {
            transport: self.clone(),
            reply_queue,
            inbox: VecDeque::new(),
            open: true,
        }))
    }
}

struct MockRpcSession {
    transport: MockRpcTransport,
    reply_queue: String,
    inbox: VecDeque<Reply>,
    open: bool,
}

#[async_trait]
impl RpcSession for MockRpcSession {
    fn reply_queue(&self) -> &str {
        &self.reply_queue
    }

    fn is_open(&self) -> bool {
        self.open && !lock(&self.transport.state).broken
    }

    async fn publish(
        &mut self,
        exchange: &str,
        message: &OutboundMessage,
        properties: MessageProperties,
    ) -> Result<()> {
        let responder = {
            let mut state = lock(&self.transport.state);
            if state.fail_publish {
                return Err(RpcError::Transport("Mock channel closed".to_string()));
            }
            state.requests.push(RecordedRequest {
                exchange: exchange.to_string(),
                message: message.clone(),
                properties: properties.clone(),
            });
            state.responder.clone()
        };
        if let Some(responder) = responder {
            self.inbox.extend(responder(message, &properties));
        }
        Ok(())
    }

    async fn next_reply(&mut self) -> Option<Result<Reply>> {
        if let Some(reply) = self.inbox.pop_front() {
            return Some(Ok(reply));
        }
        if lock(&self.transport.state).end_consumer {
            return None;
        }
        futures::future::pending().await
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;
        lock(&self.transport.state).sessions_closed += 1;
        Ok(())
    }
}

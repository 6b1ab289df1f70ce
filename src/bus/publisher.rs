//! Buffered publisher that opens a fresh broker connection per flush.
//!
//! No connection is held between `publish()` calls. Each call runs one
//! [`PublishCycle`] to completion: connect, open channel, declare exchange,
//! publish every buffered message, close.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::state::{CycleAction, CycleEvent, PublishCycle};
use super::transport::{BrokerChannel, BrokerConnection, BrokerTransport, MessageProperties};
use super::{ExchangeConfig, OutboundMessage, Publisher, Result, APP_ID};

/// Publisher driving a [`PublishCycle`] against a [`BrokerTransport`].
pub struct AsyncPublisher<T> {
    transport: T,
    exchange: ExchangeConfig,
    queue: Mutex<VecDeque<OutboundMessage>>,
    // Serializes cycles so one publisher never runs two connections at once.
    cycle_lock: tokio::sync::Mutex<()>,
}

/// Connection and channel owned by a single cycle.
#[derive(Default)]
struct CycleResources {
    connection: Option<Box<dyn BrokerConnection>>,
    channel: Option<Box<dyn BrokerChannel>>,
}

impl<T: BrokerTransport> AsyncPublisher<T> {
    pub fn new(transport: T, exchange: ExchangeConfig) -> Self {
        Self {
            transport,
            exchange,
            queue: Mutex::new(VecDeque::new()),
            cycle_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn exchange(&self) -> &ExchangeConfig {
        &self.exchange
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn pop_message(&self) -> Option<OutboundMessage> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    async fn perform(&self, action: CycleAction, resources: &mut CycleResources) -> CycleEvent {
        match action {
            CycleAction::OpenConnection => match self.transport.connect().await {
                Ok(connection) => {
                    resources.connection = Some(connection);
                    CycleEvent::ConnectionOpened
                }
                Err(e) => CycleEvent::ConnectionOpenFailed(e),
            },
            CycleAction::OpenChannel => {
                let Some(connection) = resources.connection.as_mut() else {
                    return CycleEvent::Interrupted(super::BusError::Closed(
                        "no connection to open a channel on".to_string(),
                    ));
                };
                match connection.open_channel().await {
                    Ok(channel) => {
                        resources.channel = Some(channel);
                        CycleEvent::ChannelOpened
                    }
                    Err(e) => CycleEvent::Interrupted(e),
                }
            }
            CycleAction::DeclareExchange => {
                let Some(channel) = resources.channel.as_mut() else {
                    return CycleEvent::Interrupted(super::BusError::Closed(
                        "channel closed before exchange declaration".to_string(),
                    ));
                };
                match channel.declare_exchange(&self.exchange).await {
                    Ok(()) => CycleEvent::ExchangeDeclared,
                    Err(e) => CycleEvent::Interrupted(e),
                }
            }
            CycleAction::Flush => match resources.channel.as_mut() {
                Some(channel) => match self.flush(channel.as_mut()).await {
                    Ok(()) => CycleEvent::Flushed,
                    Err(e) => CycleEvent::Interrupted(e),
                },
                None => CycleEvent::Interrupted(super::BusError::Closed(
                    "channel closed before flush".to_string(),
                )),
            },
            CycleAction::Close => match Self::close(resources).await {
                Ok(()) => CycleEvent::ConnectionClosed,
                Err(e) => CycleEvent::Interrupted(e),
            },
            // Stop is handled by the caller; reaching here is a driver bug.
            CycleAction::Stop => CycleEvent::ConnectionClosed,
        }
    }

    /// Publish buffered messages in FIFO order.
    ///
    /// Messages leave the buffer one at a time as they are handed to the
    /// channel, so anything not yet sent when the channel fails stays queued
    /// for the next cycle.
    async fn flush(&self, channel: &mut dyn BrokerChannel) -> Result<()> {
        if !channel.is_open() {
            return Err(super::BusError::Closed(
                "channel is not open".to_string(),
            ));
        }

        let properties = MessageProperties::default().with_app_id(APP_ID);
        let mut sent = 0usize;
        while let Some(message) = self.pop_message() {
            channel
                .publish(&self.exchange.name, &message, &properties)
                .await?;
            debug!(
                exchange = %self.exchange.name,
                routing_key = %message.routing_key,
                "Published message"
            );
            sent += 1;
        }
        debug!(exchange = %self.exchange.name, count = sent, "Flushed buffer");
        Ok(())
    }

    /// Best-effort teardown of whatever the cycle still holds open.
    async fn close(resources: &mut CycleResources) -> Result<()> {
        if let Some(mut channel) = resources.channel.take() {
            if channel.is_open() {
                if let Err(e) = channel.close().await {
                    warn!(error = %e, "Failed to close channel");
                }
            }
        }
        match resources.connection.take() {
            Some(mut connection) if !connection.is_closed() => connection.close().await,
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl<T: BrokerTransport> Publisher for AsyncPublisher<T> {
    fn add_message(&self, message: OutboundMessage) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(message);
    }

    #[tracing::instrument(name = "bus.publish", skip_all, fields(exchange = %self.exchange.name))]
    async fn publish(&self) -> Result<()> {
        let _cycle = self.cycle_lock.lock().await;

        if self.pending() == 0 {
            debug!("Nothing to publish");
            return Ok(());
        }

        let mut cycle = PublishCycle::new(self.exchange.name.clone());
        let mut resources = CycleResources::default();
        let mut action = cycle.start();

        while action != CycleAction::Stop {
            let event = self.perform(action, &mut resources).await;
            action = cycle.handle(event);
        }

        // A cycle can stop before its close step ran (e.g. open failure after
        // a partially established connection); never leak the socket.
        if resources.connection.is_some() || resources.channel.is_some() {
            if let Err(e) = Self::close(&mut resources).await {
                warn!(error = %e, "Failed to release connection after cycle");
            }
        }

        cycle.finish()
    }

    fn pending(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

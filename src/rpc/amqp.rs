//! AMQP (RabbitMQ) RPC transport.
//!
//! Each session owns a connection, one channel, and an exclusive
//! server-named reply queue consumed with auto-ack.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::{BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel, Connection, ConnectionProperties, Consumer,
};
use tracing::debug;

use super::{Reply, Result, RpcError, RpcSession, RpcTransport};
use crate::bus::amqp::{basic_properties, declare_exchange, REPLY_SUCCESS};
use crate::bus::{ExchangeConfig, MessageProperties, OutboundMessage};
use crate::config::AmqpConfig;

/// Transport opening one lapin connection per RPC scope.
#[derive(Clone, Debug)]
pub struct AmqpRpcTransport {
    url: String,
}

impl AmqpRpcTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn from_config(config: &AmqpConfig) -> Self {
        Self::new(config.connection_url())
    }
}

#[async_trait]
impl RpcTransport for AmqpRpcTransport {
    async fn open(&self, exchange: &ExchangeConfig) -> Result<Box<dyn RpcSession>> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| RpcError::Connection(format!("Failed to connect: {}", e)))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| RpcError::Connection(format!("Failed to create channel: {}", e)))?;

        declare_exchange(&channel, exchange)
            .await
            .map_err(|e| RpcError::Connection(format!("Failed to declare exchange: {}", e)))?;

        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| RpcError::Connection(format!("Failed to declare reply queue: {}", e)))?;
        let reply_queue = queue.name().as_str().to_string();

        let consumer = channel
            .basic_consume(
                &reply_queue,
                "",
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| RpcError::Connection(format!("Failed to consume reply queue: {}", e)))?;

        debug!(reply_queue = %reply_queue, "Consuming reply queue");

        Ok(Box::new(AmqpRpcSession {
            connection,
            channel,
            consumer,
            reply_queue,
        }))
    }
}

struct AmqpRpcSession {
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
    reply_queue: String,
}

#[async_trait]
impl RpcSession for AmqpRpcSession {
    fn reply_queue(&self) -> &str {
        &self.reply_queue
    }

    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    async fn publish(
        &mut self,
        exchange: &str,
        message: &OutboundMessage,
        properties: MessageProperties,
    ) -> Result<()> {
        let _confirm = self
            .channel
            .basic_publish(
                exchange,
                &message.routing_key,
                BasicPublishOptions::default(),
                &message.body,
                basic_properties(&properties),
            )
            .await
            .map_err(|e| RpcError::Transport(format!("Failed to publish request: {}", e)))?;
        Ok(())
    }

    async fn next_reply(&mut self) -> Option<Result<Reply>> {
        let delivery = self.consumer.next().await?;
        Some(
            delivery
                .map(|mut delivery| Reply {
                    correlation_id: delivery
                        .properties
                        .correlation_id()
                        .as_ref()
                        .map(|id| id.as_str().to_string()),
                    body: std::mem::take(&mut delivery.data),
                })
                .map_err(|e| RpcError::Transport(format!("Reply delivery failed: {}", e))),
        )
    }

    async fn close(&mut self) -> Result<()> {
        self.connection
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|e| RpcError::Connection(format!("Failed to close connection: {}", e)))
    }
}

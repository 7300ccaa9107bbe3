//! # RabbitMQ Broker
//!
//! [`MessageBroker`] over AMQP 0.9.1 using the `lapin` crate.
//!
//! All operations share the channel held by the [`ConnectionManager`], which
//! reconnects transparently when the channel is found closed. Publisher confirms
//! are enabled on that channel, so `publish` reports whether the broker accepted
//! the message.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use report_queue::config::QueueConfig;
//! use report_queue::messaging::MessageBroker;
//! use report_queue::messaging::providers::RabbitMqBroker;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = RabbitMqBroker::new(Arc::new(QueueConfig::load()?));
//! let ready = broker.message_count("report-generation").await?;
//! println!("{ready} jobs waiting");
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicGetOptions,
    BasicNackOptions, BasicPublishOptions, BasicQosOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions, QueuePurgeOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::BasicProperties;
use tracing::{debug, warn};

use crate::config::QueueConfig;
use crate::constants::amqp;
use crate::error::{QueueError, QueueResult};
use crate::messaging::broker::{
    DeliveryAcker, DeliveryStream, ExchangeKind, MessageBroker, MessageProperties,
    QueueArguments, RawDelivery,
};
use crate::messaging::connection::ConnectionManager;

pub(crate) async fn rabbitmq_ack(acker: &Acker, delivery_tag: u64) -> QueueResult<()> {
    acker
        .ack(BasicAckOptions { multiple: false })
        .await
        .map_err(|e| {
            QueueError::acknowledge(delivery_tag, format!("Failed to acknowledge message: {e}"))
        })
}

pub(crate) async fn rabbitmq_nack(
    acker: &Acker,
    delivery_tag: u64,
    requeue: bool,
) -> QueueResult<()> {
    acker
        .nack(BasicNackOptions {
            multiple: false,
            requeue,
        })
        .await
        .map_err(|e| QueueError::acknowledge(delivery_tag, format!("Failed to nack message: {e}")))
}

fn queue_arguments_table(arguments: &QueueArguments) -> FieldTable {
    let mut table = FieldTable::default();
    if let Some(exchange) = &arguments.dead_letter_exchange {
        table.insert(
            amqp::DEAD_LETTER_EXCHANGE_ARG.into(),
            AMQPValue::LongString(exchange.clone().into()),
        );
    }
    if let Some(routing_key) = &arguments.dead_letter_routing_key {
        table.insert(
            amqp::DEAD_LETTER_ROUTING_KEY_ARG.into(),
            AMQPValue::LongString(routing_key.clone().into()),
        );
    }
    if let Some(max_priority) = arguments.max_priority {
        table.insert(
            amqp::MAX_PRIORITY_ARG.into(),
            AMQPValue::ShortShortUInt(max_priority),
        );
    }
    if let Some(max_length) = arguments.max_length {
        table.insert(amqp::MAX_LENGTH_ARG.into(), AMQPValue::LongUInt(max_length));
    }
    if let Some(ttl) = arguments.message_ttl_ms {
        table.insert(amqp::MESSAGE_TTL_ARG.into(), AMQPValue::LongUInt(ttl));
    }
    table
}

fn to_basic_properties(properties: &MessageProperties) -> BasicProperties {
    let mut basic = BasicProperties::default();
    if properties.persistent {
        basic = basic.with_delivery_mode(amqp::DELIVERY_MODE_PERSISTENT);
    }
    if let Some(content_type) = &properties.content_type {
        basic = basic.with_content_type(content_type.clone().into());
    }
    if let Some(message_id) = &properties.message_id {
        basic = basic.with_message_id(message_id.clone().into());
    }
    if let Some(timestamp) = properties.timestamp {
        basic = basic.with_timestamp(timestamp);
    }
    if let Some(priority) = properties.priority {
        basic = basic.with_priority(priority);
    }
    if let Some(expiration) = &properties.expiration {
        basic = basic.with_expiration(expiration.clone().into());
    }
    basic
}

fn from_basic_properties(basic: &BasicProperties) -> MessageProperties {
    MessageProperties {
        message_id: basic.message_id().as_ref().map(|s| s.as_str().to_string()),
        content_type: basic.content_type().as_ref().map(|s| s.as_str().to_string()),
        timestamp: *basic.timestamp(),
        priority: *basic.priority(),
        expiration: basic.expiration().as_ref().map(|s| s.as_str().to_string()),
        persistent: *basic.delivery_mode() == Some(amqp::DELIVERY_MODE_PERSISTENT),
    }
}

fn to_raw_delivery(delivery: lapin::message::Delivery) -> RawDelivery {
    RawDelivery {
        delivery_tag: delivery.delivery_tag,
        properties: from_basic_properties(&delivery.properties),
        redelivered: delivery.redelivered,
        body: delivery.data,
        acker: DeliveryAcker::RabbitMq {
            acker: delivery.acker,
            delivery_tag: delivery.delivery_tag,
        },
    }
}

/// RabbitMQ-backed [`MessageBroker`]
#[derive(Debug)]
pub struct RabbitMqBroker {
    connections: ConnectionManager,
}

impl RabbitMqBroker {
    /// Create the broker without connecting; the first operation connects
    pub fn new(config: Arc<QueueConfig>) -> Self {
        Self {
            connections: ConnectionManager::new(config),
        }
    }

    /// Create the broker and establish the connection eagerly
    pub async fn connect(config: Arc<QueueConfig>) -> QueueResult<Self> {
        let broker = Self::new(config);
        broker.connections.get_channel().await?;
        Ok(broker)
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }
}

#[async_trait]
impl MessageBroker for RabbitMqBroker {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> QueueResult<()> {
        let channel = self.connections.get_channel().await?;
        let lapin_kind = match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        };

        channel
            .exchange_declare(
                name,
                lapin_kind,
                ExchangeDeclareOptions {
                    durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::topology(name, format!("Exchange declaration failed: {e}")))
    }

    async fn declare_queue(&self, name: &str, arguments: &QueueArguments) -> QueueResult<()> {
        let channel = self.connections.get_channel().await?;

        channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                queue_arguments_table(arguments),
            )
            .await
            .map_err(|e| QueueError::topology(name, format!("Queue declaration failed: {e}")))?;

        debug!(queue = %name, "Queue declared");
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> QueueResult<()> {
        let channel = self.connections.get_channel().await?;

        channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::topology(queue, format!("Queue binding failed: {e}")))
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: &MessageProperties,
    ) -> QueueResult<bool> {
        let channel = self.connections.get_channel().await?;

        let confirm = channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                to_basic_properties(properties),
            )
            .await
            .map_err(|e| QueueError::publish(routing_key, format!("Publish failed: {e}")))?;

        let confirmation = confirm.await.map_err(|e| {
            QueueError::publish(routing_key, format!("Publish confirmation failed: {e}"))
        })?;

        if confirmation.is_nack() {
            warn!(exchange = %exchange, routing_key = %routing_key, "Broker refused publish");
            return Ok(false);
        }
        Ok(true)
    }

    async fn get(&self, queue: &str) -> QueueResult<Option<RawDelivery>> {
        let channel = self.connections.get_channel().await?;

        let message = channel
            .basic_get(queue, BasicGetOptions { no_ack: false })
            .await
            .map_err(|e| QueueError::consume(queue, format!("basic_get failed: {e}")))?;

        Ok(message.map(|m| to_raw_delivery(m.delivery)))
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        prefetch: u16,
    ) -> QueueResult<DeliveryStream> {
        let channel = self.connections.get_channel().await?;

        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| QueueError::consume(queue, format!("Failed to set prefetch count: {e}")))?;

        let consumer = channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::consume(queue, format!("Failed to start consumer: {e}")))?;

        let queue_name = queue.to_string();
        let stream = consumer.map(move |result| {
            result
                .map(to_raw_delivery)
                .map_err(|e| QueueError::consume(&queue_name, format!("Delivery failed: {e}")))
        });

        Ok(Box::pin(stream))
    }

    async fn cancel(&self, consumer_tag: &str) -> QueueResult<()> {
        let channel = self.connections.get_channel().await?;

        channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(|e| {
                QueueError::consume(consumer_tag, format!("Failed to cancel consumer: {e}"))
            })
    }

    async fn purge(&self, queue: &str) -> QueueResult<u32> {
        let channel = self.connections.get_channel().await?;

        channel
            .queue_purge(queue, QueuePurgeOptions::default())
            .await
            .map_err(|e| QueueError::consume(queue, format!("Queue purge failed: {e}")))
    }

    async fn message_count(&self, queue: &str) -> QueueResult<u32> {
        let channel = self.connections.get_channel().await?;

        // Passive declare reports the ready count without touching arguments.
        let state = channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::queue_not_found(format!("{queue}: {e}")))?;

        Ok(state.message_count())
    }

    async fn health_check(&self) -> QueueResult<bool> {
        Ok(self.connections.is_connected().await)
    }

    async fn close(&self) -> QueueResult<()> {
        self.connections.close().await
    }

    fn provider_name(&self) -> &'static str {
        "rabbitmq"
    }
}

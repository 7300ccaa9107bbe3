//! # Broker Abstraction
//!
//! The AMQP primitives the report queue needs, expressed as one provider-agnostic
//! trait. Implementations live in [`crate::messaging::providers`]; callers go
//! through the [`crate::messaging::BrokerProvider`] enum.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::QueueResult;
use crate::messaging::providers::InMemoryAcker;

/// Exchange routing behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    /// Route on exact routing key match
    Direct,
    /// Route to every bound queue
    Fanout,
}

/// Queue declaration arguments (`x-*` arguments on the wire)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueArguments {
    pub dead_letter_exchange: Option<String>,
    pub dead_letter_routing_key: Option<String>,
    pub max_priority: Option<u8>,
    pub max_length: Option<u32>,
    pub message_ttl_ms: Option<u32>,
}

impl QueueArguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route rejected, expired and overflowed messages to `exchange`
    pub fn with_dead_letter(
        mut self,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        self.dead_letter_exchange = Some(exchange.into());
        self.dead_letter_routing_key = Some(routing_key.into());
        self
    }

    pub fn with_max_priority(mut self, max_priority: u8) -> Self {
        self.max_priority = Some(max_priority);
        self
    }

    pub fn with_max_length(mut self, max_length: Option<u32>) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_message_ttl_ms(mut self, ttl_ms: u32) -> Self {
        self.message_ttl_ms = Some(ttl_ms);
        self
    }
}

/// Basic properties attached to a published message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    pub message_id: Option<String>,
    pub content_type: Option<String>,
    /// Seconds since the Unix epoch (AMQP timestamp resolution)
    pub timestamp: Option<u64>,
    pub priority: Option<u8>,
    /// Per-message TTL in milliseconds, string-encoded as AMQP requires
    pub expiration: Option<String>,
    pub persistent: bool,
}

impl MessageProperties {
    /// Parsed per-message TTL in milliseconds
    pub fn expiration_ms(&self) -> Option<u64> {
        self.expiration.as_deref().and_then(|e| e.parse().ok())
    }
}

/// A message handed out by the broker, not yet acknowledged
#[derive(Debug)]
pub struct RawDelivery {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    pub properties: MessageProperties,
    pub redelivered: bool,
    pub acker: DeliveryAcker,
}

/// Acknowledgement handle bound to one delivery
#[derive(Debug, Clone)]
pub enum DeliveryAcker {
    RabbitMq {
        acker: lapin::acker::Acker,
        delivery_tag: u64,
    },
    InMemory(InMemoryAcker),
}

impl DeliveryAcker {
    /// Broker-assigned tag of the delivery this handle settles
    pub fn delivery_tag(&self) -> u64 {
        match self {
            Self::RabbitMq { delivery_tag, .. } => *delivery_tag,
            Self::InMemory(acker) => acker.delivery_tag(),
        }
    }

    /// Remove the message from its queue
    pub async fn ack(&self) -> QueueResult<()> {
        match self {
            Self::RabbitMq {
                acker,
                delivery_tag,
            } => crate::messaging::providers::rabbitmq_ack(acker, *delivery_tag).await,
            Self::InMemory(acker) => acker.ack(),
        }
    }

    /// Reject the message; `requeue = false` dead-letters it
    pub async fn nack(&self, requeue: bool) -> QueueResult<()> {
        match self {
            Self::RabbitMq {
                acker,
                delivery_tag,
            } => {
                crate::messaging::providers::rabbitmq_nack(acker, *delivery_tag, requeue).await
            }
            Self::InMemory(acker) => acker.nack(requeue),
        }
    }
}

/// Push-delivery stream produced by a consumer subscription
///
/// The stream ends when the subscription is cancelled or the channel is lost.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = QueueResult<RawDelivery>> + Send>>;

/// Broker operations used by the queue layer
///
/// Declarations are idempotent. `publish` returns `false` when the broker refused
/// the message (publisher-confirm nack); callers treat that as transient.
#[async_trait]
pub trait MessageBroker: Send + Sync + 'static {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> QueueResult<()>;

    async fn declare_queue(&self, name: &str, arguments: &QueueArguments) -> QueueResult<()>;

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str)
        -> QueueResult<()>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: &MessageProperties,
    ) -> QueueResult<bool>;

    /// Fetch a single message with manual acknowledgement
    async fn get(&self, queue: &str) -> QueueResult<Option<RawDelivery>>;

    /// Subscribe to `queue` with at most `prefetch` unacknowledged deliveries
    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        prefetch: u16,
    ) -> QueueResult<DeliveryStream>;

    /// Stop deliveries to `consumer_tag`; in-flight deliveries stay valid
    async fn cancel(&self, consumer_tag: &str) -> QueueResult<()>;

    /// Remove all ready messages, returning how many were removed
    async fn purge(&self, queue: &str) -> QueueResult<u32>;

    /// Number of ready messages
    async fn message_count(&self, queue: &str) -> QueueResult<u32>;

    async fn health_check(&self) -> QueueResult<bool>;

    async fn close(&self) -> QueueResult<()>;

    fn provider_name(&self) -> &'static str;
}

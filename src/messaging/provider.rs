//! # Broker Provider Enum
//!
//! Enum dispatch over the broker providers, avoiding trait object overhead on the
//! publish and consume paths.

use super::broker::{
    DeliveryStream, ExchangeKind, MessageBroker, MessageProperties, QueueArguments, RawDelivery,
};
use super::providers::{InMemoryBroker, RabbitMqBroker};
use crate::error::QueueResult;

/// Provider enum for static dispatch
///
/// # Variants
///
/// - `RabbitMq` - AMQP 0.9.1 via lapin
/// - `InMemory` - in-process broker for tests and local development
///
/// # Example
///
/// ```rust
/// use report_queue::messaging::{BrokerProvider, InMemoryBroker};
///
/// let provider = BrokerProvider::InMemory(InMemoryBroker::new());
/// assert_eq!(provider.provider_name(), "in_memory");
/// ```
#[derive(Debug)]
pub enum BrokerProvider {
    RabbitMq(RabbitMqBroker),
    InMemory(InMemoryBroker),
}

impl BrokerProvider {
    /// Provider name for logging
    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::RabbitMq(b) => b.provider_name(),
            Self::InMemory(b) => b.provider_name(),
        }
    }

    /// The in-memory broker, when that is the active provider
    pub fn as_in_memory(&self) -> Option<&InMemoryBroker> {
        match self {
            Self::InMemory(b) => Some(b),
            Self::RabbitMq(_) => None,
        }
    }

    pub async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> QueueResult<()> {
        match self {
            Self::RabbitMq(b) => b.declare_exchange(name, kind, durable).await,
            Self::InMemory(b) => b.declare_exchange(name, kind, durable).await,
        }
    }

    pub async fn declare_queue(&self, name: &str, arguments: &QueueArguments) -> QueueResult<()> {
        match self {
            Self::RabbitMq(b) => b.declare_queue(name, arguments).await,
            Self::InMemory(b) => b.declare_queue(name, arguments).await,
        }
    }

    pub async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> QueueResult<()> {
        match self {
            Self::RabbitMq(b) => b.bind_queue(queue, exchange, routing_key).await,
            Self::InMemory(b) => b.bind_queue(queue, exchange, routing_key).await,
        }
    }

    /// Publish; `Ok(false)` means the broker refused the message
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: &MessageProperties,
    ) -> QueueResult<bool> {
        match self {
            Self::RabbitMq(b) => b.publish(exchange, routing_key, body, properties).await,
            Self::InMemory(b) => b.publish(exchange, routing_key, body, properties).await,
        }
    }

    pub async fn get(&self, queue: &str) -> QueueResult<Option<RawDelivery>> {
        match self {
            Self::RabbitMq(b) => b.get(queue).await,
            Self::InMemory(b) => b.get(queue).await,
        }
    }

    pub async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        prefetch: u16,
    ) -> QueueResult<DeliveryStream> {
        match self {
            Self::RabbitMq(b) => b.consume(queue, consumer_tag, prefetch).await,
            Self::InMemory(b) => b.consume(queue, consumer_tag, prefetch).await,
        }
    }

    pub async fn cancel(&self, consumer_tag: &str) -> QueueResult<()> {
        match self {
            Self::RabbitMq(b) => b.cancel(consumer_tag).await,
            Self::InMemory(b) => b.cancel(consumer_tag).await,
        }
    }

    pub async fn purge(&self, queue: &str) -> QueueResult<u32> {
        match self {
            Self::RabbitMq(b) => b.purge(queue).await,
            Self::InMemory(b) => b.purge(queue).await,
        }
    }

    pub async fn message_count(&self, queue: &str) -> QueueResult<u32> {
        match self {
            Self::RabbitMq(b) => b.message_count(queue).await,
            Self::InMemory(b) => b.message_count(queue).await,
        }
    }

    pub async fn health_check(&self) -> QueueResult<bool> {
        match self {
            Self::RabbitMq(b) => b.health_check().await,
            Self::InMemory(b) => b.health_check().await,
        }
    }

    pub async fn close(&self) -> QueueResult<()> {
        match self {
            Self::RabbitMq(b) => b.close().await,
            Self::InMemory(b) => b.close().await,
        }
    }
}

impl From<InMemoryBroker> for BrokerProvider {
    fn from(broker: InMemoryBroker) -> Self {
        Self::InMemory(broker)
    }
}

impl From<RabbitMqBroker> for BrokerProvider {
    fn from(broker: RabbitMqBroker) -> Self {
        Self::RabbitMq(broker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatch_reaches_in_memory_broker() {
        let provider = BrokerProvider::from(InMemoryBroker::new());
        provider
            .declare_queue("q", &QueueArguments::new())
            .await
            .unwrap();
        assert!(provider
            .publish("", "q", b"{}", &MessageProperties::default())
            .await
            .unwrap());
        assert_eq!(provider.message_count("q").await.unwrap(), 1);
        assert!(provider.as_in_memory().is_some());
        assert!(provider.health_check().await.unwrap());
    }
}

//! # Queue Topology
//!
//! The exchanges, queues and bindings behind the report queue:
//!
//! ```text
//! report-exchange (direct) --[report-generation]--> report-generation
//!                                                     | reject / expire / overflow
//!                                                     v
//! report-dlx (direct) ------[report-generation]--> report-generation-dlq
//! ```
//!
//! Every declaration is durable and idempotent. The dead-letter side is declared
//! first so the work queue's dead-letter arguments always resolve.

use crate::config::QueueConfig;
use crate::error::QueueResult;
use crate::messaging::broker::{ExchangeKind, QueueArguments};
use crate::messaging::provider::BrokerProvider;
use tracing::info;

/// Topology derived from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTopology {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
    pub dead_letter_exchange: String,
    pub dead_letter_queue: String,
    pub max_priority: u8,
    pub max_length: Option<u32>,
}

impl QueueTopology {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            exchange: config.exchange_name.clone(),
            queue: config.queue_name.clone(),
            routing_key: config.routing_key().to_string(),
            dead_letter_exchange: config.dead_letter_exchange_name.clone(),
            dead_letter_queue: config.dead_letter_queue_name.clone(),
            max_priority: config.max_priority,
            max_length: config.max_queue_length,
        }
    }

    /// Arguments for the work queue
    pub fn work_queue_arguments(&self) -> QueueArguments {
        QueueArguments::new()
            .with_dead_letter(&self.dead_letter_exchange, &self.routing_key)
            .with_max_priority(self.max_priority)
            .with_max_length(self.max_length)
    }

    /// Declare everything; safe to call on every start
    pub async fn declare(&self, broker: &BrokerProvider) -> QueueResult<()> {
        broker
            .declare_exchange(&self.dead_letter_exchange, ExchangeKind::Direct, true)
            .await?;
        broker
            .declare_queue(&self.dead_letter_queue, &QueueArguments::new())
            .await?;
        broker
            .bind_queue(
                &self.dead_letter_queue,
                &self.dead_letter_exchange,
                &self.routing_key,
            )
            .await?;

        broker
            .declare_exchange(&self.exchange, ExchangeKind::Direct, true)
            .await?;
        broker
            .declare_queue(&self.queue, &self.work_queue_arguments())
            .await?;
        broker
            .bind_queue(&self.queue, &self.exchange, &self.routing_key)
            .await?;

        info!(
            exchange = %self.exchange,
            queue = %self.queue,
            dead_letter_exchange = %self.dead_letter_exchange,
            dead_letter_queue = %self.dead_letter_queue,
            provider = broker.provider_name(),
            "Queue topology declared"
        );
        Ok(())
    }
}

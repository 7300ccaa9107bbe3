//! # Job Producer
//!
//! Publishes report jobs to the work exchange. Every message is persistent JSON,
//! stamped with its job ID as the broker message ID, and carries a priority.
//! The producer does not retry: a refused or failed publish goes back to the caller.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::QueueConfig;
use crate::constants::amqp::CONTENT_TYPE_JSON;
use crate::error::QueueResult;
use crate::logging::log_queue_operation;
use crate::messaging::broker::MessageProperties;
use crate::messaging::codec::encode_job;
use crate::messaging::job::JobMessage;
use crate::messaging::monitor::QueueMetrics;
use crate::messaging::provider::BrokerProvider;

/// Per-publish overrides
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Replaces `job.priority` for this publish
    pub priority: Option<u8>,
    /// Per-message TTL; expired jobs are dead-lettered
    pub expiration_ms: Option<u64>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_expiration_ms(mut self, expiration_ms: u64) -> Self {
        self.expiration_ms = Some(expiration_ms);
        self
    }
}

/// Broker properties for publishing `job`
pub fn publish_properties(job: &JobMessage, options: &EnqueueOptions) -> MessageProperties {
    MessageProperties {
        message_id: Some(job.job_id.clone()),
        content_type: Some(CONTENT_TYPE_JSON.to_string()),
        timestamp: Some(u64::try_from(Utc::now().timestamp()).unwrap_or_default()),
        priority: Some(options.priority.unwrap_or(job.priority)),
        expiration: options.expiration_ms.map(|ms| ms.to_string()),
        persistent: true,
    }
}

/// Enqueue side of the report queue
#[derive(Debug, Clone)]
pub struct JobProducer {
    broker: Arc<BrokerProvider>,
    config: Arc<QueueConfig>,
    metrics: Arc<QueueMetrics>,
}

impl JobProducer {
    pub fn new(
        broker: Arc<BrokerProvider>,
        config: Arc<QueueConfig>,
        metrics: Arc<QueueMetrics>,
    ) -> Self {
        Self {
            broker,
            config,
            metrics,
        }
    }

    /// Publish a job to the work queue
    ///
    /// `Ok(false)` means the broker refused the message; treat it as transient and
    /// retry the publish if appropriate.
    pub async fn enqueue(&self, job: &JobMessage, options: &EnqueueOptions) -> QueueResult<bool> {
        let body = encode_job(job)?;
        let properties = publish_properties(job, options);

        let accepted = self
            .broker
            .publish(
                &self.config.exchange_name,
                self.config.routing_key(),
                &body,
                &properties,
            )
            .await?;

        if accepted {
            self.metrics.record_published();
            debug!(
                job_id = %job.job_id,
                priority = ?properties.priority,
                expiration = ?properties.expiration,
                "Job published"
            );
            log_queue_operation(
                "enqueue",
                Some(&job.job_id),
                &self.config.queue_name,
                "accepted",
                None,
            );
        } else {
            self.metrics.record_publish_refused();
            warn!(
                job_id = %job.job_id,
                queue = %self.config.queue_name,
                "Broker refused job publish"
            );
            log_queue_operation(
                "enqueue",
                Some(&job.job_id),
                &self.config.queue_name,
                "refused",
                Some("publisher confirm nack"),
            );
        }

        Ok(accepted)
    }

    /// Ready messages in the work queue
    pub async fn queue_length(&self) -> QueueResult<u32> {
        self.broker.message_count(&self.config.queue_name).await
    }

    /// Ready messages in the dead-letter queue
    pub async fn dead_letter_queue_length(&self) -> QueueResult<u32> {
        self.broker
            .message_count(&self.config.dead_letter_queue_name)
            .await
    }
}

//! # Queue Observability
//!
//! Read-only depth queries for the work and dead-letter queues, a health summary
//! for the service health aggregator, and process-local operation counters.
//! Nothing here mutates queue state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::QueueConfig;
use crate::error::QueueResult;
use crate::messaging::provider::BrokerProvider;

/// Process-local counters for queue operations
#[derive(Debug, Default)]
pub struct QueueMetrics {
    published: AtomicU64,
    publish_refused: AtomicU64,
    acked: AtomicU64,
    nacked_requeue: AtomicU64,
    nacked_dead_letter: AtomicU64,
    decode_failures: AtomicU64,
    handler_failures: AtomicU64,
    dead_letters_retried: AtomicU64,
}

/// Point-in-time copy of [`QueueMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetricsSnapshot {
    pub published: u64,
    pub publish_refused: u64,
    pub acked: u64,
    pub nacked_requeue: u64,
    pub nacked_dead_letter: u64,
    pub decode_failures: u64,
    pub handler_failures: u64,
    pub dead_letters_retried: u64,
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_refused(&self) {
        self.publish_refused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ack(&self) {
        self.acked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_nack(&self, requeue: bool) {
        if requeue {
            self.nacked_requeue.fetch_add(1, Ordering::Relaxed);
        } else {
            self.nacked_dead_letter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_letter_retried(&self) {
        self.dead_letters_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> QueueMetricsSnapshot {
        QueueMetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            publish_refused: self.publish_refused.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            nacked_requeue: self.nacked_requeue.load(Ordering::Relaxed),
            nacked_dead_letter: self.nacked_dead_letter.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            dead_letters_retried: self.dead_letters_retried.load(Ordering::Relaxed),
        }
    }
}

/// Ready-message counts for both queues
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepths {
    pub queue: String,
    pub queue_length: u32,
    pub dead_letter_queue: String,
    pub dead_letter_queue_length: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueHealthStatus {
    Healthy,
    /// Dead-letter depth above the warning threshold; still serving
    Degraded,
    /// Broker could not be queried
    Unhealthy,
}

/// Health summary handed to the service health aggregator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueHealth {
    pub status: QueueHealthStatus,
    pub depths: Option<QueueDepths>,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueueHealth {
    pub fn is_serving(&self) -> bool {
        self.status != QueueHealthStatus::Unhealthy
    }
}

/// Depth and health queries over the configured queues
#[derive(Debug, Clone)]
pub struct QueueMonitor {
    broker: Arc<BrokerProvider>,
    config: Arc<QueueConfig>,
    metrics: Arc<QueueMetrics>,
}

impl QueueMonitor {
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

    pub async fn depths(&self) -> QueueResult<QueueDepths> {
        Ok(QueueDepths {
            queue: self.config.queue_name.clone(),
            queue_length: self.queue_length().await?,
            dead_letter_queue: self.config.dead_letter_queue_name.clone(),
            dead_letter_queue_length: self.dead_letter_queue_length().await?,
        })
    }

    pub async fn health(&self) -> QueueHealth {
        let provider = self.broker.provider_name().to_string();

        match self.depths().await {
            Ok(depths) => {
                let status =
                    if depths.dead_letter_queue_length > self.config.dead_letter_warn_threshold {
                        warn!(
                            dead_letter_queue = %depths.dead_letter_queue,
                            depth = depths.dead_letter_queue_length,
                            threshold = self.config.dead_letter_warn_threshold,
                            "Dead-letter queue depth above threshold"
                        );
                        QueueHealthStatus::Degraded
                    } else {
                        QueueHealthStatus::Healthy
                    };
                QueueHealth {
                    status,
                    depths: Some(depths),
                    provider,
                    error: None,
                }
            }
            Err(e) => QueueHealth {
                status: QueueHealthStatus::Unhealthy,
                depths: None,
                provider,
                error: Some(e.to_string()),
            },
        }
    }

    pub fn metrics(&self) -> QueueMetricsSnapshot {
        self.metrics.snapshot()
    }
}

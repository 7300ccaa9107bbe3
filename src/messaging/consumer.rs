//! # Job Consumer
//!
//! Subscribes to the work queue and drives a [`JobHandler`] for every delivery.
//!
//! ## Per-delivery flow
//!
//! 1. Decode the body. Malformed bodies are rejected without requeue and never
//!    reach the handler.
//! 2. Hand the [`Delivery`] to the handler, which settles it.
//! 3. If the handler errors, panics or returns without settling, reject without
//!    requeue so the prefetch slot is released.
//!
//! Each delivery runs on its own task; the prefetch count bounds how many are in
//! flight. Cancelling a consumer stops new deliveries but lets in-flight handlers
//! finish. A subscription that ends without being cancelled (lost connection) is
//! re-established under the same tag after the reconnect delay.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::{FutureExt, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::logging::log_queue_operation;
use crate::messaging::broker::{DeliveryStream, RawDelivery};
use crate::messaging::codec::decode_job;
use crate::messaging::connection::ReconnectPolicy;
use crate::messaging::delivery::{Delivery, JobHandler};
use crate::messaging::monitor::QueueMetrics;
use crate::messaging::provider::BrokerProvider;

/// Worker side of the report queue
#[derive(Debug, Clone)]
pub struct JobConsumer {
    broker: Arc<BrokerProvider>,
    config: Arc<QueueConfig>,
    metrics: Arc<QueueMetrics>,
    consumers: Arc<DashMap<String, Arc<AtomicBool>>>,
}

impl JobConsumer {
    pub fn new(
        broker: Arc<BrokerProvider>,
        config: Arc<QueueConfig>,
        metrics: Arc<QueueMetrics>,
    ) -> Self {
        Self {
            broker,
            config,
            metrics,
            consumers: Arc::new(DashMap::new()),
        }
    }

    /// Subscribe `handler` to the work queue, returning the consumer tag
    ///
    /// The subscription is established before this returns; deliveries are then
    /// processed in the background.
    pub async fn consume<H: JobHandler>(&self, handler: H) -> QueueResult<String> {
        let tag = format!("{}-{}", self.config.connection_name, Uuid::new_v4());
        let stream = self
            .broker
            .consume(&self.config.queue_name, &tag, self.config.prefetch_count)
            .await?;

        let cancelled = Arc::new(AtomicBool::new(false));
        self.consumers.insert(tag.clone(), Arc::clone(&cancelled));

        let worker = WorkerLoop {
            broker: Arc::clone(&self.broker),
            metrics: Arc::clone(&self.metrics),
            consumers: Arc::clone(&self.consumers),
            handler: Arc::new(handler),
            policy: ReconnectPolicy::from_config(&self.config),
            queue: Arc::from(self.config.queue_name.as_str()),
            prefetch: self.config.prefetch_count,
            tag: tag.clone(),
            cancelled,
        };
        tokio::spawn(worker.run(stream));

        info!(
            consumer_tag = %tag,
            queue = %self.config.queue_name,
            prefetch = self.config.prefetch_count,
            "Consumer started"
        );
        Ok(tag)
    }

    /// Stop deliveries to `consumer_tag`
    ///
    /// Other consumers and the channel are unaffected; in-flight handlers keep
    /// running and settle their deliveries as usual.
    pub async fn cancel_consumer(&self, consumer_tag: &str) -> QueueResult<()> {
        let (_, cancelled) = self
            .consumers
            .remove(consumer_tag)
            .ok_or_else(|| QueueError::consumer_not_found(consumer_tag))?;
        cancelled.store(true, Ordering::Release);

        match self.broker.cancel(consumer_tag).await {
            // Subscription already gone (stream lost, resubscribe pending).
            Ok(()) | Err(QueueError::ConsumerNotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        info!(consumer_tag = %consumer_tag, "Consumer cancelled");
        Ok(())
    }

    pub async fn cancel_all(&self) -> QueueResult<()> {
        for tag in self.active_consumers() {
            match self.cancel_consumer(&tag).await {
                Ok(()) | Err(QueueError::ConsumerNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn active_consumers(&self) -> Vec<String> {
        self.consumers.iter().map(|entry| entry.key().clone()).collect()
    }
}

struct WorkerLoop<H> {
    broker: Arc<BrokerProvider>,
    metrics: Arc<QueueMetrics>,
    consumers: Arc<DashMap<String, Arc<AtomicBool>>>,
    handler: Arc<H>,
    policy: ReconnectPolicy,
    queue: Arc<str>,
    prefetch: u16,
    tag: String,
    cancelled: Arc<AtomicBool>,
}

impl<H: JobHandler> WorkerLoop<H> {
    async fn run(self, mut stream: DeliveryStream) {
        loop {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(raw) => {
                        tokio::spawn(process_delivery(
                            raw,
                            Arc::clone(&self.handler),
                            Arc::clone(&self.queue),
                            Arc::clone(&self.metrics),
                        ));
                    }
                    Err(e) => {
                        warn!(consumer_tag = %self.tag, error = %e, "Delivery stream error");
                    }
                }
            }

            if self.is_cancelled() {
                break;
            }

            warn!(
                consumer_tag = %self.tag,
                queue = %self.queue,
                "Delivery stream ended unexpectedly; resubscribing"
            );
            match self.resubscribe().await {
                Ok(Some(next)) => stream = next,
                Ok(None) => break,
                Err(e) => {
                    error!(
                        consumer_tag = %self.tag,
                        error = %e,
                        "Giving up on consumer after reconnect attempts were exhausted"
                    );
                    self.consumers.remove(&self.tag);
                    break;
                }
            }
        }

        debug!(consumer_tag = %self.tag, "Consumer loop finished");
    }

    /// New stream under the same tag, or `None` if cancelled meanwhile
    async fn resubscribe(&self) -> QueueResult<Option<DeliveryStream>> {
        let stream = self
            .policy
            .retry(true, move |_| async move {
                if self.is_cancelled() {
                    return Ok(None);
                }
                self.broker
                    .consume(&self.queue, &self.tag, self.prefetch)
                    .await
                    .map(Some)
            })
            .await?;

        match stream {
            Some(stream) if self.is_cancelled() => {
                if let Err(e) = self.broker.cancel(&self.tag).await {
                    debug!(consumer_tag = %self.tag, error = %e, "Cancel after resubscribe failed");
                }
                drop(stream);
                Ok(None)
            }
            Some(stream) => {
                info!(consumer_tag = %self.tag, "Consumer resubscribed");
                Ok(Some(stream))
            }
            None => Ok(None),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

async fn process_delivery<H: JobHandler>(
    raw: RawDelivery,
    handler: Arc<H>,
    queue: Arc<str>,
    metrics: Arc<QueueMetrics>,
) {
    let job = match decode_job(&raw.body) {
        Ok(job) => job,
        Err(e) => {
            metrics.record_decode_failure();
            warn!(
                queue = %queue,
                delivery_tag = raw.delivery_tag,
                error = %e,
                "Undecodable message; dead-lettering"
            );
            match raw.acker.nack(false).await {
                Ok(()) => metrics.record_nack(false),
                Err(nack_err) => error!(error = %nack_err, "Failed to reject undecodable message"),
            }
            log_queue_operation("decode", None, &queue, "dead_lettered", Some(&e.to_string()));
            return;
        }
    };

    let job_id = job.job_id.clone();
    let delivery = Delivery::new(
        job,
        raw.delivery_tag,
        raw.redelivered,
        Arc::clone(&queue),
        raw.acker,
        Arc::clone(&metrics),
    );
    let watcher = delivery.clone();

    let failure = match AssertUnwindSafe(handler.handle(delivery)).catch_unwind().await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => {
            metrics.record_handler_failure();
            Some(e.to_string())
        }
        Err(panic) => {
            metrics.record_handler_failure();
            Some(format!("handler panicked: {}", panic_message(panic.as_ref())))
        }
    };

    if watcher.is_settled() {
        if let Some(reason) = failure {
            debug!(job_id = %job_id, reason = %reason, "Handler failed after settling delivery");
        }
        return;
    }

    let reason = failure.unwrap_or_else(|| "handler returned without settling".to_string());
    warn!(job_id = %job_id, reason = %reason, "Unsettled delivery; dead-lettering");
    match watcher.nack(false).await {
        Ok(()) | Err(QueueError::AlreadySettled { .. }) => {}
        Err(e) => error!(job_id = %job_id, error = %e, "Failed to reject unsettled delivery"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::messaging::providers::InMemoryBroker;
    use crate::messaging::topology::QueueTopology;
    use std::time::Duration;

    async fn setup() -> (JobConsumer, InMemoryBroker) {
        let memory = InMemoryBroker::new();
        let config = Arc::new(QueueConfig {
            reconnect_delay_ms: 10,
            max_reconnect_attempts: 50,
            ..Default::default()
        });
        let broker = Arc::new(BrokerProvider::from(memory.clone()));
        QueueTopology::from_config(&config)
            .declare(&broker)
            .await
            .unwrap();
        (
            JobConsumer::new(broker, config, Arc::new(QueueMetrics::new())),
            memory,
        )
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_cancel_consumer_removes_subscription() {
        let (consumer, memory) = setup().await;
        let tag = consumer
            .consume(|delivery: Delivery| async move {
                delivery.ack().await.map_err(|e| HandlerError::transient(e.to_string()))
            })
            .await
            .unwrap();

        assert!(tag.starts_with("report-queue-"));
        assert_eq!(memory.consumer_count("report-generation"), 1);

        consumer.cancel_consumer(&tag).await.unwrap();
        assert_eq!(memory.consumer_count("report-generation"), 0);
        assert!(consumer.active_consumers().is_empty());
        assert!(matches!(
            consumer.cancel_consumer(&tag).await,
            Err(QueueError::ConsumerNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_leaves_other_consumers_running() {
        let (consumer, memory) = setup().await;
        let handler = |delivery: Delivery| async move {
            delivery.ack().await.map_err(|e| HandlerError::transient(e.to_string()))
        };
        let first = consumer.consume(handler).await.unwrap();
        let _second = consumer.consume(handler).await.unwrap();

        consumer.cancel_consumer(&first).await.unwrap();
        assert_eq!(memory.consumer_count("report-generation"), 1);
        assert_eq!(consumer.active_consumers().len(), 1);
    }

    #[tokio::test]
    async fn test_resubscribes_after_connection_loss() {
        let (consumer, memory) = setup().await;
        let tag = consumer
            .consume(|delivery: Delivery| async move {
                delivery.ack().await.map_err(|e| HandlerError::transient(e.to_string()))
            })
            .await
            .unwrap();

        memory.disconnect();
        assert_eq!(memory.consumer_count("report-generation"), 0);
        memory.reconnect();

        wait_until(|| memory.consumer_count("report-generation") == 1).await;
        assert_eq!(consumer.active_consumers(), vec![tag]);
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}

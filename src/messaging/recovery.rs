//! # Dead-Letter Recovery
//!
//! Operator tooling for the dead-letter queue: inspect, purge, and move jobs back
//! to the work queue.
//!
//! ## Retry ordering
//!
//! A retry takes one message from the dead-letter queue with manual ack,
//! republishes it to the work exchange with `retry_count + 1`, and only then
//! acknowledges the dead-letter copy. If the republish fails or is refused the
//! dead-letter copy is put back, so a job is never in zero queues. A crash between
//! republish and ack leaves the job in both queues; the unchanged job ID lets
//! downstream processing deduplicate.
//!
//! A body that does not decode as a job cannot be retried. It is republished
//! unchanged to the dead-letter exchange, which puts it at the tail of the
//! dead-letter queue, and the head copy is acknowledged. Jobs queued behind it
//! stay reachable and the malformed message is still there for inspection.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::logging::log_queue_operation;
use crate::messaging::broker::{MessageProperties, RawDelivery};
use crate::messaging::codec::{decode_job, encode_job};
use crate::messaging::job::JobMessage;
use crate::messaging::monitor::QueueMetrics;
use crate::messaging::producer::{publish_properties, EnqueueOptions};
use crate::messaging::provider::BrokerProvider;

/// A dead-lettered message as seen by [`DeadLetterRecovery::peek`]
#[derive(Debug, Clone, PartialEq)]
pub enum DeadLetterEntry {
    Job(JobMessage),
    /// Body that does not decode as a job
    Undecodable {
        message_id: Option<String>,
        error: String,
        body_len: usize,
    },
}

#[derive(Debug, Clone)]
pub struct DeadLetterRecovery {
    broker: Arc<BrokerProvider>,
    config: Arc<QueueConfig>,
    metrics: Arc<QueueMetrics>,
}

impl DeadLetterRecovery {
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

    /// Remove every ready message from the work queue
    pub async fn purge_queue(&self) -> QueueResult<u32> {
        self.purge(&self.config.queue_name).await
    }

    /// Remove every ready message from the dead-letter queue
    pub async fn purge_dead_letter_queue(&self) -> QueueResult<u32> {
        self.purge(&self.config.dead_letter_queue_name).await
    }

    async fn purge(&self, queue: &str) -> QueueResult<u32> {
        let purged = self.broker.purge(queue).await?;
        warn!(queue = %queue, purged = purged, "Queue purged");
        log_queue_operation("purge", None, queue, "purged", Some(&purged.to_string()));
        Ok(purged)
    }

    /// Move one job from the dead-letter queue back to the work queue
    ///
    /// Returns `false` when the dead-letter queue is empty. A message at the head
    /// that is not a valid job is moved to the tail and reported as an error, so
    /// the next call reaches the message behind it.
    pub async fn retry_dead_letter(&self) -> QueueResult<bool> {
        match self.retry_next().await? {
            RetryOutcome::Empty => Ok(false),
            RetryOutcome::Requeued => Ok(true),
            RetryOutcome::SetAside { delivery_tag, error } => Err(QueueError::recovery(format!(
                "Dead-lettered message {delivery_tag} is not a valid job: {error}"
            ))),
        }
    }

    /// Retry dead-lettered jobs until the queue is empty or `limit` were moved
    ///
    /// Visits each message present at the start at most once. Messages that are
    /// not valid jobs are skipped and stay in the dead-letter queue.
    pub async fn retry_all(&self, limit: usize) -> QueueResult<usize> {
        let dlq = &self.config.dead_letter_queue_name;
        let pending = self.broker.message_count(dlq).await? as usize;

        let mut moved = 0;
        let mut skipped = 0;
        for _ in 0..pending {
            if moved >= limit {
                break;
            }
            match self.retry_next().await? {
                RetryOutcome::Empty => break,
                RetryOutcome::Requeued => moved += 1,
                RetryOutcome::SetAside { .. } => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!(
                queue = %dlq,
                moved = moved,
                skipped = skipped,
                "Skipped dead-lettered messages that are not valid jobs"
            );
        }
        Ok(moved)
    }

    async fn retry_next(&self) -> QueueResult<RetryOutcome> {
        let dlq = &self.config.dead_letter_queue_name;
        let Some(raw) = self.broker.get(dlq).await? else {
            return Ok(RetryOutcome::Empty);
        };

        let job = match decode_job(&raw.body) {
            Ok(job) => job,
            Err(e) => {
                self.set_aside(&raw).await;
                return Ok(RetryOutcome::SetAside {
                    delivery_tag: raw.delivery_tag,
                    error: e.to_string(),
                });
            }
        };

        let retried = job.next_retry();
        let properties = retry_properties(&retried, &raw.properties);

        let published = match encode_job(&retried) {
            Ok(body) => {
                self.broker
                    .publish(
                        &self.config.exchange_name,
                        self.config.routing_key(),
                        &body,
                        &properties,
                    )
                    .await
            }
            Err(e) => Err(e),
        };

        match published {
            Ok(true) => {}
            Ok(false) => {
                self.put_back(&raw, &retried.job_id).await;
                return Err(QueueError::recovery(format!(
                    "Broker refused republish of job {}",
                    retried.job_id
                )));
            }
            Err(e) => {
                self.put_back(&raw, &retried.job_id).await;
                return Err(QueueError::recovery(format!(
                    "Republish of job {} failed: {e}",
                    retried.job_id
                )));
            }
        }

        // The job now lives in the work queue; a failed ack only risks a duplicate.
        if let Err(e) = raw.acker.ack().await {
            error!(
                job_id = %retried.job_id,
                error = %e,
                "Republished job but failed to remove dead-letter copy"
            );
        }

        self.metrics.record_dead_letter_retried();
        info!(
            job_id = %retried.job_id,
            retry_count = retried.retry_count,
            "Dead-lettered job requeued"
        );
        log_queue_operation(
            "retry_dead_letter",
            Some(&retried.job_id),
            &self.config.queue_name,
            "requeued",
            Some(&format!("retry_count={}", retried.retry_count)),
        );
        Ok(RetryOutcome::Requeued)
    }

    /// Inspect up to `limit` dead-lettered messages without removing them
    ///
    /// Inspected messages are put back and will be marked redelivered.
    pub async fn peek(&self, limit: usize) -> QueueResult<Vec<DeadLetterEntry>> {
        let dlq = &self.config.dead_letter_queue_name;
        let mut held = Vec::with_capacity(limit);

        // Hold every message until the end so the same one is not fetched twice.
        let fetched = async {
            while held.len() < limit {
                match self.broker.get(dlq).await? {
                    Some(raw) => held.push(raw),
                    None => break,
                }
            }
            QueueResult::Ok(())
        }
        .await;

        let entries = held.iter().map(entry_for).collect();
        for raw in &held {
            if let Err(e) = raw.acker.nack(true).await {
                error!(
                    delivery_tag = raw.delivery_tag,
                    error = %e,
                    "Failed to return inspected dead-letter message"
                );
            }
        }

        fetched.map(|_| entries)
    }

    /// Move an undecodable message to the tail of the dead-letter queue
    ///
    /// Falls back to putting it back at the head if the republish does not go
    /// through; the message is never dropped.
    async fn set_aside(&self, raw: &RawDelivery) {
        let mut properties = raw.properties.clone();
        properties.expiration = None;

        let republished = self
            .broker
            .publish(
                &self.config.dead_letter_exchange_name,
                self.config.routing_key(),
                &raw.body,
                &properties,
            )
            .await;

        match republished {
            Ok(true) => {
                if let Err(e) = raw.acker.ack().await {
                    error!(
                        delivery_tag = raw.delivery_tag,
                        error = %e,
                        "Moved undecodable message but failed to remove the original"
                    );
                }
                warn!(
                    delivery_tag = raw.delivery_tag,
                    message_id = ?raw.properties.message_id,
                    body_len = raw.body.len(),
                    "Undecodable dead-lettered message moved to the back of the queue"
                );
            }
            Ok(false) => {
                warn!(
                    delivery_tag = raw.delivery_tag,
                    "Broker refused to move undecodable message"
                );
                self.put_back(raw, "undecodable").await;
            }
            Err(e) => {
                warn!(
                    delivery_tag = raw.delivery_tag,
                    error = %e,
                    "Failed to move undecodable message"
                );
                self.put_back(raw, "undecodable").await;
            }
        }
    }

    async fn put_back(&self, raw: &RawDelivery, job_id: &str) {
        if let Err(e) = raw.acker.nack(true).await {
            error!(
                job_id = %job_id,
                error = %e,
                "Failed to return message to dead-letter queue"
            );
        }
    }
}

enum RetryOutcome {
    Empty,
    Requeued,
    /// Head message was not a job and has been moved out of the way
    SetAside { delivery_tag: u64, error: String },
}

/// Properties for a republished job
///
/// Priority from the dead-lettered copy wins over the job body so an explicit
/// enqueue override survives the round trip. No expiration is carried over.
fn retry_properties(job: &JobMessage, original: &MessageProperties) -> MessageProperties {
    let mut options = EnqueueOptions::new();
    if let Some(priority) = original.priority {
        options = options.with_priority(priority);
    }
    publish_properties(job, &options)
}

fn entry_for(raw: &RawDelivery) -> DeadLetterEntry {
    match decode_job(&raw.body) {
        Ok(job) => DeadLetterEntry::Job(job),
        Err(e) => DeadLetterEntry::Undecodable {
            message_id: raw.properties.message_id.clone(),
            error: e.to_string(),
            body_len: raw.body.len(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::broker::MessageBroker;
    use crate::messaging::job::{CreateJobParams, ReportFormat};
    use crate::messaging::providers::{InMemoryBroker, PublishMode};
    use crate::messaging::topology::QueueTopology;

    async fn setup() -> (DeadLetterRecovery, InMemoryBroker) {
        let memory = InMemoryBroker::new();
        let config = Arc::new(QueueConfig::default());
        let broker = Arc::new(BrokerProvider::from(memory.clone()));
        QueueTopology::from_config(&config)
            .declare(&broker)
            .await
            .unwrap();
        (
            DeadLetterRecovery::new(broker, config, Arc::new(QueueMetrics::new())),
            memory,
        )
    }

    fn job(report_id: &str) -> JobMessage {
        JobMessage::create(CreateJobParams {
            report_id: report_id.to_string(),
            analysis_id: "ana".to_string(),
            project_id: "prj".to_string(),
            format: ReportFormat::Pdf,
            template: "t".to_string(),
            name: "n".to_string(),
            parameters: None,
            requested_by_id: "u".to_string(),
            priority: Some(2),
        })
    }

    async fn dead_letter(memory: &InMemoryBroker, body: &[u8]) {
        memory
            .publish(
                "report-dlx",
                "report-generation",
                body,
                &MessageProperties::default(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_retry_on_empty_dlq_is_noop() {
        let (recovery, memory) = setup().await;
        assert!(!recovery.retry_dead_letter().await.unwrap());
        assert!(memory.published().is_empty());
    }

    #[tokio::test]
    async fn test_refused_republish_puts_message_back() {
        let (recovery, memory) = setup().await;
        dead_letter(&memory, &encode_job(&job("rep-1")).unwrap()).await;

        memory.set_publish_mode(PublishMode::Refuse);
        let err = recovery.retry_dead_letter().await.unwrap_err();
        assert!(matches!(err, QueueError::Recovery { .. }));

        assert_eq!(memory.message_count("report-generation-dlq").await.unwrap(), 1);
        assert_eq!(memory.message_count("report-generation").await.unwrap(), 0);
        assert_eq!(memory.unacked_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_republish_puts_message_back() {
        let (recovery, memory) = setup().await;
        dead_letter(&memory, &encode_job(&job("rep-1")).unwrap()).await;

        memory.set_publish_mode(PublishMode::Fail);
        assert!(recovery.retry_dead_letter().await.is_err());
        assert_eq!(memory.message_count("report-generation-dlq").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_dead_letter_is_kept() {
        let (recovery, memory) = setup().await;
        dead_letter(&memory, b"not json").await;

        assert!(matches!(
            recovery.retry_dead_letter().await,
            Err(QueueError::Recovery { .. })
        ));
        assert_eq!(memory.message_count("report-generation-dlq").await.unwrap(), 1);
        assert_eq!(memory.unacked_count(), 0);
    }

    #[tokio::test]
    async fn test_undecodable_head_does_not_block_jobs_behind_it() {
        let (recovery, memory) = setup().await;
        dead_letter(&memory, b"not json").await;
        dead_letter(&memory, &encode_job(&job("rep-1")).unwrap()).await;

        assert!(recovery.retry_dead_letter().await.is_err());
        assert!(recovery.retry_dead_letter().await.unwrap());

        assert_eq!(memory.message_count("report-generation").await.unwrap(), 1);
        assert_eq!(memory.message_count("report-generation-dlq").await.unwrap(), 1);
        let entries = recovery.peek(10).await.unwrap();
        assert!(matches!(&entries[..], [DeadLetterEntry::Undecodable { body_len: 8, .. }]));
    }

    #[tokio::test]
    async fn test_undecodable_stays_at_head_when_move_is_refused() {
        let (recovery, memory) = setup().await;
        dead_letter(&memory, b"not json").await;
        dead_letter(&memory, &encode_job(&job("rep-1")).unwrap()).await;

        memory.set_publish_mode(PublishMode::Refuse);
        assert!(recovery.retry_dead_letter().await.is_err());
        memory.set_publish_mode(PublishMode::Accept);

        assert_eq!(memory.message_count("report-generation-dlq").await.unwrap(), 2);
        let entries = recovery.peek(10).await.unwrap();
        assert!(matches!(&entries[0], DeadLetterEntry::Undecodable { .. }));
    }

    #[tokio::test]
    async fn test_retry_all_skips_undecodable_messages() {
        let (recovery, memory) = setup().await;
        dead_letter(&memory, b"not json").await;
        dead_letter(&memory, &encode_job(&job("rep-1")).unwrap()).await;
        dead_letter(&memory, b"{broken").await;
        dead_letter(&memory, &encode_job(&job("rep-2")).unwrap()).await;

        assert_eq!(recovery.retry_all(10).await.unwrap(), 2);
        assert_eq!(memory.message_count("report-generation").await.unwrap(), 2);
        assert_eq!(memory.message_count("report-generation-dlq").await.unwrap(), 2);

        // Only malformed messages remain; another pass terminates without moving any.
        assert_eq!(recovery.retry_all(10).await.unwrap(), 0);
        assert_eq!(memory.message_count("report-generation-dlq").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_peek_does_not_remove() {
        let (recovery, memory) = setup().await;
        dead_letter(&memory, &encode_job(&job("rep-1")).unwrap()).await;
        dead_letter(&memory, b"{broken").await;

        let entries = recovery.peek(10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(matches!(&entries[0], DeadLetterEntry::Job(j) if j.job_id == "rep-1"));
        assert!(matches!(&entries[1], DeadLetterEntry::Undecodable { body_len: 7, .. }));

        assert_eq!(memory.message_count("report-generation-dlq").await.unwrap(), 2);
        assert_eq!(memory.unacked_count(), 0);
    }

    #[tokio::test]
    async fn test_retry_all_respects_limit() {
        let (recovery, memory) = setup().await;
        for id in ["a", "b", "c"] {
            dead_letter(&memory, &encode_job(&job(id)).unwrap()).await;
        }

        assert_eq!(recovery.retry_all(2).await.unwrap(), 2);
        assert_eq!(memory.message_count("report-generation-dlq").await.unwrap(), 1);
        assert_eq!(recovery.retry_all(10).await.unwrap(), 1);
        assert_eq!(memory.message_count("report-generation").await.unwrap(), 3);
    }

    #[test]
    fn test_retry_properties_keep_original_priority() {
        let original = MessageProperties {
            priority: Some(8),
            expiration: Some("1000".to_string()),
            ..Default::default()
        };
        let props = retry_properties(&job("rep-1"), &original);
        assert_eq!(props.priority, Some(8));
        assert_eq!(props.expiration, None);
        assert_eq!(props.message_id.as_deref(), Some("rep-1"));

        let props = retry_properties(&job("rep-1"), &MessageProperties::default());
        assert_eq!(props.priority, Some(2));
    }
}

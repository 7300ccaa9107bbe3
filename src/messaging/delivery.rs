//! # Delivery
//!
//! A decoded job together with the handle that settles it. A delivery is settled
//! exactly once: the first `ack` or `nack` wins and later calls fail with
//! [`QueueError::AlreadySettled`]. Clones share the settled state, which is how the
//! worker loop knows whether the handler settled its copy.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{HandlerError, QueueError, QueueResult};
use crate::logging::log_queue_operation;
use crate::messaging::broker::DeliveryAcker;
use crate::messaging::job::JobMessage;
use crate::messaging::monitor::QueueMetrics;

#[derive(Debug, Clone)]
pub struct Delivery {
    job: JobMessage,
    delivery_tag: u64,
    redelivered: bool,
    queue: Arc<str>,
    acker: DeliveryAcker,
    settled: Arc<AtomicBool>,
    metrics: Arc<QueueMetrics>,
}

impl Delivery {
    pub(crate) fn new(
        job: JobMessage,
        delivery_tag: u64,
        redelivered: bool,
        queue: Arc<str>,
        acker: DeliveryAcker,
        metrics: Arc<QueueMetrics>,
    ) -> Self {
        Self {
            job,
            delivery_tag,
            redelivered,
            queue,
            acker,
            settled: Arc::new(AtomicBool::new(false)),
            metrics,
        }
    }

    pub fn job(&self) -> &JobMessage {
        &self.job
    }

    pub fn into_job(self) -> JobMessage {
        self.job
    }

    /// The broker has delivered this message before
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    /// Remove the job from the queue
    pub async fn ack(&self) -> QueueResult<()> {
        self.claim()?;
        if let Err(e) = self.acker.ack().await {
            self.settled.store(false, Ordering::Release);
            return Err(e);
        }

        self.metrics.record_ack();
        log_queue_operation("ack", Some(&self.job.job_id), &self.queue, "acked", None);
        Ok(())
    }

    /// Reject the job; `requeue = false` dead-letters it
    pub async fn nack(&self, requeue: bool) -> QueueResult<()> {
        self.claim()?;
        if let Err(e) = self.acker.nack(requeue).await {
            self.settled.store(false, Ordering::Release);
            return Err(e);
        }

        self.metrics.record_nack(requeue);
        log_queue_operation(
            "nack",
            Some(&self.job.job_id),
            &self.queue,
            if requeue { "requeued" } else { "dead_lettered" },
            None,
        );
        Ok(())
    }

    /// Reject according to a handler failure
    ///
    /// Transient failures are requeued once; a failure on a redelivered message
    /// and any permanent failure go to the dead-letter queue.
    pub async fn reject_for(&self, error: &HandlerError) -> QueueResult<()> {
        let requeue = error.is_transient() && !self.redelivered;
        debug!(
            job_id = %self.job.job_id,
            redelivered = self.redelivered,
            requeue = requeue,
            error = %error,
            "Rejecting job after handler failure"
        );
        self.nack(requeue).await
    }

    fn claim(&self) -> QueueResult<()> {
        self.settled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| QueueError::already_settled(&self.job.job_id))
    }
}

/// Rendering pipeline entry point driven by the worker loop
///
/// The handler must settle the delivery with exactly one `ack` or `nack`. A
/// delivery left unsettled, because the handler returned an error, returned
/// without settling, or panicked, is rejected without requeue.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError> {
        (self)(delivery).await
    }
}

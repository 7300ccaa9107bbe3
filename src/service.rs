//! # Report Queue Service
//!
//! Explicitly constructed root that owns the broker and the queue components.
//! The process creates one in `main` (or its dependency-injection root) and hands
//! out references; there is no global instance.
//!
//! ```rust
//! use report_queue::config::QueueConfig;
//! use report_queue::messaging::{CreateJobParams, EnqueueOptions, JobMessage, ReportFormat};
//! use report_queue::ReportQueueService;
//!
//! # tokio_test::block_on(async {
//! let service = ReportQueueService::in_memory(QueueConfig::default()).await.unwrap();
//!
//! let job = JobMessage::create(CreateJobParams {
//!     report_id: "report-1".to_string(),
//!     analysis_id: "analysis-1".to_string(),
//!     project_id: "project-1".to_string(),
//!     format: ReportFormat::Pdf,
//!     template: "standard".to_string(),
//!     name: "Quarterly review".to_string(),
//!     parameters: None,
//!     requested_by_id: "user-1".to_string(),
//!     priority: Some(5),
//! });
//!
//! assert!(service.enqueue(&job, &EnqueueOptions::new()).await.unwrap());
//! assert_eq!(service.queue_length().await.unwrap(), 1);
//! service.shutdown().await.unwrap();
//! # });
//! ```

use std::sync::Arc;

use tracing::info;

use crate::config::QueueConfig;
use crate::error::QueueResult;
use crate::messaging::{
    BrokerProvider, DeadLetterRecovery, EnqueueOptions, InMemoryBroker, JobConsumer, JobHandler,
    JobMessage, JobProducer, QueueHealth, QueueMetrics, QueueMonitor, QueueTopology,
    RabbitMqBroker,
};

#[derive(Debug)]
pub struct ReportQueueService {
    config: Arc<QueueConfig>,
    broker: Arc<BrokerProvider>,
    metrics: Arc<QueueMetrics>,
    topology: QueueTopology,
    producer: JobProducer,
    consumer: JobConsumer,
    recovery: DeadLetterRecovery,
    monitor: QueueMonitor,
}

impl ReportQueueService {
    /// Connect to RabbitMQ and declare the topology
    pub async fn connect(config: QueueConfig) -> QueueResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let broker = RabbitMqBroker::connect(Arc::clone(&config)).await?;
        Self::start(config, BrokerProvider::RabbitMq(broker)).await
    }

    /// In-process broker for tests and local development
    pub async fn in_memory(config: QueueConfig) -> QueueResult<Self> {
        config.validate()?;
        Self::start(Arc::new(config), BrokerProvider::InMemory(InMemoryBroker::new())).await
    }

    /// Use an already constructed provider; declares the topology
    pub async fn with_broker(config: QueueConfig, broker: BrokerProvider) -> QueueResult<Self> {
        config.validate()?;
        Self::start(Arc::new(config), broker).await
    }

    /// RabbitMQ service that connects on first use and declares nothing
    ///
    /// For read-only callers such as health checks, which must be able to
    /// report a broker outage instead of failing to start.
    pub fn connect_lazy(config: QueueConfig) -> QueueResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let broker = RabbitMqBroker::new(Arc::clone(&config));
        Ok(Self::assemble(config, BrokerProvider::RabbitMq(broker)))
    }

    /// Use an already constructed provider without declaring the topology
    pub fn with_broker_lazy(config: QueueConfig, broker: BrokerProvider) -> QueueResult<Self> {
        config.validate()?;
        Ok(Self::assemble(Arc::new(config), broker))
    }

    async fn start(config: Arc<QueueConfig>, broker: BrokerProvider) -> QueueResult<Self> {
        let service = Self::assemble(config, broker);
        service.topology.declare(&service.broker).await?;

        info!(
            provider = service.broker.provider_name(),
            queue = %service.config.queue_name,
            "Report queue service started"
        );
        Ok(service)
    }

    fn assemble(config: Arc<QueueConfig>, broker: BrokerProvider) -> Self {
        let broker = Arc::new(broker);
        let metrics = Arc::new(QueueMetrics::new());
        let topology = QueueTopology::from_config(&config);

        Self {
            producer: JobProducer::new(
                Arc::clone(&broker),
                Arc::clone(&config),
                Arc::clone(&metrics),
            ),
            consumer: JobConsumer::new(
                Arc::clone(&broker),
                Arc::clone(&config),
                Arc::clone(&metrics),
            ),
            recovery: DeadLetterRecovery::new(
                Arc::clone(&broker),
                Arc::clone(&config),
                Arc::clone(&metrics),
            ),
            monitor: QueueMonitor::new(
                Arc::clone(&broker),
                Arc::clone(&config),
                Arc::clone(&metrics),
            ),
            topology,
            config,
            broker,
            metrics,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn broker(&self) -> &Arc<BrokerProvider> {
        &self.broker
    }

    pub fn topology(&self) -> &QueueTopology {
        &self.topology
    }

    pub fn producer(&self) -> &JobProducer {
        &self.producer
    }

    pub fn consumer(&self) -> &JobConsumer {
        &self.consumer
    }

    pub fn recovery(&self) -> &DeadLetterRecovery {
        &self.recovery
    }

    pub fn monitor(&self) -> &QueueMonitor {
        &self.monitor
    }

    pub fn metrics(&self) -> &Arc<QueueMetrics> {
        &self.metrics
    }

    /// Re-declare the topology (idempotent)
    pub async fn declare_topology(&self) -> QueueResult<()> {
        self.topology.declare(&self.broker).await
    }

    pub async fn enqueue(&self, job: &JobMessage, options: &EnqueueOptions) -> QueueResult<bool> {
        self.producer.enqueue(job, options).await
    }

    pub async fn consume<H: JobHandler>(&self, handler: H) -> QueueResult<String> {
        self.consumer.consume(handler).await
    }

    pub async fn cancel_consumer(&self, consumer_tag: &str) -> QueueResult<()> {
        self.consumer.cancel_consumer(consumer_tag).await
    }

    pub async fn retry_dead_letter(&self) -> QueueResult<bool> {
        self.recovery.retry_dead_letter().await
    }

    pub async fn purge_queue(&self) -> QueueResult<u32> {
        self.recovery.purge_queue().await
    }

    pub async fn purge_dead_letter_queue(&self) -> QueueResult<u32> {
        self.recovery.purge_dead_letter_queue().await
    }

    pub async fn queue_length(&self) -> QueueResult<u32> {
        self.monitor.queue_length().await
    }

    pub async fn dead_letter_queue_length(&self) -> QueueResult<u32> {
        self.monitor.dead_letter_queue_length().await
    }

    pub async fn health(&self) -> QueueHealth {
        self.monitor.health().await
    }

    /// Cancel every consumer and close the broker connection
    pub async fn shutdown(&self) -> QueueResult<()> {
        self.consumer.cancel_all().await?;
        self.broker.close().await?;
        info!("Report queue service stopped");
        Ok(())
    }

    /// Cancel consumers and empty both queues; for test isolation only
    pub async fn reset(&self) -> QueueResult<()> {
        self.consumer.cancel_all().await?;
        self.recovery.purge_queue().await?;
        self.recovery.purge_dead_letter_queue().await?;
        Ok(())
    }
}

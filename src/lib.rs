#![allow(clippy::doc_markdown)] // Allow technical terms like RabbitMQ, AMQP in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Report Queue
//!
//! Durable job queue that moves report rendering (PDF, Word, Excel, PowerPoint)
//! off the request path.
//!
//! ## Overview
//!
//! The report-request handler builds a [`JobMessage`](messaging::JobMessage) and
//! enqueues it. A worker process consumes jobs one prefetch slot at a time, runs
//! the rendering pipeline, and acknowledges or rejects each job. Rejected, expired
//! and overflowed jobs land in a dead-letter queue, from which an operator can
//! inspect, purge, or retry them.
//!
//! ## Delivery guarantees
//!
//! - **At-least-once**: a job is removed only after an explicit acknowledgement
//! - **Persistent**: durable queues and persistent messages survive broker restarts
//! - **Priority**: higher-priority jobs are delivered first, FIFO within a priority
//! - **Idempotent identity**: `job_id` is the broker message ID and never changes
//!   across retries, so duplicates can be detected downstream
//!
//! ## Module Organization
//!
//! - [`config`] - Queue topology and broker settings
//! - [`messaging`] - Broker seam, producer, consumer, recovery and monitoring
//! - [`service`] - [`ReportQueueService`] composition root
//! - [`error`] - [`QueueError`] and [`HandlerError`]
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use report_queue::config::QueueConfig;
//! use report_queue::messaging::Delivery;
//! use report_queue::{HandlerError, ReportQueueService};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! report_queue::logging::init_structured_logging();
//! let service = ReportQueueService::connect(QueueConfig::load()?).await?;
//!
//! let tag = service
//!     .consume(|delivery: Delivery| async move {
//!         println!("rendering {}", delivery.job().name);
//!         delivery
//!             .ack()
//!             .await
//!             .map_err(|e| HandlerError::transient(e.to_string()))
//!     })
//!     .await?;
//!
//! tokio::signal::ctrl_c().await?;
//! service.cancel_consumer(&tag).await?;
//! service.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! Unit and integration tests run against the in-memory broker. Tests that need a
//! live RabbitMQ are `#[ignore]`d:
//!
//! ```bash
//! cargo test                 # in-memory suites
//! cargo test -- --ignored    # RabbitMQ suites (RABBITMQ_URL)
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod service;

pub use crate::config::QueueConfig;
pub use error::{HandlerError, QueueError, QueueResult};
pub use messaging::{
    create_job_message, CreateJobParams, Delivery, EnqueueOptions, JobHandler, JobMessage,
    ReportFormat,
};
pub use service::ReportQueueService;

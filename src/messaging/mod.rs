//! # Messaging Module
//!
//! Durable AMQP job queue for report rendering: topology, producer, consumer,
//! dead-letter recovery and depth monitoring, over a pluggable broker.
//!
//! ## Architecture
//!
//! ```text
//! JobProducer ─┐                         ┌─ RabbitMqBroker (lapin)
//! JobConsumer ─┼─> BrokerProvider (enum) ┤
//! Recovery    ─┤                         └─ InMemoryBroker (tests, dev)
//! QueueMonitor ┘
//! ```

pub mod broker;
pub mod codec;
pub mod connection;
pub mod consumer;
pub mod delivery;
pub mod job;
pub mod monitor;
pub mod producer;
pub mod provider;
pub mod providers;
pub mod recovery;
pub mod topology;

pub use broker::{
    DeliveryAcker, DeliveryStream, ExchangeKind, MessageBroker, MessageProperties,
    QueueArguments, RawDelivery,
};
pub use codec::{decode_job, encode_job, QueueMessage};
pub use connection::{ConnectionManager, ReconnectPolicy};
pub use consumer::JobConsumer;
pub use delivery::{Delivery, JobHandler};
pub use job::{create_job_message, CreateJobParams, JobMessage, ReportFormat};
pub use monitor::{
    QueueDepths, QueueHealth, QueueHealthStatus, QueueMetrics, QueueMetricsSnapshot,
    QueueMonitor,
};
pub use producer::{publish_properties, EnqueueOptions, JobProducer};
pub use provider::BrokerProvider;
pub use providers::{ConsumeMode, InMemoryBroker, PublishMode, PublishedMessage, RabbitMqBroker};
pub use recovery::{DeadLetterEntry, DeadLetterRecovery};
pub use topology::QueueTopology;

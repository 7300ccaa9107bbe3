//! # Broker Providers
//!
//! - [`RabbitMqBroker`]: AMQP 0.9.1 via `lapin`
//! - [`InMemoryBroker`]: in-process model for tests and local runs

mod in_memory;
mod rabbitmq;

pub use in_memory::{ConsumeMode, InMemoryAcker, InMemoryBroker, PublishMode, PublishedMessage};
pub use rabbitmq::RabbitMqBroker;

pub(crate) use rabbitmq::{rabbitmq_ack, rabbitmq_nack};

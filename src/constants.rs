//! # Queue Constants
//!
//! Documented defaults for the report queue topology, broker connection, and the
//! AMQP argument and property names the queue relies on.

/// Default topology names and tuning values used when no override is configured
pub mod defaults {
    pub const BROKER_URL: &str = "amqp://localhost:5672/%2f";
    pub const BROKER_USER: &str = "guest";
    pub const BROKER_PASSWORD: &str = "guest";

    pub const QUEUE_NAME: &str = "report-generation";
    pub const EXCHANGE_NAME: &str = "report-exchange";
    pub const DEAD_LETTER_QUEUE_NAME: &str = "report-generation-dlq";
    pub const DEAD_LETTER_EXCHANGE_NAME: &str = "report-dlx";

    pub const PREFETCH_COUNT: u16 = 1;
    pub const RECONNECT_DELAY_MS: u64 = 5000;
    pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
    pub const MAX_PRIORITY: u8 = 10;
    pub const DEAD_LETTER_WARN_THRESHOLD: u32 = 10;
    pub const CONNECTION_NAME: &str = "report-queue";
}

/// Environment variables consulted by [`crate::config::QueueConfig::load`]
pub mod env {
    pub const CONFIG_FILE: &str = "REPORT_QUEUE_CONFIG";

    pub const BROKER_URL: &str = "RABBITMQ_URL";
    pub const BROKER_USER: &str = "RABBITMQ_USER";
    pub const BROKER_PASSWORD: &str = "RABBITMQ_PASSWORD";
    pub const QUEUE_NAME: &str = "REPORT_QUEUE_NAME";
    pub const EXCHANGE_NAME: &str = "REPORT_EXCHANGE_NAME";
    pub const DEAD_LETTER_QUEUE_NAME: &str = "REPORT_DLQ_NAME";
    pub const DEAD_LETTER_EXCHANGE_NAME: &str = "REPORT_DLX_NAME";
    pub const PREFETCH_COUNT: &str = "REPORT_QUEUE_PREFETCH";
    pub const RECONNECT_DELAY_MS: &str = "RABBITMQ_RECONNECT_DELAY_MS";
    pub const MAX_RECONNECT_ATTEMPTS: &str = "RABBITMQ_MAX_RECONNECT_ATTEMPTS";
    pub const MAX_PRIORITY: &str = "REPORT_QUEUE_MAX_PRIORITY";
    pub const MAX_QUEUE_LENGTH: &str = "REPORT_QUEUE_MAX_LENGTH";
    pub const DEAD_LETTER_WARN_THRESHOLD: &str = "REPORT_DLQ_WARN_THRESHOLD";
    pub const CONNECTION_NAME: &str = "REPORT_QUEUE_CONNECTION_NAME";

    pub const ENVIRONMENT: &str = "REPORT_QUEUE_ENV";
    pub const APP_ENVIRONMENT: &str = "APP_ENV";
    pub const LOG_FORMAT: &str = "LOG_FORMAT";
}

/// AMQP queue arguments and message property values
pub mod amqp {
    pub const DEAD_LETTER_EXCHANGE_ARG: &str = "x-dead-letter-exchange";
    pub const DEAD_LETTER_ROUTING_KEY_ARG: &str = "x-dead-letter-routing-key";
    pub const MAX_PRIORITY_ARG: &str = "x-max-priority";
    pub const MAX_LENGTH_ARG: &str = "x-max-length";
    pub const MESSAGE_TTL_ARG: &str = "x-message-ttl";

    pub const CONTENT_TYPE_JSON: &str = "application/json";
    pub const DELIVERY_MODE_PERSISTENT: u8 = 2;

    /// The nameless exchange that routes by queue name
    pub const DEFAULT_EXCHANGE: &str = "";
}

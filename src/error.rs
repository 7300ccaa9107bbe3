//! # Queue Error Types
//!
//! Structured error handling for the report queue using thiserror.
//!
//! The taxonomy separates the failure classes the queue must treat differently:
//! connection loss (recovered by reconnecting), publish refusal (surfaced to the
//! caller as retryable), decode failure (dead-lettered, never retried) and recovery
//! failure (the dead-lettered message is put back).

use thiserror::Error;

/// Errors raised by the queue layer
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Broker connection error: {message}")]
    Connection { message: String },

    #[error("Broker unreachable after {attempts} attempts: {message}")]
    ConnectionExhausted { attempts: u32, message: String },

    #[error("Topology declaration failed: {name}: {message}")]
    Topology { name: String, message: String },

    #[error("Publish failed: {queue}: {message}")]
    Publish { queue: String, message: String },

    #[error("Message encode error: {message}")]
    Encode { message: String },

    #[error("Message decode error: {message}")]
    Decode { message: String },

    #[error("Consume failed: {queue}: {message}")]
    Consume { queue: String, message: String },

    #[error("Acknowledgement failed for delivery {delivery}: {message}")]
    Acknowledge { delivery: u64, message: String },

    #[error("Delivery for job {job_id} was already acknowledged or rejected")]
    AlreadySettled { job_id: String },

    #[error("Dead-letter recovery failed: {message}")]
    Recovery { message: String },

    #[error("Consumer not found: {consumer_tag}")]
    ConsumerNotFound { consumer_tag: String },

    #[error("Queue not found: {queue}")]
    QueueNotFound { queue: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal queue error: {message}")]
    Internal { message: String },
}

impl QueueError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a connection-exhausted error
    pub fn connection_exhausted(attempts: u32, message: impl Into<String>) -> Self {
        Self::ConnectionExhausted {
            attempts,
            message: message.into(),
        }
    }

    /// Create a topology declaration error
    pub fn topology(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Topology {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a publish error
    pub fn publish(queue: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            queue: queue.into(),
            message: message.into(),
        }
    }

    /// Create an encode error
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a consume error
    pub fn consume(queue: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Consume {
            queue: queue.into(),
            message: message.into(),
        }
    }

    /// Create an acknowledgement error
    pub fn acknowledge(delivery: u64, message: impl Into<String>) -> Self {
        Self::Acknowledge {
            delivery,
            message: message.into(),
        }
    }

    pub fn already_settled(job_id: impl Into<String>) -> Self {
        Self::AlreadySettled {
            job_id: job_id.into(),
        }
    }

    /// Create a recovery error
    pub fn recovery(message: impl Into<String>) -> Self {
        Self::Recovery {
            message: message.into(),
        }
    }

    pub fn consumer_not_found(consumer_tag: impl Into<String>) -> Self {
        Self::ConsumerNotFound {
            consumer_tag: consumer_tag.into(),
        }
    }

    pub fn queue_not_found(queue: impl Into<String>) -> Self {
        Self::QueueNotFound {
            queue: queue.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the caller may retry the operation that produced this error
    ///
    /// Connection and publish failures are transient from the report-request
    /// handler's point of view. Everything else needs a code or data fix.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Publish { .. })
    }

    /// Whether this error came from decoding a message body
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }
}

impl From<::config::ConfigError> for QueueError {
    fn from(err: ::config::ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Failure reported by a job handler (the rendering pipeline)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Worth one more attempt, e.g. object storage temporarily unavailable
    #[error("Transient handler failure: {0}")]
    Transient(String),

    /// Redelivery cannot help, e.g. unknown template
    #[error("Permanent handler failure: {0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(QueueError::connection("refused").is_retryable());
        assert!(QueueError::publish("report-generation", "channel closed").is_retryable());
        assert!(!QueueError::decode("expected value").is_retryable());
        assert!(!QueueError::recovery("republish failed").is_retryable());
        assert!(!QueueError::connection_exhausted(5, "refused").is_retryable());
    }

    #[test]
    fn test_decode_is_distinguishable() {
        assert!(QueueError::decode("bad json").is_decode());
        assert!(!QueueError::encode("bad map key").is_decode());
    }

    #[test]
    fn test_error_display() {
        let err = QueueError::publish("report-generation", "broker nack");
        assert_eq!(
            err.to_string(),
            "Publish failed: report-generation: broker nack"
        );

        let err = QueueError::connection_exhausted(3, "connection refused");
        assert_eq!(
            err.to_string(),
            "Broker unreachable after 3 attempts: connection refused"
        );
    }

    #[test]
    fn test_handler_error() {
        assert!(HandlerError::transient("s3 timeout").is_transient());
        assert!(!HandlerError::permanent("unknown template").is_transient());
    }
}

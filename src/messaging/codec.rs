//! # Job Message Codec
//!
//! UTF-8 JSON encoding of queue payloads. Decode failures surface as
//! [`QueueError::Decode`] so the worker loop can dead-letter malformed bodies
//! without confusing them with rendering failures.

use crate::error::{QueueError, QueueResult};
use crate::messaging::job::JobMessage;

/// Message serialization contract
///
/// Any serde-compatible type gets a JSON implementation through the blanket impl.
pub trait QueueMessage: Send + Sync + Clone + 'static {
    /// Serialize the message to bytes
    fn to_bytes(&self) -> QueueResult<Vec<u8>>;

    /// Deserialize the message from bytes
    fn from_bytes(bytes: &[u8]) -> QueueResult<Self>
    where
        Self: Sized;
}

impl<T> QueueMessage for T
where
    T: serde::Serialize + serde::de::DeserializeOwned + Send + Sync + Clone + 'static,
{
    fn to_bytes(&self) -> QueueResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| QueueError::encode(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> QueueResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| QueueError::decode(e.to_string()))
    }
}

/// Encode a job for publishing
pub fn encode_job(job: &JobMessage) -> QueueResult<Vec<u8>> {
    job.to_bytes()
}

/// Decode a delivered job body
pub fn decode_job(bytes: &[u8]) -> QueueResult<JobMessage> {
    JobMessage::from_bytes(bytes)
}

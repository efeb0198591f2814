//! Typed jobs and the default payload codec.
//!
//! Payloads are stored as a JSON array holding exactly one element, so that
//! optional and scalar payloads round-trip the same way as structs.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::QueueError;

/// A job type: a stable name plus the payload it carries.
pub trait Job: Send + Sync + 'static {
    /// Name written to [`JobRecord::job_type`](crate::JobRecord::job_type).
    const NAME: &'static str;

    type Payload: Serialize + DeserializeOwned + Send + Sync + 'static;

    fn serialize(payload: &Self::Payload) -> Result<Vec<u8>, QueueError> {
        encode_payload(payload)
    }

    fn deserialize(bytes: &[u8]) -> Result<Self::Payload, QueueError> {
        decode_payload(bytes)
    }
}

pub fn encode_payload<T: Serialize + ?Sized>(payload: &T) -> Result<Vec<u8>, QueueError> {
    serde_json::to_vec(&[payload])
        .map_err(|e| QueueError::PayloadSerializationFailed(e.to_string()))
}

pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, QueueError> {
    let mut items: Vec<T> = serde_json::from_slice(bytes)
        .map_err(|e| QueueError::PayloadDeserializationFailed(e.to_string()))?;
    if items.len() != 1 {
        return Err(QueueError::PayloadDeserializationFailed(format!(
            "expected a single-element payload, found {} elements",
            items.len()
        )));
    }
    Ok(items.remove(0))
}

//! Versioned envelope for synchronizer events.
//!
//! Everything the synchronizer broadcasts or relays is wrapped so observers
//! can tell which execution and revision an event belongs to without
//! decoding the payload, and so the payload schema can evolve.

use serde::{Deserialize, Serialize};
use switchyard_core::ExecutionId;

/// The current envelope version.
pub const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub version: u32,
    pub execution_id: ExecutionId,
    /// Record revision the payload was produced at.
    pub revision: u64,
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Creates a new envelope with the current version.
    #[must_use]
    pub fn new(execution_id: ExecutionId, revision: u64, payload: T) -> Self {
        Self {
            version: CURRENT_VERSION,
            execution_id,
            revision,
            payload,
        }
    }

    #[must_use]
    pub fn into_payload(self) -> T {
        self.payload
    }

    #[must_use]
    pub fn is_current_version(&self) -> bool {
        self.version == CURRENT_VERSION
    }
}

impl<T: Serialize> Envelope<T> {
    /// Serializes the envelope to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl<T: for<'de> Deserialize<'de>> Envelope<T> {
    /// Deserializes an envelope from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not an envelope of `T`.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_carries_routing_fields() {
        let execution_id = ExecutionId::new();
        let envelope = Envelope::new(execution_id, 7, json!({"status": "running"}));
        assert!(envelope.is_current_version());

        let value = serde_json::to_value(&envelope).expect("to_value");
        assert_eq!(value["version"], CURRENT_VERSION);
        assert_eq!(value["revision"], 7);
        assert_eq!(value["execution_id"], json!(execution_id));
        assert_eq!(value["payload"]["status"], "running");
    }

    #[test]
    fn envelope_from_bytes() {
        let envelope = Envelope::new(ExecutionId::new(), 1, "hello".to_string());
        let bytes = envelope.to_json_bytes().expect("serialize");
        let parsed: Envelope<String> = Envelope::from_json_bytes(&bytes).expect("deserialize");
        assert_eq!(parsed.into_payload(), "hello");
    }
}

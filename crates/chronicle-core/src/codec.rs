//! Payload codec used by stores that persist bytes.

use crate::error::DomainError;

/// Encodes and decodes event payloads, snapshots and saga state.
pub trait PayloadCodec: Send + Sync + std::fmt::Debug {
    /// Encodes a payload.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if encoding fails.
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, DomainError>;

    /// Decodes a payload.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the bytes are malformed.
    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, DomainError>;
}

/// UTF-8 JSON codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, DomainError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, DomainError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_codec_rejects_malformed_bytes() {
        let result = JsonCodec.decode(b"{not json");

        assert!(matches!(result, Err(DomainError::Serialization(_))));
    }

    #[test]
    fn test_json_codec_preserves_nested_payload() {
        let value = serde_json::json!({ "nested": { "amount": 42 }, "tags": ["a", null] });

        let bytes = JsonCodec.encode(&value).unwrap();

        assert_eq!(JsonCodec.decode(&bytes).unwrap(), value);
    }
}

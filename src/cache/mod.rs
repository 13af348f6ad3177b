//! Read-through cache of marshalled entities: one hash per entity key, one field per identity.

pub mod invalidation;
pub mod memory;

pub use memory::MemoryCache;

use crate::error::CacheError;
use async_trait::async_trait;
use serde_json::Value;

const COMPRESSION_LEVEL: i32 = 3;

#[async_trait]
pub trait Cache: Send + Sync {
    /// Positional lookup; `None` for misses.
    async fn get_many(&self, key: &str, subkeys: &[String]) -> Result<Vec<Option<Vec<u8>>>, CacheError>;

    async fn set_many(&self, key: &str, entries: Vec<(String, Vec<u8>)>) -> Result<(), CacheError>;

    async fn evict(&self, key: &str, subkeys: &[String]) -> Result<(), CacheError>;
}

/// zstd-compressed JSON.
pub fn encode(value: &Value) -> Result<Vec<u8>, CacheError> {
    let json = serde_json::to_vec(value).map_err(|e| CacheError::Codec(e.to_string()))?;
    zstd::encode_all(json.as_slice(), COMPRESSION_LEVEL).map_err(|e| CacheError::Codec(e.to_string()))
}

pub fn decode(bytes: &[u8]) -> Result<Value, CacheError> {
    let json = zstd::decode_all(bytes).map_err(|e| CacheError::Codec(e.to_string()))?;
    serde_json::from_slice(&json).map_err(|e| CacheError::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn codec_restores_marshalled_dict() {
        let dict = json!({"id": 1, "tags": [{"id": 2, "name": "x"}], "parent": null});
        let bytes = encode(&dict).unwrap();
        assert_eq!(decode(&bytes).unwrap(), dict);
        assert!(matches!(decode(b"not zstd"), Err(CacheError::Codec(_))));
    }
}

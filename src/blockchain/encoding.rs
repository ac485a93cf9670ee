use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Size in bytes of a SHA-256 digest
pub const HASH_LEN: usize = 32;

/// Encodes a signed integer as 8 big-endian bytes
pub fn int_to_bytes(n: i64) -> [u8; 8] {
    n.to_be_bytes()
}

/// Computes the SHA-256 digest of `data`
pub fn sha256(data: &[u8]) -> [u8; HASH_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Canonical byte encoding used for storage and content hashing
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(value)
}

/// Inverse of [`encode`]
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, bincode::Error> {
    bincode::deserialize(bytes)
}

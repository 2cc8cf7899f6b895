use sha2::{Digest, Sha256};

use crate::record::Record;

/// Computes a deterministic SHA-256 hash over raw bytes.
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let digest = hasher.finalize();
    hex::encode(digest)
}

/// Checksum stored alongside a snapshot: the hash of the compact JSON of its
/// records array.
pub fn records_checksum(records: &[Record]) -> String {
    let value = serde_json::to_value(records).unwrap_or(serde_json::Value::Null);
    value_checksum(&value)
}

/// Same checksum computed over an already-parsed `records` value, so foreign
/// files can be checked without a typed round trip.
pub fn value_checksum(records: &serde_json::Value) -> String {
    content_hash(records.to_string().as_bytes())
}

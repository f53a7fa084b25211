use crate::determinism::json_canonical;
use crate::error::CoreResult;
use serde::Serialize;
use sha2::{Digest, Sha256};
use ulid::Ulid;

pub const FINDING_ID_PREFIX: &str = "if";
pub const HISTORY_ID_PREFIX: &str = "dh";
pub const CANDIDATE_ID_PREFIX: &str = "dc";

pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

/// SHA-256 over the canonical JSON encoding of `value`.
pub fn fingerprint<T: Serialize>(value: &T) -> CoreResult<String> {
    let bytes = json_canonical::to_canonical_bytes(value)?;
    Ok(sha256_hex(&bytes))
}

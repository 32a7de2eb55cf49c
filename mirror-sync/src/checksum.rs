//! Order-independent SHA-256 digest over key/value pairs.
//!
//! Pairs are sorted by key (byte order) and hashed as `key=value\n`. Values
//! are raw bytes, so binary secrets hash exactly as stored.

use sha2::{Digest, Sha256};

use mirror_core::Bundle;

/// Lowercase hex SHA-256 of `pairs`. Input order never matters.
pub fn checksum<I, K, V>(pairs: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<[u8]>,
{
    let mut pairs: Vec<(K, V)> = pairs.into_iter().collect();
    pairs.sort_by(|a, b| a.0.as_ref().as_bytes().cmp(b.0.as_ref().as_bytes()));

    let mut h = Sha256::new();
    for (k, v) in &pairs {
        h.update(k.as_ref().as_bytes());
        h.update(b"=");
        h.update(v.as_ref());
        h.update(b"\n");
    }
    hex::encode(h.finalize())
}

pub fn bundle_checksum(bundle: &Bundle) -> String {
    checksum(bundle.iter())
}

/// Short digest of a single value, for displaying secret values.
pub fn value_digest(value: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(value);
    let full = hex::encode(h.finalize());
    format!("sha256:{}", &full[..12])
}

//! Content fingerprinting for deduplication.
//!
//! Uses xxHash64: non-cryptographic, stable across runs and processes,
//! and an order of magnitude faster than SHA-2 for this workload. The
//! fingerprint identifies content only within a single store; it is never
//! a security primitive. Two contents that collide are treated as the
//! same content by the result store.

use std::hash::Hasher;

use twox_hash::XxHash64;

/// Fingerprint the given content as 16 lowercase hex characters.
///
/// Equal byte sequences always produce equal fingerprints. The 64-bit
/// width means distinct contents can alias once a store approaches ~2^32
/// entries; callers needing more headroom can widen the hash without any
/// other change to the store.
pub fn content_fingerprint(content: &str) -> String {
    let mut hasher = XxHash64::default();
    hasher.write(content.as_bytes());
    format!("{:016x}", hasher.finish())
}

//! Fingerprints of gated output.
//!
//! A results view keeps the fingerprint of what it last rendered and redraws
//! only when a refetched report gates to something different.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::services::gate::GatedReport;

/// Fingerprint of a gated report.
pub fn compute_report(report: &GatedReport) -> String {
    compute(report)
}

/// SHA-256 of the value's JSON serialization, hex-encoded.
///
/// Serialization of the gated types cannot fail (no maps with non-string
/// keys), so an error degrades to hashing the empty string.
pub fn compute<T: Serialize>(value: &T) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    hash(&bytes)
}

fn hash(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

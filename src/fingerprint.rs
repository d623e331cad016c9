// src/fingerprint.rs
//! Stable identity for an error signature.
//!
//! Computed over the raw message before encryption. Each field is written
//! with a presence tag and a length prefix so that moving bytes between
//! fields (or `None` vs empty) can never produce the same input.

use sha2::{Digest, Sha256};

use crate::types::{Payload, Severity};

/// Length of a fingerprint in hex characters.
pub const FINGERPRINT_LEN: usize = 64;

pub fn fingerprint(severity: &Severity, message: &Payload, file: Option<&str>, line: Option<u32>) -> String {
    let mut hasher = Sha256::new();
    write_field(&mut hasher, Some(severity.as_str().as_bytes()));
    write_field(&mut hasher, Some(message.canonical().as_bytes()));
    write_field(&mut hasher, file.map(str::as_bytes));
    let line = line.map(|l| l.to_string());
    write_field(&mut hasher, line.as_deref().map(str::as_bytes));
    format!("{:x}", hasher.finalize())
}

/// Accept a caller-supplied fingerprint if it has the right shape.
pub fn normalize_supplied(candidate: &str) -> Option<String> {
    let trimmed = candidate.trim().to_ascii_lowercase();
    (trimmed.len() == FINGERPRINT_LEN && trimmed.bytes().all(|b| b.is_ascii_hexdigit())).then_some(trimmed)
}

fn write_field(hasher: &mut Sha256, field: Option<&[u8]>) {
    match field {
        Some(bytes) => {
            hasher.update([1u8]);
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        }
        None => hasher.update([0u8]),
    }
}

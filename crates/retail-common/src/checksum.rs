//! SHA-256 digests for batch payload integrity

use crate::error::{EtlError, Result};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of a byte slice
pub fn checksum_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Fail with a payload error when `data` does not hash to `expected`
pub fn verify_checksum(data: &[u8], expected: &str) -> Result<()> {
    let actual = checksum_bytes(data);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(EtlError::payload(format!(
            "checksum mismatch: expected {}, got {}",
            expected, actual
        )))
    }
}

//! Cryptographic Utilities

use rand::Rng;
use sha2::{Digest, Sha256};

/// Compute SHA-256 hash
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Random string of `len` characters drawn uniformly from `alphabet`
///
/// Uses the thread-local CSPRNG. Returns an empty string when `alphabet`
/// is empty.
pub fn random_string(alphabet: &[u8], len: usize) -> String {
    if alphabet.is_empty() {
        return String::new();
    }
    let mut rng = rand::rng();
    (0..len)
        .map(|_| alphabet[rng.random_range(0..alphabet.len())] as char)
        .collect()
}

//! Random opaque tokens for single-use flows.

use rand::{RngCore, rng};
use sha2::{Digest, Sha256};

/// Byte length of email-verification and password-reset tokens.
pub const SIDE_TOKEN_BYTES: usize = 32;

/// Generate `byte_len` random bytes from the thread-local CSPRNG and
/// hex-encode them.
pub fn generate(byte_len: usize) -> String {
    let mut bytes = vec![0u8; byte_len];
    rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// SHA-256 a token for comparison or storage without the plaintext.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

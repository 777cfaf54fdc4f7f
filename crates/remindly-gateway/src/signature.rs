//! Webhook ownership handshake.
//!
//! The provider signs `(token, timestamp, nonce)` by sorting the three
//! strings byte-wise, concatenating them without a separator and taking the
//! lowercase hex SHA-1 of the result. The server proves it knows the token by
//! recomputing the digest and echoing the provider's challenge back.

use sha1::{Digest, Sha1};

/// Compute the signature the provider would send for these parameters.
pub fn sign(timestamp: &str, nonce: &str, secret: &str) -> String {
    let mut parts = [secret, timestamp, nonce];
    parts.sort_unstable();

    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Check a handshake signature against the shared token.
///
/// Never errors; a mismatch of any kind is just `false`.
pub fn verify(signature: &str, timestamp: &str, nonce: &str, secret: &str) -> bool {
    ct_eq(&sign(timestamp, nonce, secret), signature)
}

// No early return on length mismatch.
fn ct_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let len = a.len().max(b.len());
    let mut diff = u8::from(a.len() != b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= x ^ y;
    }
    diff == 0
}

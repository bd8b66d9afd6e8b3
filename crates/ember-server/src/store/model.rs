use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

/// Stored in redb as bincode-encoded bytes, keyed by token.
/// `ciphertext` is a self-contained AEAD blob (nonce-prefixed); the store
/// never sees plaintext. Timestamps are plaintext so the reclamation sweep
/// can evict without decrypting.
#[derive(Debug, Clone, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct SecretRecord {
    /// Nonce-prefixed ChaCha20Poly1305 ciphertext of the payload.
    pub ciphertext: Vec<u8>,
    /// Unix timestamp (seconds) when the record was deposited. Informational.
    pub created_at: i64,
    /// Unix timestamp (seconds) at and after which the record is expired.
    pub expires_at: i64,
}

impl SecretRecord {
    /// Returns true once the expiry instant has been reached. A record
    /// deposited with a zero TTL is expired within its creation second.
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record(expires_at: i64) -> SecretRecord {
        SecretRecord {
            ciphertext: vec![1, 2, 3],
            created_at: 1000,
            expires_at,
        }
    }

    #[test]
    fn not_expired_before_deadline() {
        assert!(!make_record(2000).is_expired(1999));
    }

    #[test]
    fn expired_at_deadline() {
        assert!(make_record(2000).is_expired(2000));
    }

    #[test]
    fn expired_after_deadline() {
        assert!(make_record(2000).is_expired(5000));
    }
}

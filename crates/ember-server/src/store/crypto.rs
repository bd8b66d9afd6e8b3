use anyhow::Result;
use argon2::{Argon2, Params};
use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use zeroize::ZeroizeOnDrop;

use crate::error::CipherError;

/// Length of the ChaCha20Poly1305 key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the per-record random nonce in bytes.
pub const NONCE_LEN: usize = 12;

/// Length of the Poly1305 authentication tag in bytes.
pub const TAG_LEN: usize = 16;

/// Length of the persisted key-derivation salt in bytes.
pub const SALT_LEN: usize = 32;

/// 32-byte encryption key derived from the master key via Argon2id.
#[derive(ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

/// Derive a 32-byte encryption key from `master_key` and `salt` using Argon2id.
/// The salt is stored persistently (`ember.salt`) and reused across restarts so
/// the same master key always derives the same encryption key.
pub fn derive_key(master_key: &str, salt: &[u8; SALT_LEN]) -> Result<EncryptionKey> {
    let params = Params::new(
        65536, // m_cost: 64 MiB
        3,     // t_cost: 3 iterations
        1,     // p_cost: 1 lane
        Some(KEY_LEN),
    )
    .map_err(|e| anyhow::anyhow!("argon2 params: {e}"))?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let mut key = [0u8; KEY_LEN];
    argon2
        .hash_password_into(master_key.as_bytes(), salt, &mut key)
        .map_err(|e| anyhow::anyhow!("argon2 hash: {e}"))?;

    Ok(EncryptionKey(key))
}

/// Generate a fresh random 32-byte key without a key-derivation pass.
pub fn generate_key() -> EncryptionKey {
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    EncryptionKey(key)
}

/// Generate a fresh 32-byte random salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// ChaCha20Poly1305 wrapper holding the process-wide key for its lifetime.
///
/// Construction is explicit: the key is handed over once, here, and nothing
/// can read it back out.
#[derive(Clone)]
pub struct Cipher {
    aead: ChaCha20Poly1305,
}

impl Cipher {
    pub fn new(key: &EncryptionKey) -> Self {
        Self {
            aead: ChaCha20Poly1305::new(Key::from_slice(key.as_bytes())),
        }
    }

    /// Encrypt `plaintext` into a single opaque blob: `nonce || ciphertext+tag`.
    /// A fresh random nonce is drawn per call, so encrypting the same
    /// plaintext twice never yields the same blob.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from(nonce_bytes);

        let ciphertext = self
            .aead
            .encrypt(&nonce, plaintext)
            .map_err(|_| CipherError::Encrypt)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Decrypt a blob produced by [`Cipher::encrypt`].
    ///
    /// Fails with [`CipherError::Integrity`] when the blob is too short to
    /// hold a nonce and tag, fails authentication, or was encrypted under a
    /// different key.
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>, CipherError> {
        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::Integrity);
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.aead
            .decrypt(nonce, ciphertext)
            .map_err(|_| CipherError::Integrity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let cipher = Cipher::new(&generate_key());
        let plaintext = b"hello, ember!";
        let blob = cipher.encrypt(plaintext).unwrap();
        assert_eq!(cipher.decrypt(&blob).unwrap(), plaintext);
    }

    #[test]
    fn derived_key_round_trip() {
        let salt = generate_salt();
        let key = derive_key("test-master-key", &salt).unwrap();
        let cipher = Cipher::new(&key);
        let blob = cipher.encrypt(b"hello").unwrap();
        assert_eq!(cipher.decrypt(&blob).unwrap(), b"hello");
    }

    #[test]
    fn same_master_key_and_salt_derive_same_key() {
        let salt = generate_salt();
        let k1 = derive_key("master", &salt).unwrap();
        let k2 = derive_key("master", &salt).unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn wrong_key_fails() {
        let c1 = Cipher::new(&generate_key());
        let c2 = Cipher::new(&generate_key());
        let blob = c1.encrypt(b"secret").unwrap();
        assert!(matches!(c2.decrypt(&blob), Err(CipherError::Integrity)));
    }

    #[test]
    fn tampered_blob_fails() {
        let cipher = Cipher::new(&generate_key());
        let mut blob = cipher.encrypt(b"secret").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xff;
        assert!(matches!(cipher.decrypt(&blob), Err(CipherError::Integrity)));
    }

    #[test]
    fn truncated_blob_fails() {
        let cipher = Cipher::new(&generate_key());
        let blob = cipher.encrypt(b"secret").unwrap();
        assert!(matches!(
            cipher.decrypt(&blob[..NONCE_LEN + TAG_LEN - 1]),
            Err(CipherError::Integrity)
        ));
        assert!(matches!(cipher.decrypt(&[]), Err(CipherError::Integrity)));
    }

    #[test]
    fn encryption_is_non_deterministic() {
        let cipher = Cipher::new(&generate_key());
        let b1 = cipher.encrypt(b"same plaintext").unwrap();
        let b2 = cipher.encrypt(b"same plaintext").unwrap();
        assert_ne!(b1, b2);
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let cipher = Cipher::new(&generate_key());
        let blob = cipher.encrypt(b"").unwrap();
        assert_eq!(blob.len(), NONCE_LEN + TAG_LEN);
        assert_eq!(cipher.decrypt(&blob).unwrap(), b"");
    }
}

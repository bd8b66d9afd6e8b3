use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;

use crate::error::{StoreError, VaultError};
use crate::store::{Cipher, Store};

/// Raw token length in bytes; hex-encoded to twice as many characters.
const TOKEN_BYTES: usize = 16;

/// How many fresh tokens to try before giving up on a colliding insert.
const TOKEN_ATTEMPTS: usize = 8;

/// One-time secret vault: encrypts on the way in, decrypts exactly once on
/// the way out.
///
/// `Vault` owns the policy layer. The [`Store`] below it moves opaque bytes
/// and the [`Cipher`] seals them; everything about tokens, expiry deadlines
/// and the consume-once contract lives here.
#[derive(Clone)]
pub struct Vault {
    store: Store,
    cipher: Cipher,
}

impl Vault {
    pub fn new(store: Store, cipher: Cipher) -> Self {
        Self { store, cipher }
    }

    /// Encrypt `plaintext` and file it under a fresh random token, valid for
    /// `ttl_minutes` from now.
    ///
    /// A TTL of zero produces a record that is already expired; it can never
    /// be consumed and only waits for the sweeper. Returns the token, the
    /// only capability that can ever retrieve the secret.
    pub fn deposit(&self, plaintext: &[u8], ttl_minutes: u64) -> Result<String, VaultError> {
        let ciphertext = self.cipher.encrypt(plaintext)?;
        let expires_at = expiry_deadline(Store::now(), ttl_minutes);

        for _ in 0..TOKEN_ATTEMPTS {
            let token = generate_token();
            match self.store.put(&token, &ciphertext, expires_at) {
                Ok(()) => {
                    debug!(token = %fragment(&token), ttl_minutes, "secret deposited");
                    return Ok(token);
                }
                Err(StoreError::DuplicateToken) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(VaultError::TokenCollision)
    }

    /// Consume the secret under `token`: delete the record and return the
    /// plaintext, exactly once.
    ///
    /// Any outcome short of success reads the same from the outside:
    /// unknown, already consumed, expired and undecryptable tokens all
    /// return `Ok(None)`. Only storage failures surface as errors. The
    /// record is gone after the first call no matter which case applied.
    pub fn consume(&self, token: &str) -> Result<Option<Vec<u8>>, VaultError> {
        let record = match self.store.take(token) {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(token = %fragment(token), "consume miss");
                return Ok(None);
            }
            Err(StoreError::Corrupt) => {
                debug!(token = %fragment(token), "consume hit undecodable record");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if record.is_expired(Store::now()) {
            debug!(token = %fragment(token), "consume hit expired record");
            return Ok(None);
        }

        match self.cipher.decrypt(&record.ciphertext) {
            Ok(plaintext) => {
                debug!(token = %fragment(token), "secret consumed");
                Ok(Some(plaintext))
            }
            Err(_) => {
                debug!(token = %fragment(token), "consume failed decryption");
                Ok(None)
            }
        }
    }

    /// Delete expired records now; see [`Store::reap_expired`].
    pub fn reap_expired(&self) -> Result<usize, VaultError> {
        Ok(self.store.reap_expired()?)
    }

    /// Spawn the periodic background sweep; see [`Store::spawn_sweep`].
    pub fn spawn_sweep(&self, interval: std::time::Duration) {
        self.store.clone().spawn_sweep(interval);
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn expiry_deadline(now: i64, ttl_minutes: u64) -> i64 {
    let ttl_secs = ttl_minutes.saturating_mul(60).min(i64::MAX as u64) as i64;
    now.saturating_add(ttl_secs)
}

/// Leading slice of a token for log lines. Never logs the full capability.
fn fragment(token: &str) -> &str {
    token.get(..8).unwrap_or(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::crypto::generate_key;
    use tempfile::tempdir;

    fn make_vault() -> (Vault, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("vault.db")).unwrap();
        let cipher = Cipher::new(&generate_key());
        (Vault::new(store, cipher), dir)
    }

    #[test]
    fn deposit_returns_hex_token() {
        let (v, _dir) = make_vault();
        let token = v.deposit(b"hello", 10).unwrap();
        assert_eq!(token.len(), TOKEN_BYTES * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn deposit_then_consume_round_trips() {
        let (v, _dir) = make_vault();
        let token = v.deposit(b"the launch code is 0000", 10).unwrap();
        let plaintext = v.consume(&token).unwrap().expect("first consume wins");
        assert_eq!(plaintext, b"the launch code is 0000");
    }

    #[test]
    fn second_consume_returns_none() {
        let (v, _dir) = make_vault();
        let token = v.deposit(b"once", 10).unwrap();
        assert!(v.consume(&token).unwrap().is_some());
        assert!(v.consume(&token).unwrap().is_none());
    }

    #[test]
    fn unknown_token_returns_none() {
        let (v, _dir) = make_vault();
        assert!(v.consume("deadbeefdeadbeefdeadbeefdeadbeef").unwrap().is_none());
    }

    #[test]
    fn zero_ttl_is_born_expired() {
        let (v, _dir) = make_vault();
        let token = v.deposit(b"never readable", 0).unwrap();
        assert!(v.consume(&token).unwrap().is_none());
    }

    #[test]
    fn consuming_an_expired_record_destroys_it() {
        let (v, _dir) = make_vault();
        let ciphertext = v.cipher.encrypt(b"stale").unwrap();
        v.store.put("aged", &ciphertext, Store::now() - 5).unwrap();

        assert!(v.consume("aged").unwrap().is_none());
        // The miss itself removed the record.
        assert!(v.store.take("aged").unwrap().is_none());
    }

    #[test]
    fn foreign_key_reads_like_a_miss() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("vault.db")).unwrap();
        let writer = Vault::new(store.clone(), Cipher::new(&generate_key()));
        let reader = Vault::new(store, Cipher::new(&generate_key()));

        let token = writer.deposit(b"sealed elsewhere", 10).unwrap();
        assert!(reader.consume(&token).unwrap().is_none());
    }

    #[test]
    fn concurrent_consumes_have_exactly_one_winner() {
        let (v, _dir) = make_vault();
        let token = v.deposit(b"contested", 10).unwrap();

        let winners: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| v.consume(&token).unwrap().is_some()))
                .collect();
            handles
                .into_iter()
                .map(|h| usize::from(h.join().unwrap()))
                .sum()
        });

        assert_eq!(winners, 1);
    }

    #[test]
    fn tokens_are_unique_across_deposits() {
        let (v, _dir) = make_vault();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..64 {
            assert!(seen.insert(v.deposit(b"x", 10).unwrap()));
        }
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let (v, _dir) = make_vault();
        let token = v.deposit(b"", 10).unwrap();
        assert_eq!(v.consume(&token).unwrap().unwrap(), b"");
    }

    #[test]
    fn large_plaintext_round_trips() {
        let (v, _dir) = make_vault();
        let big = vec![0xabu8; 256 * 1024];
        let token = v.deposit(&big, 10).unwrap();
        assert_eq!(v.consume(&token).unwrap().unwrap(), big);
    }

    #[test]
    fn reap_leaves_live_secrets_consumable() {
        let (v, _dir) = make_vault();
        let live = v.deposit(b"keep me", 10).unwrap();
        v.deposit(b"drop me", 0).unwrap();

        assert_eq!(v.reap_expired().unwrap(), 1);
        assert_eq!(v.consume(&live).unwrap().unwrap(), b"keep me");
    }

    #[test]
    fn expiry_deadline_saturates() {
        assert_eq!(expiry_deadline(100, 0), 100);
        assert_eq!(expiry_deadline(100, 1), 160);
        assert_eq!(expiry_deadline(i64::MAX - 1, u64::MAX), i64::MAX);
    }

    #[test]
    fn fragment_never_exceeds_eight_chars() {
        assert_eq!(fragment("0123456789abcdef"), "01234567");
        assert_eq!(fragment("short"), "short");
        assert_eq!(fragment(""), "");
    }
}

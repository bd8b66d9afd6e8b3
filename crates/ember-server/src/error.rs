use thiserror::Error;

/// Errors produced by the cipher layer.
#[derive(Debug, Error)]
pub enum CipherError {
    /// AEAD encryption failed.
    #[error("aead encryption failed")]
    Encrypt,

    /// The ciphertext is truncated, was tampered with, or was produced
    /// under a different key. All three are indistinguishable on purpose.
    #[error("ciphertext failed integrity check")]
    Integrity,
}

/// Errors produced by the vault store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A record with this token already exists; the insert was rolled back
    /// and the existing record is untouched.
    #[error("token already exists")]
    DuplicateToken,

    /// Stored bytes did not decode into a record.
    #[error("stored record is corrupt")]
    Corrupt,

    /// The underlying database could not be reached or the transaction
    /// failed.
    #[error("storage unavailable: {0}")]
    Storage(#[source] anyhow::Error),
}

impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Storage(e.into())
    }
}

impl From<redb::TableError> for StoreError {
    fn from(e: redb::TableError) -> Self {
        Self::Storage(e.into())
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(e: redb::StorageError) -> Self {
        Self::Storage(e.into())
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(e: redb::CommitError) -> Self {
        Self::Storage(e.into())
    }
}

/// Errors surfaced by the lifecycle protocol to the transport shell.
///
/// Note what is absent: "not found", "expired" and "tampered" are not
/// errors. They all collapse to a `None` result on the read path so a
/// caller cannot probe why a token failed to resolve.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Ran out of attempts to allocate an unused token.
    #[error("could not allocate an unused token")]
    TokenCollision,

    /// Encryption failed during deposit.
    #[error(transparent)]
    Cipher(#[from] CipherError),

    /// The store could not complete the operation.
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            StoreError::DuplicateToken.to_string(),
            "token already exists"
        );
        assert_eq!(
            CipherError::Integrity.to_string(),
            "ciphertext failed integrity check"
        );
        assert_eq!(
            VaultError::TokenCollision.to_string(),
            "could not allocate an unused token"
        );
    }

    #[test]
    fn storage_error_keeps_cause() {
        let e = StoreError::Storage(anyhow::anyhow!("disk on fire"));
        assert!(e.to_string().contains("disk on fire"));
    }
}

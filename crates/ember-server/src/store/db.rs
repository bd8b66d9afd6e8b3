use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use tokio::time;
use tracing::{debug, warn};

use super::model::SecretRecord;
use crate::error::StoreError;

const SECRETS: TableDefinition<&str, &[u8]> = TableDefinition::new("secrets");

/// Thread-safe handle to the redb store.
///
/// The store maps tokens to opaque encrypted records. It holds no key
/// material and cannot inspect what it stores beyond the two timestamps.
#[derive(Clone)]
pub struct Store {
    pub(crate) db: Arc<Database>,
}

impl Store {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).context("open redb database")?;

        // Ensure the table exists so read transactions never miss it.
        let write_txn = db.begin_write()?;
        write_txn.open_table(SECRETS)?;
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    pub(crate) fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }

    /// Insert a new record under `token`.
    ///
    /// The uniqueness check and the insert happen in the same write
    /// transaction; an existing record is never overwritten and the token
    /// is rejected with [`StoreError::DuplicateToken`] instead.
    pub fn put(&self, token: &str, ciphertext: &[u8], expires_at: i64) -> Result<(), StoreError> {
        let record = SecretRecord {
            ciphertext: ciphertext.to_vec(),
            created_at: Self::now(),
            expires_at,
        };
        let bytes = encode(&record)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SECRETS)?;
            if table.insert(token, bytes.as_slice())?.is_some() {
                // Dropping the uncommitted transaction rolls the insert back.
                return Err(StoreError::DuplicateToken);
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Atomically read and delete the record under `token`.
    ///
    /// Removal and retrieval are one write transaction: of any number of
    /// concurrent `take` calls on the same token, exactly one observes the
    /// record and the rest observe nothing. Expiry is not checked here; the
    /// caller judges the record it got back.
    pub fn take(&self, token: &str) -> Result<Option<SecretRecord>, StoreError> {
        let write_txn = self.db.begin_write()?;
        let raw = {
            let mut table = write_txn.open_table(SECRETS)?;
            // Clone the removed bytes immediately so the AccessGuard (which
            // borrows `table`) is dropped inside the block rather than at the
            // end of the enclosing statement.
            let bytes: Option<Vec<u8>> = table.remove(token)?.map(|guard| guard.value().to_vec());
            bytes
        };
        write_txn.commit()?;

        match raw {
            None => Ok(None),
            Some(bytes) => decode(&bytes).map(Some),
        }
    }

    /// Delete all records whose expiry has passed, plus any that no longer
    /// decode. Returns the number actually deleted.
    ///
    /// Runs as two passes: a read pass collects candidates without blocking
    /// writers, then a write pass re-checks each candidate before deleting
    /// it, so a record consumed in between is not counted twice.
    pub fn reap_expired(&self) -> Result<usize, StoreError> {
        let now = Self::now();

        let candidates: Vec<String> = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(SECRETS)?;
            let mut tokens = Vec::new();
            for item in table.iter()? {
                let (k, v) = item?;
                let dead = match decode(v.value()) {
                    Ok(record) => record.is_expired(now),
                    Err(_) => true,
                };
                if dead {
                    tokens.push(k.value().to_owned());
                }
            }
            tokens
        };

        if candidates.is_empty() {
            return Ok(0);
        }

        let write_txn = self.db.begin_write()?;
        let mut reaped = 0usize;
        {
            let mut table = write_txn.open_table(SECRETS)?;
            for token in &candidates {
                let still_dead = match table.get(token.as_str())? {
                    None => false,
                    Some(guard) => match decode(guard.value()) {
                        Ok(record) => record.is_expired(now),
                        Err(_) => true,
                    },
                };
                if still_dead {
                    table.remove(token.as_str())?;
                    reaped += 1;
                }
            }
        }
        write_txn.commit()?;

        debug!(reaped, "reaped expired records");
        Ok(reaped)
    }

    /// Number of records currently in the store, live or not.
    pub fn len(&self) -> Result<u64, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SECRETS)?;
        Ok(table.len()?)
    }

    /// Spawn a background Tokio task that calls [`Store::reap_expired`]
    /// every `interval`.
    pub fn spawn_sweep(self, interval: Duration) {
        // `tokio::time::interval` panics on a zero period; clamp before the
        // task detaches, where a panic would go unseen.
        let interval = if interval.is_zero() {
            warn!("sweep interval of zero clamped to 1s");
            Duration::from_secs(1)
        } else {
            interval
        };
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.tick().await; // skip first immediate tick
            loop {
                ticker.tick().await;
                match self.reap_expired() {
                    Ok(0) => {}
                    Ok(reaped) => {
                        tracing::info!(reaped, "background sweep removed expired secrets");
                    }
                    Err(e) => {
                        warn!(error = %e, "background sweep error");
                    }
                }
            }
        });
    }
}

fn encode(record: &SecretRecord) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(record, bincode::config::standard())
        .map_err(|e| StoreError::Storage(anyhow::Error::new(e).context("bincode encode record")))
}

fn decode(bytes: &[u8]) -> Result<SecretRecord, StoreError> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(record, _)| record)
        .map_err(|_| StoreError::Corrupt)
}

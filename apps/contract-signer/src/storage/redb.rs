//! ReDB storage implementation for the audit log.
//!
//! Provides persistent storage for:
//! - Audit log entries, keyed by sequence number
//! - Audit metadata (the log's signing key)
//!
//! Values are JSON-serialized entries or raw bytes.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;

use crate::audit::AuditEntry;
use crate::error::{ContractError, ContractResult};

// Table definitions
const AUDIT_LOG: TableDefinition<u64, &[u8]> = TableDefinition::new("audit_log");
const AUDIT_META: TableDefinition<&str, &[u8]> = TableDefinition::new("audit_meta");

/// Storage wrapper for ReDB.
///
/// Thread-safe via internal Arc. Clone is cheap.
#[derive(Clone)]
pub struct Storage {
    db: Arc<Database>,
}

impl Storage {
    /// Open or create a database at the given path.
    ///
    /// Creates parent directories if they don't exist.
    pub fn open(path: &Path) -> ContractResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path).map_err(|e| ContractError::Storage(e.to_string()))?;
        Self::init_tables(&db)?;

        tracing::debug!(path = %path.display(), "Opened storage database");

        Ok(Self { db: Arc::new(db) })
    }

    /// Open an in-memory database for testing.
    #[cfg(test)]
    pub fn open_memory() -> ContractResult<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(|e| ContractError::Storage(e.to_string()))?;
        Self::init_tables(&db)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn init_tables(db: &Database) -> ContractResult<()> {
        let write_txn = db.begin_write()?;
        {
            // Just opening the tables creates them if they don't exist
            let _ = write_txn.open_table(AUDIT_LOG)?;
            let _ = write_txn.open_table(AUDIT_META)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    // =========================================================================
    // Audit Metadata
    // =========================================================================

    /// Get a metadata value.
    pub fn get_meta(&self, key: &str) -> ContractResult<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_META)?;

        Ok(table.get(key)?.map(|v| v.value().to_vec()))
    }

    /// Return the stored metadata value, or store and return `init()` if absent.
    ///
    /// Runs in one write transaction, so concurrent openers agree on the value.
    pub fn get_or_init_meta(
        &self,
        key: &str,
        init: impl FnOnce() -> ContractResult<Vec<u8>>,
    ) -> ContractResult<Vec<u8>> {
        let write_txn = self.db.begin_write()?;
        let value = {
            let mut table = write_txn.open_table(AUDIT_META)?;
            let existing = table.get(key)?.map(|v| v.value().to_vec());
            match existing {
                Some(value) => value,
                None => {
                    let value = init()?;
                    table.insert(key, value.as_slice())?;
                    tracing::debug!(key, "Initialized audit metadata");
                    value
                }
            }
        };
        write_txn.commit()?;
        Ok(value)
    }

    // =========================================================================
    // Audit Log
    // =========================================================================

    /// Get the latest audit sequence number.
    pub fn get_latest_audit_seq(&self) -> ContractResult<Option<u64>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_LOG)?;

        let latest = table.iter()?.next_back().transpose()?.map(|(k, _)| k.value());

        Ok(latest)
    }

    /// Store a single audit entry by sequence number.
    pub fn put_audit_entry(&self, entry: &AuditEntry) -> ContractResult<()> {
        let value = serde_json::to_vec(entry)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(AUDIT_LOG)?;
            table.insert(entry.seq, value.as_slice())?;
        }
        write_txn.commit()?;
        tracing::trace!(seq = entry.seq, "Stored audit entry");
        Ok(())
    }

    /// Get a single audit entry by sequence number.
    pub fn get_audit_entry(&self, seq: u64) -> ContractResult<Option<AuditEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_LOG)?;

        match table.get(seq)? {
            Some(value) => {
                let entry: AuditEntry = serde_json::from_slice(value.value())?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// Get audit log entries in a half-open range.
    pub fn get_audit_log_range<T: DeserializeOwned>(
        &self,
        start: u64,
        end: u64,
    ) -> ContractResult<Vec<(u64, T)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_LOG)?;

        let entries: Result<Vec<_>, ContractError> = table
            .range(start..end)?
            .map(|entry| {
                let (k, v) = entry?;
                let parsed: T = serde_json::from_slice(v.value())?;
                Ok((k.value(), parsed))
            })
            .collect();

        entries
    }

    /// Overwrite the raw bytes of an audit entry. Test-only tampering hook.
    #[cfg(test)]
    pub fn put_raw_audit_entry(&self, seq: u64, value: &[u8]) -> ContractResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(AUDIT_LOG)?;
            table.insert(seq, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

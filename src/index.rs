//! Persistent source-path → fingerprint index backing the local mirror.
//!
//! The store outlives any single run: a key is present iff some run has
//! observed that source file. `put` commits atomically, and the handle is
//! shared across worker threads without extra locking.

use std::path::Path;

use anyhow::{Context, Result};
use redb::{Database, ReadableTable, TableDefinition};

const FINGERPRINTS: TableDefinition<&str, &str> = TableDefinition::new("fingerprints");

pub struct HashIndex {
    db: Database,
}

impl HashIndex {
    /// Opens the database file, creating it if missing.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)
            .with_context(|| format!("opening index {}", path.display()))?;
        Ok(Self { db })
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = match txn.open_table(FINGERPRINTS) {
            Ok(table) => table,
            // First run: nothing has been put yet.
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(FINGERPRINTS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded relational store backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `users`: user_id → serialized StoredUser
//! - `usernames`: normalized username → user_id (unique)
//! - `emails`: lowercase email → user_id (unique)
//! - `calls`: call_id → serialized StoredCall
//! - `active_calls`: user_id → call_id of the single non-terminal call
//! - `user_calls`: `user_id|seq` → call_id (history index)
//! - `messages`: message_id → serialized StoredMessage
//! - `user_messages`: `user_id|seq` → message_id (both participants)
//! - `sequences`: name → last issued value
//!
//! redb allows a single write transaction at a time, so every check-then-write
//! sequence performed inside one write transaction is atomic with respect to
//! all other writers.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, Table, TableDefinition, WriteTransaction};

// =============================================================================
// Table Definitions
// =============================================================================

pub(crate) const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");
pub(crate) const USERNAMES: TableDefinition<&str, &str> = TableDefinition::new("usernames");
pub(crate) const EMAILS: TableDefinition<&str, &str> = TableDefinition::new("emails");

pub(crate) const CALLS: TableDefinition<&str, &[u8]> = TableDefinition::new("calls");
/// Unique constraint backing the one-active-call invariant.
pub(crate) const ACTIVE_CALLS: TableDefinition<&str, &str> = TableDefinition::new("active_calls");
pub(crate) const USER_CALLS: TableDefinition<&str, &str> = TableDefinition::new("user_calls");

pub(crate) const MESSAGES: TableDefinition<&str, &[u8]> = TableDefinition::new("messages");
pub(crate) const USER_MESSAGES: TableDefinition<&str, &str> = TableDefinition::new("user_messages");

const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store task failed: {0}")]
    Background(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Index Key Helpers
// =============================================================================

/// Composite key `owner|seq` with a zero-padded sequence so lexical order
/// matches insertion order.
pub(crate) fn index_key(owner: &str, seq: u64) -> String {
    format!("{owner}|{seq:020}")
}

/// Half-open key range covering every `owner|...` entry.
///
/// `}` sorts directly after `|`, so `owner}` bounds the prefix.
pub(crate) fn index_range(owner: &str) -> (String, String) {
    (format!("{owner}|"), format!("{owner}}}"))
}

/// Issue the next value of a named sequence inside a write transaction.
pub(crate) fn next_sequence(txn: &WriteTransaction, name: &str) -> StoreResult<u64> {
    let mut table = txn.open_table(SEQUENCES)?;
    let current = table.get(name)?.map(|v| v.value()).unwrap_or(0);
    let next = current + 1;
    table.insert(name, next)?;
    Ok(next)
}

/// Read and deserialize a JSON row.
pub(crate) fn read_row<T, Tbl>(table: &Tbl, key: &str) -> StoreResult<Option<T>>
where
    T: serde::de::DeserializeOwned,
    Tbl: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key)? {
        Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
        None => Ok(None),
    }
}

/// Serialize and write a JSON row.
pub(crate) fn write_row<T: serde::Serialize>(
    table: &mut Table<'_, &'static str, &'static [u8]>,
    key: &str,
    row: &T,
) -> StoreResult<()> {
    let json = serde_json::to_vec(row)?;
    table.insert(key, json.as_slice())?;
    Ok(())
}

// =============================================================================
// Store
// =============================================================================

/// Handle to the embedded database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(USERNAMES)?;
            let _ = write_txn.open_table(EMAILS)?;
            let _ = write_txn.open_table(CALLS)?;
            let _ = write_txn.open_table(ACTIVE_CALLS)?;
            let _ = write_txn.open_table(USER_CALLS)?;
            let _ = write_txn.open_table(MESSAGES)?;
            let _ = write_txn.open_table(USER_MESSAGES)?;
            let _ = write_txn.open_table(SEQUENCES)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    pub(crate) fn db(&self) -> &Database {
        &self.db
    }

    /// Run blocking store work on the blocking thread pool.
    ///
    /// The closure keeps running to completion even if the awaiting future is
    /// dropped, so a connection closing mid-write never loses a commit.
    pub async fn run<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&Store) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || work(&store))
            .await
            .map_err(|e| E::from(StoreError::Background(e.to_string())))?
    }

    /// Verify the database answers a read transaction.
    pub fn health_check(&self) -> StoreResult<()> {
        use redb::ReadableDatabase;

        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(USERS)?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
pub(crate) fn temp_store() -> (Store, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(&dir.path().join("test.redb")).unwrap();
    (store, dir)
}

/// Overwrite a raw row, bypassing the repositories.
#[cfg(test)]
pub(crate) fn overwrite_row(store: &Store, table: TableDefinition<&str, &[u8]>, key: &str, bytes: &[u8]) {
    let txn = store.db().begin_write().unwrap();
    {
        let mut table = txn.open_table(table).unwrap();
        table.insert(key, bytes).unwrap();
    }
    txn.commit().unwrap();
}

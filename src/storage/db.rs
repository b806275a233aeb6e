//! Embedded ACID database backed by redb (pure Rust).
//!
//! ## Table Layout
//!
//! - `users`: id → serialized User, plus uuid / email / access-key indexes
//! - `devices`: udid → serialized Device, plus `user_id_be|udid` owner index
//! - `ech_keys`: id → serialized EchKey
//! - `tunnels`, `nodes`: id → serialized row
//! - `cloud_instances`: ipv4 → serialized row
//! - `wallets`, `wallet_changes`, `withdraw_accounts`, `withdraws`
//! - `meta`: sequence counters and the last-used ECH config id

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};
use serde::{de::DeserializeOwned, Serialize};

// =============================================================================
// Table Definitions
// =============================================================================

pub(super) const USERS: TableDefinition<u64, &[u8]> = TableDefinition::new("users");
pub(super) const USER_BY_UUID: TableDefinition<&str, u64> = TableDefinition::new("user_by_uuid");
pub(super) const USER_BY_EMAIL: TableDefinition<&str, u64> = TableDefinition::new("user_by_email");
pub(super) const USER_BY_ACCESS_KEY: TableDefinition<&str, u64> =
    TableDefinition::new("user_by_access_key");

pub(super) const DEVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("devices");
/// Owner index: `user_id_be | udid` → udid, for per-user range scans.
pub(super) const DEVICES_BY_USER: TableDefinition<&[u8], &str> =
    TableDefinition::new("devices_by_user");

pub(super) const ECH_KEYS: TableDefinition<u64, &[u8]> = TableDefinition::new("ech_keys");

pub(super) const TUNNELS: TableDefinition<u64, &[u8]> = TableDefinition::new("tunnels");
pub(super) const NODES: TableDefinition<u64, &[u8]> = TableDefinition::new("nodes");
pub(super) const CLOUD_INSTANCES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("cloud_instances");

pub(super) const WALLETS: TableDefinition<u64, &[u8]> = TableDefinition::new("wallets");
pub(super) const WALLET_CHANGES: TableDefinition<u64, &[u8]> =
    TableDefinition::new("wallet_changes");
pub(super) const WITHDRAW_ACCOUNTS: TableDefinition<u64, &[u8]> =
    TableDefinition::new("withdraw_accounts");
pub(super) const WITHDRAWS: TableDefinition<u64, &[u8]> = TableDefinition::new("withdraws");

pub(super) const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Store
// =============================================================================

/// Handle to the embedded database. Cheap to share behind an `Arc`.
pub struct Store {
    pub(super) db: Database,
}

impl Store {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail.
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(USER_BY_UUID)?;
            let _ = write_txn.open_table(USER_BY_EMAIL)?;
            let _ = write_txn.open_table(USER_BY_ACCESS_KEY)?;
            let _ = write_txn.open_table(DEVICES)?;
            let _ = write_txn.open_table(DEVICES_BY_USER)?;
            let _ = write_txn.open_table(ECH_KEYS)?;
            let _ = write_txn.open_table(TUNNELS)?;
            let _ = write_txn.open_table(NODES)?;
            let _ = write_txn.open_table(CLOUD_INSTANCES)?;
            let _ = write_txn.open_table(WALLETS)?;
            let _ = write_txn.open_table(WALLET_CHANGES)?;
            let _ = write_txn.open_table(WITHDRAW_ACCOUNTS)?;
            let _ = write_txn.open_table(WITHDRAWS)?;
            let _ = write_txn.open_table(META)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }
}

// =============================================================================
// Shared helpers
// =============================================================================

pub(super) fn to_bytes<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub(super) fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Allocate the next value of a named sequence inside an open write
/// transaction.
pub(super) fn bump_seq(
    meta: &mut redb::Table<'_, &str, u64>,
    name: &str,
) -> StoreResult<u64> {
    let next = meta.get(name)?.map(|g| g.value()).unwrap_or(0) + 1;
    meta.insert(name, next)?;
    Ok(next)
}

/// Owner-index key: `user_id_be | udid`.
pub(super) fn device_index_key(user_id: u64, udid: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + udid.len());
    key.extend_from_slice(&user_id.to_be_bytes());
    key.extend_from_slice(udid.as_bytes());
    key
}

/// Range bounds covering every owner-index key of one user.
pub(super) fn device_index_bounds(user_id: u64) -> (Vec<u8>, Vec<u8>) {
    let start = user_id.to_be_bytes().to_vec();
    let mut end = start.clone();
    end.extend_from_slice(&[0xFF; 64]);
    (start, end)
}

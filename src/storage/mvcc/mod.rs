// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! MVCC primitives: the reader resolving visibility at a timestamp, the
//! buffering transaction, and the typed transactional outcomes.

mod reader;
pub use self::reader::MvccReader;
mod txn;
pub use self::txn::{
    acquire_pessimistic_lock, batch_rollback, check_txn_status, commit, gc, heartbeat,
    pessimistic_rollback, prewrite, resolve_lock, MvccTxn,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use txn_types::{Lock, TimeStamp};

/// The lock picture handed back to a conflicting reader or writer, enough
/// to drive `check_txn_status` / `resolve_lock` on the owning transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    pub primary_lock: Vec<u8>,
    pub lock_version: TimeStamp,
    pub key: Vec<u8>,
    pub lock_ttl: u64,
    pub lock_type: String,
}

impl LockInfo {
    pub fn from_lock(key: &[u8], lock: &Lock) -> LockInfo {
        LockInfo {
            primary_lock: lock.primary.clone(),
            lock_version: lock.ts,
            key: key.to_vec(),
            lock_ttl: lock.ttl,
            lock_type: format!("{:?}", lock.lock_type),
        }
    }
}

/// What `check_txn_status` decided about a primary lock.
#[derive(Debug, Clone, PartialEq)]
pub enum TxnStatus {
    /// No lock and no commit record: a rollback tombstone was written.
    RolledBack,
    Committed { commit_ts: TimeStamp },
    /// The lock is alive; its current TTL is reported.
    Uncommitted { lock_ttl: u64 },
    LockNotExist,
}

#[derive(Debug, Error)]
pub enum MvccError {
    #[error("key is locked: {0:?}")]
    KeyIsLocked(LockInfo),
    #[error(
        "write conflict: txn {start_ts} sees commit {conflict_commit_ts} of txn {conflict_start_ts} on key {key:?}"
    )]
    WriteConflict {
        start_ts: TimeStamp,
        conflict_start_ts: TimeStamp,
        conflict_commit_ts: TimeStamp,
        key: Vec<u8>,
        primary: Vec<u8>,
    },
    #[error("key {key:?} already exists")]
    AlreadyExist { key: Vec<u8> },
    #[error("txn lock not found, start_ts {start_ts}, commit_ts {commit_ts}, key {key:?}")]
    TxnLockNotFound {
        start_ts: TimeStamp,
        commit_ts: TimeStamp,
        key: Vec<u8>,
    },
    #[error("primary mismatch: lock primary {lock_primary:?}, requested key {key:?}")]
    PrimaryMismatch {
        lock_primary: Vec<u8>,
        key: Vec<u8>,
    },
    #[error("pessimistic lock of txn {start_ts} on key {key:?} was rolled back")]
    PessimisticLockNotFound {
        start_ts: TimeStamp,
        key: Vec<u8>,
    },
    #[error("engine: {0}")]
    Engine(#[from] engine_traits::Error),
    #[error("record codec: {0}")]
    Codec(#[from] txn_types::Error),
}

pub type Result<T> = std::result::Result<T, MvccError>;

/// A lock found on a key that blocks the current operation.
pub fn locked(key: &[u8], lock: &Lock) -> MvccError {
    MvccError::KeyIsLocked(LockInfo::from_lock(key, lock))
}

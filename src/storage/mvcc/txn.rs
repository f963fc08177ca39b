// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! The write-side MVCC verbs. Each action validates against an
//! [`MvccReader`] snapshot and buffers its mutations into an [`MvccTxn`];
//! the caller submits the buffer as one atomic engine write, so a failed
//! action leaves nothing behind.

use engine_traits::{Snapshot, CF_TXN_DATA, CF_TXN_LOCK, CF_TXN_WRITE};
use txn_types::{
    Key, Lock, LockType, Mutation, TimeStamp, Value, Write, WriteType, SHORT_VALUE_MAX_LEN,
};

use super::reader::MvccReader;
use super::{locked, MvccError, Result, TxnStatus};
use crate::store::WriteOp;

pub struct MvccTxn {
    pub start_ts: TimeStamp,
    writes: Vec<WriteOp>,
}

impl MvccTxn {
    pub fn new(start_ts: TimeStamp) -> MvccTxn {
        MvccTxn {
            start_ts,
            writes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn into_writes(self) -> Vec<WriteOp> {
        self.writes
    }

    fn put_lock(&mut self, key: &Key, lock: &Lock) {
        self.writes.push(WriteOp::put(
            CF_TXN_LOCK,
            key.as_encoded().clone(),
            lock.to_bytes(),
        ));
    }

    fn unlock_key(&mut self, key: &Key) {
        self.writes
            .push(WriteOp::delete(CF_TXN_LOCK, key.as_encoded().clone()));
    }

    fn put_write(&mut self, key: &Key, commit_ts: TimeStamp, write: &Write) {
        self.writes.push(WriteOp::put(
            CF_TXN_WRITE,
            key.clone().append_ts(commit_ts).into_encoded(),
            write.to_bytes(),
        ));
    }

    fn delete_write(&mut self, key: &Key, commit_ts: TimeStamp) {
        self.writes.push(WriteOp::delete(
            CF_TXN_WRITE,
            key.clone().append_ts(commit_ts).into_encoded(),
        ));
    }

    fn put_data(&mut self, key: &Key, start_ts: TimeStamp, value: Value) {
        self.writes.push(WriteOp::put(
            CF_TXN_DATA,
            key.clone().append_ts(start_ts).into_encoded(),
            value,
        ));
    }

    fn delete_data(&mut self, key: &Key, start_ts: TimeStamp) {
        self.writes.push(WriteOp::delete(
            CF_TXN_DATA,
            key.clone().append_ts(start_ts).into_encoded(),
        ));
    }
}

/// Finds the commit or rollback record a transaction left on `key`, if
/// any. Our record sits at `commit_ts > start_ts`, or exactly at
/// `start_ts` for a rollback tombstone.
fn get_txn_commit_record<S: Snapshot>(
    reader: &MvccReader<S>,
    key: &Key,
    start_ts: TimeStamp,
) -> Result<Option<(TimeStamp, Write)>> {
    let mut seek_ts = TimeStamp::max();
    while let Some((commit_ts, write)) = reader.seek_write(key, seek_ts)? {
        if write.start_ts == start_ts {
            return Ok(Some((commit_ts, write)));
        }
        if commit_ts <= start_ts {
            return Ok(None);
        }
        seek_ts = commit_ts.prev();
    }
    Ok(None)
}

/// First phase of 2PC for one mutation. `pessimistic` marks keys that must
/// already hold this transaction's pessimistic lock.
#[allow(clippy::too_many_arguments)]
pub fn prewrite<S: Snapshot>(
    txn: &mut MvccTxn,
    reader: &MvccReader<S>,
    mutation: Mutation,
    primary: &[u8],
    lock_ttl: u64,
    txn_size: u64,
    pessimistic: bool,
    for_update_ts: TimeStamp,
) -> Result<()> {
    let start_ts = txn.start_ts;
    let key = mutation.key().clone();

    match reader.load_lock(&key)? {
        Some(lock) if lock.ts != start_ts => {
            return Err(locked(&key.to_raw()?, &lock));
        }
        Some(lock) => {
            if !lock.is_pessimistic() {
                // Retried prewrite; the first one stands.
                return Ok(());
            }
            // Pessimistic lock being upgraded below.
        }
        None => {
            if pessimistic {
                return Err(MvccError::PessimisticLockNotFound {
                    start_ts,
                    key: key.to_raw()?,
                });
            }
        }
    }

    // Pessimistic mutations resolved their conflicts when the lock was
    // taken; optimistic ones check here.
    if !pessimistic {
        if let Some((commit_ts, write)) = reader.seek_write(&key, TimeStamp::max())? {
            if commit_ts > start_ts {
                return Err(MvccError::WriteConflict {
                    start_ts,
                    conflict_start_ts: write.start_ts,
                    conflict_commit_ts: commit_ts,
                    key: key.to_raw()?,
                    primary: primary.to_vec(),
                });
            }
            if commit_ts == start_ts && write.write_type == WriteType::Rollback {
                return Err(MvccError::WriteConflict {
                    start_ts,
                    conflict_start_ts: write.start_ts,
                    conflict_commit_ts: commit_ts,
                    key: key.to_raw()?,
                    primary: primary.to_vec(),
                });
            }
        }
    }

    if mutation.should_not_exists() {
        if reader.key_exists(&key, TimeStamp::max())? {
            return Err(MvccError::AlreadyExist { key: key.to_raw()? });
        }
        // Constraint check only: leaves no lock behind.
        return Ok(());
    }

    let lock_type = match LockType::from_mutation(&mutation) {
        Some(lock_type) => lock_type,
        None => return Ok(()),
    };
    let (_, value) = mutation.into_key_value();
    let mut short_value = None;
    if let Some(value) = value {
        if value.len() <= SHORT_VALUE_MAX_LEN {
            short_value = Some(value);
        } else {
            txn.put_data(&key, start_ts, value);
        }
    }
    let lock = Lock::new(
        lock_type,
        primary.to_vec(),
        start_ts,
        lock_ttl,
        short_value,
        for_update_ts,
        txn_size,
    );
    txn.put_lock(&key, &lock);
    Ok(())
}

/// Takes a pessimistic lock before prewrite; optionally returns the value
/// visible at `for_update_ts`.
#[allow(clippy::too_many_arguments)]
pub fn acquire_pessimistic_lock<S: Snapshot>(
    txn: &mut MvccTxn,
    reader: &MvccReader<S>,
    key: &Key,
    primary: &[u8],
    for_update_ts: TimeStamp,
    lock_ttl: u64,
    return_value: bool,
) -> Result<Option<Value>> {
    let start_ts = txn.start_ts;

    if let Some(lock) = reader.load_lock(key)? {
        if lock.ts != start_ts {
            return Err(locked(&key.to_raw()?, &lock));
        }
        // Idempotent refresh of our own lock.
        let refreshed = Lock::new(
            lock.lock_type,
            lock.primary,
            lock.ts,
            lock.ttl.max(lock_ttl),
            lock.short_value,
            for_update_ts.max(lock.for_update_ts),
            lock.txn_size,
        );
        txn.put_lock(key, &refreshed);
        return read_for_update(reader, key, for_update_ts, return_value);
    }

    if let Some((commit_ts, write)) = reader.seek_write(key, TimeStamp::max())? {
        if commit_ts > for_update_ts {
            return Err(MvccError::WriteConflict {
                start_ts,
                conflict_start_ts: write.start_ts,
                conflict_commit_ts: commit_ts,
                key: key.to_raw()?,
                primary: primary.to_vec(),
            });
        }
        // A rollback of this very transaction forbids relocking.
        if let Some((rollback_ts, rollback)) = get_txn_commit_record(reader, key, start_ts)? {
            if rollback.write_type == WriteType::Rollback && rollback_ts >= start_ts {
                return Err(MvccError::PessimisticLockNotFound {
                    start_ts,
                    key: key.to_raw()?,
                });
            }
        }
    }

    let lock = Lock::new(
        LockType::Pessimistic,
        primary.to_vec(),
        start_ts,
        lock_ttl,
        None,
        for_update_ts,
        0,
    );
    txn.put_lock(key, &lock);
    read_for_update(reader, key, for_update_ts, return_value)
}

fn read_for_update<S: Snapshot>(
    reader: &MvccReader<S>,
    key: &Key,
    for_update_ts: TimeStamp,
    return_value: bool,
) -> Result<Option<Value>> {
    if !return_value {
        return Ok(None);
    }
    match reader.get_write(key, for_update_ts)? {
        Some((_, write)) if write.write_type == WriteType::Put => {
            Ok(Some(reader.load_data(key, &write)?))
        }
        _ => Ok(None),
    }
}

/// Drops a pessimistic lock if it still belongs to this transaction.
pub fn pessimistic_rollback<S: Snapshot>(
    txn: &mut MvccTxn,
    reader: &MvccReader<S>,
    key: &Key,
    for_update_ts: TimeStamp,
) -> Result<()> {
    if let Some(lock) = reader.load_lock(key)? {
        if lock.is_pessimistic()
            && lock.ts == txn.start_ts
            && lock.for_update_ts <= for_update_ts
        {
            txn.unlock_key(key);
        }
    }
    Ok(())
}

/// Second phase: turns this transaction's lock on `key` into a commit
/// record at `commit_ts`. Repeats are no-ops.
pub fn commit<S: Snapshot>(
    txn: &mut MvccTxn,
    reader: &MvccReader<S>,
    key: &Key,
    commit_ts: TimeStamp,
) -> Result<()> {
    let start_ts = txn.start_ts;
    match reader.load_lock(key)? {
        Some(lock) if lock.ts == start_ts => {
            if lock.is_pessimistic() {
                // Never prewritten; committing would lose the value.
                return Err(MvccError::TxnLockNotFound {
                    start_ts,
                    commit_ts,
                    key: key.to_raw()?,
                });
            }
            let write_type = match WriteType::from_lock_type(lock.lock_type) {
                Some(write_type) => write_type,
                None => {
                    return Err(MvccError::TxnLockNotFound {
                        start_ts,
                        commit_ts,
                        key: key.to_raw()?,
                    })
                }
            };
            let write = Write::new(write_type, start_ts, lock.short_value.clone());
            txn.put_write(key, commit_ts, &write);
            txn.unlock_key(key);
            Ok(())
        }
        _ => match get_txn_commit_record(reader, key, start_ts)? {
            Some((recorded_ts, write)) => match write.write_type {
                WriteType::Rollback => Err(MvccError::TxnLockNotFound {
                    start_ts,
                    commit_ts,
                    key: key.to_raw()?,
                }),
                _ if recorded_ts == commit_ts => Ok(()),
                _ => Err(MvccError::TxnLockNotFound {
                    start_ts,
                    commit_ts,
                    key: key.to_raw()?,
                }),
            },
            None => Err(MvccError::TxnLockNotFound {
                start_ts,
                commit_ts,
                key: key.to_raw()?,
            }),
        },
    }
}

/// Rolls back one key of the transaction: the lock (if ours) is removed,
/// buffered data is dropped, and a rollback tombstone fences the start_ts.
pub fn batch_rollback<S: Snapshot>(
    txn: &mut MvccTxn,
    reader: &MvccReader<S>,
    key: &Key,
) -> Result<()> {
    let start_ts = txn.start_ts;
    match reader.load_lock(key)? {
        Some(lock) if lock.ts == start_ts => {
            if lock.lock_type == LockType::Put && lock.short_value.is_none() {
                txn.delete_data(key, start_ts);
            }
            txn.unlock_key(key);
            let rollback = Write::new(WriteType::Rollback, start_ts, None);
            txn.put_write(key, start_ts, &rollback);
            Ok(())
        }
        _ => match get_txn_commit_record(reader, key, start_ts)? {
            Some((_, write)) if write.write_type == WriteType::Rollback => Ok(()),
            Some((recorded_ts, _)) => Err(MvccError::TxnLockNotFound {
                start_ts,
                commit_ts: recorded_ts,
                key: key.to_raw()?,
            }),
            None => {
                let rollback = Write::new(WriteType::Rollback, start_ts, None);
                txn.put_write(key, start_ts, &rollback);
                Ok(())
            }
        },
    }
}

/// Decides the fate of another transaction's primary lock.
pub fn check_txn_status<S: Snapshot>(
    txn: &mut MvccTxn,
    reader: &MvccReader<S>,
    primary_key: &Key,
    lock_ts: TimeStamp,
    current_ts: TimeStamp,
) -> Result<TxnStatus> {
    match reader.load_lock(primary_key)? {
        Some(lock) if lock.ts == lock_ts => {
            if lock.primary != primary_key.to_raw()? {
                return Err(MvccError::PrimaryMismatch {
                    lock_primary: lock.primary,
                    key: primary_key.to_raw()?,
                });
            }
            if lock.is_expired(current_ts) {
                if lock.lock_type == LockType::Put && lock.short_value.is_none() {
                    txn.delete_data(primary_key, lock_ts);
                }
                txn.unlock_key(primary_key);
                let rollback = Write::new(WriteType::Rollback, lock_ts, None);
                txn.put_write(primary_key, lock_ts, &rollback);
                return Ok(TxnStatus::RolledBack);
            }
            Ok(TxnStatus::Uncommitted { lock_ttl: lock.ttl })
        }
        _ => match get_txn_commit_record(reader, primary_key, lock_ts)? {
            Some((commit_ts, write)) => {
                if write.write_type == WriteType::Rollback {
                    Ok(TxnStatus::RolledBack)
                } else {
                    Ok(TxnStatus::Committed { commit_ts })
                }
            }
            None => {
                // Nothing committed, nothing locked: fence the start_ts so
                // a late prewrite cannot sneak in.
                let rollback = Write::new(WriteType::Rollback, lock_ts, None);
                txn.put_write(primary_key, lock_ts, &rollback);
                Ok(TxnStatus::LockNotExist)
            }
        },
    }
}

/// Commits (commit_ts > 0) or rolls back one locked key during lock
/// resolution.
pub fn resolve_lock<S: Snapshot>(
    txn: &mut MvccTxn,
    reader: &MvccReader<S>,
    key: &Key,
    commit_ts: TimeStamp,
) -> Result<()> {
    if commit_ts.is_zero() {
        batch_rollback(txn, reader, key)
    } else {
        commit(txn, reader, key, commit_ts)
    }
}

/// Refreshes the primary lock's TTL to at least `advise_ttl`; returns the
/// TTL now in force.
pub fn heartbeat<S: Snapshot>(
    txn: &mut MvccTxn,
    reader: &MvccReader<S>,
    primary_key: &Key,
    advise_ttl: u64,
) -> Result<u64> {
    let start_ts = txn.start_ts;
    match reader.load_lock(primary_key)? {
        Some(lock) if lock.ts == start_ts => {
            let new_ttl = lock.ttl.max(advise_ttl);
            if new_ttl != lock.ttl {
                let refreshed = Lock { ttl: new_ttl, ..lock };
                txn.put_lock(primary_key, &refreshed);
            }
            Ok(new_ttl)
        }
        _ => Err(MvccError::TxnLockNotFound {
            start_ts,
            commit_ts: TimeStamp::zero(),
            key: primary_key.to_raw()?,
        }),
    }
}

/// Removes versions retired by the GC safe point within `[start, end)`.
/// The newest Put at or below the safe point survives per key; everything
/// older, and every Delete/Rollback/Lock record at or below it, goes.
pub fn gc<S: Snapshot>(
    txn: &mut MvccTxn,
    reader: &MvccReader<S>,
    start: &[u8],
    end: &[u8],
    safe_point: TimeStamp,
) -> Result<u64> {
    use engine_traits::{Iterable, Iterator as EngineIterator, IterOptions};

    let lower = Key::from_raw(start).into_encoded();
    let upper = Key::from_raw(end).into_encoded();
    let mut iter = reader.snapshot().iterator_cf_opt(
        CF_TXN_WRITE,
        IterOptions::new(Some(lower), Some(upper)),
    )?;
    let mut removed = 0u64;
    let mut current_key: Option<Vec<u8>> = None;
    let mut purging = false;
    let mut valid = iter.seek_to_first()?;
    while valid {
        let (user_key_enc, commit_ts) = Key::split_on_ts_for(iter.key())?;
        if current_key.as_deref() != Some(user_key_enc) {
            current_key = Some(user_key_enc.to_vec());
            purging = false;
        }
        if commit_ts <= safe_point {
            let key = Key::from_encoded_slice(user_key_enc);
            let write = txn_types::WriteRef::parse(iter.value())?.to_owned();
            if purging {
                txn.delete_write(&key, commit_ts);
                if write.write_type == WriteType::Put && write.short_value.is_none() {
                    txn.delete_data(&key, write.start_ts);
                }
                removed += 1;
            } else {
                purging = true;
                if write.write_type != WriteType::Put {
                    // The newest record under the safe point hides nothing
                    // worth keeping; drop it too.
                    txn.delete_write(&key, commit_ts);
                    removed += 1;
                }
            }
        }
        valid = iter.next()?;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use engine_memory::{MemoryEngine, MemoryEngineBuilder};
    use engine_traits::{Peekable, RawEngine};
    use txn_types::TsSet;

    use crate::storage::{Context, Engine, IsolationLevel, LocalEngine};

    use super::*;

    struct Harness {
        engine: LocalEngine<MemoryEngine>,
    }

    impl Harness {
        fn new() -> Harness {
            Harness {
                engine: LocalEngine::new(MemoryEngineBuilder::new().build()),
            }
        }

        fn reader(&self) -> MvccReader<engine_memory::MemorySnapshot> {
            MvccReader::new(self.engine.raw().snapshot(), IsolationLevel::Si)
        }

        fn submit(&self, txn: MvccTxn) {
            if txn.is_empty() {
                return;
            }
            self.engine
                .write(&Context::default(), txn.into_writes())
                .unwrap();
        }

        fn must_prewrite_put(&self, key: &[u8], value: &[u8], primary: &[u8], start_ts: u64) {
            let mut txn = MvccTxn::new(start_ts.into());
            prewrite(
                &mut txn,
                &self.reader(),
                Mutation::Put((Key::from_raw(key), value.to_vec())),
                primary,
                3000,
                1,
                false,
                TimeStamp::zero(),
            )
            .unwrap();
            self.submit(txn);
        }

        fn must_commit(&self, key: &[u8], start_ts: u64, commit_ts: u64) {
            let mut txn = MvccTxn::new(start_ts.into());
            commit(&mut txn, &self.reader(), &Key::from_raw(key), commit_ts.into()).unwrap();
            self.submit(txn);
        }

        fn get(&self, key: &[u8], ts: u64) -> Option<Vec<u8>> {
            self.reader()
                .get(&Key::from_raw(key), ts.into(), &TsSet::Empty)
                .unwrap()
        }
    }

    #[test]
    fn test_prewrite_commit_read() {
        let h = Harness::new();
        h.must_prewrite_put(b"t:k", b"v", b"t:k", 10);
        // Reader is blocked by the lock.
        assert!(matches!(
            h.reader()
                .get(&Key::from_raw(b"t:k"), 20.into(), &TsSet::Empty),
            Err(MvccError::KeyIsLocked(_))
        ));
        h.must_commit(b"t:k", 10, 20);
        assert_eq!(h.get(b"t:k", 20).unwrap(), b"v");
        assert_eq!(h.get(b"t:k", 15), None);
    }

    #[test]
    fn test_commit_is_idempotent() {
        let h = Harness::new();
        h.must_prewrite_put(b"t:k", b"v", b"t:k", 10);
        h.must_commit(b"t:k", 10, 20);
        // Repeat commit succeeds and changes nothing.
        h.must_commit(b"t:k", 10, 20);
        assert_eq!(h.get(b"t:k", 25).unwrap(), b"v");
    }

    #[test]
    fn test_commit_without_prewrite_fails() {
        let h = Harness::new();
        let mut txn = MvccTxn::new(10.into());
        assert!(matches!(
            commit(&mut txn, &h.reader(), &Key::from_raw(b"t:k"), 20.into()),
            Err(MvccError::TxnLockNotFound { .. })
        ));
    }

    #[test]
    fn test_prewrite_write_conflict() {
        let h = Harness::new();
        h.must_prewrite_put(b"t:k", b"v1", b"t:k", 10);
        h.must_commit(b"t:k", 10, 20);

        // A txn that started before the commit conflicts.
        let mut txn = MvccTxn::new(15.into());
        let err = prewrite(
            &mut txn,
            &h.reader(),
            Mutation::Put((Key::from_raw(b"t:k"), b"v2".to_vec())),
            b"t:k",
            3000,
            1,
            false,
            TimeStamp::zero(),
        )
        .unwrap_err();
        match err {
            MvccError::WriteConflict {
                start_ts,
                conflict_commit_ts,
                ..
            } => {
                assert_eq!(start_ts, 15.into());
                assert_eq!(conflict_commit_ts, 20.into());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_prewrite_blocked_by_foreign_lock() {
        let h = Harness::new();
        h.must_prewrite_put(b"t:k", b"v1", b"t:k", 10);
        let mut txn = MvccTxn::new(11.into());
        assert!(matches!(
            prewrite(
                &mut txn,
                &h.reader(),
                Mutation::Put((Key::from_raw(b"t:k"), b"v2".to_vec())),
                b"t:k",
                3000,
                1,
                false,
                TimeStamp::zero(),
            ),
            Err(MvccError::KeyIsLocked(_))
        ));
    }

    #[test]
    fn test_rollback_then_commit_fails() {
        let h = Harness::new();
        h.must_prewrite_put(b"t:k", b"v", b"t:k", 10);
        let mut txn = MvccTxn::new(10.into());
        batch_rollback(&mut txn, &h.reader(), &Key::from_raw(b"t:k")).unwrap();
        h.submit(txn);
        assert_eq!(h.get(b"t:k", 20), None);

        let mut txn = MvccTxn::new(10.into());
        assert!(matches!(
            commit(&mut txn, &h.reader(), &Key::from_raw(b"t:k"), 20.into()),
            Err(MvccError::TxnLockNotFound { .. })
        ));
    }

    #[test]
    fn test_check_not_exists() {
        let h = Harness::new();
        let mut txn = MvccTxn::new(10.into());
        prewrite(
            &mut txn,
            &h.reader(),
            Mutation::CheckNotExists(Key::from_raw(b"t:k")),
            b"t:k",
            3000,
            1,
            false,
            TimeStamp::zero(),
        )
        .unwrap();
        assert!(txn.is_empty());

        h.must_prewrite_put(b"t:k", b"v", b"t:k", 20);
        h.must_commit(b"t:k", 20, 30);
        let mut txn = MvccTxn::new(40.into());
        assert!(matches!(
            prewrite(
                &mut txn,
                &h.reader(),
                Mutation::CheckNotExists(Key::from_raw(b"t:k")),
                b"t:k",
                3000,
                1,
                false,
                TimeStamp::zero(),
            ),
            Err(MvccError::AlreadyExist { .. })
        ));
    }

    #[test]
    fn test_pessimistic_flow() {
        let h = Harness::new();
        // Txn 1 takes the pessimistic lock.
        let mut txn = MvccTxn::new(100.into());
        acquire_pessimistic_lock(
            &mut txn,
            &h.reader(),
            &Key::from_raw(b"t:k1"),
            b"t:k1",
            100.into(),
            3000,
            false,
        )
        .unwrap();
        h.submit(txn);

        // Txn 2 is told who holds it.
        let mut txn2 = MvccTxn::new(110.into());
        match acquire_pessimistic_lock(
            &mut txn2,
            &h.reader(),
            &Key::from_raw(b"t:k1"),
            b"t:k1",
            110.into(),
            3000,
            false,
        ) {
            Err(MvccError::KeyIsLocked(info)) => assert_eq!(info.lock_version, 100.into()),
            other => panic!("unexpected: {:?}", other),
        }

        // Txn 1 prewrites over its pessimistic lock and commits.
        let mut txn = MvccTxn::new(100.into());
        prewrite(
            &mut txn,
            &h.reader(),
            Mutation::Put((Key::from_raw(b"t:k1"), b"v".to_vec())),
            b"t:k1",
            3000,
            1,
            true,
            100.into(),
        )
        .unwrap();
        h.submit(txn);
        h.must_commit(b"t:k1", 100, 120);
        assert_eq!(h.get(b"t:k1", 130).unwrap(), b"v");

        // Txn 2 can lock now; its conflict window moved with for_update_ts.
        let mut txn2 = MvccTxn::new(110.into());
        acquire_pessimistic_lock(
            &mut txn2,
            &h.reader(),
            &Key::from_raw(b"t:k1"),
            b"t:k1",
            125.into(),
            3000,
            false,
        )
        .unwrap();
        h.submit(txn2);
    }

    #[test]
    fn test_pessimistic_conflict_on_newer_commit() {
        let h = Harness::new();
        h.must_prewrite_put(b"t:k", b"v", b"t:k", 10);
        h.must_commit(b"t:k", 10, 20);
        let mut txn = MvccTxn::new(5.into());
        assert!(matches!(
            acquire_pessimistic_lock(
                &mut txn,
                &h.reader(),
                &Key::from_raw(b"t:k"),
                b"t:k",
                15.into(),
                3000,
                false,
            ),
            Err(MvccError::WriteConflict { .. })
        ));
    }

    #[test]
    fn test_prewrite_missing_pessimistic_lock() {
        let h = Harness::new();
        let mut txn = MvccTxn::new(10.into());
        assert!(matches!(
            prewrite(
                &mut txn,
                &h.reader(),
                Mutation::Put((Key::from_raw(b"t:k"), b"v".to_vec())),
                b"t:k",
                3000,
                1,
                true,
                10.into(),
            ),
            Err(MvccError::PessimisticLockNotFound { .. })
        ));
    }

    #[test]
    fn test_check_txn_status() {
        let h = Harness::new();
        // Live lock reports its TTL.
        h.must_prewrite_put(b"t:k", b"v", b"t:k", TimeStamp::compose(1000, 0).into_inner());
        let mut txn = MvccTxn::new(TimeStamp::compose(1000, 0));
        let status = check_txn_status(
            &mut txn,
            &h.reader(),
            &Key::from_raw(b"t:k"),
            TimeStamp::compose(1000, 0),
            TimeStamp::compose(1001, 0),
        )
        .unwrap();
        assert_eq!(status, TxnStatus::Uncommitted { lock_ttl: 3000 });
        assert!(txn.is_empty());

        // Expired lock is rolled back.
        let mut txn = MvccTxn::new(TimeStamp::compose(1000, 0));
        let status = check_txn_status(
            &mut txn,
            &h.reader(),
            &Key::from_raw(b"t:k"),
            TimeStamp::compose(1000, 0),
            TimeStamp::compose(999_999, 0),
        )
        .unwrap();
        assert_eq!(status, TxnStatus::RolledBack);
        h.submit(txn);
        assert!(h.reader().load_lock(&Key::from_raw(b"t:k")).unwrap().is_none());

        // Committed txn reports its commit_ts.
        h.must_prewrite_put(b"t:c", b"v", b"t:c", 10);
        h.must_commit(b"t:c", 10, 20);
        let mut txn = MvccTxn::new(10.into());
        let status = check_txn_status(
            &mut txn,
            &h.reader(),
            &Key::from_raw(b"t:c"),
            10.into(),
            100.into(),
        )
        .unwrap();
        assert_eq!(
            status,
            TxnStatus::Committed {
                commit_ts: 20.into()
            }
        );
    }

    #[test]
    fn test_resolve_lock_commit_and_rollback() {
        let h = Harness::new();
        h.must_prewrite_put(b"t:a", b"va", b"t:a", 10);
        h.must_prewrite_put(b"t:b", b"vb", b"t:a", 10);

        // Resolve to commit.
        let mut txn = MvccTxn::new(10.into());
        resolve_lock(&mut txn, &h.reader(), &Key::from_raw(b"t:a"), 20.into()).unwrap();
        resolve_lock(&mut txn, &h.reader(), &Key::from_raw(b"t:b"), 20.into()).unwrap();
        h.submit(txn);
        assert_eq!(h.get(b"t:a", 25).unwrap(), b"va");
        assert_eq!(h.get(b"t:b", 25).unwrap(), b"vb");

        // Resolve to rollback.
        h.must_prewrite_put(b"t:c", b"vc", b"t:c", 30);
        let mut txn = MvccTxn::new(30.into());
        resolve_lock(&mut txn, &h.reader(), &Key::from_raw(b"t:c"), TimeStamp::zero()).unwrap();
        h.submit(txn);
        assert_eq!(h.get(b"t:c", 40), None);
    }

    #[test]
    fn test_heartbeat_extends_ttl() {
        let h = Harness::new();
        h.must_prewrite_put(b"t:k", b"v", b"t:k", 10);
        let mut txn = MvccTxn::new(10.into());
        let ttl = heartbeat(&mut txn, &h.reader(), &Key::from_raw(b"t:k"), 9000).unwrap();
        assert_eq!(ttl, 9000);
        h.submit(txn);
        let lock = h.reader().load_lock(&Key::from_raw(b"t:k")).unwrap().unwrap();
        assert_eq!(lock.ttl, 9000);

        // A smaller advise leaves the TTL alone.
        let mut txn = MvccTxn::new(10.into());
        let ttl = heartbeat(&mut txn, &h.reader(), &Key::from_raw(b"t:k"), 100).unwrap();
        assert_eq!(ttl, 9000);
        assert!(txn.is_empty());
    }

    #[test]
    fn test_gc_keeps_newest_visible_put() {
        let h = Harness::new();
        for (value, start, commit) in
            [(b"v1".as_slice(), 10u64, 20u64), (b"v2", 30, 40), (b"v3", 50, 60)]
        {
            h.must_prewrite_put(b"t:k", value, b"t:k", start);
            h.must_commit(b"t:k", start, commit);
        }
        let mut txn = MvccTxn::new(TimeStamp::zero());
        let removed = gc(&mut txn, &h.reader(), b"t:a", b"t:z", 45.into()).unwrap();
        h.submit(txn);
        assert_eq!(removed, 1);
        // v2 survives as the newest version under the safe point; v1 is
        // gone; v3 (above the safe point) is untouched.
        assert_eq!(h.get(b"t:k", 45).unwrap(), b"v2");
        assert_eq!(h.get(b"t:k", 70).unwrap(), b"v3");
        assert_eq!(
            h.reader()
                .seek_write(&Key::from_raw(b"t:k"), 25.into())
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_gc_drops_delete_chains() {
        let h = Harness::new();
        h.must_prewrite_put(b"t:k", b"v", b"t:k", 10);
        h.must_commit(b"t:k", 10, 20);
        // Delete the key transactionally.
        let mut txn = MvccTxn::new(30.into());
        prewrite(
            &mut txn,
            &h.reader(),
            Mutation::Delete(Key::from_raw(b"t:k")),
            b"t:k",
            3000,
            1,
            false,
            TimeStamp::zero(),
        )
        .unwrap();
        h.submit(txn);
        h.must_commit(b"t:k", 30, 40);

        let mut txn = MvccTxn::new(TimeStamp::zero());
        let removed = gc(&mut txn, &h.reader(), b"t:a", b"t:z", 50.into()).unwrap();
        h.submit(txn);
        // Both the delete record and the put under it are gone.
        assert_eq!(removed, 2);
        assert_eq!(
            h.reader()
                .seek_write(&Key::from_raw(b"t:k"), TimeStamp::max())
                .unwrap(),
            None
        );
    }
}

// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

use engine_traits::{
    Iterable, Iterator as EngineIterator, IterOptions, Peekable, Snapshot, CF_TXN_DATA,
    CF_TXN_LOCK, CF_TXN_WRITE,
};
use txn_types::{Key, Lock, TimeStamp, TsSet, Value, Write, WriteRef, WriteType};

use super::{locked, MvccError, Result};
use crate::storage::IsolationLevel;

/// Read-side MVCC resolution over one engine snapshot. All methods take
/// raw user keys; encoding is internal.
pub struct MvccReader<S: Snapshot> {
    snapshot: S,
    isolation_level: IsolationLevel,
}

impl<S: Snapshot> MvccReader<S> {
    pub fn new(snapshot: S, isolation_level: IsolationLevel) -> MvccReader<S> {
        MvccReader {
            snapshot,
            isolation_level,
        }
    }

    pub fn snapshot(&self) -> &S {
        &self.snapshot
    }

    pub fn load_lock(&self, key: &Key) -> Result<Option<Lock>> {
        match self.snapshot.get_value_cf(CF_TXN_LOCK, key.as_encoded())? {
            Some(bytes) => Ok(Some(Lock::parse(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Fails with `KeyIsLocked` when a lock must block a read at `ts`
    /// under the configured isolation level.
    pub fn check_lock(&self, key: &Key, ts: TimeStamp, resolved: &TsSet) -> Result<()> {
        if self.isolation_level == IsolationLevel::Rc {
            return Ok(());
        }
        if let Some(lock) = self.load_lock(key)? {
            if lock.is_blocking_read(ts, resolved) {
                return Err(locked(&key.to_raw()?, &lock));
            }
        }
        Ok(())
    }

    /// The newest write record with `commit_ts <= ts`, together with its
    /// commit_ts.
    pub fn seek_write(&self, key: &Key, ts: TimeStamp) -> Result<Option<(TimeStamp, Write)>> {
        let mut iter = self
            .snapshot
            .iterator_cf_opt(CF_TXN_WRITE, IterOptions::default())?;
        let seek_key = key.clone().append_ts(ts);
        if !iter.seek(seek_key.as_encoded())? {
            return Ok(None);
        }
        if !key.is_user_key_of(iter.key()) {
            return Ok(None);
        }
        let (_, commit_ts) = Key::split_on_ts_for(iter.key())?;
        let write = WriteRef::parse(iter.value())?.to_owned();
        Ok(Some((commit_ts, write)))
    }

    /// The newest *effective* write at `ts`: Rollback and Lock records are
    /// transparent, a Put yields its commit_ts, a Delete means absent.
    pub fn get_write(&self, key: &Key, ts: TimeStamp) -> Result<Option<(TimeStamp, Write)>> {
        let mut seek_ts = ts;
        loop {
            match self.seek_write(key, seek_ts)? {
                Some((commit_ts, write)) => match write.write_type {
                    WriteType::Put | WriteType::Delete => return Ok(Some((commit_ts, write))),
                    WriteType::Rollback | WriteType::Lock => {
                        if commit_ts.is_zero() {
                            return Ok(None);
                        }
                        seek_ts = commit_ts.prev();
                        if seek_ts.is_zero() {
                            return Ok(None);
                        }
                    }
                },
                None => return Ok(None),
            }
        }
    }

    /// Loads the value a Put write record points at.
    pub fn load_data(&self, key: &Key, write: &Write) -> Result<Value> {
        if let Some(value) = &write.short_value {
            return Ok(value.clone());
        }
        let data_key = key.clone().append_ts(write.start_ts);
        match self.snapshot.get_value_cf(CF_TXN_DATA, data_key.as_encoded())? {
            Some(value) => Ok(value),
            None => Err(MvccError::Engine(engine_traits::Error::Internal(format!(
                "data missing for key {:?} start_ts {}",
                key, write.start_ts
            )))),
        }
    }

    /// Transactional point read at `ts`.
    pub fn get(&self, key: &Key, ts: TimeStamp, resolved: &TsSet) -> Result<Option<Value>> {
        self.check_lock(key, ts, resolved)?;
        match self.get_write(key, ts)? {
            Some((_, write)) if write.write_type == WriteType::Put => {
                Ok(Some(self.load_data(key, &write)?))
            }
            _ => Ok(None),
        }
    }

    /// Whether the key has a committed (visible) value at `ts`, used by
    /// constraint checks; does not look at locks.
    pub fn key_exists(&self, key: &Key, ts: TimeStamp) -> Result<bool> {
        Ok(matches!(
            self.get_write(key, ts)?,
            Some((_, write)) if write.write_type == WriteType::Put
        ))
    }

    /// Locks in `[start, end)` passing `filter`, at most `limit`.
    pub fn scan_locks<F>(
        &self,
        start: &[u8],
        end: &[u8],
        filter: F,
        limit: usize,
    ) -> Result<Vec<(Key, Lock)>>
    where
        F: Fn(&Lock) -> bool,
    {
        let lower = Key::from_raw(start).into_encoded();
        let upper = Key::from_raw(end).into_encoded();
        let mut iter = self.snapshot.iterator_cf_opt(
            CF_TXN_LOCK,
            IterOptions::new(Some(lower), Some(upper)),
        )?;
        let mut locks = Vec::new();
        let mut valid = iter.seek_to_first()?;
        while valid {
            let lock = Lock::parse(iter.value())?;
            if filter(&lock) {
                locks.push((Key::from_encoded_slice(iter.key()), lock));
                if limit > 0 && locks.len() >= limit {
                    break;
                }
            }
            valid = iter.next()?;
        }
        Ok(locks)
    }

    /// Forward or reverse transactional range scan. Emits at most `limit`
    /// live rows; blocking locks surface as `KeyIsLocked`.
    pub fn scan(
        &self,
        start: &[u8],
        end: &[u8],
        ts: TimeStamp,
        limit: usize,
        key_only: bool,
        reverse: bool,
        resolved: &TsSet,
    ) -> Result<Vec<(Vec<u8>, Value)>> {
        // Surface the first blocking lock in scan order before touching
        // data, mirroring the read-blocked-by-lock contract of point gets.
        if self.isolation_level == IsolationLevel::Si {
            let mut blocking = self.scan_locks(
                start,
                end,
                |lock| lock.is_blocking_read(ts, resolved),
                0,
            )?;
            if reverse {
                blocking.reverse();
            }
            if let Some((key, lock)) = blocking.first() {
                return Err(locked(&key.to_raw()?, lock));
            }
        }

        let mut iter = self
            .snapshot
            .iterator_cf_opt(CF_TXN_WRITE, IterOptions::default())?;
        let lower = Key::from_raw(start).into_encoded();
        let upper = Key::from_raw(end).into_encoded();
        let mut rows = Vec::new();

        if !reverse {
            let mut valid = iter.seek(&lower)?;
            while valid && (limit == 0 || rows.len() < limit) {
                let (user_key_enc, _) = Key::split_on_ts_for(iter.key())?;
                if user_key_enc >= upper.as_slice() {
                    break;
                }
                let key = Key::from_encoded_slice(user_key_enc);
                self.emit_row(&key, ts, key_only, &mut rows)?;
                // Jump past every remaining version of this user key.
                let mut past = user_key_enc.to_vec();
                past.extend_from_slice(&[0xff; 9]);
                valid = iter.seek(&past)?;
            }
        } else {
            // Probing at a bare encoded user key excludes all of that
            // key's versioned forms, which sort strictly above it.
            let mut probe = upper.clone();
            while limit == 0 || rows.len() < limit {
                if !iter.seek_for_prev(&probe)? {
                    break;
                }
                let (user_key_enc, _) = Key::split_on_ts_for(iter.key())?;
                if user_key_enc < lower.as_slice() {
                    break;
                }
                let key = Key::from_encoded_slice(user_key_enc);
                self.emit_row(&key, ts, key_only, &mut rows)?;
                probe = user_key_enc.to_vec();
            }
        }
        Ok(rows)
    }

    fn emit_row(
        &self,
        key: &Key,
        ts: TimeStamp,
        key_only: bool,
        rows: &mut Vec<(Vec<u8>, Value)>,
    ) -> Result<()> {
        if let Some((_, write)) = self.get_write(key, ts)? {
            if write.write_type == WriteType::Put {
                let value = if key_only {
                    vec![]
                } else {
                    self.load_data(key, &write)?
                };
                rows.push((key.to_raw()?, value));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use engine_memory::{MemoryEngine, MemoryEngineBuilder};
    use engine_traits::RawEngine;

    use super::*;

    fn put(engine: &MemoryEngine, key: &[u8], value: &[u8], start_ts: u64, commit_ts: u64) {
        let k = Key::from_raw(key);
        let write = Write::new(
            WriteType::Put,
            start_ts.into(),
            Some(value.to_vec()),
        );
        engine
            .put_cf(
                CF_TXN_WRITE,
                k.clone().append_ts(commit_ts.into()).as_encoded(),
                &write.to_bytes(),
            )
            .unwrap();
    }

    fn delete(engine: &MemoryEngine, key: &[u8], start_ts: u64, commit_ts: u64) {
        let k = Key::from_raw(key);
        let write = Write::new(WriteType::Delete, start_ts.into(), None);
        engine
            .put_cf(
                CF_TXN_WRITE,
                k.clone().append_ts(commit_ts.into()).as_encoded(),
                &write.to_bytes(),
            )
            .unwrap();
    }

    fn lock(engine: &MemoryEngine, key: &[u8], primary: &[u8], start_ts: u64) {
        let lock = Lock::new(
            txn_types::LockType::Put,
            primary.to_vec(),
            start_ts.into(),
            3000,
            None,
            TimeStamp::zero(),
            0,
        );
        engine
            .put_cf(
                CF_TXN_LOCK,
                Key::from_raw(key).as_encoded(),
                &lock.to_bytes(),
            )
            .unwrap();
    }

    fn reader(engine: &MemoryEngine) -> MvccReader<engine_memory::MemorySnapshot> {
        MvccReader::new(engine.snapshot(), IsolationLevel::Si)
    }

    #[test]
    fn test_get_snapshot_isolation() {
        let engine = MemoryEngineBuilder::new().build();
        put(&engine, b"t:k", b"v1", 10, 20);
        put(&engine, b"t:k", b"v2", 30, 40);

        let r = reader(&engine);
        // A reader between the two commits sees the first version.
        assert_eq!(
            r.get(&Key::from_raw(b"t:k"), 25.into(), &TsSet::Empty)
                .unwrap()
                .unwrap(),
            b"v1"
        );
        assert_eq!(
            r.get(&Key::from_raw(b"t:k"), 40.into(), &TsSet::Empty)
                .unwrap()
                .unwrap(),
            b"v2"
        );
        // Before the first commit: nothing.
        assert_eq!(
            r.get(&Key::from_raw(b"t:k"), 15.into(), &TsSet::Empty)
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_delete_hides_value() {
        let engine = MemoryEngineBuilder::new().build();
        put(&engine, b"t:k", b"v", 10, 20);
        delete(&engine, b"t:k", 30, 40);
        let r = reader(&engine);
        assert_eq!(
            r.get(&Key::from_raw(b"t:k"), 50.into(), &TsSet::Empty)
                .unwrap(),
            None
        );
        assert_eq!(
            r.get(&Key::from_raw(b"t:k"), 25.into(), &TsSet::Empty)
                .unwrap()
                .unwrap(),
            b"v"
        );
    }

    #[test]
    fn test_lock_blocks_si_reader() {
        let engine = MemoryEngineBuilder::new().build();
        put(&engine, b"t:k", b"v", 10, 20);
        lock(&engine, b"t:k", b"t:k", 30);

        let r = reader(&engine);
        // Reader above the lock ts is blocked...
        match r.get(&Key::from_raw(b"t:k"), 40.into(), &TsSet::Empty) {
            Err(MvccError::KeyIsLocked(info)) => {
                assert_eq!(info.lock_version, 30.into());
            }
            other => panic!("unexpected: {:?}", other),
        }
        // ...but not below it, and not when the lock is known-resolved.
        assert!(r
            .get(&Key::from_raw(b"t:k"), 25.into(), &TsSet::Empty)
            .is_ok());
        assert!(r
            .get(
                &Key::from_raw(b"t:k"),
                40.into(),
                &TsSet::from_u64s(vec![30])
            )
            .is_ok());

        // RC readers ignore locks entirely.
        let rc = MvccReader::new(engine.snapshot(), IsolationLevel::Rc);
        assert_eq!(
            rc.get(&Key::from_raw(b"t:k"), 40.into(), &TsSet::Empty)
                .unwrap()
                .unwrap(),
            b"v"
        );
    }

    #[test]
    fn test_scan_forward_and_reverse() {
        let engine = MemoryEngineBuilder::new().build();
        put(&engine, b"t:a", b"1", 10, 20);
        put(&engine, b"t:b", b"2", 10, 20);
        delete(&engine, b"t:b", 30, 40);
        put(&engine, b"t:c", b"3", 10, 20);

        let r = reader(&engine);
        let rows = r
            .scan(b"t:a", b"t:z", 50.into(), 0, false, false, &TsSet::Empty)
            .unwrap();
        assert_eq!(
            rows,
            vec![
                (b"t:a".to_vec(), b"1".to_vec()),
                (b"t:c".to_vec(), b"3".to_vec()),
            ]
        );

        let rows = r
            .scan(b"t:a", b"t:z", 50.into(), 0, false, true, &TsSet::Empty)
            .unwrap();
        assert_eq!(
            rows,
            vec![
                (b"t:c".to_vec(), b"3".to_vec()),
                (b"t:a".to_vec(), b"1".to_vec()),
            ]
        );

        // At a ts before the delete, b is visible and limit applies.
        let rows = r
            .scan(b"t:a", b"t:z", 25.into(), 2, false, false, &TsSet::Empty)
            .unwrap();
        assert_eq!(
            rows,
            vec![
                (b"t:a".to_vec(), b"1".to_vec()),
                (b"t:b".to_vec(), b"2".to_vec()),
            ]
        );
    }

    #[test]
    fn test_scan_surfaces_lock() {
        let engine = MemoryEngineBuilder::new().build();
        put(&engine, b"t:a", b"1", 10, 20);
        lock(&engine, b"t:b", b"t:b", 30);
        let r = reader(&engine);
        match r.scan(b"t:a", b"t:z", 50.into(), 0, false, false, &TsSet::Empty) {
            Err(MvccError::KeyIsLocked(info)) => assert_eq!(info.key, b"t:b".to_vec()),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_rollback_records_are_transparent() {
        let engine = MemoryEngineBuilder::new().build();
        put(&engine, b"t:k", b"v", 10, 20);
        let rollback = Write::new(WriteType::Rollback, 30.into(), None);
        engine
            .put_cf(
                CF_TXN_WRITE,
                Key::from_raw(b"t:k").append_ts(30.into()).as_encoded(),
                &rollback.to_bytes(),
            )
            .unwrap();
        let r = reader(&engine);
        assert_eq!(
            r.get(&Key::from_raw(b"t:k"), 35.into(), &TsSet::Empty)
                .unwrap()
                .unwrap(),
            b"v"
        );
    }
}

// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! The transactional store: every 2PC verb as one latched, validated,
//! atomic round through the engine. Commands touching the same keys
//! serialize on the latch table; everything a command decides is computed
//! against one snapshot and submitted as one write batch.

pub mod latch;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use engine_traits::{Range, CF_TXN_DATA, CF_TXN_LOCK, CF_TXN_WRITE};
use slog_global::info;
use txn_types::{Key, Mutation, TimeStamp, TsSet, Value};

use self::latch::{Latches, DEFAULT_LATCH_SLOTS};
use crate::common::constant::{MAX_PREWRITE_COUNT, MAX_SCAN_LIMIT, MAX_SCAN_LOCK_LIMIT};
use crate::error::{ErrorCode, ServerError};
use crate::metrics::LATCH_WAIT_HISTOGRAM;
use crate::storage::mvcc::{self, MvccReader, MvccTxn, TxnStatus};
use crate::storage::{Context, Engine, Result};
use crate::store::snap::region_cf_range;
use crate::store::WriteOp;

/// Per-row evaluator pushed into a scan by a coprocessor request.
pub type RowPredicate = dyn Fn(&[u8], &[u8]) -> bool + Send + Sync;

pub struct TxnStore<Eng: Engine> {
    engine: Eng,
    latches: Arc<Latches>,
    cid_alloc: AtomicU64,
    max_prewrite_count: usize,
    max_scan_limit: usize,
    max_scan_lock_limit: usize,
}

impl<Eng: Engine> TxnStore<Eng> {
    pub fn new(engine: Eng) -> TxnStore<Eng> {
        TxnStore {
            engine,
            latches: Latches::new(DEFAULT_LATCH_SLOTS),
            cid_alloc: AtomicU64::new(1),
            max_prewrite_count: MAX_PREWRITE_COUNT,
            max_scan_limit: MAX_SCAN_LIMIT,
            max_scan_lock_limit: MAX_SCAN_LOCK_LIMIT,
        }
    }

    pub fn engine(&self) -> &Eng {
        &self.engine
    }

    fn reader(&self, ctx: &Context) -> Result<MvccReader<Eng::Snap>> {
        let snapshot = self.engine.snapshot(ctx)?;
        Ok(MvccReader::new(snapshot, ctx.isolation_level))
    }

    fn lock_keys(&self, ctx: &Context, keys: &[Vec<u8>], tag: &str) -> latch::LatchGuard {
        let cid = self.cid_alloc.fetch_add(1, Ordering::Relaxed);
        let (guard, waited_ns) = self.latches.acquire(keys, cid);
        LATCH_WAIT_HISTOGRAM
            .with_label_values(&[tag])
            .observe(waited_ns as f64 / 1e9);
        if let Some(tracker) = &ctx.tracker {
            tracker.set_latch_wait(waited_ns);
        }
        guard
    }

    fn submit(&self, ctx: &Context, txn: MvccTxn) -> Result<()> {
        let writes = txn.into_writes();
        if writes.is_empty() {
            return Ok(());
        }
        self.engine.write(ctx, writes)
    }

    pub fn get(
        &self,
        ctx: &Context,
        key: &[u8],
        start_ts: TimeStamp,
        resolved: &TsSet,
    ) -> Result<Option<Value>> {
        if key.is_empty() {
            return Err(ServerError::new(ErrorCode::KeyEmpty, "empty key").into());
        }
        let reader = self.reader(ctx)?;
        Ok(reader.get(&Key::from_raw(key), start_ts, resolved)?)
    }

    pub fn batch_get(
        &self,
        ctx: &Context,
        keys: &[Vec<u8>],
        start_ts: TimeStamp,
        resolved: &TsSet,
    ) -> Result<Vec<(Vec<u8>, Option<Value>)>> {
        let reader = self.reader(ctx)?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let value = reader.get(&Key::from_raw(key), start_ts, resolved)?;
            out.push((key.clone(), value));
        }
        Ok(out)
    }

    /// Transactional range scan. The optional `coprocessor` predicate is
    /// evaluated once per surfaced row; rows it rejects are dropped.
    #[allow(clippy::too_many_arguments)]
    pub fn scan(
        &self,
        ctx: &Context,
        start: &[u8],
        end: &[u8],
        start_ts: TimeStamp,
        limit: usize,
        key_only: bool,
        reverse: bool,
        resolved: &TsSet,
        coprocessor: Option<&RowPredicate>,
    ) -> Result<Vec<(Vec<u8>, Value)>> {
        if start.is_empty() || end.is_empty() {
            return Err(ServerError::new(ErrorCode::KeyEmpty, "empty scan bound").into());
        }
        if start > end {
            return Err(
                ServerError::new(ErrorCode::RangeInvalid, "scan start after end").into(),
            );
        }
        if start == end {
            return Ok(vec![]);
        }
        if limit > self.max_scan_limit {
            return Err(ServerError::new(
                ErrorCode::IllegalParameters,
                format!("scan limit {} over maximum {}", limit, self.max_scan_limit),
            )
            .into());
        }
        let limit = if limit == 0 { self.max_scan_limit } else { limit };
        let reader = self.reader(ctx)?;
        let rows = reader.scan(start, end, start_ts, limit, key_only, reverse, resolved)?;
        Ok(match coprocessor {
            Some(predicate) => rows
                .into_iter()
                .filter(|(key, value)| predicate(key, value))
                .collect(),
            None => rows,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn acquire_pessimistic_lock(
        &self,
        ctx: &Context,
        keys: &[Vec<u8>],
        primary: &[u8],
        start_ts: TimeStamp,
        for_update_ts: TimeStamp,
        lock_ttl: u64,
        return_values: bool,
    ) -> Result<Vec<Option<Value>>> {
        let _guard = self.lock_keys(ctx, keys, "acquire_pessimistic_lock");
        let reader = self.reader(ctx)?;
        let mut txn = MvccTxn::new(start_ts);
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            let value = mvcc::acquire_pessimistic_lock(
                &mut txn,
                &reader,
                &Key::from_raw(key),
                primary,
                for_update_ts,
                lock_ttl,
                return_values,
            )?;
            values.push(value);
        }
        self.submit(ctx, txn)?;
        Ok(values)
    }

    pub fn pessimistic_rollback(
        &self,
        ctx: &Context,
        keys: &[Vec<u8>],
        start_ts: TimeStamp,
        for_update_ts: TimeStamp,
    ) -> Result<()> {
        let _guard = self.lock_keys(ctx, keys, "pessimistic_rollback");
        let reader = self.reader(ctx)?;
        let mut txn = MvccTxn::new(start_ts);
        for key in keys {
            mvcc::pessimistic_rollback(&mut txn, &reader, &Key::from_raw(key), for_update_ts)?;
        }
        self.submit(ctx, txn)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn prewrite(
        &self,
        ctx: &Context,
        mutations: Vec<Mutation>,
        primary: &[u8],
        start_ts: TimeStamp,
        lock_ttl: u64,
        txn_size: u64,
        pessimistic_checks: Vec<bool>,
        for_update_ts: TimeStamp,
    ) -> Result<()> {
        if mutations.is_empty() {
            return Err(ServerError::new(ErrorCode::IllegalParameters, "empty prewrite").into());
        }
        if mutations.len() > self.max_prewrite_count {
            return Err(ServerError::new(
                ErrorCode::IllegalParameters,
                format!(
                    "{} mutations over prewrite maximum {}",
                    mutations.len(),
                    self.max_prewrite_count
                ),
            )
            .into());
        }
        if !pessimistic_checks.is_empty() && pessimistic_checks.len() != mutations.len() {
            return Err(ServerError::new(
                ErrorCode::IllegalParameters,
                "pessimistic check flags do not match mutations",
            )
            .into());
        }
        let raw_keys: Vec<Vec<u8>> = mutations
            .iter()
            .map(|m| m.key().to_raw())
            .collect::<txn_types::Result<_>>()?;
        let _guard = self.lock_keys(ctx, &raw_keys, "prewrite");
        let reader = self.reader(ctx)?;
        let mut txn = MvccTxn::new(start_ts);
        for (i, mutation) in mutations.into_iter().enumerate() {
            let pessimistic = pessimistic_checks.get(i).copied().unwrap_or(false);
            mvcc::prewrite(
                &mut txn,
                &reader,
                mutation,
                primary,
                lock_ttl,
                txn_size,
                pessimistic,
                for_update_ts,
            )?;
        }
        self.submit(ctx, txn)
    }

    pub fn commit(
        &self,
        ctx: &Context,
        keys: &[Vec<u8>],
        start_ts: TimeStamp,
        commit_ts: TimeStamp,
    ) -> Result<()> {
        if commit_ts <= start_ts {
            return Err(ServerError::new(
                ErrorCode::IllegalParameters,
                format!("commit_ts {} not after start_ts {}", commit_ts, start_ts),
            )
            .into());
        }
        let _guard = self.lock_keys(ctx, keys, "commit");
        let reader = self.reader(ctx)?;
        let mut txn = MvccTxn::new(start_ts);
        for key in keys {
            mvcc::commit(&mut txn, &reader, &Key::from_raw(key), commit_ts)?;
        }
        self.submit(ctx, txn)
    }

    pub fn batch_rollback(
        &self,
        ctx: &Context,
        keys: &[Vec<u8>],
        start_ts: TimeStamp,
    ) -> Result<()> {
        let _guard = self.lock_keys(ctx, keys, "batch_rollback");
        let reader = self.reader(ctx)?;
        let mut txn = MvccTxn::new(start_ts);
        for key in keys {
            mvcc::batch_rollback(&mut txn, &reader, &Key::from_raw(key))?;
        }
        self.submit(ctx, txn)
    }

    pub fn check_txn_status(
        &self,
        ctx: &Context,
        primary: &[u8],
        lock_ts: TimeStamp,
        current_ts: TimeStamp,
    ) -> Result<TxnStatus> {
        let _guard = self.lock_keys(ctx, &[primary.to_vec()], "check_txn_status");
        let reader = self.reader(ctx)?;
        let mut txn = MvccTxn::new(lock_ts);
        let status = mvcc::check_txn_status(
            &mut txn,
            &reader,
            &Key::from_raw(primary),
            lock_ts,
            current_ts,
        )?;
        self.submit(ctx, txn)?;
        Ok(status)
    }

    /// Commits (`commit_ts > 0`) or rolls back the given keys, or every
    /// lock of the transaction within `range` when no keys are given.
    pub fn resolve_lock(
        &self,
        ctx: &Context,
        range: &Range,
        start_ts: TimeStamp,
        commit_ts: TimeStamp,
        keys: Option<Vec<Vec<u8>>>,
    ) -> Result<usize> {
        let keys = match keys {
            Some(keys) if !keys.is_empty() => keys,
            _ => {
                let reader = self.reader(ctx)?;
                reader
                    .scan_locks(
                        &range.start,
                        &range.end,
                        |lock| lock.ts == start_ts,
                        self.max_scan_lock_limit,
                    )?
                    .into_iter()
                    .map(|(key, _)| key.to_raw())
                    .collect::<txn_types::Result<_>>()?
            }
        };
        if keys.is_empty() {
            return Ok(0);
        }
        let _guard = self.lock_keys(ctx, &keys, "resolve_lock");
        let reader = self.reader(ctx)?;
        let mut txn = MvccTxn::new(start_ts);
        for key in &keys {
            mvcc::resolve_lock(&mut txn, &reader, &Key::from_raw(key), commit_ts)?;
        }
        let resolved = keys.len();
        self.submit(ctx, txn)?;
        info!("resolved locks"; "start_ts" => start_ts, "commit_ts" => commit_ts, "count" => resolved);
        Ok(resolved)
    }

    pub fn heartbeat(
        &self,
        ctx: &Context,
        primary: &[u8],
        start_ts: TimeStamp,
        advise_ttl: u64,
    ) -> Result<u64> {
        let _guard = self.lock_keys(ctx, &[primary.to_vec()], "heartbeat");
        let reader = self.reader(ctx)?;
        let mut txn = MvccTxn::new(start_ts);
        let ttl = mvcc::heartbeat(&mut txn, &reader, &Key::from_raw(primary), advise_ttl)?;
        self.submit(ctx, txn)?;
        Ok(ttl)
    }

    /// Locks in `range` whose start_ts is at or below `max_ts`.
    pub fn scan_locks(
        &self,
        ctx: &Context,
        range: &Range,
        max_ts: TimeStamp,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, mvcc::LockInfo)>> {
        let limit = if limit == 0 || limit > self.max_scan_lock_limit {
            self.max_scan_lock_limit
        } else {
            limit
        };
        let reader = self.reader(ctx)?;
        let locks = reader.scan_locks(&range.start, &range.end, |l| l.ts <= max_ts, limit)?;
        let mut out = Vec::with_capacity(locks.len());
        for (key, lock) in locks {
            let raw = key.to_raw()?;
            let info = mvcc::LockInfo::from_lock(&raw, &lock);
            out.push((raw, info));
        }
        Ok(out)
    }

    /// Garbage-collects versions retired by the safe point.
    pub fn gc(&self, ctx: &Context, range: &Range, safe_point: TimeStamp) -> Result<u64> {
        let reader = self.reader(ctx)?;
        let mut txn = MvccTxn::new(safe_point);
        let removed = mvcc::gc(&mut txn, &reader, &range.start, &range.end, safe_point)?;
        self.submit(ctx, txn)?;
        Ok(removed)
    }

    /// Non-transactional range removal for schema drops. Refused while any
    /// lock intersects the range.
    pub fn delete_range(&self, ctx: &Context, range: &Range) -> Result<()> {
        let reader = self.reader(ctx)?;
        let locks = reader.scan_locks(&range.start, &range.end, |_| true, 1)?;
        if let Some((key, lock)) = locks.first() {
            return Err(mvcc::MvccError::KeyIsLocked(mvcc::LockInfo::from_lock(
                &key.to_raw()?,
                lock,
            ))
            .into());
        }
        let mut ops = Vec::new();
        for cf in [CF_TXN_WRITE, CF_TXN_DATA, CF_TXN_LOCK] {
            let cf_range = region_cf_range(cf, range);
            ops.push(WriteOp::delete_range(cf, cf_range.start, cf_range.end));
        }
        self.engine.write(ctx, ops)
    }
}

#[cfg(test)]
mod tests {
    use engine_memory::{MemoryEngine, MemoryEngineBuilder};

    use crate::storage::mvcc::MvccError;
    use crate::storage::{Error, LocalEngine};

    use super::*;

    fn store() -> TxnStore<LocalEngine<MemoryEngine>> {
        TxnStore::new(LocalEngine::new(MemoryEngineBuilder::new().build()))
    }

    fn ctx() -> Context {
        Context::default()
    }

    fn put_mutation(key: &[u8], value: &[u8]) -> Mutation {
        Mutation::Put((Key::from_raw(key), value.to_vec()))
    }

    #[test]
    fn test_prewrite_commit_get() {
        let s = store();
        s.prewrite(
            &ctx(),
            vec![put_mutation(b"t:k", b"v")],
            b"t:k",
            10.into(),
            3000,
            1,
            vec![],
            TimeStamp::zero(),
        )
        .unwrap();
        s.commit(&ctx(), &[b"t:k".to_vec()], 10.into(), 20.into())
            .unwrap();
        assert_eq!(
            s.get(&ctx(), b"t:k", 25.into(), &TsSet::Empty)
                .unwrap()
                .unwrap(),
            b"v"
        );
    }

    #[test]
    fn test_prewrite_limit() {
        let s = store();
        let mutations: Vec<Mutation> = (0..1025u32)
            .map(|i| put_mutation(format!("t:{:04}", i).as_bytes(), b"v"))
            .collect();
        let err = s
            .prewrite(
                &ctx(),
                mutations,
                b"t:0000",
                10.into(),
                3000,
                1,
                vec![],
                TimeStamp::zero(),
            )
            .unwrap_err();
        match err {
            Error::Server(e) => assert_eq!(e.code, crate::error::ErrorCode::IllegalParameters),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_commit_ts_must_follow_start_ts() {
        let s = store();
        let err = s
            .commit(&ctx(), &[b"t:k".to_vec()], 20.into(), 10.into())
            .unwrap_err();
        match err {
            Error::Server(e) => assert_eq!(e.code, crate::error::ErrorCode::IllegalParameters),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_scan_boundaries() {
        let s = store();
        // Equal bounds: empty, not an error.
        assert!(s
            .scan(
                &ctx(),
                b"t:a",
                b"t:a",
                10.into(),
                0,
                false,
                false,
                &TsSet::Empty,
                None,
            )
            .unwrap()
            .is_empty());
        // Inverted bounds: range invalid.
        let err = s
            .scan(
                &ctx(),
                b"t:b",
                b"t:a",
                10.into(),
                0,
                false,
                false,
                &TsSet::Empty,
                None,
            )
            .unwrap_err();
        match err {
            Error::Server(e) => assert_eq!(e.code, crate::error::ErrorCode::RangeInvalid),
            other => panic!("unexpected: {:?}", other),
        }
        // Over-limit scans are refused.
        assert!(s
            .scan(
                &ctx(),
                b"t:a",
                b"t:z",
                10.into(),
                2000,
                false,
                false,
                &TsSet::Empty,
                None,
            )
            .is_err());
    }

    #[test]
    fn test_scan_coprocessor_predicate() {
        let s = store();
        s.prewrite(
            &ctx(),
            vec![
                put_mutation(b"t:a", b"keep"),
                put_mutation(b"t:b", b"drop"),
                put_mutation(b"t:c", b"keep"),
            ],
            b"t:a",
            10.into(),
            3000,
            3,
            vec![],
            TimeStamp::zero(),
        )
        .unwrap();
        s.commit(
            &ctx(),
            &[b"t:a".to_vec(), b"t:b".to_vec(), b"t:c".to_vec()],
            10.into(),
            20.into(),
        )
        .unwrap();
        let keep = |_key: &[u8], value: &[u8]| value == b"keep";
        let rows = s
            .scan(
                &ctx(),
                b"t:a",
                b"t:z",
                30.into(),
                0,
                false,
                false,
                &TsSet::Empty,
                Some(&keep),
            )
            .unwrap();
        assert_eq!(
            rows,
            vec![
                (b"t:a".to_vec(), b"keep".to_vec()),
                (b"t:c".to_vec(), b"keep".to_vec()),
            ]
        );
    }

    #[test]
    fn test_pessimistic_conflict_and_resolve() {
        let s = store();
        // Client 1 locks.
        s.acquire_pessimistic_lock(
            &ctx(),
            &[b"t:k1".to_vec()],
            b"t:k1",
            100.into(),
            100.into(),
            3000,
            false,
        )
        .unwrap();
        // Client 2 collides and learns the owner.
        let err = s
            .acquire_pessimistic_lock(
                &ctx(),
                &[b"t:k1".to_vec()],
                b"t:k1",
                110.into(),
                110.into(),
                3000,
                false,
            )
            .unwrap_err();
        match err {
            Error::Mvcc(MvccError::KeyIsLocked(info)) => {
                assert_eq!(info.lock_version, 100.into());
            }
            other => panic!("unexpected: {:?}", other),
        }

        // Client 1 finishes its 2PC.
        s.prewrite(
            &ctx(),
            vec![put_mutation(b"t:k1", b"v")],
            b"t:k1",
            100.into(),
            3000,
            1,
            vec![true],
            100.into(),
        )
        .unwrap();
        s.commit(&ctx(), &[b"t:k1".to_vec()], 100.into(), 120.into())
            .unwrap();

        // Client 2 resolves (a no-op now) and retries with a fresh
        // for_update_ts.
        let range = Range::new(b"t:a".to_vec(), b"t:z".to_vec());
        s.resolve_lock(
            &ctx(),
            &range,
            100.into(),
            120.into(),
            Some(vec![b"t:k1".to_vec()]),
        )
        .unwrap();
        s.acquire_pessimistic_lock(
            &ctx(),
            &[b"t:k1".to_vec()],
            b"t:k1",
            110.into(),
            125.into(),
            3000,
            false,
        )
        .unwrap();
    }

    #[test]
    fn test_resolve_lock_by_range_scan() {
        let s = store();
        s.prewrite(
            &ctx(),
            vec![put_mutation(b"t:a", b"1"), put_mutation(b"t:b", b"2")],
            b"t:a",
            10.into(),
            3000,
            2,
            vec![],
            TimeStamp::zero(),
        )
        .unwrap();
        let range = Range::new(b"t:a".to_vec(), b"t:z".to_vec());
        let resolved = s
            .resolve_lock(&ctx(), &range, 10.into(), TimeStamp::zero(), None)
            .unwrap();
        assert_eq!(resolved, 2);
        // Rolled back: reads see nothing and locks are gone.
        assert_eq!(s.get(&ctx(), b"t:a", 20.into(), &TsSet::Empty).unwrap(), None);
        assert!(s
            .scan_locks(&ctx(), &range, TimeStamp::max(), 0)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_delete_range_blocked_by_lock() {
        let s = store();
        s.prewrite(
            &ctx(),
            vec![put_mutation(b"t:k", b"v")],
            b"t:k",
            10.into(),
            3000,
            1,
            vec![],
            TimeStamp::zero(),
        )
        .unwrap();
        let range = Range::new(b"t:a".to_vec(), b"t:z".to_vec());
        assert!(matches!(
            s.delete_range(&ctx(), &range),
            Err(Error::Mvcc(MvccError::KeyIsLocked(_)))
        ));

        // After commit the range delete goes through and hides the value.
        s.commit(&ctx(), &[b"t:k".to_vec()], 10.into(), 20.into())
            .unwrap();
        s.delete_range(&ctx(), &range).unwrap();
        assert_eq!(s.get(&ctx(), b"t:k", 30.into(), &TsSet::Empty).unwrap(), None);
    }

    #[test]
    fn test_txn_heartbeat_and_status() {
        let s = store();
        let start = TimeStamp::compose(1000, 0);
        s.prewrite(
            &ctx(),
            vec![put_mutation(b"t:k", b"v")],
            b"t:k",
            start,
            3000,
            1,
            vec![],
            TimeStamp::zero(),
        )
        .unwrap();
        assert_eq!(s.heartbeat(&ctx(), b"t:k", start, 8000).unwrap(), 8000);
        let status = s
            .check_txn_status(&ctx(), b"t:k", start, TimeStamp::compose(1002, 0))
            .unwrap();
        assert_eq!(status, TxnStatus::Uncommitted { lock_ttl: 8000 });
    }
}

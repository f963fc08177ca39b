// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

use std::collections::HashMap;
use std::fmt;
use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_skiplist::SkipMap;
use engine_traits::{
    util, CfName, Error, Iterable, IterOptions, Modify, Peekable, Range, RawEngine, Result,
    ALL_CFS, INGEST_EMULATION_BATCH,
};
use parking_lot::Mutex;

use crate::iterator::MemoryIterator;
use crate::snapshot::MemorySnapshot;
use crate::version::{encoded_user_key, versioned_key, ValueEntry};

pub(crate) type CfMap = Arc<SkipMap<Vec<u8>, ValueEntry>>;

pub struct MemoryEngineBuilder {
    cf_names: Vec<CfName>,
}

impl MemoryEngineBuilder {
    pub fn new() -> Self {
        MemoryEngineBuilder {
            cf_names: ALL_CFS.to_vec(),
        }
    }

    pub fn cf_names(mut self, names: &[CfName]) -> Self {
        self.cf_names = names.to_vec();
        self
    }

    pub fn build(self) -> MemoryEngine {
        let mut cfs = HashMap::new();
        for cf in self.cf_names {
            cfs.insert(cf, Arc::new(SkipMap::new()) as CfMap);
        }
        MemoryEngine {
            core: Arc::new(EngineCore {
                cfs,
                committed: AtomicU64::new(0),
                write_lock: Mutex::new(()),
            }),
        }
    }
}

impl Default for MemoryEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct EngineCore {
    pub(crate) cfs: HashMap<CfName, CfMap>,
    /// Highest fully published batch sequence. Readers pin this; writers
    /// bump it only after every entry of their batch is in place.
    pub(crate) committed: AtomicU64,
    write_lock: Mutex<()>,
}

#[derive(Clone)]
pub struct MemoryEngine {
    pub(crate) core: Arc<EngineCore>,
}

impl fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("cfs", &self.core.cfs.keys().collect::<Vec<_>>())
            .field("committed", &self.core.committed.load(Ordering::Acquire))
            .finish()
    }
}

impl MemoryEngine {
    pub(crate) fn cf_map(&self, cf: &str) -> Result<&CfMap> {
        self.core
            .cfs
            .get(cf)
            .ok_or_else(|| Error::CfName(cf.to_owned()))
    }

    pub(crate) fn committed_seq(&self) -> u64 {
        self.core.committed.load(Ordering::Acquire)
    }

    /// Newest visible version of `key` at `seq`, tombstones resolved to
    /// `None`.
    pub(crate) fn get_at(&self, cf: &str, key: &[u8], seq: u64) -> Result<Option<Vec<u8>>> {
        let map = self.cf_map(cf)?;
        let enc = encoded_user_key(key);
        let from = versioned_key(key, seq);
        if let Some(entry) = map.lower_bound(Bound::Included(from.as_slice())) {
            if entry.key().starts_with(&enc) && entry.key().len() == enc.len() + 8 {
                return Ok(match entry.value() {
                    ValueEntry::Put(v) => Some(v.clone()),
                    ValueEntry::Tombstone => None,
                });
            }
        }
        Ok(None)
    }

    /// Distinct user keys visible at `seq` within `[start, end)`.
    fn visible_keys_in_range(&self, cf: &str, range: &Range, seq: u64) -> Result<Vec<Vec<u8>>> {
        let map = self.cf_map(cf)?.clone();
        let opts = IterOptions::new(Some(range.start.clone()), Some(range.end.clone()));
        let mut iter = MemoryIterator::new(map, seq, opts);
        let mut keys = Vec::new();
        let mut valid = iter.seek_to_first()?;
        while valid {
            keys.push(iter.key().to_vec());
            valid = iter.next()?;
        }
        Ok(keys)
    }

    fn apply(&self, seq: u64, batch: Vec<Modify>) -> Result<()> {
        // Range deletes tombstone whatever was visible just before this
        // batch, so they compose with the puts and deletes next to them.
        let pre_seq = seq - 1;
        for modify in batch {
            match modify {
                Modify::Put(cf, key, value) => {
                    self.cf_map(cf)?
                        .insert(versioned_key(&key, seq), ValueEntry::Put(value));
                }
                Modify::Delete(cf, key) => {
                    self.cf_map(cf)?
                        .insert(versioned_key(&key, seq), ValueEntry::Tombstone);
                }
                Modify::DeleteRange(cf, start, end) => {
                    if start >= end {
                        continue;
                    }
                    let range = Range::new(start, end);
                    for key in self.visible_keys_in_range(cf, &range, pre_seq)? {
                        self.cf_map(cf)?
                            .insert(versioned_key(&key, seq), ValueEntry::Tombstone);
                    }
                }
            }
        }
        Ok(())
    }
}

impl Peekable for MemoryEngine {
    fn get_value_cf(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.get_at(cf, key, self.committed_seq())
    }
}

impl Iterable for MemoryEngine {
    type Iter = MemoryIterator;

    fn iterator_cf_opt(&self, cf: &str, opts: IterOptions) -> Result<MemoryIterator> {
        let map = self.cf_map(cf)?.clone();
        Ok(MemoryIterator::new(map, self.committed_seq(), opts))
    }
}

impl RawEngine for MemoryEngine {
    type Snap = MemorySnapshot;

    fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot::new(self.clone(), self.committed_seq())
    }

    fn write(&self, batch: Vec<Modify>) -> Result<()> {
        let _guard = self.core.write_lock.lock();
        let seq = self.core.committed.load(Ordering::Acquire) + 1;
        self.apply(seq, batch)?;
        self.core.committed.store(seq, Ordering::Release);
        Ok(())
    }

    fn ingest_external_file_cf(&self, cf: &str, files: &[&str]) -> Result<()> {
        for file in files {
            let kvs = util::read_external_file(Path::new(file))?;
            for chunk in kvs.chunks(INGEST_EMULATION_BATCH) {
                let batch = chunk
                    .iter()
                    .map(|(k, v)| {
                        engine_traits::name_to_cf(cf)
                            .map(|cf| Modify::Put(cf, k.clone(), v.clone()))
                            .ok_or_else(|| Error::CfName(cf.to_owned()))
                    })
                    .collect::<Result<Vec<_>>>()?;
                self.write(batch)?;
            }
        }
        Ok(())
    }

    fn flush_cf(&self, _cf: &str) -> Result<()> {
        Ok(())
    }

    fn compact_cf(&self, _cf: &str) -> Result<()> {
        Ok(())
    }

    #[cfg(not(feature = "cursor-size"))]
    fn approximate_sizes_cf(&self, cf: &str, ranges: &[Range]) -> Result<Vec<u64>> {
        // Fast path: count stored versions in the encoded range. This
        // over-counts updated keys but never shrinks when a key is added.
        let map = self.cf_map(cf)?;
        let mut sizes = Vec::with_capacity(ranges.len());
        for range in ranges {
            let lower = encoded_user_key(&range.start);
            let upper = encoded_user_key(&range.end);
            let count = map
                .range((Bound::Included(lower.as_slice()), Bound::Excluded(upper.as_slice())))
                .count() as u64;
            sizes.push(count);
        }
        Ok(sizes)
    }

    #[cfg(feature = "cursor-size")]
    fn approximate_sizes_cf(&self, cf: &str, ranges: &[Range]) -> Result<Vec<u64>> {
        // Cursor fallback: walk the range and count distinct live keys.
        let seq = self.committed_seq();
        let mut sizes = Vec::with_capacity(ranges.len());
        for range in ranges {
            sizes.push(self.visible_keys_in_range(cf, range, seq)?.len() as u64);
        }
        Ok(sizes)
    }

    fn cf_names(&self) -> Vec<&str> {
        self.core.cfs.keys().copied().collect()
    }
}

// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

use std::fmt;

use engine_traits::{Iterable, IterOptions, Peekable, RawEngine, Result, Snapshot};

use crate::engine::MemoryEngine;
use crate::iterator::MemoryIterator;

/// A pinned sequence number over the shared skiplists. Creating one is a
/// single atomic load; dropping it releases nothing because versions are
/// immutable once published.
#[derive(Clone)]
pub struct MemorySnapshot {
    engine: MemoryEngine,
    seq: u64,
}

impl MemorySnapshot {
    pub(crate) fn new(engine: MemoryEngine, seq: u64) -> MemorySnapshot {
        MemorySnapshot { engine, seq }
    }

    pub fn sequence(&self) -> u64 {
        self.seq
    }
}

impl fmt::Debug for MemorySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySnapshot").field("seq", &self.seq).finish()
    }
}

impl Peekable for MemorySnapshot {
    fn get_value_cf(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.engine.get_at(cf, key, self.seq)
    }
}

impl Iterable for MemorySnapshot {
    type Iter = MemoryIterator;

    fn iterator_cf_opt(&self, cf: &str, opts: IterOptions) -> Result<MemoryIterator> {
        let map = self.engine.cf_map(cf)?.clone();
        Ok(MemoryIterator::new(map, self.seq, opts))
    }
}

impl Snapshot for MemorySnapshot {
    fn cf_names(&self) -> Vec<&str> {
        self.engine.cf_names()
    }
}

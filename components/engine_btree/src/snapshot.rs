// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

use std::fmt;

use engine_traits::{Iterable, IterOptions, Peekable, RawEngine, Result, Snapshot};

use crate::engine::{data_key, BTreeEngine, Tree};
use crate::iterator::BTreeIterator;

/// A pinned root of the copy-on-write tree. Writers publish new roots and
/// never touch a pinned one, so the view is immutable for the snapshot's
/// whole lifetime and is released when the last holder drops it.
#[derive(Clone)]
pub struct BTreeSnapshot {
    engine: BTreeEngine,
    tree: Tree,
}

impl BTreeSnapshot {
    pub(crate) fn new(engine: BTreeEngine, tree: Tree) -> BTreeSnapshot {
        BTreeSnapshot { engine, tree }
    }
}

impl fmt::Debug for BTreeSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BTreeSnapshot")
            .field("entries", &self.tree.len())
            .finish()
    }
}

impl Peekable for BTreeSnapshot {
    fn get_value_cf(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let id = self.engine.cf_id(cf)?;
        Ok(self.tree.get(&data_key(id, key)).cloned())
    }
}

impl Iterable for BTreeSnapshot {
    type Iter = BTreeIterator;

    fn iterator_cf_opt(&self, cf: &str, opts: IterOptions) -> Result<BTreeIterator> {
        let id = self.engine.cf_id(cf)?;
        Ok(BTreeIterator::new(self.tree.clone(), id, opts))
    }
}

impl Snapshot for BTreeSnapshot {
    fn cf_names(&self) -> Vec<&str> {
        self.engine.cf_names()
    }
}

#[cfg(test)]
mod tests {
    use engine_traits::{Peekable, RawEngine, CF_DEFAULT};

    use crate::BTreeEngineBuilder;

    #[test]
    fn test_snapshot_survives_writer_churn() {
        let e = BTreeEngineBuilder::new().build();
        e.put_cf(CF_DEFAULT, b"k", b"v1").unwrap();
        let snap = e.snapshot();
        for i in 0..16u8 {
            e.put_cf(CF_DEFAULT, b"k", &[i]).unwrap();
        }
        assert_eq!(snap.get_value(b"k").unwrap().unwrap(), b"v1");
    }
}

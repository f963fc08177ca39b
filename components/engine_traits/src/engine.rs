// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

use std::fmt::Debug;

use crate::{Iterable, Modify, Peekable, Range, Result};

/// A point-in-time view of an engine. Reads through a snapshot observe
/// exactly the committed state at creation time; the snapshot holds whatever
/// cursor or transaction resources the engine needs and releases them on
/// drop. Snapshots never block writers.
pub trait Snapshot: 'static + Peekable + Iterable + Send + Sync + Debug {
    fn cf_names(&self) -> Vec<&str>;
}

/// A pluggable column-family key-value engine.
pub trait RawEngine: Peekable + Iterable + Send + Sync + Clone + Debug + 'static {
    type Snap: Snapshot;

    fn snapshot(&self) -> Self::Snap;

    /// Applies the whole batch atomically, across every CF it touches.
    fn write(&self, batch: Vec<Modify>) -> Result<()>;

    /// Imports pre-sorted external files into a CF. Engines without native
    /// ingest emulate it with batched puts.
    fn ingest_external_file_cf(&self, cf: &str, files: &[&str]) -> Result<()>;

    fn flush_cf(&self, cf: &str) -> Result<()>;
    fn compact_cf(&self, cf: &str) -> Result<()>;

    /// Approximate number of keys in each range. The estimate may come from
    /// engine statistics or a cursor count; adding a key inside a range must
    /// never decrease the reported figure.
    fn approximate_sizes_cf(&self, cf: &str, ranges: &[Range]) -> Result<Vec<u64>>;

    fn cf_names(&self) -> Vec<&str>;

    fn put_cf(&self, cf: crate::CfName, key: &[u8], value: &[u8]) -> Result<()> {
        self.write(vec![Modify::Put(cf, key.to_vec(), value.to_vec())])
    }

    fn delete_cf(&self, cf: crate::CfName, key: &[u8]) -> Result<()> {
        self.write(vec![Modify::Delete(cf, key.to_vec())])
    }

    fn delete_batch_cf(&self, cf: crate::CfName, keys: Vec<Vec<u8>>) -> Result<()> {
        self.write(keys.into_iter().map(|k| Modify::Delete(cf, k)).collect())
    }

    fn delete_range_cf(&self, cf: crate::CfName, start: &[u8], end: &[u8]) -> Result<()> {
        self.write(vec![Modify::DeleteRange(cf, start.to_vec(), end.to_vec())])
    }

    fn delete_ranges(&self, ranges: Vec<(crate::CfName, Range)>) -> Result<()> {
        self.write(
            ranges
                .into_iter()
                .map(|(cf, r)| Modify::DeleteRange(cf, r.start, r.end))
                .collect(),
        )
    }
}

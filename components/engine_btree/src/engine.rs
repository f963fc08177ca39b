// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use engine_traits::{
    util, CfName, Error, Iterable, IterOptions, Modify, Peekable, Range, RawEngine, Result,
    ALL_CFS, INGEST_EMULATION_BATCH,
};
use parking_lot::RwLock;

use crate::iterator::BTreeIterator;
use crate::snapshot::BTreeSnapshot;

pub(crate) type Tree = Arc<BTreeMap<Vec<u8>, Vec<u8>>>;

/// How long a writer waits for the tree before reporting a retryable
/// conflict to the retry wrapper.
const WRITE_LOCK_TIMEOUT: Duration = Duration::from_millis(50);

pub struct BTreeEngineBuilder {
    cf_names: Vec<CfName>,
}

impl BTreeEngineBuilder {
    pub fn new() -> Self {
        BTreeEngineBuilder {
            cf_names: ALL_CFS.to_vec(),
        }
    }

    pub fn cf_names(mut self, names: &[CfName]) -> Self {
        self.cf_names = names.to_vec();
        self
    }

    pub fn build(self) -> BTreeEngine {
        BTreeEngine {
            core: Arc::new(EngineCore {
                cf_names: self.cf_names,
                tree: RwLock::new(Arc::new(BTreeMap::new())),
            }),
        }
    }
}

impl Default for BTreeEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct EngineCore {
    cf_names: Vec<CfName>,
    tree: RwLock<Tree>,
}

#[derive(Clone)]
pub struct BTreeEngine {
    pub(crate) core: Arc<EngineCore>,
}

impl fmt::Debug for BTreeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BTreeEngine")
            .field("cfs", &self.core.cf_names)
            .finish()
    }
}

/// Composes the stored form of a user key.
pub(crate) fn data_key(cf_id: u8, key: &[u8]) -> Vec<u8> {
    let mut stored = Vec::with_capacity(key.len() + 1);
    stored.push(cf_id);
    stored.extend_from_slice(key);
    stored
}

/// The exclusive upper bound of a whole CF: the next CF id alone.
pub(crate) fn cf_upper_bound(cf_id: u8) -> Vec<u8> {
    vec![cf_id + 1]
}

impl BTreeEngine {
    pub(crate) fn cf_id(&self, cf: &str) -> Result<u8> {
        self.core
            .cf_names
            .iter()
            .position(|c| *c == cf)
            // Id zero is reserved so an all-zero key can never alias a CF.
            .map(|pos| pos as u8 + 1)
            .ok_or_else(|| Error::CfName(cf.to_owned()))
    }

    pub(crate) fn current_tree(&self) -> Tree {
        self.core.tree.read().clone()
    }

    fn try_write(&self, batch: &[Modify]) -> Result<()> {
        let mut guard = self
            .core
            .tree
            .try_write_for(WRITE_LOCK_TIMEOUT)
            .ok_or(Error::Deadlock)?;
        let mut next = BTreeMap::clone(&guard);
        for modify in batch {
            match modify {
                Modify::Put(cf, key, value) => {
                    let id = self.cf_id(cf)?;
                    next.insert(data_key(id, key), value.clone());
                }
                Modify::Delete(cf, key) => {
                    let id = self.cf_id(cf)?;
                    next.remove(&data_key(id, key));
                }
                Modify::DeleteRange(cf, start, end) => {
                    if start >= end {
                        continue;
                    }
                    let id = self.cf_id(cf)?;
                    delete_range_in(&mut next, data_key(id, start), data_key(id, end));
                }
            }
        }
        *guard = Arc::new(next);
        Ok(())
    }
}

#[cfg(not(feature = "bulk-delete"))]
fn delete_range_in(tree: &mut BTreeMap<Vec<u8>, Vec<u8>>, start: Vec<u8>, end: Vec<u8>) {
    // Cursor walk: step to each key in the range and remove it in place.
    loop {
        let next_key = match tree.range(start.clone()..end.clone()).next() {
            Some((k, _)) => k.clone(),
            None => return,
        };
        tree.remove(&next_key);
    }
}

#[cfg(feature = "bulk-delete")]
fn delete_range_in(tree: &mut BTreeMap<Vec<u8>, Vec<u8>>, start: Vec<u8>, end: Vec<u8>) {
    // Bulk path: build the ordered key batch first, then delete it in one
    // pass, the way an engine-native multi-delete consumes a builder.
    let keys: Vec<Vec<u8>> = tree
        .range(start..end)
        .map(|(k, _)| k.clone())
        .collect();
    for key in keys {
        tree.remove(&key);
    }
}

impl Peekable for BTreeEngine {
    fn get_value_cf(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let id = self.cf_id(cf)?;
        Ok(self.current_tree().get(&data_key(id, key)).cloned())
    }
}

impl Iterable for BTreeEngine {
    type Iter = BTreeIterator;

    fn iterator_cf_opt(&self, cf: &str, opts: IterOptions) -> Result<BTreeIterator> {
        let id = self.cf_id(cf)?;
        Ok(BTreeIterator::new(self.current_tree(), id, opts))
    }
}

impl RawEngine for BTreeEngine {
    type Snap = BTreeSnapshot;

    fn snapshot(&self) -> BTreeSnapshot {
        BTreeSnapshot::new(self.clone(), self.current_tree())
    }

    fn write(&self, batch: Vec<Modify>) -> Result<()> {
        util::retry_default("btree_write", || self.try_write(&batch))
    }

    fn ingest_external_file_cf(&self, cf: &str, files: &[&str]) -> Result<()> {
        let cf = engine_traits::name_to_cf(cf).ok_or_else(|| Error::CfName(cf.to_owned()))?;
        for file in files {
            let kvs = util::read_external_file(Path::new(file))?;
            for chunk in kvs.chunks(INGEST_EMULATION_BATCH) {
                let batch = chunk
                    .iter()
                    .map(|(k, v)| Modify::Put(cf, k.clone(), v.clone()))
                    .collect();
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
        // Fast path over tree statistics: for a probe key the tree yields
        // (less, equal, greater) with `greater` strictly greater, keeping
        // count = less + equal + greater; a range size is then
        // less(end) - less(start).
        let id = self.cf_id(cf)?;
        let tree = self.current_tree();
        let less = |key: &[u8]| -> u64 {
            tree.range(cf_upper_bound(id - 1)..data_key(id, key)).count() as u64
        };
        Ok(ranges
            .iter()
            .map(|r| less(&r.end).saturating_sub(less(&r.start)))
            .collect())
    }

    #[cfg(feature = "cursor-size")]
    fn approximate_sizes_cf(&self, cf: &str, ranges: &[Range]) -> Result<Vec<u64>> {
        let id = self.cf_id(cf)?;
        let tree = self.current_tree();
        Ok(ranges
            .iter()
            .map(|r| {
                tree.range(data_key(id, &r.start)..data_key(id, &r.end))
                    .count() as u64
            })
            .collect())
    }

    fn cf_names(&self) -> Vec<&str> {
        self.core.cf_names.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use engine_traits::{CF_DEFAULT, CF_TXN_WRITE};

    use super::*;

    fn engine() -> BTreeEngine {
        BTreeEngineBuilder::new().build()
    }

    #[test]
    fn test_put_get_delete() {
        let e = engine();
        e.put_cf(CF_DEFAULT, b"k", b"v").unwrap();
        assert_eq!(e.get_value(b"k").unwrap().unwrap(), b"v");
        e.delete_cf(CF_DEFAULT, b"k").unwrap();
        assert_eq!(e.get_value(b"k").unwrap(), None);
    }

    #[test]
    fn test_cfs_do_not_alias() {
        let e = engine();
        e.put_cf(CF_DEFAULT, b"k", b"default").unwrap();
        e.put_cf(CF_TXN_WRITE, b"k", b"write").unwrap();
        assert_eq!(e.get_value_cf(CF_DEFAULT, b"k").unwrap().unwrap(), b"default");
        assert_eq!(e.get_value_cf(CF_TXN_WRITE, b"k").unwrap().unwrap(), b"write");
        e.delete_cf(CF_DEFAULT, b"k").unwrap();
        assert_eq!(e.get_value_cf(CF_TXN_WRITE, b"k").unwrap().unwrap(), b"write");
    }

    #[test]
    fn test_snapshot_pins_previous_root() {
        let e = engine();
        e.put_cf(CF_DEFAULT, b"k", b"v1").unwrap();
        let snap = e.snapshot();
        e.put_cf(CF_DEFAULT, b"k", b"v2").unwrap();
        assert_eq!(snap.get_value(b"k").unwrap().unwrap(), b"v1");
        assert_eq!(e.get_value(b"k").unwrap().unwrap(), b"v2");
    }

    #[test]
    fn test_delete_range_stays_inside_cf() {
        let e = engine();
        for cf in [CF_DEFAULT, CF_TXN_WRITE] {
            for key in [b"a", b"b", b"c"] {
                e.put_cf(cf, key, b"v").unwrap();
            }
        }
        e.delete_range_cf(CF_DEFAULT, b"a", b"c").unwrap();
        assert_eq!(e.get_value_cf(CF_DEFAULT, b"a").unwrap(), None);
        assert_eq!(e.get_value_cf(CF_DEFAULT, b"b").unwrap(), None);
        assert_eq!(e.get_value_cf(CF_DEFAULT, b"c").unwrap().unwrap(), b"v");
        assert_eq!(e.get_value_cf(CF_TXN_WRITE, b"a").unwrap().unwrap(), b"v");
    }

    #[test]
    fn test_scan_within_cf() {
        let e = engine();
        e.put_cf(CF_DEFAULT, b"a", b"1").unwrap();
        e.put_cf(CF_DEFAULT, b"b", b"2").unwrap();
        e.put_cf(CF_TXN_WRITE, b"b", b"other").unwrap();
        let kvs = e.scan_cf(CF_DEFAULT, b"a", b"z", 0, false).unwrap();
        assert_eq!(
            kvs,
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"2".to_vec()),
            ]
        );
    }

    #[test]
    fn test_approximate_sizes() {
        let e = engine();
        for key in [b"a", b"b", b"c", b"d"] {
            e.put_cf(CF_DEFAULT, key, b"v").unwrap();
        }
        let sizes = e
            .approximate_sizes_cf(
                CF_DEFAULT,
                &[
                    Range::new(b"a".to_vec(), b"c".to_vec()),
                    Range::new(b"c".to_vec(), b"z".to_vec()),
                ],
            )
            .unwrap();
        assert_eq!(sizes, vec![2, 2]);
    }
}

// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

use crate::{Error, IterOptions, Result};

/// An engine cursor. The cursor is invalid before the first positioning
/// call, past the upper bound (exclusive) and before the lower bound
/// (inclusive). `key`/`value` must only be called while `valid()`.
pub trait Iterator: Send {
    fn seek(&mut self, key: &[u8]) -> Result<bool>;
    /// Positions at the last entry `<= key` inside the bounds.
    fn seek_for_prev(&mut self, key: &[u8]) -> Result<bool>;
    fn seek_to_first(&mut self) -> Result<bool>;
    fn seek_to_last(&mut self) -> Result<bool>;

    fn next(&mut self) -> Result<bool>;
    fn prev(&mut self) -> Result<bool>;

    fn valid(&self) -> Result<bool>;
    fn key(&self) -> &[u8];
    fn value(&self) -> &[u8];
}

pub trait Iterable {
    type Iter: Iterator;

    fn iterator_cf_opt(&self, cf: &str, opts: IterOptions) -> Result<Self::Iter>;

    fn iterator_cf(&self, cf: &str) -> Result<Self::Iter> {
        self.iterator_cf_opt(cf, IterOptions::default())
    }

    /// Forward scan of `[start, end)` collecting up to `limit` pairs
    /// (`limit == 0` means unbounded). Empty bounds are rejected so callers
    /// cannot silently scan a whole column family.
    fn scan_cf(
        &self,
        cf: &str,
        start: &[u8],
        end: &[u8],
        limit: usize,
        key_only: bool,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        if start.is_empty() || end.is_empty() {
            return Err(Error::KeyEmpty);
        }
        if start > end {
            return Err(Error::KeyEmpty);
        }
        let mut kvs = Vec::new();
        if start == end {
            return Ok(kvs);
        }
        let opts = IterOptions::new(Some(start.to_vec()), Some(end.to_vec()));
        let mut iter = self.iterator_cf_opt(cf, opts)?;
        let mut valid = iter.seek_to_first()?;
        while valid {
            let value = if key_only { vec![] } else { iter.value().to_vec() };
            kvs.push((iter.key().to_vec(), value));
            if limit > 0 && kvs.len() >= limit {
                break;
            }
            valid = iter.next()?;
        }
        Ok(kvs)
    }
}

// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

use std::ops::Bound;

use engine_traits::{IterOptions, Result};

use crate::engine::{cf_upper_bound, data_key, Tree};

/// A cursor over one CF of the shared tree. The user-facing bounds are
/// composed with the CF id before the tree sees them, so the cursor can
/// never leave its CF no matter what it is asked to seek to.
pub struct BTreeIterator {
    tree: Tree,
    lower: Vec<u8>,
    upper: Vec<u8>,
    cur_key: Vec<u8>,
    cur_value: Vec<u8>,
    valid: bool,
}

impl BTreeIterator {
    pub(crate) fn new(tree: Tree, cf_id: u8, opts: IterOptions) -> BTreeIterator {
        let lower = match opts.lower_bound {
            Some(b) => data_key(cf_id, &b),
            None => vec![cf_id],
        };
        let upper = match opts.upper_bound {
            Some(b) => data_key(cf_id, &b),
            None => cf_upper_bound(cf_id),
        };
        BTreeIterator {
            tree,
            lower,
            upper,
            cur_key: vec![],
            cur_value: vec![],
            valid: false,
        }
    }

    fn set_from(&mut self, found: Option<(Vec<u8>, Vec<u8>)>) -> bool {
        match found {
            Some((k, v)) => {
                self.cur_key = k;
                self.cur_value = v;
                self.valid = true;
            }
            None => self.valid = false,
        }
        self.valid
    }

    fn first_at_or_after(&mut self, from: Vec<u8>) -> bool {
        let found = self
            .tree
            .range((Bound::Included(from), Bound::Excluded(self.upper.clone())))
            .next()
            .map(|(k, v)| (k.clone(), v.clone()));
        self.set_from(found)
    }

    fn last_at_or_before(&mut self, upto: Bound<Vec<u8>>) -> bool {
        let found = self
            .tree
            .range((Bound::Included(self.lower.clone()), upto))
            .next_back()
            .map(|(k, v)| (k.clone(), v.clone()));
        self.set_from(found)
    }

    fn clamp_lower(&self, key: Vec<u8>) -> Vec<u8> {
        if key < self.lower {
            self.lower.clone()
        } else {
            key
        }
    }
}

impl engine_traits::Iterator for BTreeIterator {
    fn seek(&mut self, key: &[u8]) -> Result<bool> {
        let from = self.clamp_lower(data_key(self.lower[0], key));
        Ok(self.first_at_or_after(from))
    }

    fn seek_for_prev(&mut self, key: &[u8]) -> Result<bool> {
        let target = data_key(self.lower[0], key);
        let upto = if target >= self.upper {
            Bound::Excluded(self.upper.clone())
        } else {
            Bound::Included(target)
        };
        Ok(self.last_at_or_before(upto))
    }

    fn seek_to_first(&mut self) -> Result<bool> {
        let from = self.lower.clone();
        Ok(self.first_at_or_after(from))
    }

    fn seek_to_last(&mut self) -> Result<bool> {
        Ok(self.last_at_or_before(Bound::Excluded(self.upper.clone())))
    }

    fn next(&mut self) -> Result<bool> {
        if !self.valid {
            return Ok(false);
        }
        let found = self
            .tree
            .range((
                Bound::Excluded(self.cur_key.clone()),
                Bound::Excluded(self.upper.clone()),
            ))
            .next()
            .map(|(k, v)| (k.clone(), v.clone()));
        Ok(self.set_from(found))
    }

    fn prev(&mut self) -> Result<bool> {
        if !self.valid {
            return Ok(false);
        }
        Ok(self.last_at_or_before(Bound::Excluded(self.cur_key.clone())))
    }

    fn valid(&self) -> Result<bool> {
        Ok(self.valid)
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid);
        &self.cur_key[1..]
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid);
        &self.cur_value
    }
}

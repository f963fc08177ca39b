// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

use std::ops::Bound;

use engine_traits::{IterOptions, Result};

use crate::engine::CfMap;
use crate::version::{
    encoded_user_key, split_versioned_key, versioned_key, ValueEntry, SEQ_SUFFIX_LEN,
};

/// A merging cursor over the versioned skiplist: it surfaces exactly one
/// entry per user key (the newest version visible at the pinned sequence)
/// and skips tombstoned keys, in both directions. Bounds are user keys,
/// lower inclusive, upper exclusive.
pub struct MemoryIterator {
    map: CfMap,
    seq: u64,
    lower_enc: Option<Vec<u8>>,
    upper_enc: Option<Vec<u8>>,
    cur_enc: Vec<u8>,
    cur_key: Vec<u8>,
    cur_value: Vec<u8>,
    valid: bool,
}

/// The smallest stored key belonging to `enc`.
fn first_version(enc: &[u8]) -> Vec<u8> {
    let mut key = enc.to_vec();
    key.extend_from_slice(&[0; SEQ_SUFFIX_LEN]);
    key
}

/// A key strictly greater than every stored version of `enc` and strictly
/// smaller than any other user key's versions.
fn past_user_key(enc: &[u8]) -> Vec<u8> {
    let mut key = enc.to_vec();
    key.extend_from_slice(&[0xff; SEQ_SUFFIX_LEN]);
    key.push(0);
    key
}

impl MemoryIterator {
    pub(crate) fn new(map: CfMap, seq: u64, opts: IterOptions) -> MemoryIterator {
        MemoryIterator {
            map,
            seq,
            lower_enc: opts.lower_bound.map(|b| encoded_user_key(&b)),
            upper_enc: opts.upper_bound.map(|b| encoded_user_key(&b)),
            cur_enc: vec![],
            cur_key: vec![],
            cur_value: vec![],
            valid: false,
        }
    }

    /// The newest version of `enc` visible at the pinned sequence.
    fn visible_version(&self, enc: &[u8]) -> Option<ValueEntry> {
        let mut target = enc.to_vec();
        // Same layout as versioned_key, but enc is already encoded.
        let mut suffix = vec![];
        dingo_util::codec::number::encode_u64_desc(&mut suffix, self.seq);
        target.extend_from_slice(&suffix);
        let entry = self.map.lower_bound(Bound::Included(target.as_slice()))?;
        let key = entry.key();
        if key.len() == enc.len() + SEQ_SUFFIX_LEN && key.starts_with(enc) {
            Some(entry.value().clone())
        } else {
            None
        }
    }

    fn set_current(&mut self, enc: Vec<u8>, value: Vec<u8>) -> Result<bool> {
        match crate::version::decode_user_key(&enc) {
            Some(user_key) => {
                self.cur_key = user_key;
                self.cur_enc = enc;
                self.cur_value = value;
                self.valid = true;
                Ok(true)
            }
            None => {
                self.valid = false;
                Ok(false)
            }
        }
    }

    /// Walks forward from the stored-key position `pos` to the first user
    /// key with a live visible version.
    fn forward_from(&mut self, mut pos: Vec<u8>) -> Result<bool> {
        self.valid = false;
        loop {
            let enc = {
                let entry = match self.map.lower_bound(Bound::Included(pos.as_slice())) {
                    Some(e) => e,
                    None => return Ok(false),
                };
                match split_versioned_key(entry.key()) {
                    Some((enc, _)) => enc.to_vec(),
                    None => return Ok(false),
                }
            };
            if let Some(upper) = &self.upper_enc {
                if enc.as_slice() >= upper.as_slice() {
                    return Ok(false);
                }
            }
            match self.visible_version(&enc) {
                Some(ValueEntry::Put(value)) => return self.set_current(enc, value),
                // Tombstoned or newer-than-snapshot only: skip the key.
                _ => pos = past_user_key(&enc),
            }
        }
    }

    /// Walks backward from the exclusive stored-key position `pos` (or the
    /// very end) to the last user key with a live visible version.
    fn backward_from(&mut self, pos: Option<Vec<u8>>) -> Result<bool> {
        self.valid = false;
        let mut bound = pos;
        loop {
            let enc = {
                let entry = match &bound {
                    Some(b) => self.map.upper_bound(Bound::Excluded(b.as_slice())),
                    None => self.map.back(),
                };
                let entry = match entry {
                    Some(e) => e,
                    None => return Ok(false),
                };
                match split_versioned_key(entry.key()) {
                    Some((enc, _)) => enc.to_vec(),
                    None => return Ok(false),
                }
            };
            if let Some(lower) = &self.lower_enc {
                if enc.as_slice() < lower.as_slice() {
                    return Ok(false);
                }
            }
            match self.visible_version(&enc) {
                Some(ValueEntry::Put(value)) => return self.set_current(enc, value),
                _ => bound = Some(enc),
            }
        }
    }

    fn clamp_lower(&self, pos: Vec<u8>) -> Vec<u8> {
        if let Some(lower) = &self.lower_enc {
            let floor = first_version(lower);
            if pos < floor {
                return floor;
            }
        }
        pos
    }
}

impl engine_traits::Iterator for MemoryIterator {
    fn seek(&mut self, key: &[u8]) -> Result<bool> {
        let pos = self.clamp_lower(versioned_key(key, u64::MAX));
        self.forward_from(pos)
    }

    fn seek_for_prev(&mut self, key: &[u8]) -> Result<bool> {
        let enc = encoded_user_key(key);
        let mut pos = past_user_key(&enc);
        if let Some(upper) = &self.upper_enc {
            if enc.as_slice() >= upper.as_slice() {
                pos = upper.clone();
            }
        }
        self.backward_from(Some(pos))
    }

    fn seek_to_first(&mut self) -> Result<bool> {
        let pos = match &self.lower_enc {
            Some(lower) => first_version(lower),
            None => vec![],
        };
        self.forward_from(pos)
    }

    fn seek_to_last(&mut self) -> Result<bool> {
        let pos = self.upper_enc.clone();
        self.backward_from(pos)
    }

    fn next(&mut self) -> Result<bool> {
        if !self.valid {
            return Ok(false);
        }
        let pos = past_user_key(&self.cur_enc);
        self.forward_from(pos)
    }

    fn prev(&mut self) -> Result<bool> {
        if !self.valid {
            return Ok(false);
        }
        let pos = self.cur_enc.clone();
        self.backward_from(Some(pos))
    }

    fn valid(&self) -> Result<bool> {
        Ok(self.valid)
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid);
        &self.cur_key
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid);
        &self.cur_value
    }
}

#[cfg(test)]
mod tests {
    use engine_traits::Iterator as _;
    use engine_traits::{IterOptions, RawEngine, CF_DEFAULT};

    use crate::{MemoryEngine, MemoryEngineBuilder};

    fn engine_with(keys: &[(&[u8], &[u8])]) -> MemoryEngine {
        let e = MemoryEngineBuilder::new().build();
        for (k, v) in keys {
            e.put_cf(CF_DEFAULT, k, v).unwrap();
        }
        e
    }

    #[test]
    fn test_forward_backward() {
        let e = engine_with(&[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")]);
        let snap = e.snapshot();
        let mut iter = engine_traits::Iterable::iterator_cf_opt(
            &snap,
            CF_DEFAULT,
            IterOptions::default(),
        )
        .unwrap();
        assert!(iter.seek_to_first().unwrap());
        assert_eq!(iter.key(), b"a");
        assert!(iter.next().unwrap());
        assert_eq!(iter.key(), b"b");
        assert!(iter.prev().unwrap());
        assert_eq!(iter.key(), b"a");
        assert!(!iter.prev().unwrap());

        assert!(iter.seek_to_last().unwrap());
        assert_eq!(iter.key(), b"c");
        assert_eq!(iter.value(), b"3");
    }

    #[test]
    fn test_bounds_respected() {
        let e = engine_with(&[(b"a", b"1"), (b"b", b"2"), (b"c", b"3"), (b"d", b"4")]);
        let snap = e.snapshot();
        let opts = IterOptions::new(Some(b"b".to_vec()), Some(b"d".to_vec()));
        let mut iter =
            engine_traits::Iterable::iterator_cf_opt(&snap, CF_DEFAULT, opts).unwrap();
        assert!(iter.seek_to_first().unwrap());
        assert_eq!(iter.key(), b"b");
        assert!(iter.seek_to_last().unwrap());
        assert_eq!(iter.key(), b"c");
        assert!(!iter.next().unwrap());
        assert!(iter.seek(b"a").unwrap());
        assert_eq!(iter.key(), b"b");
    }

    #[test]
    fn test_seek_and_seek_for_prev() {
        let e = engine_with(&[(b"b", b"2"), (b"d", b"4")]);
        let snap = e.snapshot();
        let mut iter = engine_traits::Iterable::iterator_cf_opt(
            &snap,
            CF_DEFAULT,
            IterOptions::default(),
        )
        .unwrap();
        assert!(iter.seek(b"c").unwrap());
        assert_eq!(iter.key(), b"d");
        assert!(iter.seek_for_prev(b"c").unwrap());
        assert_eq!(iter.key(), b"b");
        assert!(iter.seek_for_prev(b"d").unwrap());
        assert_eq!(iter.key(), b"d");
        assert!(!iter.seek(b"e").unwrap());
    }

    #[test]
    fn test_tombstones_skipped_both_ways() {
        let e = engine_with(&[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")]);
        e.delete_cf(CF_DEFAULT, b"b").unwrap();
        let snap = e.snapshot();
        let mut iter = engine_traits::Iterable::iterator_cf_opt(
            &snap,
            CF_DEFAULT,
            IterOptions::default(),
        )
        .unwrap();
        assert!(iter.seek_to_first().unwrap());
        assert_eq!(iter.key(), b"a");
        assert!(iter.next().unwrap());
        assert_eq!(iter.key(), b"c");
        assert!(iter.prev().unwrap());
        assert_eq!(iter.key(), b"a");
    }

    #[test]
    fn test_snapshot_iterator_ignores_later_writes() {
        let e = engine_with(&[(b"a", b"1")]);
        let snap = e.snapshot();
        e.put_cf(CF_DEFAULT, b"b", b"2").unwrap();
        let mut iter = engine_traits::Iterable::iterator_cf_opt(
            &snap,
            CF_DEFAULT,
            IterOptions::default(),
        )
        .unwrap();
        assert!(iter.seek_to_first().unwrap());
        assert_eq!(iter.key(), b"a");
        assert!(!iter.next().unwrap());
    }
}

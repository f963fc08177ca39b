// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

use std::fmt;

use dingo_util::codec::number::U64_SIZE;
use dingo_util::codec::{bytes, number};

use crate::{Error, Result, TimeStamp};

pub type Value = Vec<u8>;

/// Values up to this length are inlined into lock and write records instead
/// of going through the `data` CF.
pub const SHORT_VALUE_MAX_LEN: usize = 255;

/// A key in its memory-comparable encoded form, optionally carrying an
/// eight-byte inverted timestamp suffix so newer versions of a key sort
/// first in the `write` and `data` CFs.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(Vec<u8>);

impl Key {
    pub fn from_raw(key: &[u8]) -> Key {
        Key(bytes::encode_bytes(key))
    }

    pub fn from_encoded(encoded: Vec<u8>) -> Key {
        Key(encoded)
    }

    pub fn from_encoded_slice(encoded: &[u8]) -> Key {
        Key(encoded.to_vec())
    }

    pub fn as_encoded(&self) -> &Vec<u8> {
        &self.0
    }

    pub fn into_encoded(self) -> Vec<u8> {
        self.0
    }

    pub fn to_raw(&self) -> Result<Vec<u8>> {
        let (raw, _) = bytes::decode_bytes(&self.0)?;
        Ok(raw)
    }

    #[must_use]
    pub fn append_ts(mut self, ts: TimeStamp) -> Key {
        number::encode_u64_desc(&mut self.0, ts.into_inner());
        Key(self.0)
    }

    /// Strips the timestamp suffix.
    pub fn truncate_ts(mut self) -> Result<Key> {
        let len = self.0.len();
        if len < U64_SIZE {
            return Err(Error::Codec(dingo_util::codec::Error::KeyLength));
        }
        self.0.truncate(len - U64_SIZE);
        Ok(Key(self.0))
    }

    pub fn decode_ts(&self) -> Result<TimeStamp> {
        Ok(Self::split_on_ts_for(&self.0)?.1)
    }

    /// Splits an encoded key carrying a ts suffix into the bare encoded key
    /// and the timestamp.
    pub fn split_on_ts_for(key: &[u8]) -> Result<(&[u8], TimeStamp)> {
        if key.len() < U64_SIZE {
            return Err(Error::Codec(dingo_util::codec::Error::KeyLength));
        }
        let pos = key.len() - U64_SIZE;
        let ts = number::decode_u64_desc(&key[pos..])?;
        Ok((&key[..pos], TimeStamp::new(ts)))
    }

    /// Whether `self` (without a ts suffix) is the user key of `versioned`.
    pub fn is_user_key_of(&self, versioned: &[u8]) -> bool {
        versioned.len() == self.0.len() + U64_SIZE && versioned.starts_with(&self.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(&self.0))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(&self.0))
    }
}

/// One prewrite operation on one key.
#[derive(Debug, Clone)]
pub enum Mutation {
    Put((Key, Value)),
    Delete(Key),
    /// Leaves a lock without writing a value, to fence reads.
    Lock(Key),
    /// Asserts the key has no committed value; writes nothing.
    CheckNotExists(Key),
}

impl Mutation {
    pub fn key(&self) -> &Key {
        match self {
            Mutation::Put((key, _)) => key,
            Mutation::Delete(key) => key,
            Mutation::Lock(key) => key,
            Mutation::CheckNotExists(key) => key,
        }
    }

    pub fn into_key_value(self) -> (Key, Option<Value>) {
        match self {
            Mutation::Put((key, value)) => (key, Some(value)),
            Mutation::Delete(key) => (key, None),
            Mutation::Lock(key) => (key, None),
            Mutation::CheckNotExists(key) => (key, None),
        }
    }

    pub fn should_not_exists(&self) -> bool {
        matches!(self, Mutation::CheckNotExists(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_roundtrip() {
        let key = Key::from_raw(b"user_key");
        assert_eq!(key.to_raw().unwrap(), b"user_key");
    }

    #[test]
    fn test_append_split_ts() {
        let key = Key::from_raw(b"k");
        let with_ts = key.clone().append_ts(123.into());
        let (prefix, ts) = Key::split_on_ts_for(with_ts.as_encoded()).unwrap();
        assert_eq!(prefix, key.as_encoded().as_slice());
        assert_eq!(ts, 123.into());
        assert_eq!(with_ts.truncate_ts().unwrap(), key);
        assert!(Key::split_on_ts_for(b"k").is_err());
    }

    #[test]
    fn test_newer_ts_sorts_first() {
        let k_new = Key::from_raw(b"k").append_ts(200.into());
        let k_old = Key::from_raw(b"k").append_ts(100.into());
        assert!(k_new < k_old);
    }

    #[test]
    fn test_is_user_key_of() {
        let key = Key::from_raw(b"k");
        let versioned = key.clone().append_ts(7.into());
        assert!(key.is_user_key_of(versioned.as_encoded()));
        assert!(!Key::from_raw(b"other").is_user_key_of(versioned.as_encoded()));
    }
}

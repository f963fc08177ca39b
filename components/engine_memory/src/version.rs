// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

use dingo_util::codec::bytes;
use dingo_util::codec::number;

pub const SEQ_SUFFIX_LEN: usize = 8;

/// One committed version of a key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValueEntry {
    Put(Vec<u8>),
    Tombstone,
}

/// `encode_bytes(user_key) ++ !seq`, so versions of one key are contiguous
/// and newest-first, and no version of one key can shadow another key.
pub fn versioned_key(user_key: &[u8], seq: u64) -> Vec<u8> {
    let mut key = bytes::encode_bytes(user_key);
    number::encode_u64_desc(&mut key, seq);
    key
}

pub fn encoded_user_key(user_key: &[u8]) -> Vec<u8> {
    bytes::encode_bytes(user_key)
}

/// Splits a stored key into its encoded user-key prefix and sequence.
pub fn split_versioned_key(stored: &[u8]) -> Option<(&[u8], u64)> {
    if stored.len() < SEQ_SUFFIX_LEN {
        return None;
    }
    let split = stored.len() - SEQ_SUFFIX_LEN;
    let seq = number::decode_u64_desc(&stored[split..]).ok()?;
    Some((&stored[..split], seq))
}

pub fn decode_user_key(encoded: &[u8]) -> Option<Vec<u8>> {
    bytes::decode_bytes(encoded).ok().map(|(k, _)| k)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versioned_key_orders_newest_first() {
        let newer = versioned_key(b"k", 10);
        let older = versioned_key(b"k", 2);
        assert!(newer < older);
        let (enc, seq) = split_versioned_key(&newer).unwrap();
        assert_eq!(seq, 10);
        assert_eq!(decode_user_key(enc).unwrap(), b"k".to_vec());
    }

    #[test]
    fn test_keys_do_not_interleave() {
        // Versions of "k" must all sort before any version of "k\x00".
        let mut a = encoded_user_key(b"k");
        a.extend_from_slice(&[0xff; SEQ_SUFFIX_LEN]);
        let b = versioned_key(b"k\x00", u64::MAX);
        assert!(a < b);
    }
}

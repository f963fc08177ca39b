// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! Key namespace layout shared by every layer: the one-byte client/executor
//! prefixes at the head of every user key, the store-local metadata keys in
//! the `meta` CF, and the raft snapshot file names.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("key {0:?} does not start with a recognized namespace prefix")]
    InvalidPrefix(Vec<u8>),
    #[error("key length {0} outside [{1}, {2}]")]
    InvalidLength(usize, usize, usize),
    #[error("malformed meta key {0:?}")]
    MalformedMetaKey(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Raw data written through an executor.
pub const EXECUTOR_RAW_PREFIX: u8 = b'r';
/// Transactional data written through an executor.
pub const EXECUTOR_TXN_PREFIX: u8 = b't';
/// Raw data written by clients directly.
pub const CLIENT_RAW_PREFIX: u8 = b'w';
/// Transactional data written by clients directly.
pub const CLIENT_TXN_PREFIX: u8 = b'x';

pub const ALL_PREFIXES: &[u8] = &[
    EXECUTOR_RAW_PREFIX,
    EXECUTOR_TXN_PREFIX,
    CLIENT_RAW_PREFIX,
    CLIENT_TXN_PREFIX,
];

/// Vector and document keys carry the prefix plus fixed-width ids.
pub const VECTOR_KEY_MIN_LEN_WITH_PREFIX: usize = 9;
pub const VECTOR_KEY_MAX_LEN_WITH_PREFIX: usize = 17;

/// Returns the namespace prefix of `key`, rejecting unknown namespaces.
pub fn validate_prefix(key: &[u8]) -> Result<u8> {
    match key.first() {
        Some(p) if ALL_PREFIXES.contains(p) => Ok(*p),
        _ => Err(Error::InvalidPrefix(key.to_vec())),
    }
}

pub fn is_txn_prefix(prefix: u8) -> bool {
    prefix == EXECUTOR_TXN_PREFIX || prefix == CLIENT_TXN_PREFIX
}

pub fn is_raw_prefix(prefix: u8) -> bool {
    prefix == EXECUTOR_RAW_PREFIX || prefix == CLIENT_RAW_PREFIX
}

pub fn validate_vector_key(key: &[u8]) -> Result<()> {
    validate_prefix(key)?;
    if key.len() < VECTOR_KEY_MIN_LEN_WITH_PREFIX || key.len() > VECTOR_KEY_MAX_LEN_WITH_PREFIX {
        return Err(Error::InvalidLength(
            key.len(),
            VECTOR_KEY_MIN_LEN_WITH_PREFIX,
            VECTOR_KEY_MAX_LEN_WITH_PREFIX,
        ));
    }
    Ok(())
}

/// The smallest key strictly greater than every key prefixed by `key`.
pub fn next_key(key: &[u8]) -> Vec<u8> {
    let mut next = key.to_vec();
    next.push(0);
    next
}

// Store-local metadata keys, all in the `meta` CF. Ids are zero-padded so a
// prefix scan walks them in id order.

pub const REGION_META_PREFIX: &str = "META_REGION";
pub const RAFT_META_PREFIX: &str = "META_RAFT";
pub const REGION_CHANGE_PREFIX: &str = "META_CHANGE";
pub const REGION_METRICS_PREFIX: &str = "METRICS_REGION";
pub const CONTROL_CMD_PREFIX: &str = "CONTROL_CMD";
pub const VECTOR_INDEX_APPLY_LOG_PREFIX: &str = "VECTOR_INDEX_APPLY_LOG";
pub const VECTOR_INDEX_SNAPSHOT_LOG_PREFIX: &str = "VECTOR_INDEX_SNAPSHOT_LOG";

pub const GC_STOP_KEY: &str = "GC_STOP";
pub const FORCE_READ_ONLY_KEY: &str = "FORCE_READ_ONLY";
pub const FORCE_READ_ONLY_REASON_KEY: &str = "FORCE_READ_REASON";

/// Raft snapshot manifest file name.
pub const SNAPSHOT_REGION_META_FILE: &str = "region_meta";
/// Suffix of every per-CF snapshot payload file.
pub const SNAPSHOT_DATA_FILE_SUFFIX: &str = ".dingo_sst";

fn meta_key(prefix: &str, id: u64) -> Vec<u8> {
    format!("{}/{:020}", prefix, id).into_bytes()
}

fn parse_meta_key(prefix: &str, key: &[u8]) -> Result<u64> {
    let text = std::str::from_utf8(key)
        .map_err(|_| Error::MalformedMetaKey(format!("{:?}", key)))?;
    let id = text
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| Error::MalformedMetaKey(text.to_owned()))?;
    Ok(id)
}

pub fn region_meta_key(region_id: u64) -> Vec<u8> {
    meta_key(REGION_META_PREFIX, region_id)
}

pub fn parse_region_meta_key(key: &[u8]) -> Result<u64> {
    parse_meta_key(REGION_META_PREFIX, key)
}

pub fn raft_meta_key(region_id: u64) -> Vec<u8> {
    meta_key(RAFT_META_PREFIX, region_id)
}

pub fn region_change_key(region_id: u64) -> Vec<u8> {
    meta_key(REGION_CHANGE_PREFIX, region_id)
}

pub fn region_metrics_key(region_id: u64) -> Vec<u8> {
    meta_key(REGION_METRICS_PREFIX, region_id)
}

pub fn control_cmd_key(cmd_id: u64) -> Vec<u8> {
    meta_key(CONTROL_CMD_PREFIX, cmd_id)
}

pub fn vector_index_apply_log_key(region_id: u64) -> Vec<u8> {
    meta_key(VECTOR_INDEX_APPLY_LOG_PREFIX, region_id)
}

pub fn vector_index_snapshot_log_key(region_id: u64) -> Vec<u8> {
    meta_key(VECTOR_INDEX_SNAPSHOT_LOG_PREFIX, region_id)
}

/// `[start, end)` covering every key of a meta prefix.
pub fn meta_prefix_range(prefix: &str) -> (Vec<u8>, Vec<u8>) {
    let start = format!("{}/", prefix).into_bytes();
    let mut end = start.clone();
    // '/' + 1 == '0', so bump the separator instead of appending.
    *end.last_mut().unwrap() += 1;
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_prefix() {
        assert_eq!(validate_prefix(b"r:key").unwrap(), EXECUTOR_RAW_PREFIX);
        assert_eq!(validate_prefix(b"x:key").unwrap(), CLIENT_TXN_PREFIX);
        assert!(validate_prefix(b"q:key").is_err());
        assert!(validate_prefix(b"").is_err());
    }

    #[test]
    fn test_prefix_classes() {
        assert!(is_raw_prefix(EXECUTOR_RAW_PREFIX));
        assert!(is_raw_prefix(CLIENT_RAW_PREFIX));
        assert!(is_txn_prefix(EXECUTOR_TXN_PREFIX));
        assert!(!is_txn_prefix(CLIENT_RAW_PREFIX));
    }

    #[test]
    fn test_vector_key_bounds() {
        assert!(validate_vector_key(b"r12345678").is_ok());
        assert!(validate_vector_key(b"r1234567").is_err());
        assert!(validate_vector_key(b"r1234567890123456_").is_err());
    }

    #[test]
    fn test_meta_key_roundtrip() {
        let key = region_meta_key(42);
        assert_eq!(parse_region_meta_key(&key).unwrap(), 42);
        assert!(parse_region_meta_key(b"CONTROL_CMD/00001").is_err());
    }

    #[test]
    fn test_meta_keys_order_by_id() {
        assert!(region_meta_key(2) < region_meta_key(10));
        let (start, end) = meta_prefix_range(REGION_META_PREFIX);
        let key = region_meta_key(u64::MAX);
        assert!(key.as_slice() >= start.as_slice() && key.as_slice() < end.as_slice());
    }

    #[test]
    fn test_next_key() {
        assert!(next_key(b"abc").as_slice() > b"abc".as_slice());
        assert!(next_key(b"abc").as_slice() < b"abd".as_slice());
    }
}

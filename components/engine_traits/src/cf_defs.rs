// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

pub type CfName = &'static str;

/// Region data, including vector payloads.
pub const CF_DEFAULT: CfName = "default";
/// Store-local metadata (region definitions, raft state, governance flags).
pub const CF_META: CfName = "meta";
/// Transactional values, keyed by `user_key ++ start_ts`.
pub const CF_TXN_DATA: CfName = "data";
/// In-progress transaction locks, keyed by user key.
pub const CF_TXN_LOCK: CfName = "lock";
/// Commit records, keyed by `user_key ++ commit_ts`.
pub const CF_TXN_WRITE: CfName = "write";
pub const CF_VECTOR_SCALAR: CfName = "vector_scalar";
pub const CF_VECTOR_SCALAR_KEY_SPEED_UP: CfName = "vector_scalar_key_speed_up";
pub const CF_VECTOR_TABLE: CfName = "vector_table";

pub const ALL_CFS: &[CfName] = &[
    CF_DEFAULT,
    CF_META,
    CF_TXN_DATA,
    CF_TXN_LOCK,
    CF_TXN_WRITE,
    CF_VECTOR_SCALAR,
    CF_VECTOR_SCALAR_KEY_SPEED_UP,
    CF_VECTOR_TABLE,
];
pub const TXN_CFS: &[CfName] = &[CF_TXN_DATA, CF_TXN_LOCK, CF_TXN_WRITE];

pub fn name_to_cf(name: &str) -> Option<CfName> {
    if name.is_empty() {
        return Some(CF_DEFAULT);
    }
    ALL_CFS.iter().find(|c| name == **c).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_to_cf() {
        assert_eq!(name_to_cf(""), Some(CF_DEFAULT));
        assert_eq!(name_to_cf("lock"), Some(CF_TXN_LOCK));
        assert_eq!(name_to_cf("no-such-cf"), None);
    }
}

// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

use crate::{Result, CF_DEFAULT};

/// Point reads. Implemented both by engines (read latest committed state)
/// and by snapshots (read the pinned state).
pub trait Peekable {
    fn get_value_cf(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn get_value(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.get_value_cf(CF_DEFAULT, key)
    }
}

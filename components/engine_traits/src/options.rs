// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

use serde::{Deserialize, Serialize};

/// A half-open key range `[start, end)`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
}

impl Range {
    pub fn new(start: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Range {
        Range {
            start: start.into(),
            end: end.into(),
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.start.as_slice() && key < self.end.as_slice()
    }
}

/// Bounds for a cursor. `lower_bound` is inclusive, `upper_bound` exclusive;
/// a missing bound is unbounded on that side.
#[derive(Clone, Debug, Default)]
pub struct IterOptions {
    pub lower_bound: Option<Vec<u8>>,
    pub upper_bound: Option<Vec<u8>>,
}

impl IterOptions {
    pub fn new(lower_bound: Option<Vec<u8>>, upper_bound: Option<Vec<u8>>) -> IterOptions {
        IterOptions {
            lower_bound,
            upper_bound,
        }
    }

    pub fn range(range: &Range) -> IterOptions {
        IterOptions {
            lower_bound: Some(range.start.clone()),
            upper_bound: Some(range.end.clone()),
        }
    }
}

/// One atomic mutation inside a write batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Modify {
    Put(super::CfName, Vec<u8>, Vec<u8>),
    Delete(super::CfName, Vec<u8>),
    DeleteRange(super::CfName, Vec<u8>, Vec<u8>),
}

impl Modify {
    pub fn cf(&self) -> super::CfName {
        match self {
            Modify::Put(cf, ..) | Modify::Delete(cf, ..) | Modify::DeleteRange(cf, ..) => cf,
        }
    }
}

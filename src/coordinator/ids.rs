// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! Per-type monotonic id epochs. Every allocation travels through the
//! coordinator's replicated apply, so ids are unique across restarts and
//! leader changes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdEpochType {
    RegionId,
    PeerId,
    StoreId,
    JobId,
    CmdId,
    LeaseId,
    /// One per applied increment batch; doubles as the metadata revision.
    Revision,
    DdlJob,
    SchemaVersion,
    NextTenant,
    NextTable,
    NextSchema,
}

/// A contiguous block of ids `[start, start + count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRange {
    pub start: u64,
    pub count: u64,
}

impl IdRange {
    pub fn end(&self) -> u64 {
        self.start + self.count
    }
}

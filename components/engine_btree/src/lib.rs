// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! A B-tree-style engine multiplexing every column family into one ordered
//! namespace: stored keys are `cf_id (one byte) ++ user_key`, and the upper
//! bound of a whole-CF scan is `cf_id + 1`. Writers run as retryable
//! transactions against a copy-on-write tree; snapshots pin the previous
//! root and therefore never observe a half-applied batch.

mod engine;
pub use crate::engine::{BTreeEngine, BTreeEngineBuilder};
mod iterator;
pub use crate::iterator::BTreeIterator;
mod snapshot;
pub use crate::snapshot::BTreeSnapshot;

// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! An LSM-flavored in-memory engine. Every committed version of a key is a
//! separate skiplist entry keyed by the memory-comparable form of the user
//! key followed by the inverted commit sequence, so the newest version of a
//! key sorts first. A snapshot pins a sequence number and costs nothing;
//! writers append new versions and never disturb readers.

mod engine;
pub use crate::engine::{MemoryEngine, MemoryEngineBuilder};
mod iterator;
pub use crate::iterator::MemoryIterator;
mod snapshot;
pub use crate::snapshot::MemorySnapshot;
mod version;

// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! The contract every raw engine must satisfy: column-family-scoped reads
//! and atomic multi-CF writes, point-in-time snapshots, bounded cursors,
//! bulk ingest, range deletion and approximate range sizing. Engines differ
//! wildly underneath (LSM vs B-tree, native CFs vs a shared namespace); the
//! storage and replication layers only ever see these traits.

mod cf_defs;
pub use crate::cf_defs::*;
mod errors;
pub use crate::errors::*;
mod options;
pub use crate::options::*;
mod peekable;
pub use crate::peekable::*;
mod iterable;
pub use crate::iterable::*;
mod engine;
pub use crate::engine::*;
pub mod metrics;
pub mod util;

/// Batched puts are chunked to this size when an engine emulates bulk
/// ingest with ordinary writes.
pub const INGEST_EMULATION_BATCH: usize = 128;

/// Retryable engine failures are re-driven this many times before the
/// boundary reports `Error::Deadlock`.
pub const MAX_DEADLOCK_RETRIES: usize = 30;

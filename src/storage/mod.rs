// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! The data paths: raw reads/writes against a region's `default` CF and
//! the MVCC transactional protocol over the `data`/`lock`/`write` CFs.
//! Both run against the [`Engine`] abstraction, which is either the local
//! raw engine (tests, tooling) or the replicated write path.

pub mod mvcc;
pub mod txn;

use engine_traits::{RawEngine, Snapshot};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::meta::RegionEpoch;
use crate::common::TrackerPtr;
use crate::error::ServerError;
use crate::store::WriteOp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IsolationLevel {
    /// Snapshot isolation: reads are blocked by committed-invisible locks.
    #[default]
    Si,
    /// Read committed: locks are ignored, the newest committed version
    /// wins.
    Rc,
}

/// Request routing context carried by every storage operation.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub region_id: u64,
    pub epoch: RegionEpoch,
    pub isolation_level: IsolationLevel,
    pub tracker: Option<TrackerPtr>,
}

impl Context {
    pub fn new(region_id: u64, epoch: RegionEpoch) -> Context {
        Context {
            region_id,
            epoch,
            ..Default::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Routing, admission or engine failure.
    #[error(transparent)]
    Server(#[from] ServerError),
    /// A transactional outcome (lock conflict, write conflict, ...) that
    /// travels in the response's txn_result, not as an error code.
    #[error(transparent)]
    Mvcc(#[from] mvcc::MvccError),
}

impl From<engine_traits::Error> for Error {
    fn from(e: engine_traits::Error) -> Error {
        Error::Server(e.into())
    }
}

impl From<txn_types::Error> for Error {
    fn from(e: txn_types::Error) -> Error {
        Error::Mvcc(e.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Where storage submits its work. `write` must be atomic: after an Ok
/// return the whole batch is durable and visible; after an Err none of it
/// is.
pub trait Engine: Clone + Send + 'static {
    type Snap: Snapshot;

    fn snapshot(&self, ctx: &Context) -> Result<Self::Snap>;
    fn write(&self, ctx: &Context, ops: Vec<WriteOp>) -> Result<()>;
}

/// Directly backed by a raw engine, bypassing replication. Single-node
/// tooling and the storage unit tests run on this.
#[derive(Clone)]
pub struct LocalEngine<E: RawEngine> {
    engine: E,
}

impl<E: RawEngine> LocalEngine<E> {
    pub fn new(engine: E) -> LocalEngine<E> {
        LocalEngine { engine }
    }

    pub fn raw(&self) -> &E {
        &self.engine
    }
}

impl<E: RawEngine> Engine for LocalEngine<E> {
    type Snap = E::Snap;

    fn snapshot(&self, _ctx: &Context) -> Result<Self::Snap> {
        Ok(self.engine.snapshot())
    }

    fn write(&self, _ctx: &Context, ops: Vec<WriteOp>) -> Result<()> {
        let mut batch = Vec::with_capacity(ops.len());
        for op in ops {
            batch.push(op.into_modify()?);
        }
        self.engine.write(batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use engine_memory::MemoryEngineBuilder;
    use engine_traits::{Peekable, CF_DEFAULT};

    use super::*;

    #[test]
    fn test_local_engine_write_visible() {
        let engine = LocalEngine::new(MemoryEngineBuilder::new().build());
        let ctx = Context::default();
        engine
            .write(
                &ctx,
                vec![WriteOp::put(CF_DEFAULT, b"k".to_vec(), b"v".to_vec())],
            )
            .unwrap();
        let snap = engine.snapshot(&ctx).unwrap();
        assert_eq!(snap.get_value_cf(CF_DEFAULT, b"k").unwrap().unwrap(), b"v");
    }
}

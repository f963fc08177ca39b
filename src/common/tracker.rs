// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! Per-request timing record. A tracker is created when a request is
//! accepted, rides along through the service queue, the raft pipeline and
//! the engine write, and is stamped onto the response by the service
//! closure — including on error paths.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

pub type TrackerPtr = Arc<Tracker>;

#[derive(Debug)]
pub struct Tracker {
    begin: Instant,
    total_rpc_ns: AtomicU64,
    service_queue_wait_ns: AtomicU64,
    prepare_commit_ns: AtomicU64,
    raft_commit_ns: AtomicU64,
    raft_queue_wait_ns: AtomicU64,
    raft_apply_ns: AtomicU64,
    store_write_ns: AtomicU64,
    vector_index_write_ns: AtomicU64,
    document_index_write_ns: AtomicU64,
    latch_wait_ns: AtomicU64,
}

impl Tracker {
    pub fn new() -> TrackerPtr {
        Arc::new(Tracker {
            begin: Instant::now(),
            total_rpc_ns: AtomicU64::new(0),
            service_queue_wait_ns: AtomicU64::new(0),
            prepare_commit_ns: AtomicU64::new(0),
            raft_commit_ns: AtomicU64::new(0),
            raft_queue_wait_ns: AtomicU64::new(0),
            raft_apply_ns: AtomicU64::new(0),
            store_write_ns: AtomicU64::new(0),
            vector_index_write_ns: AtomicU64::new(0),
            document_index_write_ns: AtomicU64::new(0),
            latch_wait_ns: AtomicU64::new(0),
        })
    }

    pub fn elapsed_ns(&self) -> u64 {
        self.begin.elapsed().as_nanos() as u64
    }

    /// Called exactly once, by the closure, when the response goes out.
    pub fn set_total_rpc_time(&self) {
        self.total_rpc_ns.store(self.elapsed_ns(), Ordering::Release);
    }

    pub fn total_rpc_time_ns(&self) -> u64 {
        self.total_rpc_ns.load(Ordering::Acquire)
    }

    pub fn set_service_queue_wait(&self, ns: u64) {
        self.service_queue_wait_ns.store(ns, Ordering::Release);
    }

    pub fn set_prepare_commit(&self, ns: u64) {
        self.prepare_commit_ns.store(ns, Ordering::Release);
    }

    pub fn set_raft_commit(&self, ns: u64) {
        self.raft_commit_ns.store(ns, Ordering::Release);
    }

    pub fn set_raft_queue_wait(&self, ns: u64) {
        self.raft_queue_wait_ns.store(ns, Ordering::Release);
    }

    pub fn set_raft_apply(&self, ns: u64) {
        self.raft_apply_ns.store(ns, Ordering::Release);
    }

    pub fn set_store_write(&self, ns: u64) {
        self.store_write_ns.store(ns, Ordering::Release);
    }

    pub fn set_vector_index_write(&self, ns: u64) {
        self.vector_index_write_ns.store(ns, Ordering::Release);
    }

    pub fn set_document_index_write(&self, ns: u64) {
        self.document_index_write_ns.store(ns, Ordering::Release);
    }

    pub fn set_latch_wait(&self, ns: u64) {
        self.latch_wait_ns.store(ns, Ordering::Release);
    }

    pub fn latch_wait_ns(&self) -> u64 {
        self.latch_wait_ns.load(Ordering::Acquire)
    }

    pub fn time_info(&self) -> TimeInfo {
        TimeInfo {
            total_rpc_time_ns: self.total_rpc_ns.load(Ordering::Acquire),
            service_queue_wait_time_ns: self.service_queue_wait_ns.load(Ordering::Acquire),
            prepare_commit_time_ns: self.prepare_commit_ns.load(Ordering::Acquire),
            raft_commit_time_ns: self.raft_commit_ns.load(Ordering::Acquire),
            raft_queue_wait_time_ns: self.raft_queue_wait_ns.load(Ordering::Acquire),
            raft_apply_time_ns: self.raft_apply_ns.load(Ordering::Acquire),
            store_write_time_ns: self.store_write_ns.load(Ordering::Acquire),
            vector_index_write_time_ns: self.vector_index_write_ns.load(Ordering::Acquire),
            document_index_write_time_ns: self.document_index_write_ns.load(Ordering::Acquire),
        }
    }
}

/// The timing block every response carries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInfo {
    pub total_rpc_time_ns: u64,
    pub service_queue_wait_time_ns: u64,
    pub prepare_commit_time_ns: u64,
    pub raft_commit_time_ns: u64,
    pub raft_queue_wait_time_ns: u64,
    pub raft_apply_time_ns: u64,
    pub store_write_time_ns: u64,
    pub vector_index_write_time_ns: u64,
    pub document_index_write_time_ns: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamping() {
        let tracker = Tracker::new();
        tracker.set_raft_commit(120);
        tracker.set_store_write(40);
        tracker.set_total_rpc_time();
        let info = tracker.time_info();
        assert_eq!(info.raft_commit_time_ns, 120);
        assert_eq!(info.store_write_time_ns, 40);
        assert_eq!(info.total_rpc_time_ns, tracker.total_rpc_time_ns());
    }
}

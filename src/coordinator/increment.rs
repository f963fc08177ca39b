// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! The batch of typed deltas the coordinator proposes through its own
//! replicated log. The apply function in `mod.rs` is the only writer of
//! coordinator state, and it consumes exactly these.

use serde::{Deserialize, Serialize};

use super::ids::IdEpochType;
use super::job::Job;
use super::kv::Revision;
use super::lease::Lease;
use super::RegionInternal;
use crate::common::meta::{
    Executor, ExecutorUser, RegionCmdStatus, RegionMetrics, Store, StoreMetrics,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetaDelta {
    RegionUpsert(RegionInternal),
    RegionDelete(u64),
    StoreUpsert(Store),
    StoreDelete(u64),
    ExecutorUpsert(Executor),
    ExecutorDelete(String),
    ExecutorUserUpsert(ExecutorUser),

    JobUpsert(Job),
    JobCmdStatus {
        job_id: u64,
        cmd_id: u64,
        status: RegionCmdStatus,
        error: Option<String>,
        retryable: bool,
    },

    StoreMetricsUpsert(StoreMetrics),
    RegionMetricsUpsert(RegionMetrics),
    /// Reported leader of a region, learned from store heartbeats.
    RegionLeader {
        region_id: u64,
        leader_store_id: u64,
    },

    IdAlloc {
        id_type: IdEpochType,
        count: u64,
    },

    KvPut {
        key: Vec<u8>,
        op_revision: Revision,
        ignore_lease: bool,
        lease_id: u64,
        ignore_value: bool,
        value: Vec<u8>,
    },
    KvDelete {
        key: Vec<u8>,
        op_revision: Revision,
    },
    KvCompact {
        revision: u64,
    },

    LeaseGrant(Lease),
    LeaseRevoke(u64),
    LeaseRenew {
        lease_id: u64,
        expire_ms: u64,
    },
    LeaseBindKey {
        lease_id: u64,
        key: Vec<u8>,
    },
    LeaseUnbindKey {
        lease_id: u64,
        key: Vec<u8>,
    },

    GcSafePoint {
        safe_point: u64,
        tenant_safe_points: Vec<(u64, u64)>,
        resolve_lock_safe_point: u64,
    },
    GcStop(bool),
    ForceReadOnly {
        on: bool,
        reason: String,
    },
}

/// Applied atomically, in log order, when the coordinator group commits.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetaIncrement {
    pub deltas: Vec<MetaDelta>,
}

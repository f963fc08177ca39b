// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! The immutable constants table. Values here exist for consistency with
//! running deployments; tune them through the configuration surface, not by
//! editing this file.

/// Region id of the coordinator's own replicated group.
pub const META_REGION_ID: u64 = 0;
/// Region id of the metadata kv group.
pub const KV_REGION_ID: u64 = 1;
/// Region id of the timestamp oracle group.
pub const TSO_REGION_ID: u64 = 2;

// Split.
pub const SPLIT_STRATEGY: &str = "PRE_CREATE_REGION";
pub const SPLIT_DO_SNAPSHOT_RETRY_TIMES: usize = 5;
pub const REGION_MAX_SIZE_DEFAULT: u64 = 64 * 1024 * 1024;
pub const SPLIT_CHECK_APPROXIMATE_SIZE_RATIO: f64 = 0.8;
pub const SPLIT_KEYS_NUMBER_DEFAULT: u64 = 100_000;
pub const SPLIT_KEYS_RATIO_DEFAULT: f64 = 0.5;

// Merge.
pub const AUTO_MERGE_REGION_MAX_SIZE_DEFAULT: u64 = 1024 * 1024;
pub const AUTO_MERGE_REGION_MAX_KEYS_DEFAULT: u64 = 10_000;
pub const SPLIT_MERGE_INTERVAL_SECS_DEFAULT: u64 = 3600;
pub const REGION_METRICS_UPDATE_SECS_DEFAULT: u64 = 60;

// Raft.
pub const RAFT_ELECTION_TIMEOUT_SECS_DEFAULT: u64 = 6;
pub const RANDOM_ELECTION_TIMEOUT_MIN_DELTA_MS: u64 = 2000;
pub const RANDOM_ELECTION_TIMEOUT_MAX_DELTA_MS: u64 = 7000;
pub const RAFT_LOG_FALL_BEHIND_THRESHOLD: u64 = 1000;
pub const TRANSFER_LEADER_LOG_FALL_BEHIND_THRESHOLD: u64 = 16;
pub const FILE_TRANSPORT_CHUNK_SIZE: usize = 1024 * 1024;

// Txn.
pub const MAX_PREWRITE_COUNT: usize = 1024;
pub const MAX_SCAN_LOCK_LIMIT: usize = 1024;
pub const MAX_SCAN_LIMIT: usize = 1024;

// Index regions refuse further writes once the index subsystem reports
// this many background tasks already queued.
pub const INDEX_BACKGROUND_TASK_LIMIT: u64 = 1024;

// Coordinator.
pub const MAX_CREATE_ID_COUNT: u64 = 2048;
pub const MAX_KV_KEY_SIZE: usize = 4096;
pub const MAX_KV_VALUE_SIZE: usize = 4096;
pub const JOB_ARCHIVE_CAPACITY: usize = 1024;
pub const LEADER_NUM_WEIGHT_DEFAULT: u32 = 1;

// Stores missing heartbeats for longer than this are marked offline.
pub const STORE_HEARTBEAT_TIMEOUT_MS: u64 = 30_000;

/// Governance value strings persisted in the meta CF.
pub const GC_STOP_VALUE_TRUE: &str = "GC_STOP_TRUE";
pub const GC_STOP_VALUE_FALSE: &str = "GC_STOP_FALSE";
pub const FORCE_READ_ONLY_VALUE_TRUE: &str = "TRUE";
pub const FORCE_READ_ONLY_VALUE_FALSE: &str = "FALSE";

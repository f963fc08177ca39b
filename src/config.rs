// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! TOML-backed process configuration. Every knob has the deployment default
//! from the constants table; `Config::from_toml` overlays a config file on
//! top of those defaults and validates the result.

use dingo_util::config::{ReadableDuration, ReadableSize};
use serde::{Deserialize, Serialize};

use crate::common::constant;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub store: StoreConfig,
    pub region: RegionConfig,
    pub raft: RaftConfig,
    pub txn: TxnConfig,
    pub coordinator: CoordinatorConfig,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            store: StoreConfig::default(),
            region: RegionConfig::default(),
            raft: RaftConfig::default(),
            txn: TxnConfig::default(),
            coordinator: CoordinatorConfig::default(),
        }
    }
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Config, String> {
        let config: Config = toml::from_str(text).map_err(|e| e.to_string())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.store.path.is_empty() {
            return Err("store.path must not be empty".to_owned());
        }
        if self.raft.random_election_timeout_min_delta
            > self.raft.random_election_timeout_max_delta
        {
            return Err("raft election jitter bounds are inverted".to_owned());
        }
        if self.txn.max_prewrite_count == 0 {
            return Err("txn.max-prewrite-count must be positive".to_owned());
        }
        Ok(())
    }
}

/// Per-CF engine tunables, preserved for engines that honor them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct CfConfig {
    pub block_size: ReadableSize,
    pub block_cache: ReadableSize,
    pub arena_block_size: ReadableSize,
    pub write_buffer_size: ReadableSize,
    pub max_write_buffer_number: u32,
    pub min_write_buffer_number_to_merge: u32,
    pub max_compaction_bytes: ReadableSize,
    pub max_bytes_for_level_base: ReadableSize,
    pub target_file_size_base: ReadableSize,
    pub max_bytes_for_level_multiplier: u32,
    pub prefix_extractor: u32,
}

impl Default for CfConfig {
    fn default() -> CfConfig {
        CfConfig {
            block_size: ReadableSize::kib(128),
            block_cache: ReadableSize::gib(1),
            arena_block_size: ReadableSize::mib(64),
            write_buffer_size: ReadableSize::mib(64),
            max_write_buffer_number: 5,
            min_write_buffer_number_to_merge: 2,
            max_compaction_bytes: ReadableSize::gib(1),
            max_bytes_for_level_base: ReadableSize::mib(128),
            target_file_size_base: ReadableSize::mib(64),
            max_bytes_for_level_multiplier: 10,
            prefix_extractor: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct StoreConfig {
    pub path: String,
    pub cf_defaults: CfConfig,
    /// Bound of each service worker queue.
    pub read_worker_queue_capacity: usize,
    pub write_worker_queue_capacity: usize,
    pub raft_apply_queue_capacity: usize,
    pub read_worker_num: usize,
    pub write_worker_num: usize,
    /// Slow requests above this threshold are logged at INFO.
    pub service_log_threshold_time_ns: u64,
    pub enable_dump_service_message: bool,
    pub dump_path: String,
}

impl Default for StoreConfig {
    fn default() -> StoreConfig {
        StoreConfig {
            path: "./data".to_owned(),
            cf_defaults: CfConfig::default(),
            read_worker_queue_capacity: 1024,
            write_worker_queue_capacity: 1024,
            raft_apply_queue_capacity: 1024,
            read_worker_num: 8,
            write_worker_num: 8,
            service_log_threshold_time_ns: 1_000_000_000,
            enable_dump_service_message: false,
            dump_path: "./dump".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct RegionConfig {
    pub max_region_size: ReadableSize,
    pub split_check_approximate_size_ratio: f64,
    pub split_keys_number: u64,
    pub split_keys_ratio: f64,
    pub auto_merge_size: ReadableSize,
    pub auto_merge_keys: u64,
    pub split_merge_interval: ReadableDuration,
    pub metrics_update_interval: ReadableDuration,
}

impl Default for RegionConfig {
    fn default() -> RegionConfig {
        RegionConfig {
            max_region_size: ReadableSize(constant::REGION_MAX_SIZE_DEFAULT),
            split_check_approximate_size_ratio: constant::SPLIT_CHECK_APPROXIMATE_SIZE_RATIO,
            split_keys_number: constant::SPLIT_KEYS_NUMBER_DEFAULT,
            split_keys_ratio: constant::SPLIT_KEYS_RATIO_DEFAULT,
            auto_merge_size: ReadableSize(constant::AUTO_MERGE_REGION_MAX_SIZE_DEFAULT),
            auto_merge_keys: constant::AUTO_MERGE_REGION_MAX_KEYS_DEFAULT,
            split_merge_interval: ReadableDuration::secs(
                constant::SPLIT_MERGE_INTERVAL_SECS_DEFAULT,
            ),
            metrics_update_interval: ReadableDuration::secs(
                constant::REGION_METRICS_UPDATE_SECS_DEFAULT,
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct RaftConfig {
    pub election_timeout: ReadableDuration,
    pub random_election_timeout_min_delta: ReadableDuration,
    pub random_election_timeout_max_delta: ReadableDuration,
    pub log_fall_behind_threshold: u64,
    pub transfer_leader_log_fall_behind_threshold: u64,
}

impl Default for RaftConfig {
    fn default() -> RaftConfig {
        RaftConfig {
            election_timeout: ReadableDuration::secs(
                constant::RAFT_ELECTION_TIMEOUT_SECS_DEFAULT,
            ),
            random_election_timeout_min_delta: ReadableDuration::millis(
                constant::RANDOM_ELECTION_TIMEOUT_MIN_DELTA_MS,
            ),
            random_election_timeout_max_delta: ReadableDuration::millis(
                constant::RANDOM_ELECTION_TIMEOUT_MAX_DELTA_MS,
            ),
            log_fall_behind_threshold: constant::RAFT_LOG_FALL_BEHIND_THRESHOLD,
            transfer_leader_log_fall_behind_threshold:
                constant::TRANSFER_LEADER_LOG_FALL_BEHIND_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct TxnConfig {
    pub max_prewrite_count: usize,
    pub max_scan_lock_limit: usize,
}

impl Default for TxnConfig {
    fn default() -> TxnConfig {
        TxnConfig {
            max_prewrite_count: constant::MAX_PREWRITE_COUNT,
            max_scan_lock_limit: constant::MAX_SCAN_LOCK_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct CoordinatorConfig {
    pub max_create_id_count: u64,
    pub max_kv_key_size: usize,
    pub max_kv_value_size: usize,
    pub enable_balance_leader: bool,
    pub enable_balance_region: bool,
    pub lease_sweep_interval: ReadableDuration,
}

impl Default for CoordinatorConfig {
    fn default() -> CoordinatorConfig {
        CoordinatorConfig {
            max_create_id_count: constant::MAX_CREATE_ID_COUNT,
            max_kv_key_size: constant::MAX_KV_KEY_SIZE,
            max_kv_value_size: constant::MAX_KV_VALUE_SIZE,
            enable_balance_leader: true,
            enable_balance_region: true,
            lease_sweep_interval: ReadableDuration::secs(1),
        }
    }
}

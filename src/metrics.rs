// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! Process-wide metrics registry. Collectors register themselves with the
//! default prometheus registry; increments are safe from any thread.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};

lazy_static! {
    pub static ref COMMAND_COUNTER: IntCounterVec = register_int_counter_vec!(
        "dingo_store_command_total",
        "Commands accepted by the service layer, by type",
        &["type"]
    )
    .unwrap();
    pub static ref COMMAND_FAIL_COUNTER: IntCounterVec = register_int_counter_vec!(
        "dingo_store_command_fail_total",
        "Commands failed, by type and error code",
        &["type", "code"]
    )
    .unwrap();
    pub static ref LATCH_WAIT_HISTOGRAM: HistogramVec = register_histogram_vec!(
        "dingo_store_txn_latch_wait_duration_seconds",
        "Per-command wait for key latches",
        &["type"]
    )
    .unwrap();
    pub static ref RAFT_APPLY_HISTOGRAM: HistogramVec = register_histogram_vec!(
        "dingo_store_raft_apply_duration_seconds",
        "Time applying committed entries onto the engine",
        &["region_type"]
    )
    .unwrap();
    pub static ref REGION_COUNT_GAUGE: IntGaugeVec = register_int_gauge_vec!(
        "dingo_store_region_count",
        "Regions hosted by this process, by state",
        &["state"]
    )
    .unwrap();
    pub static ref COORDINATOR_JOB_COUNTER: IntCounterVec = register_int_counter_vec!(
        "dingo_coordinator_job_total",
        "Coordinator job transitions, by outcome",
        &["outcome"]
    )
    .unwrap();
}

// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, IntCounterVec};

lazy_static! {
    pub static ref ENGINE_RETRY_COUNTER: IntCounterVec = register_int_counter_vec!(
        "dingo_engine_retry_total",
        "Total retryable engine failures re-driven at the engine boundary",
        &["op"]
    )
    .unwrap();
}

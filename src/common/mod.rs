// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

pub mod constant;
pub mod meta;
pub mod tracker;

pub use self::tracker::{Tracker, TrackerPtr};

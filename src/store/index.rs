// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! The narrow contract with the vector/document index subsystem. The core
//! never builds or searches indexes; it only hands writes across this
//! boundary and refuses work the subsystem reports itself unable to take.

use crate::common::meta::{RegionDefinition, RegionType};
use crate::error::{ErrorCode, Result, ServerError};

/// What the index subsystem reports about one index region.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexStatus {
    pub ready: bool,
    pub build_error: Option<String>,
    pub element_count: u64,
    /// Work already queued toward the index's own task queue.
    pub background_pending_task_count: u64,
}

/// Implemented by the index subsystem; queried per region before the core
/// accepts index-bound writes.
pub trait IndexGate: Send + Sync {
    fn status(&self, region_id: u64) -> IndexStatus;
}

/// An always-ready gate for deployments without index regions.
#[derive(Debug, Clone, Default)]
pub struct NoopIndexGate;

impl IndexGate for NoopIndexGate {
    fn status(&self, _region_id: u64) -> IndexStatus {
        IndexStatus {
            ready: true,
            ..Default::default()
        }
    }
}

/// Extra gates for INDEX/DOCUMENT regions, layered after the common
/// epoch/range/state ladder: the index must be ready, not in a build
/// error, and below its element ceiling for the incoming batch.
pub fn validate_index_region(
    gate: &dyn IndexGate,
    definition: &RegionDefinition,
    incoming_count: u64,
    max_pending_tasks: u64,
) -> Result<()> {
    if definition.region_type == RegionType::Store {
        return Ok(());
    }
    let status = gate.status(definition.region_id);
    if let Some(error) = &status.build_error {
        return Err(ServerError::new(
            ErrorCode::IndexBuildError,
            format!("index {} build failed: {}", definition.region_id, error),
        ));
    }
    if !status.ready {
        return Err(ServerError::new(
            ErrorCode::IndexNotReady,
            format!("index {} is not ready", definition.region_id),
        ));
    }
    if let Some(parameter) = &definition.index_parameter {
        if parameter.max_elements > 0
            && status.element_count + incoming_count > parameter.max_elements
        {
            return Err(ServerError::new(
                ErrorCode::IndexExceedMaxElements,
                format!(
                    "index {} holds {} elements, limit {}",
                    definition.region_id, status.element_count, parameter.max_elements
                ),
            ));
        }
    }
    if max_pending_tasks > 0 && status.background_pending_task_count >= max_pending_tasks {
        return Err(ServerError::request_full(format!(
            "index {} has {} background tasks pending",
            definition.region_id, status.background_pending_task_count
        )));
    }
    Ok(())
}

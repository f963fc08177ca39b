// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! The ordered validation ladder every data request climbs before any
//! work is queued: region existence, epoch, range, state, leadership,
//! then payload-specific checks. The first failure short-circuits with
//! the redirect payload attached.

use engine_traits::{Range, RawEngine};

use crate::common::meta::RegionEpoch;
use crate::error::{ErrorCode, Result, ServerError};
use crate::store::{RaftStore, RegionPeer};

/// Every user key must begin with a recognized namespace prefix, and all
/// keys of one request must share it.
pub fn validate_key_namespace(keys: &[&[u8]]) -> Result<()> {
    let mut prefix = None;
    for key in keys {
        let p = keys::validate_prefix(key)?;
        match prefix {
            None => prefix = Some(p),
            Some(existing) if existing == p => {}
            Some(existing) => {
                return Err(ServerError::new(
                    ErrorCode::IllegalParameters,
                    format!(
                        "keys span namespaces {} and {}",
                        existing as char, p as char
                    ),
                ));
            }
        }
    }
    Ok(())
}

pub fn validate_range(range: &Range) -> Result<()> {
    if range.start.is_empty() || range.end.is_empty() {
        return Err(ServerError::new(ErrorCode::KeyEmpty, "empty range bound"));
    }
    if range.start > range.end {
        return Err(ServerError::new(
            ErrorCode::RangeInvalid,
            "range start after end",
        ));
    }
    Ok(())
}

/// Cluster-wide write gate. `reason` names the maintenance window when
/// the read-only switch is forced.
pub fn validate_cluster_writable(read_only: bool, reason: &str) -> Result<()> {
    if !read_only {
        return Ok(());
    }
    Err(ServerError::new(
        ErrorCode::ClusterReadOnly,
        if reason.is_empty() {
            "cluster is read-only".to_owned()
        } else {
            format!("cluster is read-only: {}", reason)
        },
    ))
}

/// The full ladder for a keyed data request on a store.
pub fn validate_data_request<E: RawEngine>(
    store: &RaftStore<E>,
    region_id: u64,
    epoch: &RegionEpoch,
    keys: &[&[u8]],
) -> Result<()> {
    validate_key_namespace(keys)?;
    let peer = store.peer(region_id)?;
    peer.validate_data_request(epoch, keys)
}

/// Leadership info for a redirect: the current leader's server location
/// when this replica knows it.
pub fn redirect_target<E: RawEngine>(peer: &RegionPeer<E>) -> ServerError {
    ServerError::not_leader(peer.region().id(), peer.leader_location())
        .with_region(peer.region().definition().clone())
}

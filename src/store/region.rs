// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! The store-local view of one region: its definition plus the runtime
//! state the service layer validates against.

use engine_traits::Range;

use crate::common::meta::{RegionDefinition, RegionEpoch, RegionState};
use crate::error::{ErrorCode, Result, ServerError};

#[derive(Debug, Clone)]
pub struct Region {
    definition: RegionDefinition,
    state: RegionState,
}

impl Region {
    pub fn new(definition: RegionDefinition, state: RegionState) -> Region {
        Region { definition, state }
    }

    pub fn id(&self) -> u64 {
        self.definition.region_id
    }

    pub fn definition(&self) -> &RegionDefinition {
        &self.definition
    }

    pub fn definition_mut(&mut self) -> &mut RegionDefinition {
        &mut self.definition
    }

    pub fn epoch(&self) -> RegionEpoch {
        self.definition.epoch
    }

    pub fn range(&self) -> &Range {
        &self.definition.range
    }

    pub fn state(&self) -> RegionState {
        self.state
    }

    pub fn set_state(&mut self, state: RegionState) {
        self.state = state;
    }

    /// Epoch check: stale in either component fails, and the response
    /// carries this region's definition so the client can retry correctly.
    pub fn check_epoch(&self, req_epoch: &RegionEpoch) -> Result<()> {
        if req_epoch.is_stale(&self.definition.epoch) || self.definition.epoch.is_stale(req_epoch)
        {
            return Err(ServerError::new(
                ErrorCode::EpochNotMatch,
                format!(
                    "region {} epoch {:?}, request epoch {:?}",
                    self.id(),
                    self.definition.epoch,
                    req_epoch
                ),
            )
            .with_region(self.definition.clone()));
        }
        Ok(())
    }

    /// Every key must fall inside `[start, end)`.
    pub fn check_keys_in_range(&self, keys: &[&[u8]]) -> Result<()> {
        for key in keys {
            if !self.definition.range.contains(key) {
                return Err(ServerError::new(
                    ErrorCode::KeyOutOfRange,
                    format!(
                        "key {} out of region {} range [{}, {})",
                        hex::encode_upper(key),
                        self.id(),
                        hex::encode_upper(&self.definition.range.start),
                        hex::encode_upper(&self.definition.range.end),
                    ),
                )
                .with_region(self.definition.clone()));
            }
        }
        Ok(())
    }

    /// A request range must sit fully inside the region range.
    pub fn check_range_in_range(&self, req: &Range) -> Result<()> {
        if req.start >= self.definition.range.start && req.end <= self.definition.range.end {
            return Ok(());
        }
        Err(ServerError::new(
            ErrorCode::KeyOutOfRange,
            format!(
                "range [{}, {}) out of region {} range [{}, {})",
                hex::encode_upper(&req.start),
                hex::encode_upper(&req.end),
                self.id(),
                hex::encode_upper(&self.definition.range.start),
                hex::encode_upper(&self.definition.range.end),
            ),
        )
        .with_region(self.definition.clone()))
    }

    pub fn check_serving(&self) -> Result<()> {
        if self.state.is_serving() {
            return Ok(());
        }
        Err(ServerError::new(
            ErrorCode::RegionUnavailable,
            format!("region {} is {:?}", self.id(), self.state),
        )
        .with_region(self.definition.clone()))
    }
}

#[cfg(test)]
mod tests {
    use crate::common::meta::{PeerRole, RegionType};

    use super::*;

    pub(crate) fn region_fixture(id: u64, start: &[u8], end: &[u8]) -> Region {
        Region::new(
            RegionDefinition {
                region_id: id,
                epoch: RegionEpoch::new(1, 1),
                range: Range::new(start.to_vec(), end.to_vec()),
                peers: vec![crate::common::meta::Peer {
                    peer_id: id * 100,
                    store_id: 1,
                    role: PeerRole::Voter,
                    server_location: crate::common::meta::Location::new("s1", 20160),
                    raft_location: crate::common::meta::Location::new("s1", 20161),
                }],
                region_type: RegionType::Store,
                tenant_id: 0,
                index_parameter: None,
            },
            RegionState::Normal,
        )
    }

    #[test]
    fn test_epoch_check_attaches_region() {
        let region = region_fixture(1, b"r:a", b"r:z");
        let err = region
            .check_epoch(&RegionEpoch::new(1, 0))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::EpochNotMatch);
        assert_eq!(err.region_definition.unwrap().region_id, 1);
        region.check_epoch(&RegionEpoch::new(1, 1)).unwrap();
        // A newer request epoch is also a mismatch from this replica's view.
        assert!(region.check_epoch(&RegionEpoch::new(1, 2)).is_err());
    }

    #[test]
    fn test_range_checks() {
        let region = region_fixture(1, b"r:b", b"r:y");
        region.check_keys_in_range(&[b"r:b", b"r:m"]).unwrap();
        let err = region.check_keys_in_range(&[b"r:y"]).unwrap_err();
        assert_eq!(err.code, ErrorCode::KeyOutOfRange);
        assert!(err.region_definition.is_some());

        region
            .check_range_in_range(&Range::new(b"r:b".to_vec(), b"r:y".to_vec()))
            .unwrap();
        assert!(region
            .check_range_in_range(&Range::new(b"r:a".to_vec(), b"r:c".to_vec()))
            .is_err());
    }

    #[test]
    fn test_serving_check() {
        let mut region = region_fixture(1, b"r:a", b"r:z");
        region.check_serving().unwrap();
        region.set_state(RegionState::Splitting);
        assert_eq!(
            region.check_serving().unwrap_err().code,
            ErrorCode::RegionUnavailable
        );
    }
}

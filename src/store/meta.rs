// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! Store-local durable metadata, all in the `meta` CF: region definitions,
//! raft hard state, region change records, metrics snapshots, the control
//! command log and the governance flags.

use engine_traits::{Iterable, Modify, Peekable, RawEngine, CF_META};
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::common::constant;
use crate::common::meta::{RegionCmd, RegionDefinition, RegionMetrics, RegionState};
use crate::error::Result;
use crate::raft::HardState;

/// What we persist per region: the definition plus its lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRegion {
    pub definition: RegionDefinition,
    pub state: RegionState,
}

/// One entry of the region change history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionChangeRecord {
    pub region_id: u64,
    pub event: String,
    pub epoch_after: crate::common::meta::RegionEpoch,
}

#[derive(Clone)]
pub struct StoreMetaManager<E: RawEngine> {
    engine: E,
}

impl<E: RawEngine> StoreMetaManager<E> {
    pub fn new(engine: E) -> StoreMetaManager<E> {
        StoreMetaManager { engine }
    }

    pub fn save_region(&self, region: &PersistedRegion) -> Result<()> {
        let key = keys::region_meta_key(region.definition.region_id);
        let value = codec::encode_default(region)?;
        self.engine.put_cf(CF_META, &key, &value)?;
        Ok(())
    }

    pub fn load_region(&self, region_id: u64) -> Result<Option<PersistedRegion>> {
        let key = keys::region_meta_key(region_id);
        match self.engine.get_value_cf(CF_META, &key)? {
            Some(value) => Ok(Some(codec::decode(&value)?)),
            None => Ok(None),
        }
    }

    pub fn delete_region(&self, region_id: u64) -> Result<()> {
        self.engine.write(vec![
            Modify::Delete(CF_META, keys::region_meta_key(region_id)),
            Modify::Delete(CF_META, keys::raft_meta_key(region_id)),
            Modify::Delete(CF_META, keys::region_metrics_key(region_id)),
            Modify::Delete(CF_META, keys::region_change_key(region_id)),
        ])?;
        Ok(())
    }

    /// All persisted regions, for recovery at store start.
    pub fn load_all_regions(&self) -> Result<Vec<PersistedRegion>> {
        let (start, end) = keys::meta_prefix_range(keys::REGION_META_PREFIX);
        let kvs = self
            .engine
            .snapshot()
            .scan_cf(CF_META, &start, &end, 0, false)?;
        let mut regions = Vec::with_capacity(kvs.len());
        for (_, value) in kvs {
            regions.push(codec::decode(&value)?);
        }
        Ok(regions)
    }

    pub fn save_hard_state(&self, region_id: u64, hs: &HardState) -> Result<()> {
        let value = codec::encode_default(hs)?;
        self.engine
            .put_cf(CF_META, &keys::raft_meta_key(region_id), &value)?;
        Ok(())
    }

    pub fn load_hard_state(&self, region_id: u64) -> Result<Option<HardState>> {
        match self
            .engine
            .get_value_cf(CF_META, &keys::raft_meta_key(region_id))?
        {
            Some(value) => Ok(Some(codec::decode(&value)?)),
            None => Ok(None),
        }
    }

    pub fn record_region_change(&self, record: &RegionChangeRecord) -> Result<()> {
        let value = codec::encode_default(record)?;
        self.engine
            .put_cf(CF_META, &keys::region_change_key(record.region_id), &value)?;
        Ok(())
    }

    pub fn save_region_metrics(&self, metrics: &RegionMetrics) -> Result<()> {
        let value = codec::encode_default(metrics)?;
        self.engine
            .put_cf(CF_META, &keys::region_metrics_key(metrics.region_id), &value)?;
        Ok(())
    }

    pub fn save_control_cmd(&self, cmd: &RegionCmd) -> Result<()> {
        let value = codec::encode_default(cmd)?;
        self.engine
            .put_cf(CF_META, &keys::control_cmd_key(cmd.cmd_id), &value)?;
        Ok(())
    }

    // Governance flags. They gate every write on the store, so reads go
    // through the engine rather than a cached copy.

    pub fn set_gc_stop(&self, stop: bool) -> Result<()> {
        let value = if stop {
            constant::GC_STOP_VALUE_TRUE
        } else {
            constant::GC_STOP_VALUE_FALSE
        };
        self.engine
            .put_cf(CF_META, keys::GC_STOP_KEY.as_bytes(), value.as_bytes())?;
        Ok(())
    }

    pub fn gc_stop(&self) -> Result<bool> {
        Ok(self
            .engine
            .get_value_cf(CF_META, keys::GC_STOP_KEY.as_bytes())?
            .map(|v| v == constant::GC_STOP_VALUE_TRUE.as_bytes())
            .unwrap_or(false))
    }

    pub fn set_force_read_only(&self, on: bool, reason: &str) -> Result<()> {
        let flag = if on {
            constant::FORCE_READ_ONLY_VALUE_TRUE
        } else {
            constant::FORCE_READ_ONLY_VALUE_FALSE
        };
        self.engine.write(vec![
            Modify::Put(
                CF_META,
                keys::FORCE_READ_ONLY_KEY.as_bytes().to_vec(),
                flag.as_bytes().to_vec(),
            ),
            Modify::Put(
                CF_META,
                keys::FORCE_READ_ONLY_REASON_KEY.as_bytes().to_vec(),
                reason.as_bytes().to_vec(),
            ),
        ])?;
        Ok(())
    }

    /// `(enabled, reason)`.
    pub fn force_read_only(&self) -> Result<(bool, String)> {
        let on = self
            .engine
            .get_value_cf(CF_META, keys::FORCE_READ_ONLY_KEY.as_bytes())?
            .map(|v| v == constant::FORCE_READ_ONLY_VALUE_TRUE.as_bytes())
            .unwrap_or(false);
        let reason = self
            .engine
            .get_value_cf(CF_META, keys::FORCE_READ_ONLY_REASON_KEY.as_bytes())?
            .map(|v| String::from_utf8_lossy(&v).into_owned())
            .unwrap_or_default();
        Ok((on, reason))
    }
}

#[cfg(test)]
mod tests {
    use engine_memory::MemoryEngineBuilder;
    use engine_traits::Range;

    use crate::common::meta::{Location, Peer, PeerRole, RegionEpoch, RegionType};

    use super::*;

    fn manager() -> StoreMetaManager<engine_memory::MemoryEngine> {
        StoreMetaManager::new(MemoryEngineBuilder::new().build())
    }

    fn persisted(id: u64) -> PersistedRegion {
        PersistedRegion {
            definition: RegionDefinition {
                region_id: id,
                epoch: RegionEpoch::new(1, 1),
                range: Range::new(b"r:a".to_vec(), b"r:z".to_vec()),
                peers: vec![Peer {
                    peer_id: id * 100 + 1,
                    store_id: 1,
                    role: PeerRole::Voter,
                    server_location: Location::new("s1", 20160),
                    raft_location: Location::new("s1", 20161),
                }],
                region_type: RegionType::Store,
                tenant_id: 0,
                index_parameter: None,
            },
            state: RegionState::Normal,
        }
    }

    #[test]
    fn test_region_roundtrip() {
        let meta = manager();
        let region = persisted(3);
        meta.save_region(&region).unwrap();
        assert_eq!(meta.load_region(3).unwrap().unwrap(), region);
        assert!(meta.load_region(4).unwrap().is_none());
        meta.delete_region(3).unwrap();
        assert!(meta.load_region(3).unwrap().is_none());
    }

    #[test]
    fn test_load_all_regions_ordered() {
        let meta = manager();
        for id in [5u64, 2, 9] {
            meta.save_region(&persisted(id)).unwrap();
        }
        let ids: Vec<u64> = meta
            .load_all_regions()
            .unwrap()
            .into_iter()
            .map(|r| r.definition.region_id)
            .collect();
        assert_eq!(ids, vec![2, 5, 9]);
    }

    #[test]
    fn test_hard_state_roundtrip() {
        let meta = manager();
        let hs = HardState {
            term: 4,
            vote: Some(2),
            commit: 17,
        };
        meta.save_hard_state(1, &hs).unwrap();
        assert_eq!(meta.load_hard_state(1).unwrap().unwrap(), hs);
    }

    #[test]
    fn test_governance_flags() {
        let meta = manager();
        assert!(!meta.gc_stop().unwrap());
        meta.set_gc_stop(true).unwrap();
        assert!(meta.gc_stop().unwrap());

        assert_eq!(meta.force_read_only().unwrap(), (false, String::new()));
        meta.set_force_read_only(true, "maintenance").unwrap();
        assert_eq!(
            meta.force_read_only().unwrap(),
            (true, "maintenance".to_owned())
        );
    }
}

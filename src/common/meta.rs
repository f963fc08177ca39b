// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! The shared cluster metadata model: regions, peers, stores, executors and
//! the control commands the coordinator addresses to stores. Everything
//! here is serialized through [`crate::codec`] when persisted or carried in
//! a replicated entry.

use engine_traits::Range;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub host: String,
    pub port: u16,
}

impl Location {
    pub fn new(host: impl Into<String>, port: u16) -> Location {
        Location {
            host: host.into(),
            port,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// `(conf_version, version)`: conf_version advances on membership change,
/// version on range change (split/merge).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RegionEpoch {
    pub conf_version: u64,
    pub version: u64,
}

impl RegionEpoch {
    pub fn new(conf_version: u64, version: u64) -> RegionEpoch {
        RegionEpoch {
            conf_version,
            version,
        }
    }

    /// Whether `self` is stale relative to `other` in either component.
    pub fn is_stale(&self, other: &RegionEpoch) -> bool {
        self.conf_version < other.conf_version || self.version < other.version
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerRole {
    Voter,
    Learner,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub peer_id: u64,
    pub store_id: u64,
    pub role: PeerRole,
    pub server_location: Location,
    pub raft_location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionType {
    Store,
    Index,
    Document,
}

/// Lifecycle of a region on the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionState {
    New,
    Normal,
    Splitting,
    Merging,
    ChangingPeers,
    Deleted,
    DeletedPermanently,
}

impl RegionState {
    /// Whether data requests may be served in this state.
    pub fn is_serving(self) -> bool {
        matches!(self, RegionState::Normal)
    }

    pub fn is_deleted(self) -> bool {
        matches!(self, RegionState::Deleted | RegionState::DeletedPermanently)
    }
}

/// Index parameters are owned by the index subsystem; the core only records
/// them opaquely and checks the gates reported back by that subsystem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexParameter {
    pub index_type: String,
    pub max_elements: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionDefinition {
    pub region_id: u64,
    pub epoch: RegionEpoch,
    pub range: Range,
    pub peers: Vec<Peer>,
    pub region_type: RegionType,
    pub tenant_id: u64,
    pub index_parameter: Option<IndexParameter>,
}

impl RegionDefinition {
    pub fn peer_on_store(&self, store_id: u64) -> Option<&Peer> {
        self.peers.iter().find(|p| p.store_id == store_id)
    }

    pub fn leader_candidates(&self) -> impl Iterator<Item = &Peer> {
        self.peers.iter().filter(|p| p.role == PeerRole::Voter)
    }

    /// Namespace prefix shared by every key of the region.
    pub fn prefix(&self) -> Option<u8> {
        self.range.start.first().copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreState {
    New,
    Normal,
    Offline,
    Tombstone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreType {
    Store,
    Index,
    Document,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    pub store_id: u64,
    pub keyring: String,
    pub state: StoreState,
    pub server_location: Location,
    pub raft_location: Location,
    pub store_type: StoreType,
    pub resource_tag: String,
    pub last_seen_ms: u64,
    /// Reported by the store itself, e.g. when its disk is nearly full.
    pub is_read_only: bool,
    pub leader_num_weight: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorUser {
    pub user: String,
    pub keyring: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Executor {
    /// `host:port` when the executor does not name itself.
    pub executor_id: String,
    pub user: ExecutorUser,
    pub state: StoreState,
    pub server_location: Location,
    pub last_seen_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionCmdType {
    CreateRegion,
    DeleteRegion,
    Split,
    MergeSource,
    MergeTarget,
    ChangePeer,
    TransferLeader,
    Snapshot,
    HoldVectorIndex,
    UpdateDefinition,
    Purge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionCmdStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

/// One atomic control instruction addressed to one store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionCmd {
    pub cmd_id: u64,
    pub job_id: u64,
    pub region_id: u64,
    pub store_id: u64,
    pub cmd_type: RegionCmdType,
    pub status: RegionCmdStatus,
    pub error: Option<String>,
    /// Parameters specific to the command type.
    pub payload: RegionCmdPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegionCmdPayload {
    CreateRegion {
        definition: RegionDefinition,
        /// Non-zero when this is the pre-created sibling of a split; the
        /// new region stays out of service until the split entry applies.
        split_from_region_id: u64,
    },
    DeleteRegion,
    Split {
        to_region_id: u64,
        split_key: Vec<u8>,
    },
    MergeSource {
        target_region_id: u64,
    },
    MergeTarget {
        source_region_id: u64,
    },
    ChangePeer {
        new_peers: Vec<Peer>,
    },
    TransferLeader {
        to_peer_id: u64,
    },
    Snapshot,
    UpdateDefinition {
        definition: RegionDefinition,
    },
    Purge,
}

/// Per-region usage figures reported via store heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionMetrics {
    pub region_id: u64,
    pub approximate_size: u64,
    pub approximate_keys: u64,
    pub leader_store_id: u64,
    pub last_update_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreMetrics {
    pub store_id: u64,
    pub total_capacity: u64,
    pub free_capacity: u64,
    pub region_count: u64,
    pub leader_count: u64,
    pub is_read_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_staleness() {
        let current = RegionEpoch::new(2, 3);
        assert!(RegionEpoch::new(1, 3).is_stale(&current));
        assert!(RegionEpoch::new(2, 2).is_stale(&current));
        assert!(!RegionEpoch::new(2, 3).is_stale(&current));
        assert!(!RegionEpoch::new(3, 4).is_stale(&current));
    }

    #[test]
    fn test_region_definition_roundtrip() {
        let def = RegionDefinition {
            region_id: 10,
            epoch: RegionEpoch::new(1, 1),
            range: Range::new(b"r:a".to_vec(), b"r:z".to_vec()),
            peers: vec![Peer {
                peer_id: 101,
                store_id: 1,
                role: PeerRole::Voter,
                server_location: Location::new("s1", 20160),
                raft_location: Location::new("s1", 20161),
            }],
            region_type: RegionType::Store,
            tenant_id: 0,
            index_parameter: None,
        };
        let bytes = crate::codec::encode_default(&def).unwrap();
        let decoded: RegionDefinition = crate::codec::decode(&bytes).unwrap();
        assert_eq!(decoded, def);
        assert_eq!(decoded.prefix(), Some(b'r'));
    }
}

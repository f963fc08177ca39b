// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! Region lifecycle operations: store selection, job drafting for
//! create/drop/split/merge/change-peer/transfer-leader, and the range
//! invariants the control plane enforces (live ranges of a tenant never
//! overlap, peers live on existing stores, one store per peer).

use engine_traits::Range;
use slog_global::info;

use super::ids::IdEpochType;
use super::increment::{MetaDelta, MetaIncrement};
use super::job::{Job, JobKind, JobStatus, Task};
use super::lease::now_ms;
use super::{CoordinatorControl, RegionInternal};
use crate::common::meta::{
    IndexParameter, Peer, PeerRole, RegionCmd, RegionCmdPayload, RegionCmdStatus, RegionCmdType,
    RegionDefinition, RegionEpoch, RegionState, RegionType, Store, StoreState, StoreType,
};
use crate::error::{ErrorCode, Result, ServerError};

/// Everything needed to create a region.
#[derive(Debug, Clone)]
pub struct CreateRegionRequest {
    pub region_type: RegionType,
    pub range: Range,
    pub replica_num: usize,
    pub tenant_id: u64,
    pub resource_tag: String,
    pub index_parameter: Option<IndexParameter>,
}

impl CoordinatorControl {
    pub fn create_region_ids(&self, count: u64) -> Result<super::ids::IdRange> {
        self.create_ids(IdEpochType::RegionId, count)
    }

    fn store_type_for(region_type: RegionType) -> StoreType {
        match region_type {
            RegionType::Store => StoreType::Store,
            RegionType::Index => StoreType::Index,
            RegionType::Document => StoreType::Document,
        }
    }

    /// Serving stores of the right type and resource tag, least-loaded
    /// first (by hosted region count).
    fn select_stores(
        &self,
        store_type: StoreType,
        resource_tag: &str,
        replica_num: usize,
    ) -> Result<Vec<Store>> {
        let mut candidates = self.stores.get_all_values(|s| {
            s.state == StoreState::Normal
                && s.store_type == store_type
                && (resource_tag.is_empty() || s.resource_tag == resource_tag)
        });
        candidates.sort_by_key(|s| {
            let count = self
                .store_metrics
                .get(&s.store_id)
                .map(|m| m.region_count)
                .unwrap_or(0);
            (count, s.store_id)
        });
        if candidates.len() < replica_num {
            return Err(ServerError::new(
                ErrorCode::IllegalParameters,
                format!(
                    "need {} stores of type {:?}, only {} available",
                    replica_num,
                    store_type,
                    candidates.len()
                ),
            ));
        }
        candidates.truncate(replica_num);
        Ok(candidates)
    }

    fn check_no_overlap(&self, tenant_id: u64, range: &Range) -> Result<()> {
        let overlapping = self.regions.get_all_values(|r| {
            r.definition.tenant_id == tenant_id
                && !r.state.is_deleted()
                && r.definition.range.start < range.end
                && range.start < r.definition.range.end
        });
        if let Some(existing) = overlapping.first() {
            return Err(ServerError::new(
                ErrorCode::RangeInvalid,
                format!(
                    "range overlaps live region {}",
                    existing.definition.region_id
                ),
            ));
        }
        Ok(())
    }

    fn validate_range(range: &Range) -> Result<()> {
        if range.start.is_empty() || range.end.is_empty() {
            return Err(ServerError::new(ErrorCode::KeyEmpty, "empty range bound"));
        }
        if range.start >= range.end {
            return Err(ServerError::new(
                ErrorCode::RangeInvalid,
                "range start not below end",
            ));
        }
        let start_prefix = keys::validate_prefix(&range.start)?;
        let end_prefix = keys::validate_prefix(&range.end)?;
        if start_prefix != end_prefix {
            return Err(ServerError::new(
                ErrorCode::IllegalParameters,
                "range spans key namespaces",
            ));
        }
        Ok(())
    }

    fn build_peers(&self, stores: &[Store], peer_ids: &[u64]) -> Vec<Peer> {
        stores
            .iter()
            .zip(peer_ids)
            .map(|(store, peer_id)| Peer {
                peer_id: *peer_id,
                store_id: store.store_id,
                role: PeerRole::Voter,
                server_location: store.server_location.clone(),
                raft_location: store.raft_location.clone(),
            })
            .collect()
    }

    fn new_job(&self, kind: JobKind, tasks: Vec<Task>) -> Result<Job> {
        let job_id = self.create_ids(IdEpochType::JobId, 1)?.start;
        let mut job = Job::new(job_id, kind, tasks, now_ms());
        for task in &mut job.tasks {
            for cmd in &mut task.cmds {
                cmd.job_id = job_id;
            }
        }
        job.status = JobStatus::InProgress;
        Ok(job)
    }

    fn new_cmd(
        &self,
        cmd_id: u64,
        region_id: u64,
        store_id: u64,
        cmd_type: RegionCmdType,
        payload: RegionCmdPayload,
    ) -> RegionCmd {
        RegionCmd {
            cmd_id,
            job_id: 0,
            region_id,
            store_id,
            cmd_type,
            status: RegionCmdStatus::Pending,
            error: None,
            payload,
        }
    }

    /// Creates a region: selects stores, writes the NEW region into the
    /// map and schedules one create cmd per peer. The region turns NORMAL
    /// when the job completes.
    pub fn create_region(&self, request: CreateRegionRequest) -> Result<(u64, u64)> {
        Self::validate_range(&request.range)?;
        if request.replica_num == 0 {
            return Err(ServerError::new(
                ErrorCode::IllegalParameters,
                "replica_num must be positive",
            ));
        }
        self.check_no_overlap(request.tenant_id, &request.range)?;
        let stores = self.select_stores(
            Self::store_type_for(request.region_type),
            &request.resource_tag,
            request.replica_num,
        )?;
        let region_id = self.create_ids(IdEpochType::RegionId, 1)?.start;
        let peer_ids = self.create_ids(IdEpochType::PeerId, request.replica_num as u64)?;
        let peer_ids: Vec<u64> = (peer_ids.start..peer_ids.end()).collect();
        let definition = RegionDefinition {
            region_id,
            epoch: RegionEpoch::new(1, 1),
            range: request.range,
            peers: self.build_peers(&stores, &peer_ids),
            region_type: request.region_type,
            tenant_id: request.tenant_id,
            index_parameter: request.index_parameter,
        };

        let cmd_ids = self.create_ids(IdEpochType::CmdId, stores.len() as u64)?;
        let cmds = stores
            .iter()
            .enumerate()
            .map(|(i, store)| {
                self.new_cmd(
                    cmd_ids.start + i as u64,
                    region_id,
                    store.store_id,
                    RegionCmdType::CreateRegion,
                    RegionCmdPayload::CreateRegion {
                        definition: definition.clone(),
                        split_from_region_id: 0,
                    },
                )
            })
            .collect();
        let job = self.new_job(JobKind::CreateRegion { region_id }, vec![Task { cmds }])?;
        let job_id = job.job_id;

        self.submit_increment(MetaIncrement {
            deltas: vec![
                MetaDelta::RegionUpsert(RegionInternal {
                    definition,
                    state: RegionState::New,
                    leader_store_id: 0,
                    create_ts_ms: now_ms(),
                }),
                MetaDelta::JobUpsert(job),
            ],
        })?;
        info!("drafted create-region job"; "region_id" => region_id, "job_id" => job_id);
        Ok((region_id, job_id))
    }

    /// Soft drop: the region is marked DELETED and every peer purges its
    /// data. With `permanent`, the metadata goes too once the purge job
    /// completes.
    pub fn drop_region(&self, region_id: u64, permanent: bool) -> Result<u64> {
        let region = self
            .regions
            .get(&region_id)
            .ok_or_else(|| ServerError::region_not_found(region_id))?;
        let cmd_ids = self.create_ids(
            IdEpochType::CmdId,
            region.definition.peers.len() as u64,
        )?;
        let cmds = region
            .definition
            .peers
            .iter()
            .enumerate()
            .map(|(i, peer)| {
                self.new_cmd(
                    cmd_ids.start + i as u64,
                    region_id,
                    peer.store_id,
                    RegionCmdType::Purge,
                    RegionCmdPayload::Purge,
                )
            })
            .collect();
        let job = self.new_job(
            JobKind::DropRegion {
                region_id,
                permanent,
            },
            vec![Task { cmds }],
        )?;
        let job_id = job.job_id;

        let mut deleted = region;
        deleted.state = RegionState::Deleted;
        self.submit_increment(MetaIncrement {
            deltas: vec![
                MetaDelta::RegionUpsert(deleted),
                MetaDelta::JobUpsert(job),
            ],
        })?;
        Ok(job_id)
    }

    /// Splits `region_id` at `split_key`: the sibling is pre-created on
    /// every peer store, then every replica applies the split entry.
    pub fn split_region(&self, region_id: u64, split_key: Vec<u8>) -> Result<(u64, u64)> {
        let region = self
            .regions
            .get(&region_id)
            .ok_or_else(|| ServerError::region_not_found(region_id))?;
        if region.state != RegionState::Normal {
            return Err(region_unavailable(&region));
        }
        if split_key.as_slice() <= region.definition.range.start.as_slice()
            || split_key.as_slice() >= region.definition.range.end.as_slice()
        {
            return Err(ServerError::new(
                ErrorCode::IllegalParameters,
                "split key outside region range",
            ));
        }

        let to_region_id = self.create_ids(IdEpochType::RegionId, 1)?.start;
        let peer_ids = self.create_ids(
            IdEpochType::PeerId,
            region.definition.peers.len() as u64,
        )?;
        let sibling_peers: Vec<Peer> = region
            .definition
            .peers
            .iter()
            .zip(peer_ids.start..peer_ids.end())
            .map(|(peer, peer_id)| Peer {
                peer_id,
                ..peer.clone()
            })
            .collect();
        let sibling = RegionDefinition {
            region_id: to_region_id,
            epoch: RegionEpoch::new(1, 1),
            range: Range::new(split_key.clone(), region.definition.range.end.clone()),
            peers: sibling_peers,
            region_type: region.definition.region_type,
            tenant_id: region.definition.tenant_id,
            index_parameter: region.definition.index_parameter.clone(),
        };

        let store_ids: Vec<u64> = region.definition.peers.iter().map(|p| p.store_id).collect();
        let cmd_ids = self.create_ids(IdEpochType::CmdId, store_ids.len() as u64 * 2)?;
        let create_cmds = store_ids
            .iter()
            .enumerate()
            .map(|(i, store_id)| {
                self.new_cmd(
                    cmd_ids.start + i as u64,
                    to_region_id,
                    *store_id,
                    RegionCmdType::CreateRegion,
                    RegionCmdPayload::CreateRegion {
                        definition: sibling.clone(),
                        split_from_region_id: region_id,
                    },
                )
            })
            .collect();
        let split_cmds = store_ids
            .iter()
            .enumerate()
            .map(|(i, store_id)| {
                self.new_cmd(
                    cmd_ids.start + store_ids.len() as u64 + i as u64,
                    region_id,
                    *store_id,
                    RegionCmdType::Split,
                    RegionCmdPayload::Split {
                        to_region_id,
                        split_key: split_key.clone(),
                    },
                )
            })
            .collect();
        let job = self.new_job(
            JobKind::Split {
                from_region_id: region_id,
                to_region_id,
                split_key,
            },
            vec![Task { cmds: create_cmds }, Task { cmds: split_cmds }],
        )?;
        let job_id = job.job_id;

        let mut splitting = region;
        splitting.state = RegionState::Splitting;
        self.submit_increment(MetaIncrement {
            deltas: vec![
                MetaDelta::RegionUpsert(splitting),
                MetaDelta::RegionUpsert(RegionInternal {
                    definition: sibling,
                    state: RegionState::New,
                    leader_store_id: 0,
                    create_ts_ms: now_ms(),
                }),
                MetaDelta::JobUpsert(job),
            ],
        })?;
        info!("drafted split job"; "region_id" => region_id, "to_region_id" => to_region_id, "job_id" => job_id);
        Ok((to_region_id, job_id))
    }

    /// Merges `source` into the adjacent `target` on its right-hand side.
    pub fn merge_region(&self, source_region_id: u64, target_region_id: u64) -> Result<u64> {
        let source = self
            .regions
            .get(&source_region_id)
            .ok_or_else(|| ServerError::region_not_found(source_region_id))?;
        let target = self
            .regions
            .get(&target_region_id)
            .ok_or_else(|| ServerError::region_not_found(target_region_id))?;
        if source.state != RegionState::Normal {
            return Err(region_unavailable(&source));
        }
        if target.state != RegionState::Normal {
            return Err(region_unavailable(&target));
        }
        if source.definition.tenant_id != target.definition.tenant_id {
            return Err(ServerError::new(
                ErrorCode::IllegalParameters,
                "merge across tenants",
            ));
        }
        if source.definition.range.end != target.definition.range.start {
            return Err(ServerError::new(
                ErrorCode::RangeInvalid,
                "regions are not adjacent",
            ));
        }
        let source_stores: Vec<u64> =
            source.definition.peers.iter().map(|p| p.store_id).collect();
        let target_stores: Vec<u64> =
            target.definition.peers.iter().map(|p| p.store_id).collect();
        if source_stores != target_stores {
            return Err(ServerError::new(
                ErrorCode::IllegalParameters,
                "merge requires co-located replica sets",
            ));
        }

        let cmd_ids =
            self.create_ids(IdEpochType::CmdId, source_stores.len() as u64 * 3)?;
        let mut next_cmd = cmd_ids.start;
        let mut cmd = |region_id, store_id, cmd_type, payload| {
            let c = self.new_cmd(next_cmd, region_id, store_id, cmd_type, payload);
            next_cmd += 1;
            c
        };
        let source_cmds = source_stores
            .iter()
            .map(|store_id| {
                cmd(
                    source_region_id,
                    *store_id,
                    RegionCmdType::MergeSource,
                    RegionCmdPayload::MergeSource { target_region_id },
                )
            })
            .collect();
        let target_cmds = target_stores
            .iter()
            .map(|store_id| {
                cmd(
                    target_region_id,
                    *store_id,
                    RegionCmdType::MergeTarget,
                    RegionCmdPayload::MergeTarget { source_region_id },
                )
            })
            .collect();
        let delete_cmds = source_stores
            .iter()
            .map(|store_id| {
                cmd(
                    source_region_id,
                    *store_id,
                    RegionCmdType::DeleteRegion,
                    RegionCmdPayload::DeleteRegion,
                )
            })
            .collect();
        let job = self.new_job(
            JobKind::Merge {
                source_region_id,
                target_region_id,
            },
            vec![
                Task { cmds: source_cmds },
                Task { cmds: target_cmds },
                Task { cmds: delete_cmds },
            ],
        )?;
        let job_id = job.job_id;

        let mut merging = source;
        merging.state = RegionState::Merging;
        self.submit_increment(MetaIncrement {
            deltas: vec![MetaDelta::RegionUpsert(merging), MetaDelta::JobUpsert(job)],
        })?;
        Ok(job_id)
    }

    /// Replaces the region's peer set, one single-peer change per task.
    pub fn change_peer(&self, region_id: u64, new_peers: Vec<Peer>) -> Result<u64> {
        let region = self
            .regions
            .get(&region_id)
            .ok_or_else(|| ServerError::region_not_found(region_id))?;
        if region.state != RegionState::Normal {
            return Err(region_unavailable(&region));
        }
        let mut seen_stores = std::collections::HashSet::new();
        for peer in &new_peers {
            if !seen_stores.insert(peer.store_id) {
                return Err(ServerError::new(
                    ErrorCode::IllegalParameters,
                    format!("duplicate store {} in peer set", peer.store_id),
                ));
            }
            match self.stores.get(&peer.store_id) {
                Some(store) if store.state != StoreState::Tombstone => {}
                Some(_) => {
                    return Err(ServerError::new(
                        ErrorCode::IllegalParameters,
                        format!("store {} is tombstoned", peer.store_id),
                    ));
                }
                None => {
                    return Err(ServerError::new(
                        ErrorCode::IllegalParameters,
                        format!("store {} does not exist", peer.store_id),
                    ));
                }
            }
        }

        let current = region.definition.peers.clone();
        let additions: Vec<Peer> = new_peers
            .iter()
            .filter(|p| !current.iter().any(|c| c.peer_id == p.peer_id))
            .cloned()
            .collect();
        let removals: Vec<Peer> = current
            .iter()
            .filter(|c| !new_peers.iter().any(|p| p.peer_id == c.peer_id))
            .cloned()
            .collect();
        if additions.is_empty() && removals.is_empty() {
            return Err(ServerError::new(
                ErrorCode::IllegalParameters,
                "peer set unchanged",
            ));
        }
        let leader_store = if region.leader_store_id != 0 {
            region.leader_store_id
        } else {
            current.first().map(|p| p.store_id).unwrap_or(0)
        };

        // One intermediate peer set per step, additions first so quorum
        // never shrinks below the starting majority.
        let mut steps: Vec<Vec<Peer>> = Vec::new();
        let mut working = current.clone();
        for add in &additions {
            working.push(add.clone());
            steps.push(working.clone());
        }
        for remove in &removals {
            working.retain(|p| p.peer_id != remove.peer_id);
            steps.push(working.clone());
        }
        let cmd_ids = self.create_ids(IdEpochType::CmdId, steps.len() as u64)?;
        let tasks: Vec<Task> = steps
            .iter()
            .enumerate()
            .map(|(i, step)| Task {
                cmds: vec![self.new_cmd(
                    cmd_ids.start + i as u64,
                    region_id,
                    leader_store,
                    RegionCmdType::ChangePeer,
                    RegionCmdPayload::ChangePeer {
                        new_peers: step.clone(),
                    },
                )],
            })
            .collect();

        let mut new_definition = region.definition.clone();
        new_definition.peers = new_peers;
        new_definition.epoch.conf_version += steps.len() as u64;
        let job = self.new_job(
            JobKind::ChangePeer {
                region_id,
                new_definition,
            },
            tasks,
        )?;
        let job_id = job.job_id;

        let mut changing = region;
        changing.state = RegionState::ChangingPeers;
        self.submit_increment(MetaIncrement {
            deltas: vec![MetaDelta::RegionUpsert(changing), MetaDelta::JobUpsert(job)],
        })?;
        Ok(job_id)
    }

    pub fn transfer_leader(&self, region_id: u64, to_peer_id: u64) -> Result<u64> {
        let region = self
            .regions
            .get(&region_id)
            .ok_or_else(|| ServerError::region_not_found(region_id))?;
        if region.state != RegionState::Normal {
            return Err(region_unavailable(&region));
        }
        let target = region
            .definition
            .peers
            .iter()
            .find(|p| p.peer_id == to_peer_id && p.role == PeerRole::Voter)
            .ok_or_else(|| {
                ServerError::new(
                    ErrorCode::IllegalParameters,
                    format!("peer {} is not a voter of region {}", to_peer_id, region_id),
                )
            })?;
        let leader_store = if region.leader_store_id != 0 {
            region.leader_store_id
        } else {
            target.store_id
        };
        let cmd_id = self.create_ids(IdEpochType::CmdId, 1)?.start;
        let job = self.new_job(
            JobKind::TransferLeader {
                region_id,
                to_store_id: target.store_id,
            },
            vec![Task {
                cmds: vec![self.new_cmd(
                    cmd_id,
                    region_id,
                    leader_store,
                    RegionCmdType::TransferLeader,
                    RegionCmdPayload::TransferLeader { to_peer_id },
                )],
            }],
        )?;
        let job_id = job.job_id;
        self.submit_increment(MetaIncrement {
            deltas: vec![MetaDelta::JobUpsert(job)],
        })?;
        Ok(job_id)
    }

    pub fn region_map(&self) -> Vec<RegionInternal> {
        let mut regions = self.regions.get_all_values(|_| true);
        regions.sort_by_key(|r| r.definition.region_id);
        regions
    }

    pub fn store_map(&self) -> Vec<Store> {
        let mut stores = self.stores.get_all_values(|_| true);
        stores.sort_by_key(|s| s.store_id);
        stores
    }
}

fn region_unavailable(region: &RegionInternal) -> ServerError {
    ServerError::new(
        ErrorCode::RegionUnavailable,
        format!(
            "region {} is {:?}",
            region.definition.region_id, region.state
        ),
    )
}

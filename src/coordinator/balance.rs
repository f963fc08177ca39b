// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! Balance planners. Both compute a per-store score (count over weight)
//! against the uniform expectation and emit movement tasks; a dry run
//! mutates nothing, otherwise each task becomes a coordinator job.

use std::collections::HashMap;

use slog_global::info;

use super::CoordinatorControl;
use crate::common::meta::{Peer, PeerRole, RegionType, StoreState, StoreType};
use crate::error::{ErrorCode, Result, ServerError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceTask {
    pub region_id: u64,
    pub source_store_id: u64,
    pub target_store_id: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BalancePlan {
    /// store_id -> score (count / weight).
    pub scores: HashMap<u64, f64>,
    pub expected_score: f64,
    pub tasks: Vec<BalanceTask>,
    /// Job ids created when not a dry run.
    pub job_ids: Vec<u64>,
}

fn region_type_for(store_type: StoreType) -> RegionType {
    match store_type {
        StoreType::Store => RegionType::Store,
        StoreType::Index => RegionType::Index,
        StoreType::Document => RegionType::Document,
    }
}

impl CoordinatorControl {
    fn alive_stores(&self, store_type: StoreType) -> Vec<(u64, u32)> {
        let mut stores: Vec<(u64, u32)> = self
            .stores
            .get_all_values(|s| s.state == StoreState::Normal && s.store_type == store_type)
            .into_iter()
            .map(|s| (s.store_id, s.leader_num_weight.max(1)))
            .collect();
        stores.sort_by_key(|(id, _)| *id);
        stores
    }

    /// Plans leader transfers so leaders spread uniformly over the alive
    /// stores of `store_type`.
    pub fn balance_leader(&self, store_type: StoreType, dryrun: bool) -> Result<BalancePlan> {
        if !self.config.enable_balance_leader {
            return Err(ServerError::new(
                ErrorCode::IllegalParameters,
                "balance leader is disabled",
            ));
        }
        let stores = self.alive_stores(store_type);
        if stores.len() < 2 {
            return Ok(BalancePlan {
                scores: HashMap::new(),
                expected_score: 0.0,
                tasks: vec![],
                job_ids: vec![],
            });
        }
        let region_type = region_type_for(store_type);
        let regions = self.regions.get_all_values(|r| {
            r.definition.region_type == region_type && !r.state.is_deleted()
        });

        let mut leader_counts: HashMap<u64, u64> = stores.iter().map(|(id, _)| (*id, 0)).collect();
        for region in &regions {
            if let Some(count) = leader_counts.get_mut(&region.leader_store_id) {
                *count += 1;
            }
        }
        let weights: HashMap<u64, u32> = stores.iter().copied().collect();
        let scores: HashMap<u64, f64> = leader_counts
            .iter()
            .map(|(id, count)| (*id, *count as f64 / f64::from(weights[id])))
            .collect();
        let total_leaders: u64 = leader_counts.values().sum();
        let total_weight: u32 = weights.values().sum();
        let expected_score = total_leaders as f64 / f64::from(total_weight);

        // Move leaders from the most loaded store toward the least, one
        // region each, while the source sits above the expectation.
        let mut tasks = Vec::new();
        let mut working = leader_counts.clone();
        loop {
            let (&max_store, &max_count) = match working.iter().max_by_key(|(_, c)| **c) {
                Some(entry) => entry,
                None => break,
            };
            let (&min_store, &min_count) = match working.iter().min_by_key(|(_, c)| **c) {
                Some(entry) => entry,
                None => break,
            };
            if max_store == min_store || max_count <= min_count + 1 {
                break;
            }
            if (max_count as f64 / f64::from(weights[&max_store])) <= expected_score {
                break;
            }
            let candidate = regions.iter().find(|r| {
                r.leader_store_id == max_store
                    && r.definition
                        .peers
                        .iter()
                        .any(|p| p.store_id == min_store && p.role == PeerRole::Voter)
                    && !tasks.iter().any(|t: &BalanceTask| t.region_id == r.definition.region_id)
            });
            let region = match candidate {
                Some(region) => region,
                None => break,
            };
            tasks.push(BalanceTask {
                region_id: region.definition.region_id,
                source_store_id: max_store,
                target_store_id: min_store,
            });
            *working.get_mut(&max_store).unwrap_or(&mut 0) -= 1;
            *working.get_mut(&min_store).unwrap_or(&mut 0) += 1;
        }

        let mut job_ids = Vec::new();
        if !dryrun {
            for task in &tasks {
                let region = match self.regions.get(&task.region_id) {
                    Some(region) => region,
                    None => continue,
                };
                let target_peer = region
                    .definition
                    .peers
                    .iter()
                    .find(|p| p.store_id == task.target_store_id)
                    .map(|p| p.peer_id);
                if let Some(to_peer_id) = target_peer {
                    job_ids.push(self.transfer_leader(task.region_id, to_peer_id)?);
                }
            }
            info!("balance leader planned"; "tasks" => tasks.len(), "jobs" => job_ids.len());
        }
        Ok(BalancePlan {
            scores,
            expected_score,
            tasks,
            job_ids,
        })
    }

    /// Plans replica movement so region replicas spread uniformly over the
    /// alive stores of `store_type`.
    pub fn balance_region(&self, store_type: StoreType, dryrun: bool) -> Result<BalancePlan> {
        if !self.config.enable_balance_region {
            return Err(ServerError::new(
                ErrorCode::IllegalParameters,
                "balance region is disabled",
            ));
        }
        let stores = self.alive_stores(store_type);
        if stores.len() < 2 {
            return Ok(BalancePlan {
                scores: HashMap::new(),
                expected_score: 0.0,
                tasks: vec![],
                job_ids: vec![],
            });
        }
        let region_type = region_type_for(store_type);
        let regions = self.regions.get_all_values(|r| {
            r.definition.region_type == region_type && !r.state.is_deleted()
        });

        let mut replica_counts: HashMap<u64, u64> =
            stores.iter().map(|(id, _)| (*id, 0)).collect();
        for region in &regions {
            for peer in &region.definition.peers {
                if let Some(count) = replica_counts.get_mut(&peer.store_id) {
                    *count += 1;
                }
            }
        }
        let weights: HashMap<u64, u32> = stores.iter().copied().collect();
        let scores: HashMap<u64, f64> = replica_counts
            .iter()
            .map(|(id, count)| (*id, *count as f64 / f64::from(weights[id])))
            .collect();
        let total: u64 = replica_counts.values().sum();
        let expected_score = total as f64 / f64::from(weights.values().sum::<u32>());

        let mut tasks = Vec::new();
        let mut working = replica_counts.clone();
        loop {
            let (&max_store, &max_count) = match working.iter().max_by_key(|(_, c)| **c) {
                Some(entry) => entry,
                None => break,
            };
            let (&min_store, &min_count) = match working.iter().min_by_key(|(_, c)| **c) {
                Some(entry) => entry,
                None => break,
            };
            if max_store == min_store || max_count <= min_count + 1 {
                break;
            }
            // A region with a replica on the crowded store and none on the
            // idle one can move.
            let candidate = regions.iter().find(|r| {
                r.definition.peers.iter().any(|p| p.store_id == max_store)
                    && !r.definition.peers.iter().any(|p| p.store_id == min_store)
                    && !tasks.iter().any(|t: &BalanceTask| t.region_id == r.definition.region_id)
            });
            let region = match candidate {
                Some(region) => region,
                None => break,
            };
            tasks.push(BalanceTask {
                region_id: region.definition.region_id,
                source_store_id: max_store,
                target_store_id: min_store,
            });
            *working.get_mut(&max_store).unwrap_or(&mut 0) -= 1;
            *working.get_mut(&min_store).unwrap_or(&mut 0) += 1;
        }

        let mut job_ids = Vec::new();
        if !dryrun {
            for task in &tasks {
                let region = match self.regions.get(&task.region_id) {
                    Some(region) => region,
                    None => continue,
                };
                let target_store = match self.stores.get(&task.target_store_id) {
                    Some(store) => store,
                    None => continue,
                };
                let peer_id = self
                    .create_ids(super::ids::IdEpochType::PeerId, 1)?
                    .start;
                let mut new_peers: Vec<Peer> = region
                    .definition
                    .peers
                    .iter()
                    .filter(|p| p.store_id != task.source_store_id)
                    .cloned()
                    .collect();
                new_peers.push(Peer {
                    peer_id,
                    store_id: target_store.store_id,
                    role: PeerRole::Voter,
                    server_location: target_store.server_location.clone(),
                    raft_location: target_store.raft_location.clone(),
                });
                job_ids.push(self.change_peer(task.region_id, new_peers)?);
            }
            info!("balance region planned"; "tasks" => tasks.len(), "jobs" => job_ids.len());
        }
        Ok(BalancePlan {
            scores,
            expected_score,
            tasks,
            job_ids,
        })
    }
}

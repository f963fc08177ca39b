// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! The per-store region registry: creates and destroys region peers,
//! routes raft messages and ticks, executes the control commands the
//! coordinator addresses to this store, and resolves cross-region apply
//! effects (split activation).

pub mod index;
pub mod meta;
pub mod msg;
pub mod peer;
pub mod region;
pub mod snap;

use std::collections::HashMap;
use std::sync::Arc;

use engine_traits::{RawEngine, CF_DEFAULT, CF_TXN_DATA, CF_TXN_LOCK, CF_TXN_WRITE};
use slog_global::{info, warn};

pub use self::index::{IndexGate, IndexStatus, NoopIndexGate};
pub use self::meta::{PersistedRegion, StoreMetaManager};
pub use self::msg::{paired_callback, Callback, CmdKind, RaftCmd, WriteOp};
pub use self::peer::{ApplyEffect, RaftMessage, RegionPeer};
pub use self::region::Region;

use crate::common::meta::{
    PeerRole, RegionCmd, RegionCmdPayload, RegionDefinition, RegionEpoch, RegionState,
};
use crate::common::TrackerPtr;
use crate::error::{ErrorCode, Result, ServerError};
use crate::raft::{ConfChangeType, Message, RaftConfig};
use crate::store::snap::region_cf_range;

pub struct RaftStore<E: RawEngine> {
    store_id: u64,
    engine: E,
    meta: StoreMetaManager<E>,
    raft_config: RaftConfig,
    index_gate: Arc<dyn IndexGate>,
    peers: HashMap<u64, RegionPeer<E>>,
}

impl<E: RawEngine> RaftStore<E> {
    pub fn new(store_id: u64, engine: E, raft_config: RaftConfig) -> RaftStore<E> {
        let meta = StoreMetaManager::new(engine.clone());
        RaftStore {
            store_id,
            engine,
            meta,
            raft_config,
            index_gate: Arc::new(NoopIndexGate),
            peers: HashMap::new(),
        }
    }

    /// Installs the index subsystem's gate; call before any region peers
    /// are created so every peer consults it.
    #[must_use]
    pub fn with_index_gate(mut self, index_gate: Arc<dyn IndexGate>) -> RaftStore<E> {
        self.index_gate = index_gate;
        self
    }

    /// Rebuilds peers from persisted region metadata at store start.
    pub fn recover(&mut self) -> Result<()> {
        for persisted in self.meta.load_all_regions()? {
            if persisted.state.is_deleted() {
                continue;
            }
            let region_id = persisted.definition.region_id;
            let region = Region::new(persisted.definition, persisted.state);
            match RegionPeer::new(
                self.store_id,
                region,
                self.engine.clone(),
                self.meta.clone(),
                self.raft_config,
                self.index_gate.clone(),
            ) {
                Ok(peer) => {
                    self.peers.insert(region_id, peer);
                }
                Err(e) => {
                    warn!("skip recovering region"; "region_id" => region_id, "err" => %e);
                }
            }
        }
        Ok(())
    }

    pub fn store_id(&self) -> u64 {
        self.store_id
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn meta(&self) -> &StoreMetaManager<E> {
        &self.meta
    }

    pub fn region_ids(&self) -> Vec<u64> {
        self.peers.keys().copied().collect()
    }

    pub fn peer(&self, region_id: u64) -> Result<&RegionPeer<E>> {
        self.peers
            .get(&region_id)
            .ok_or_else(|| ServerError::region_not_found(region_id))
    }

    pub fn peer_mut(&mut self, region_id: u64) -> Result<&mut RegionPeer<E>> {
        self.peers
            .get_mut(&region_id)
            .ok_or_else(|| ServerError::region_not_found(region_id))
    }

    pub fn create_region(
        &mut self,
        definition: RegionDefinition,
        state: RegionState,
    ) -> Result<()> {
        let region_id = definition.region_id;
        if self.peers.contains_key(&region_id) {
            return Ok(());
        }
        let peer = RegionPeer::new(
            self.store_id,
            Region::new(definition, state),
            self.engine.clone(),
            self.meta.clone(),
            self.raft_config,
            self.index_gate.clone(),
        )?;
        info!("created region peer"; "store_id" => self.store_id, "region_id" => region_id);
        self.peers.insert(region_id, peer);
        Ok(())
    }

    /// Drops the peer and its metadata. With `purge`, the region's slice
    /// of every data CF goes too; without it the data stays (ownership was
    /// handed to a merge target).
    pub fn destroy_region(&mut self, region_id: u64, purge: bool) -> Result<()> {
        let peer = match self.peers.remove(&region_id) {
            Some(peer) => peer,
            None => return Ok(()),
        };
        if purge {
            let range = peer.region().range().clone();
            let mut batch = Vec::new();
            for cf in [CF_DEFAULT, CF_TXN_DATA, CF_TXN_LOCK, CF_TXN_WRITE] {
                let cf_range = region_cf_range(cf, &range);
                if !cf_range.start.is_empty() && !cf_range.end.is_empty() {
                    batch.push(engine_traits::Modify::DeleteRange(
                        cf,
                        cf_range.start,
                        cf_range.end,
                    ));
                }
            }
            self.engine.write(batch)?;
        }
        self.meta.delete_region(region_id)?;
        info!("destroyed region peer"; "store_id" => self.store_id, "region_id" => region_id, "purge" => purge);
        Ok(())
    }

    pub fn propose_write(
        &mut self,
        region_id: u64,
        epoch: &RegionEpoch,
        kind: CmdKind,
        callback: Callback,
        tracker: Option<TrackerPtr>,
    ) {
        match self.peers.get_mut(&region_id) {
            Some(peer) => peer.propose_write(epoch, kind, callback, tracker),
            None => callback(Err(ServerError::region_not_found(region_id))),
        }
    }

    pub fn handle_raft_message(&mut self, region_id: u64, message: Message) {
        if let Some(peer) = self.peers.get_mut(&region_id) {
            peer.step(message);
        }
    }

    pub fn tick_all(&mut self) {
        for peer in self.peers.values_mut() {
            peer.tick();
        }
    }

    /// Drives every peer, resolving apply effects, and returns outgoing
    /// messages for the transport to deliver.
    pub fn process_ready(&mut self) -> Vec<RaftMessage> {
        let mut messages = Vec::new();
        let mut effects = Vec::new();
        for peer in self.peers.values_mut() {
            let (peer_messages, peer_effects) = peer.on_ready();
            messages.extend(peer_messages);
            effects.extend(peer_effects);
        }
        for effect in effects {
            self.handle_apply_effect(effect);
        }
        messages
    }

    fn handle_apply_effect(&mut self, effect: ApplyEffect) {
        match effect {
            ApplyEffect::SplitActivate {
                to_region_id,
                split_key,
                end_key,
                version_after,
            } => {
                let peer = match self.peers.get_mut(&to_region_id) {
                    Some(peer) => peer,
                    None => {
                        // The pre-create cmd has not landed here yet; the
                        // coordinator retries the split task.
                        warn!(
                            "split sibling missing";
                            "store_id" => self.store_id,
                            "to_region_id" => to_region_id
                        );
                        return;
                    }
                };
                let mut definition = peer.region().definition().clone();
                definition.range.start = split_key;
                definition.range.end = end_key;
                definition.epoch.version = version_after;
                if let Err(e) = peer.update_definition(definition, RegionState::Normal) {
                    warn!("split activation failed"; "region_id" => to_region_id, "err" => %e);
                }
            }
        }
    }

    /// Executes one coordinator control command addressed to this store.
    pub fn execute_region_cmd(&mut self, cmd: &RegionCmd) -> Result<()> {
        self.meta.save_control_cmd(cmd)?;
        match &cmd.payload {
            RegionCmdPayload::CreateRegion {
                definition,
                split_from_region_id,
            } => {
                let state = if *split_from_region_id != 0 {
                    RegionState::New
                } else {
                    RegionState::Normal
                };
                self.create_region(definition.clone(), state)
            }
            RegionCmdPayload::DeleteRegion => self.destroy_region(cmd.region_id, false),
            RegionCmdPayload::Purge => self.destroy_region(cmd.region_id, true),
            RegionCmdPayload::Split {
                to_region_id,
                split_key,
            } => {
                let peer = self.peer_mut(cmd.region_id)?;
                if !peer.is_leader() {
                    // Only the leader proposes; followers see the entry.
                    return Ok(());
                }
                peer.set_state(RegionState::Splitting)?;
                let epoch = peer.region().epoch();
                let (callback, _rx) = paired_callback();
                peer.propose_write(
                    &epoch,
                    CmdKind::Split {
                        to_region_id: *to_region_id,
                        split_key: split_key.clone(),
                    },
                    callback,
                    None,
                );
                Ok(())
            }
            RegionCmdPayload::MergeSource { target_region_id } => {
                let peer = self.peer_mut(cmd.region_id)?;
                // Drain: no new writes are admitted while merging.
                peer.set_state(RegionState::Merging)?;
                info!(
                    "merge source draining";
                    "region_id" => cmd.region_id,
                    "target_region_id" => target_region_id
                );
                Ok(())
            }
            RegionCmdPayload::MergeTarget { source_region_id } => {
                let source_start = self
                    .peer(*source_region_id)?
                    .region()
                    .range()
                    .start
                    .clone();
                let peer = self.peer_mut(cmd.region_id)?;
                if !peer.is_leader() {
                    return Ok(());
                }
                let epoch = peer.region().epoch();
                let (callback, _rx) = paired_callback();
                peer.propose_write(
                    &epoch,
                    CmdKind::Merge {
                        source_region_id: *source_region_id,
                        new_start_key: source_start,
                    },
                    callback,
                    None,
                );
                Ok(())
            }
            RegionCmdPayload::ChangePeer { new_peers } => {
                let peer = self.peer_mut(cmd.region_id)?;
                if !peer.is_leader() {
                    return Ok(());
                }
                let current = peer.region().definition().peers.clone();
                // One single-peer change per command: additions first.
                let to_add = new_peers
                    .iter()
                    .find(|p| !current.iter().any(|c| c.peer_id == p.peer_id));
                if let Some(add) = to_add {
                    let change_type = match add.role {
                        PeerRole::Voter => ConfChangeType::AddNode,
                        PeerRole::Learner => ConfChangeType::AddLearner,
                    };
                    peer.propose_change_peer(change_type, add.clone())?;
                    return Ok(());
                }
                let to_remove = current
                    .iter()
                    .find(|c| !new_peers.iter().any(|p| p.peer_id == c.peer_id));
                if let Some(remove) = to_remove {
                    peer.propose_change_peer(ConfChangeType::RemoveNode, remove.clone())?;
                }
                Ok(())
            }
            RegionCmdPayload::TransferLeader { to_peer_id } => {
                let peer = self.peer_mut(cmd.region_id)?;
                if !peer.is_leader() {
                    return Ok(());
                }
                peer.transfer_leader(*to_peer_id, false)
            }
            RegionCmdPayload::Snapshot => self.peer_mut(cmd.region_id)?.compact_log(),
            RegionCmdPayload::UpdateDefinition { definition } => {
                let peer = self.peer_mut(cmd.region_id)?;
                let state = peer.region().state();
                peer.update_definition(definition.clone(), state)
            }
        }
    }

    /// `(cmd_type, ok)` summary used by heartbeat acknowledgements.
    pub fn execute_region_cmds(&mut self, cmds: &[RegionCmd]) -> Vec<(u64, Result<()>)> {
        cmds.iter()
            .map(|cmd| (cmd.cmd_id, self.execute_region_cmd(cmd)))
            .collect()
    }
}

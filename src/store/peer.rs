// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! One replica of one region: the raft node, the local region view, and
//! the apply logic turning committed entries into engine writes. Apply
//! re-validates the epoch recorded at propose time, so an entry ordered
//! behind a split or membership change fails instead of corrupting the
//! region.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use engine_traits::{Iterable, Peekable, RawEngine, CF_DEFAULT};
use slog_global::{error, info, warn};

use crate::codec;
use crate::common::constant::INDEX_BACKGROUND_TASK_LIMIT;
use crate::common::meta::{
    Location, Peer, PeerRole, RegionEpoch, RegionState,
};
use crate::common::TrackerPtr;
use crate::error::{ErrorCode, Result, ServerError};
use crate::metrics::RAFT_APPLY_HISTOGRAM;
use crate::raft::{
    ConfChange, ConfChangeType, EntryPayload, Message, RaftConfig, RaftNode,
};
use crate::server::helper::validate_cluster_writable;
use crate::store::index::{validate_index_region, IndexGate};
use crate::store::meta::{PersistedRegion, RegionChangeRecord, StoreMetaManager};
use crate::store::msg::{Callback, CmdKind, PendingCmd, RaftCmd};
use crate::store::region::Region;
use crate::store::snap::{apply_region_snapshot, build_region_snapshot, RegionSnapshotPayload};

/// An outgoing raft message, addressed by peer id; the store resolves the
/// peer to its host store.
#[derive(Debug)]
pub struct RaftMessage {
    pub region_id: u64,
    pub to_peer: u64,
    pub message: Message,
}

/// Side effects an apply produces that reach beyond this peer; the owning
/// store executes them after the ready loop.
#[derive(Debug)]
pub enum ApplyEffect {
    /// Activate the pre-created sibling created by a split.
    SplitActivate {
        to_region_id: u64,
        split_key: Vec<u8>,
        end_key: Vec<u8>,
        version_after: u64,
    },
}

pub struct RegionPeer<E: RawEngine> {
    store_id: u64,
    peer_id: u64,
    region: Region,
    pub(crate) node: RaftNode,
    engine: E,
    meta: StoreMetaManager<E>,
    index_gate: Arc<dyn IndexGate>,
    pending_cmds: VecDeque<PendingCmd>,
    /// Set when an apply failed; the replica stops applying and waits for
    /// a snapshot.
    failed: bool,
}

impl<E: RawEngine> RegionPeer<E> {
    pub fn new(
        store_id: u64,
        region: Region,
        engine: E,
        meta: StoreMetaManager<E>,
        raft_config: RaftConfig,
        index_gate: Arc<dyn IndexGate>,
    ) -> Result<RegionPeer<E>> {
        let peer = region
            .definition()
            .peer_on_store(store_id)
            .ok_or_else(|| {
                ServerError::new(
                    ErrorCode::RegionNotFound,
                    format!(
                        "store {} hosts no peer of region {}",
                        store_id,
                        region.id()
                    ),
                )
            })?;
        let peer_id = peer.peer_id;
        let voters = region
            .definition()
            .peers
            .iter()
            .filter(|p| p.role == PeerRole::Voter)
            .map(|p| p.peer_id)
            .collect();
        let learners = region
            .definition()
            .peers
            .iter()
            .filter(|p| p.role == PeerRole::Learner)
            .map(|p| p.peer_id)
            .collect();
        let mut node = RaftNode::new_with_learners(peer_id, voters, learners, raft_config);
        if let Some(hs) = meta.load_hard_state(region.id())? {
            node.load_hard_state(hs);
        }
        meta.save_region(&PersistedRegion {
            definition: region.definition().clone(),
            state: region.state(),
        })?;
        Ok(RegionPeer {
            store_id,
            peer_id,
            region,
            node,
            engine,
            meta,
            index_gate,
            pending_cmds: VecDeque::new(),
            failed: false,
        })
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn peer_id(&self) -> u64 {
        self.peer_id
    }

    pub fn is_leader(&self) -> bool {
        self.node.is_leader()
    }

    pub fn leader_location(&self) -> Option<Location> {
        let leader_id = self.node.leader_id()?;
        self.region
            .definition()
            .peers
            .iter()
            .find(|p| p.peer_id == leader_id)
            .map(|p| p.server_location.clone())
    }

    fn check_not_failed(&self) -> Result<()> {
        if self.failed {
            return Err(ServerError::new(
                ErrorCode::Internal,
                format!("region {} replica stopped after apply failure", self.region.id()),
            ));
        }
        Ok(())
    }

    fn check_leader(&self) -> Result<()> {
        if self.is_leader() {
            return Ok(());
        }
        Err(ServerError::not_leader(
            self.region.id(),
            self.leader_location(),
        ))
    }

    /// INDEX/DOCUMENT regions answer for their index subsystem as well;
    /// STORE regions pass through.
    fn check_index_gates(&self, incoming_count: u64) -> Result<()> {
        validate_index_region(
            self.index_gate.as_ref(),
            self.region.definition(),
            incoming_count,
            INDEX_BACKGROUND_TASK_LIMIT,
        )
    }

    /// The standard validation ladder for data requests: epoch, range,
    /// state, index gates, leadership.
    pub fn validate_data_request(
        &self,
        req_epoch: &RegionEpoch,
        keys: &[&[u8]],
    ) -> Result<()> {
        self.check_not_failed()?;
        self.region.check_epoch(req_epoch)?;
        self.region.check_keys_in_range(keys)?;
        self.region.check_serving()?;
        self.check_index_gates(0)?;
        self.check_leader()
    }

    // Raw reads, CF `default`, straight off an engine snapshot.

    pub fn get(&self, req_epoch: &RegionEpoch, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.validate_data_request(req_epoch, &[key])?;
        Ok(self.engine.snapshot().get_value_cf(CF_DEFAULT, key)?)
    }

    pub fn batch_get(
        &self,
        req_epoch: &RegionEpoch,
        keys: &[Vec<u8>],
    ) -> Result<Vec<(Vec<u8>, Option<Vec<u8>>)>> {
        let refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
        self.validate_data_request(req_epoch, &refs)?;
        let snapshot = self.engine.snapshot();
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push((key.clone(), snapshot.get_value_cf(CF_DEFAULT, key)?));
        }
        Ok(out)
    }

    pub fn scan(
        &self,
        req_epoch: &RegionEpoch,
        range: &engine_traits::Range,
        limit: usize,
        key_only: bool,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.check_not_failed()?;
        self.region.check_epoch(req_epoch)?;
        if range.start.is_empty() || range.end.is_empty() {
            return Err(ServerError::new(ErrorCode::KeyEmpty, "empty scan bound"));
        }
        if range.start > range.end {
            return Err(ServerError::new(
                ErrorCode::RangeInvalid,
                "scan start after end",
            ));
        }
        self.region.check_range_in_range(range)?;
        self.region.check_serving()?;
        self.check_index_gates(0)?;
        self.check_leader()?;
        Ok(self
            .engine
            .snapshot()
            .scan_cf(CF_DEFAULT, &range.start, &range.end, limit, key_only)?)
    }

    /// A read snapshot for the transactional layer, behind the same
    /// validation ladder as raw reads.
    pub fn txn_snapshot(&self, req_epoch: &RegionEpoch) -> Result<E::Snap> {
        self.check_not_failed()?;
        self.region.check_epoch(req_epoch)?;
        self.region.check_serving()?;
        self.check_leader()?;
        Ok(self.engine.snapshot())
    }

    /// Proposes a write command. The callback fires after the entry
    /// applies (or fails validation at apply time).
    pub fn propose_write(
        &mut self,
        req_epoch: &RegionEpoch,
        kind: CmdKind,
        callback: Callback,
        tracker: Option<TrackerPtr>,
    ) {
        if let Err(e) = self.pre_propose(req_epoch, &kind) {
            callback(Err(e));
            return;
        }
        let cmd = RaftCmd {
            region_id: self.region.id(),
            epoch: self.region.epoch(),
            kind,
        };
        let data = match codec::encode_default(&cmd) {
            Ok(data) => data,
            Err(e) => {
                callback(Err(e.into()));
                return;
            }
        };
        match self.node.propose(data) {
            Ok(index) => {
                self.pending_cmds.push_back(PendingCmd {
                    index,
                    term: self.node.term(),
                    callback,
                    tracker,
                    proposed_at: Instant::now(),
                });
            }
            Err(e) => {
                callback(Err(self.map_raft_error(e)));
            }
        }
    }

    fn pre_propose(&self, req_epoch: &RegionEpoch, kind: &CmdKind) -> Result<()> {
        self.check_not_failed()?;
        // Cluster read-only is the first rung for data writes; control
        // cmds keep flowing so maintenance itself is not wedged.
        if let CmdKind::Write(_) = kind {
            let (read_only, reason) = self.meta.force_read_only()?;
            validate_cluster_writable(read_only, &reason)?;
        }
        self.region.check_epoch(req_epoch)?;
        match kind {
            CmdKind::Write(ops) => {
                // Transactional CFs carry encoded keys that are validated
                // upstream against the raw range; only check raw-CF keys.
                use crate::store::msg::WriteOp;
                let raw_keys: Vec<&[u8]> = ops
                    .iter()
                    .filter_map(|op| match op {
                        WriteOp::Put { cf, key, .. } | WriteOp::Delete { cf, key }
                            if cf == CF_DEFAULT =>
                        {
                            Some(key.as_slice())
                        }
                        WriteOp::DeleteRange { cf, start, .. } if cf == CF_DEFAULT => {
                            Some(start.as_slice())
                        }
                        _ => None,
                    })
                    .collect();
                self.region.check_keys_in_range(&raw_keys)?;
                self.region.check_serving()?;
                let incoming = ops
                    .iter()
                    .filter(|op| matches!(op, WriteOp::Put { .. }))
                    .count() as u64;
                self.check_index_gates(incoming)?;
            }
            CmdKind::Split { split_key, .. } => {
                let range = self.region.range();
                if split_key.as_slice() <= range.start.as_slice()
                    || split_key.as_slice() >= range.end.as_slice()
                {
                    return Err(ServerError::new(
                        ErrorCode::IllegalParameters,
                        "split key outside region range",
                    ));
                }
                // The control path parks the region in Splitting before
                // proposing the split entry itself.
                if self.region.state() != RegionState::Splitting {
                    self.region.check_serving()?;
                }
            }
            CmdKind::Merge { .. } => {
                self.region.check_serving()?;
            }
        }
        self.check_leader()
    }

    fn map_raft_error(&self, e: crate::raft::Error) -> ServerError {
        match e {
            crate::raft::Error::NotLeader(_) => {
                ServerError::not_leader(self.region.id(), self.leader_location())
            }
            other => ServerError::new(ErrorCode::Internal, other.to_string()),
        }
    }

    /// Proposes a single-peer membership change; rejected mid-split/merge.
    pub fn propose_change_peer(
        &mut self,
        change_type: ConfChangeType,
        peer: Peer,
    ) -> Result<u64> {
        self.check_not_failed()?;
        if matches!(
            self.region.state(),
            RegionState::Splitting | RegionState::Merging
        ) {
            return Err(ServerError::new(
                ErrorCode::RegionUnavailable,
                format!("region {} is {:?}", self.region.id(), self.region.state()),
            ));
        }
        self.check_leader()?;
        let cc = ConfChange {
            change_type,
            peer_id: peer.peer_id,
            context: codec::encode_default(&peer)?,
        };
        self.node
            .propose_conf_change(cc)
            .map_err(|e| self.map_raft_error(e))
    }

    pub fn transfer_leader(&mut self, to_peer_id: u64, force: bool) -> Result<()> {
        self.check_not_failed()?;
        self.check_leader()?;
        self.node
            .transfer_leader(to_peer_id, force)
            .map_err(|e| self.map_raft_error(e))
    }

    pub fn tick(&mut self) {
        self.node.tick();
    }

    pub fn step(&mut self, message: Message) {
        self.node.step(message);
    }

    pub fn campaign(&mut self) {
        self.node.campaign();
    }

    /// Compacts the raft log behind a fresh snapshot of the region's data.
    pub fn compact_log(&mut self) -> Result<()> {
        let payload = build_region_snapshot(
            &self.engine,
            &PersistedRegion {
                definition: self.region.definition().clone(),
                state: self.region.state(),
            },
        )?;
        let applied = self.node.log.applied;
        self.node
            .compact(applied, payload.encode()?)
            .map_err(|e| ServerError::new(ErrorCode::Internal, e.to_string()))?;
        Ok(())
    }

    /// Drives the node: installs a pending snapshot, applies committed
    /// entries, persists the hard state, and returns outgoing messages
    /// plus cross-region effects.
    pub fn on_ready(&mut self) -> (Vec<RaftMessage>, Vec<ApplyEffect>) {
        let mut effects = Vec::new();
        if !self.node.has_ready() {
            return (vec![], effects);
        }
        let ready = self.node.ready();

        if let Some(snapshot) = &ready.snapshot {
            match self.install_snapshot(&snapshot.data) {
                Ok(()) => self.failed = false,
                Err(e) => {
                    error!("snapshot install failed"; "region_id" => self.region.id(), "err" => %e);
                    self.failed = true;
                }
            }
        }

        if !self.failed {
            for entry in &ready.committed_entries {
                let start = Instant::now();
                let result = match &entry.payload {
                    EntryPayload::Noop => Ok(()),
                    EntryPayload::Normal(data) => {
                        self.apply_cmd(data, &mut effects)
                    }
                    EntryPayload::ConfChange(cc) => self.apply_conf_change(cc.clone()),
                };
                RAFT_APPLY_HISTOGRAM
                    .with_label_values(&["store"])
                    .observe(start.elapsed().as_secs_f64());
                match result {
                    Ok(()) => self.finish_pending(entry.index, entry.term, Ok(())),
                    Err(e) => {
                        // Validation failures answer the caller; engine
                        // failures are fatal to the replica.
                        if e.code == ErrorCode::Internal
                            || e.code == ErrorCode::EngineException
                            || e.code == ErrorCode::EngineCommit
                        {
                            error!(
                                "apply failed, stopping replica";
                                "region_id" => self.region.id(),
                                "index" => entry.index,
                                "err" => %e
                            );
                            self.failed = true;
                            self.finish_pending(entry.index, entry.term, Err(e));
                            break;
                        }
                        self.finish_pending(entry.index, entry.term, Err(e));
                    }
                }
            }
        }

        if let Err(e) = self
            .meta
            .save_hard_state(self.region.id(), &self.node.hard_state())
        {
            warn!("persist hard state failed"; "region_id" => self.region.id(), "err" => %e);
        }

        let messages = ready
            .messages
            .into_iter()
            .map(|message| RaftMessage {
                region_id: self.region.id(),
                to_peer: message.to,
                message,
            })
            .collect();
        (messages, effects)
    }

    fn finish_pending(&mut self, index: u64, term: u64, result: Result<()>) {
        while let Some(front) = self.pending_cmds.front() {
            if front.index > index {
                break;
            }
            let pending = match self.pending_cmds.pop_front() {
                Some(p) => p,
                None => break,
            };
            if pending.index == index && pending.term == term {
                if let Some(tracker) = &pending.tracker {
                    tracker
                        .set_raft_commit(pending.proposed_at.elapsed().as_nanos() as u64);
                }
                (pending.callback)(result);
                return;
            }
            // Superseded by a different entry at this index: the proposal
            // was lost to a leadership change.
            (pending.callback)(Err(ServerError::not_leader(
                self.region.id(),
                self.leader_location(),
            )));
        }
        // No pending command (follower replica): nothing to answer.
        if let Err(e) = result {
            if e.code != ErrorCode::EpochNotMatch {
                warn!("apply error without waiter"; "region_id" => self.region.id(), "err" => %e);
            }
        }
    }

    fn apply_cmd(&mut self, data: &[u8], effects: &mut Vec<ApplyEffect>) -> Result<()> {
        let cmd: RaftCmd = codec::decode(data)?;
        // The epoch seen at propose time must still hold.
        if cmd.epoch != self.region.epoch() {
            return Err(ServerError::new(
                ErrorCode::EpochNotMatch,
                format!(
                    "stale cmd epoch {:?}, region {} now {:?}",
                    cmd.epoch,
                    self.region.id(),
                    self.region.epoch()
                ),
            )
            .with_region(self.region.definition().clone()));
        }
        match cmd.kind {
            CmdKind::Write(ops) => {
                let start = Instant::now();
                let mut batch = Vec::with_capacity(ops.len());
                for op in ops {
                    batch.push(op.into_modify()?);
                }
                self.engine
                    .write(batch)
                    .map_err(ServerError::from)?;
                let elapsed = start.elapsed().as_nanos() as u64;
                if let Some(pending) = self.pending_cmds.front() {
                    if let Some(tracker) = &pending.tracker {
                        tracker.set_store_write(elapsed);
                    }
                }
                Ok(())
            }
            CmdKind::Split {
                to_region_id,
                split_key,
            } => self.apply_split(to_region_id, split_key, effects),
            CmdKind::Merge {
                source_region_id,
                new_start_key,
            } => self.apply_merge(source_region_id, new_start_key),
        }
    }

    fn apply_split(
        &mut self,
        to_region_id: u64,
        split_key: Vec<u8>,
        effects: &mut Vec<ApplyEffect>,
    ) -> Result<()> {
        let old_end = self.region.range().end.clone();
        let old_version = self.region.epoch().version;
        {
            let definition = self.region.definition_mut();
            definition.range.end = split_key.clone();
            definition.epoch.version += 1;
        }
        self.region.set_state(RegionState::Normal);
        self.persist_region("split-shrink")?;
        info!(
            "region split applied";
            "region_id" => self.region.id(),
            "to_region_id" => to_region_id,
            "split_key" => hex::encode_upper(&split_key)
        );
        effects.push(ApplyEffect::SplitActivate {
            to_region_id,
            split_key,
            end_key: old_end,
            version_after: old_version + 1,
        });
        Ok(())
    }

    fn apply_merge(&mut self, source_region_id: u64, new_start_key: Vec<u8>) -> Result<()> {
        {
            let definition = self.region.definition_mut();
            definition.range.start = new_start_key;
            definition.epoch.version += 1;
        }
        self.persist_region("merge-absorb")?;
        info!(
            "region merge applied";
            "region_id" => self.region.id(),
            "source_region_id" => source_region_id
        );
        Ok(())
    }

    fn apply_conf_change(&mut self, cc: ConfChange) -> Result<()> {
        let peer: Peer = codec::decode(&cc.context)?;
        self.node.apply_conf_change(cc.clone());
        {
            let definition = self.region.definition_mut();
            match cc.change_type {
                ConfChangeType::AddNode => {
                    definition.peers.retain(|p| p.peer_id != peer.peer_id);
                    definition.peers.push(Peer {
                        role: PeerRole::Voter,
                        ..peer
                    });
                }
                ConfChangeType::AddLearner => {
                    definition.peers.retain(|p| p.peer_id != peer.peer_id);
                    definition.peers.push(Peer {
                        role: PeerRole::Learner,
                        ..peer
                    });
                }
                ConfChangeType::RemoveNode => {
                    definition.peers.retain(|p| p.peer_id != peer.peer_id);
                }
            }
            definition.epoch.conf_version += 1;
        }
        self.persist_region("change-peer")?;
        Ok(())
    }

    fn persist_region(&mut self, event: &str) -> Result<()> {
        self.meta.save_region(&PersistedRegion {
            definition: self.region.definition().clone(),
            state: self.region.state(),
        })?;
        self.meta.record_region_change(&RegionChangeRecord {
            region_id: self.region.id(),
            event: event.to_owned(),
            epoch_after: self.region.epoch(),
        })?;
        Ok(())
    }

    fn install_snapshot(&mut self, data: &[u8]) -> Result<()> {
        let payload = RegionSnapshotPayload::decode(data)?;
        apply_region_snapshot(&self.engine, &payload)?;
        // The manifest is authoritative for range, epoch and membership.
        self.region = Region::new(
            payload.region_meta.definition.clone(),
            payload.region_meta.state,
        );
        self.persist_region("snapshot-install")?;
        info!(
            "installed region snapshot";
            "region_id" => self.region.id(),
            "epoch" => ?self.region.epoch()
        );
        Ok(())
    }

    /// Updates the local region state (driven by coordinator cmds).
    pub fn set_state(&mut self, state: RegionState) -> Result<()> {
        self.region.set_state(state);
        self.persist_region("state-change")
    }

    /// Applies a full definition pushed by the coordinator (used by the
    /// pre-create split path and definition updates).
    pub fn update_definition(
        &mut self,
        definition: crate::common::meta::RegionDefinition,
        state: RegionState,
    ) -> Result<()> {
        self.region = Region::new(definition, state);
        self.persist_region("update-definition")
    }

    pub fn store_id(&self) -> u64 {
        self.store_id
    }
}

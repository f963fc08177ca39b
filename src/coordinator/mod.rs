// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! The cluster control plane. All authoritative state lives in read-mostly
//! maps written exclusively by [`CoordinatorControl::apply_increment`],
//! which consumes [`increment::MetaIncrement`] batches committed through
//! the coordinator's own replicated log (region id 0). Service handlers
//! validate, draft an increment, and submit it; they never mutate state
//! directly.

pub mod balance;
pub mod ids;
pub mod increment;
pub mod job;
pub mod kv;
pub mod lease;
pub mod region;
pub mod safe_point;
pub mod watch;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dingo_util::safe_map::SafeMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use slog_global::{info, warn};

use self::ids::{IdEpochType, IdRange};
use self::increment::{MetaDelta, MetaIncrement};
use self::job::{Job, JobKind, JobStatus};
use self::kv::{KvIndex, KvRev};
use self::lease::{now_ms, Lease};
use self::watch::Watcher;
use crate::codec;
use crate::common::constant::{self, JOB_ARCHIVE_CAPACITY, STORE_HEARTBEAT_TIMEOUT_MS};
use crate::common::meta::{
    Executor, ExecutorUser, Location, RegionCmd, RegionCmdStatus, RegionDefinition,
    RegionMetrics, RegionState, Store, StoreMetrics, StoreState,
};
use crate::config::CoordinatorConfig;
use crate::error::{ErrorCode, Result, ServerError};
use crate::metrics::COORDINATOR_JOB_COUNTER;
use crate::raft::{EntryPayload, RaftConfig, RaftNode};

/// Coordinator-side view of a region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionInternal {
    pub definition: RegionDefinition,
    pub state: RegionState,
    pub leader_store_id: u64,
    pub create_ts_ms: u64,
}

/// Liveness and governance summary returned by Hello and heartbeats.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterState {
    pub cluster_read_only: bool,
    pub read_only_reason: String,
    pub gc_stop: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeartbeatResponse {
    pub stores: Vec<Store>,
    pub region_cmds: Vec<RegionCmd>,
    pub cluster_state: ClusterState,
}

pub struct CoordinatorControl {
    pub(crate) regions: SafeMap<u64, RegionInternal>,
    pub(crate) stores: SafeMap<u64, Store>,
    pub(crate) executors: SafeMap<String, Executor>,
    pub(crate) executor_users: SafeMap<String, ExecutorUser>,
    pub(crate) jobs: SafeMap<u64, Job>,
    pub(crate) job_archive: Mutex<VecDeque<Job>>,
    pub(crate) store_operations: SafeMap<u64, Vec<RegionCmd>>,
    pub(crate) store_metrics: SafeMap<u64, StoreMetrics>,
    pub(crate) region_metrics: SafeMap<u64, RegionMetrics>,
    pub(crate) kv_index_map: SafeMap<Vec<u8>, KvIndex>,
    pub(crate) kv_rev_map: SafeMap<Vec<u8>, KvRev>,
    pub(crate) leases: SafeMap<u64, Lease>,
    pub(crate) watches: SafeMap<Vec<u8>, Vec<Watcher>>,
    pub(crate) id_epochs: SafeMap<IdEpochType, u64>,
    pub(crate) tenant_safe_points: SafeMap<u64, u64>,
    pub(crate) gc_safe_point: AtomicU64,
    pub(crate) resolve_lock_safe_point: AtomicU64,
    pub(crate) gc_stop: AtomicBool,
    pub(crate) force_read_only: Mutex<(bool, String)>,
    pub(crate) registrations: Mutex<HashMap<safe_point::RegistrationKind, safe_point::Registration>>,

    /// The coordinator group's own raft node (region id 0).
    meta_node: Mutex<RaftNode>,
    /// Serializes draft-then-submit sections that read a counter they are
    /// about to advance.
    pub(crate) kv_submit_lock: Mutex<()>,
    pub(crate) id_alloc_lock: Mutex<()>,
    watch_id_alloc: AtomicU64,
    pub(crate) config: CoordinatorConfig,
}

impl CoordinatorControl {
    pub fn new(config: CoordinatorConfig) -> CoordinatorControl {
        let mut meta_node = RaftNode::new(1, vec![1], RaftConfig::default());
        // A single-voter group elects itself immediately; multi-replica
        // deployments join the group before serving.
        meta_node.campaign();
        let control = CoordinatorControl {
            regions: SafeMap::new(),
            stores: SafeMap::new(),
            executors: SafeMap::new(),
            executor_users: SafeMap::new(),
            jobs: SafeMap::new(),
            job_archive: Mutex::new(VecDeque::new()),
            store_operations: SafeMap::new(),
            store_metrics: SafeMap::new(),
            region_metrics: SafeMap::new(),
            kv_index_map: SafeMap::new(),
            kv_rev_map: SafeMap::new(),
            leases: SafeMap::new(),
            watches: SafeMap::new(),
            id_epochs: SafeMap::new(),
            tenant_safe_points: SafeMap::new(),
            gc_safe_point: AtomicU64::new(0),
            resolve_lock_safe_point: AtomicU64::new(0),
            gc_stop: AtomicBool::new(false),
            force_read_only: Mutex::new((false, String::new())),
            registrations: Mutex::new(HashMap::new()),
            meta_node: Mutex::new(meta_node),
            kv_submit_lock: Mutex::new(()),
            id_alloc_lock: Mutex::new(()),
            watch_id_alloc: AtomicU64::new(1),
            config,
        };
        control.regions.init(constant::META_REGION_ID as usize + 1024);
        control
    }

    pub fn is_leader(&self) -> bool {
        self.meta_node.lock().is_leader()
    }

    pub fn hello(&self) -> ClusterState {
        self.cluster_state()
    }

    pub fn cluster_state(&self) -> ClusterState {
        let (forced, reason) = self.force_read_only.lock().clone();
        let store_read_only = self
            .stores
            .get_all_values(|s| s.is_read_only && s.state == StoreState::Normal);
        let cluster_read_only = forced || !store_read_only.is_empty();
        let read_only_reason = if forced {
            reason
        } else if let Some(store) = store_read_only.first() {
            format!("store {} reports read-only", store.store_id)
        } else {
            String::new()
        };
        ClusterState {
            cluster_read_only,
            read_only_reason,
            gc_stop: self.gc_stop.load(Ordering::Acquire),
        }
    }

    /// Proposes an increment through the coordinator group and applies the
    /// committed entries in log order.
    pub(crate) fn submit_increment(&self, increment: MetaIncrement) -> Result<()> {
        let data = codec::encode_default(&increment)?;
        let mut node = self.meta_node.lock();
        node.propose(data).map_err(|e| match e {
            crate::raft::Error::NotLeader(_) => ServerError::new(
                ErrorCode::NotLeader,
                "not the coordinator leader",
            ),
            other => ServerError::new(ErrorCode::Internal, other.to_string()),
        })?;
        loop {
            let ready = node.ready();
            for entry in ready.committed_entries {
                if let EntryPayload::Normal(data) = entry.payload {
                    match codec::decode::<MetaIncrement>(&data) {
                        Ok(committed) => self.apply_increment(&committed),
                        Err(e) => warn!("undecodable meta increment"; "err" => %e),
                    }
                }
            }
            if !node.has_ready() {
                break;
            }
        }
        Ok(())
    }

    /// The single writer of coordinator state.
    pub(crate) fn apply_increment(&self, increment: &MetaIncrement) {
        let mut jobs_changed = false;
        for delta in &increment.deltas {
            match delta {
                MetaDelta::RegionUpsert(region) => {
                    self.regions.put(region.definition.region_id, region.clone());
                }
                MetaDelta::RegionDelete(region_id) => {
                    self.regions.erase(region_id);
                    self.region_metrics.erase(region_id);
                }
                MetaDelta::StoreUpsert(store) => {
                    self.stores.put(store.store_id, store.clone());
                }
                MetaDelta::StoreDelete(store_id) => {
                    self.stores.erase(store_id);
                    self.store_metrics.erase(store_id);
                }
                MetaDelta::ExecutorUpsert(executor) => {
                    self.executors.put(executor.executor_id.clone(), executor.clone());
                }
                MetaDelta::ExecutorDelete(executor_id) => {
                    self.executors.erase(executor_id);
                }
                MetaDelta::ExecutorUserUpsert(user) => {
                    self.executor_users.put(user.user.clone(), user.clone());
                }
                MetaDelta::JobUpsert(job) => {
                    self.jobs.put(job.job_id, job.clone());
                    jobs_changed = true;
                }
                MetaDelta::JobCmdStatus {
                    job_id,
                    cmd_id,
                    status,
                    error,
                    retryable,
                } => {
                    if self.apply_job_cmd_status(*job_id, *cmd_id, *status, error.clone(), *retryable)
                    {
                        jobs_changed = true;
                    }
                }
                MetaDelta::StoreMetricsUpsert(metrics) => {
                    self.store_metrics.put(metrics.store_id, metrics.clone());
                }
                MetaDelta::RegionMetricsUpsert(metrics) => {
                    self.region_metrics.put(metrics.region_id, metrics.clone());
                }
                MetaDelta::RegionLeader {
                    region_id,
                    leader_store_id,
                } => {
                    if let Some(mut region) = self.regions.get(region_id) {
                        if region.leader_store_id != *leader_store_id {
                            region.leader_store_id = *leader_store_id;
                            self.regions.put(*region_id, region);
                        }
                    }
                }
                MetaDelta::IdAlloc { id_type, count } => {
                    let current = self.id_epochs.get(id_type).unwrap_or(0);
                    self.id_epochs.put(*id_type, current + count);
                }
                MetaDelta::KvPut {
                    key,
                    op_revision,
                    ignore_lease,
                    lease_id,
                    ignore_value,
                    value,
                } => {
                    self.kv_put_apply(
                        key,
                        *op_revision,
                        *ignore_lease,
                        *lease_id,
                        *ignore_value,
                        value,
                    );
                }
                MetaDelta::KvDelete { key, op_revision } => {
                    self.kv_delete_apply(key, *op_revision);
                }
                MetaDelta::KvCompact { revision } => {
                    self.kv_compact_apply(*revision);
                }
                MetaDelta::LeaseGrant(lease) => {
                    self.leases.put(lease.lease_id, lease.clone());
                }
                MetaDelta::LeaseRevoke(lease_id) => {
                    self.leases.erase(lease_id);
                }
                MetaDelta::LeaseRenew { lease_id, expire_ms } => {
                    if let Some(mut lease) = self.leases.get(lease_id) {
                        lease.expire_ms = *expire_ms;
                        self.leases.put(*lease_id, lease);
                    }
                }
                MetaDelta::LeaseBindKey { lease_id, key } => {
                    if let Some(mut lease) = self.leases.get(lease_id) {
                        lease.keys.insert(key.clone());
                        self.leases.put(*lease_id, lease);
                    }
                }
                MetaDelta::LeaseUnbindKey { lease_id, key } => {
                    if let Some(mut lease) = self.leases.get(lease_id) {
                        lease.keys.remove(key);
                        self.leases.put(*lease_id, lease);
                    }
                }
                MetaDelta::GcSafePoint {
                    safe_point,
                    tenant_safe_points,
                    resolve_lock_safe_point,
                } => {
                    self.apply_gc_safe_point(
                        *safe_point,
                        tenant_safe_points,
                        *resolve_lock_safe_point,
                    );
                }
                MetaDelta::GcStop(stop) => {
                    self.gc_stop.store(*stop, Ordering::Release);
                }
                MetaDelta::ForceReadOnly { on, reason } => {
                    *self.force_read_only.lock() = (*on, reason.clone());
                }
            }
        }
        if jobs_changed {
            self.refresh_store_operations();
        }
    }

    fn apply_job_cmd_status(
        &self,
        job_id: u64,
        cmd_id: u64,
        status: RegionCmdStatus,
        error: Option<String>,
        retryable: bool,
    ) -> bool {
        let mut job = match self.jobs.get(&job_id) {
            Some(job) => job,
            None => return false,
        };
        if !job.update_cmd_status(cmd_id, status, error, retryable) {
            return false;
        }
        if job.is_finished() {
            let outcome = match job.status {
                JobStatus::Done => {
                    self.finalize_job(&job.kind);
                    "done"
                }
                _ => "failed",
            };
            COORDINATOR_JOB_COUNTER.with_label_values(&[outcome]).inc();
            info!("job finished"; "job_id" => job_id, "outcome" => outcome);
            self.jobs.erase(&job_id);
            let mut archive = self.job_archive.lock();
            if archive.len() >= JOB_ARCHIVE_CAPACITY {
                archive.pop_front();
            }
            archive.push_back(job);
        } else {
            self.jobs.put(job_id, job);
        }
        true
    }

    /// Rebuilds the pending-cmd view per store from the active jobs'
    /// current tasks.
    fn refresh_store_operations(&self) {
        let mut pending: HashMap<u64, Vec<RegionCmd>> = HashMap::new();
        for job in self.jobs.get_all_values(|j| !j.is_finished()) {
            for cmd in job.current_cmds() {
                if cmd.status != RegionCmdStatus::Done {
                    pending.entry(cmd.store_id).or_default().push(cmd.clone());
                }
            }
        }
        for list in pending.values_mut() {
            list.sort_by_key(|c| c.cmd_id);
        }
        self.store_operations.clear();
        let (keys, values): (Vec<u64>, Vec<Vec<RegionCmd>>) = pending.into_iter().unzip();
        self.store_operations.multi_put(keys, values);
    }

    /// Job completion updates to the authoritative maps.
    fn finalize_job(&self, kind: &JobKind) {
        match kind {
            JobKind::CreateRegion { region_id } => {
                if let Some(mut region) = self.regions.get(region_id) {
                    region.state = RegionState::Normal;
                    self.regions.put(*region_id, region);
                }
            }
            JobKind::DropRegion { region_id, permanent } => {
                if *permanent {
                    self.regions.erase(region_id);
                    self.region_metrics.erase(region_id);
                } else if let Some(mut region) = self.regions.get(region_id) {
                    region.state = RegionState::Deleted;
                    self.regions.put(*region_id, region);
                }
            }
            JobKind::Split {
                from_region_id,
                to_region_id,
                split_key,
            } => {
                if let Some(mut from) = self.regions.get(from_region_id) {
                    let old_end = from.definition.range.end.clone();
                    let new_version = from.definition.epoch.version + 1;
                    from.definition.range.end = split_key.clone();
                    from.definition.epoch.version = new_version;
                    from.state = RegionState::Normal;
                    self.regions.put(*from_region_id, from.clone());
                    if let Some(mut to) = self.regions.get(to_region_id) {
                        to.definition.range.start = split_key.clone();
                        to.definition.range.end = old_end;
                        to.definition.epoch.version = new_version;
                        to.state = RegionState::Normal;
                        self.regions.put(*to_region_id, to);
                    }
                }
            }
            JobKind::Merge {
                source_region_id,
                target_region_id,
            } => {
                if let Some(source) = self.regions.get(source_region_id) {
                    if let Some(mut target) = self.regions.get(target_region_id) {
                        target.definition.range.start = source.definition.range.start.clone();
                        target.definition.epoch.version += 1;
                        target.state = RegionState::Normal;
                        self.regions.put(*target_region_id, target);
                    }
                    self.regions.erase(source_region_id);
                    self.region_metrics.erase(source_region_id);
                }
            }
            JobKind::ChangePeer {
                region_id,
                new_definition,
            } => {
                if let Some(mut region) = self.regions.get(region_id) {
                    region.definition = new_definition.clone();
                    region.state = RegionState::Normal;
                    self.regions.put(*region_id, region);
                }
            }
            JobKind::TransferLeader {
                region_id,
                to_store_id,
            } => {
                if let Some(mut region) = self.regions.get(region_id) {
                    region.leader_store_id = *to_store_id;
                    self.regions.put(*region_id, region);
                }
            }
        }
    }

    /// Reserves a contiguous id block; every call advances the epoch
    /// through the replicated log.
    pub fn create_ids(&self, id_type: IdEpochType, count: u64) -> Result<IdRange> {
        if count == 0 || count > self.config.max_create_id_count {
            return Err(ServerError::new(
                ErrorCode::IllegalParameters,
                format!(
                    "id count {} outside (0, {}]",
                    count, self.config.max_create_id_count
                ),
            ));
        }
        let _serial = self.id_alloc_lock.lock();
        let current = self.id_epochs.get(&id_type).unwrap_or(0);
        self.submit_increment(MetaIncrement {
            deltas: vec![MetaDelta::IdAlloc { id_type, count }],
        })?;
        Ok(IdRange {
            start: current + 1,
            count,
        })
    }

    pub(crate) fn next_revision_main(&self) -> u64 {
        self.id_epochs.get(&IdEpochType::Revision).unwrap_or(0) + 1
    }

    pub(crate) fn next_watch_id(&self) -> u64 {
        self.watch_id_alloc.fetch_add(1, Ordering::Relaxed)
    }

    /// Store heartbeat: upserts the store, records metrics, learns region
    /// leadership, and returns the store map plus this store's pending
    /// region cmds and the cluster governance state.
    pub fn store_heartbeat(
        &self,
        mut store: Store,
        metrics: Option<StoreMetrics>,
        region_metrics: Vec<RegionMetrics>,
    ) -> Result<HeartbeatResponse> {
        store.last_seen_ms = now_ms();
        if let Some(existing) = self.stores.get(&store.store_id) {
            if existing.state == StoreState::Tombstone {
                return Err(ServerError::new(
                    ErrorCode::IllegalParameters,
                    format!("store {} is tombstoned", store.store_id),
                ));
            }
            // A heartbeat from an offline store brings it back.
            store.state = if existing.state == StoreState::Offline {
                StoreState::Normal
            } else {
                existing.state
            };
        } else {
            store.state = StoreState::Normal;
        }
        let mut deltas = vec![MetaDelta::StoreUpsert(store.clone())];
        if let Some(metrics) = metrics {
            deltas.push(MetaDelta::StoreMetricsUpsert(metrics));
        }
        for region_metric in region_metrics {
            if region_metric.leader_store_id == store.store_id {
                deltas.push(MetaDelta::RegionLeader {
                    region_id: region_metric.region_id,
                    leader_store_id: store.store_id,
                });
            }
            deltas.push(MetaDelta::RegionMetricsUpsert(region_metric));
        }
        self.submit_increment(MetaIncrement { deltas })?;

        let mut stores = self.stores.get_all_values(|_| true);
        stores.sort_by_key(|s| s.store_id);
        Ok(HeartbeatResponse {
            stores,
            region_cmds: self.store_operations.get(&store.store_id).unwrap_or_default(),
            cluster_state: self.cluster_state(),
        })
    }

    /// Executor heartbeat; a nameless executor gets `host:port` as id.
    pub fn executor_heartbeat(&self, mut executor: Executor) -> Result<Vec<Executor>> {
        if executor.executor_id.is_empty() {
            executor.executor_id = executor.server_location.addr();
        }
        executor.last_seen_ms = now_ms();
        executor.state = StoreState::Normal;
        self.submit_increment(MetaIncrement {
            deltas: vec![
                MetaDelta::ExecutorUserUpsert(executor.user.clone()),
                MetaDelta::ExecutorUpsert(executor),
            ],
        })?;
        let mut executors = self.executors.get_all_values(|_| true);
        executors.sort_by(|a, b| a.executor_id.cmp(&b.executor_id));
        Ok(executors)
    }

    /// Marks stores silent past the heartbeat timeout offline.
    pub fn check_store_liveness(&self) -> Result<usize> {
        let now = now_ms();
        let stale = self.stores.get_all_values(|s| {
            s.state == StoreState::Normal
                && now.saturating_sub(s.last_seen_ms) > STORE_HEARTBEAT_TIMEOUT_MS
        });
        if stale.is_empty() {
            return Ok(0);
        }
        let deltas = stale
            .into_iter()
            .map(|mut store| {
                warn!("store missed heartbeats, marking offline"; "store_id" => store.store_id);
                store.state = StoreState::Offline;
                MetaDelta::StoreUpsert(store)
            })
            .collect::<Vec<_>>();
        let count = deltas.len();
        self.submit_increment(MetaIncrement { deltas })?;
        Ok(count)
    }

    /// A store acknowledging one region cmd of a job.
    pub fn update_region_cmd_status(
        &self,
        job_id: u64,
        cmd_id: u64,
        status: RegionCmdStatus,
        error: Option<String>,
        retryable: bool,
    ) -> Result<()> {
        self.submit_increment(MetaIncrement {
            deltas: vec![MetaDelta::JobCmdStatus {
                job_id,
                cmd_id,
                status,
                error,
                retryable,
            }],
        })
    }

    pub fn job(&self, job_id: u64) -> Option<Job> {
        self.jobs.get(&job_id)
    }

    pub fn archived_jobs(&self) -> Vec<Job> {
        self.job_archive.lock().iter().cloned().collect()
    }

    pub fn region(&self, region_id: u64) -> Option<RegionInternal> {
        self.regions.get(&region_id)
    }

    pub fn store(&self, store_id: u64) -> Option<Store> {
        self.stores.get(&store_id)
    }

    /// The coordinator leader's location for client redirects; a
    /// follower's answer to any mutating request.
    pub fn leader_location(&self) -> Option<Location> {
        // Single-group deployments answer themselves; the id-to-location
        // mapping is provided by deployment wiring.
        None
    }

    /// Entry counts of the control-plane maps, for GetMemoryInfo.
    pub fn memory_info(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("regions", self.regions.size()),
            ("stores", self.stores.size()),
            ("executors", self.executors.size()),
            ("jobs", self.jobs.size()),
            ("archived_jobs", self.job_archive.lock().len() as u64),
            ("store_operations", self.store_operations.size()),
            ("store_metrics", self.store_metrics.size()),
            ("region_metrics", self.region_metrics.size()),
            ("kv_indexes", self.kv_index_map.size()),
            ("kv_revisions", self.kv_rev_map.size()),
            ("leases", self.leases.size()),
            ("watches", self.watches.size()),
            ("id_epochs", self.id_epochs.size()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use engine_traits::Range;

    use super::balance::BalancePlan;
    use super::region::CreateRegionRequest;
    use super::safe_point::RegistrationKind;
    use super::*;
    use crate::common::meta::{Peer, PeerRole, RegionType, StoreType};

    fn store_fixture(store_id: u64) -> Store {
        Store {
            store_id,
            keyring: "keyring".to_owned(),
            state: StoreState::Normal,
            server_location: Location::new(format!("s{}", store_id), 20160),
            raft_location: Location::new(format!("s{}", store_id), 20161),
            store_type: StoreType::Store,
            resource_tag: String::new(),
            last_seen_ms: 0,
            is_read_only: false,
            leader_num_weight: 1,
        }
    }

    fn control_with_stores(count: u64) -> CoordinatorControl {
        let control = CoordinatorControl::new(crate::config::CoordinatorConfig::default());
        for store_id in 1..=count {
            control
                .store_heartbeat(store_fixture(store_id), None, vec![])
                .unwrap();
        }
        control
    }

    fn create_region_request(start: &[u8], end: &[u8], replicas: usize) -> CreateRegionRequest {
        CreateRegionRequest {
            region_type: RegionType::Store,
            range: Range::new(start.to_vec(), end.to_vec()),
            replica_num: replicas,
            tenant_id: 0,
            resource_tag: String::new(),
            index_parameter: None,
        }
    }

    fn finish_job(control: &CoordinatorControl, job_id: u64) {
        loop {
            let job = match control.job(job_id) {
                Some(job) => job,
                None => return,
            };
            let cmds: Vec<(u64, u64)> = job
                .current_cmds()
                .iter()
                .filter(|c| c.status != RegionCmdStatus::Done)
                .map(|c| (c.cmd_id, c.store_id))
                .collect();
            if cmds.is_empty() {
                return;
            }
            for (cmd_id, _) in cmds {
                control
                    .update_region_cmd_status(job_id, cmd_id, RegionCmdStatus::Done, None, false)
                    .unwrap();
            }
        }
    }

    #[test]
    fn test_id_allocation_is_contiguous() {
        let control = control_with_stores(0);
        let first = control.create_ids(IdEpochType::DdlJob, 10).unwrap();
        let second = control.create_ids(IdEpochType::DdlJob, 5).unwrap();
        assert_eq!(first.start, 1);
        assert_eq!(first.end(), 11);
        assert_eq!(second.start, 11);
        // Another type has its own counter.
        let other = control.create_ids(IdEpochType::NextTable, 1).unwrap();
        assert_eq!(other.start, 1);
        // Over-large requests are refused.
        assert!(control.create_ids(IdEpochType::DdlJob, 4096).is_err());
    }

    #[test]
    fn test_store_heartbeat_registers_and_returns_cmds() {
        let control = control_with_stores(3);
        assert_eq!(control.store_map().len(), 3);

        let (region_id, job_id) = control
            .create_region(create_region_request(b"r:a", b"r:z", 3))
            .unwrap();
        // The new region starts NEW, with one create cmd per store.
        assert_eq!(control.region(region_id).unwrap().state, RegionState::New);
        let response = control
            .store_heartbeat(store_fixture(1), None, vec![])
            .unwrap();
        assert_eq!(response.region_cmds.len(), 1);
        assert_eq!(response.region_cmds[0].region_id, region_id);

        finish_job(&control, job_id);
        assert_eq!(
            control.region(region_id).unwrap().state,
            RegionState::Normal
        );
        // Completed job moved to the archive.
        assert!(control.job(job_id).is_none());
        assert!(control
            .archived_jobs()
            .iter()
            .any(|j| j.job_id == job_id && j.status == JobStatus::Done));
        // Nothing pending for the stores any more.
        let response = control
            .store_heartbeat(store_fixture(1), None, vec![])
            .unwrap();
        assert!(response.region_cmds.is_empty());
    }

    #[test]
    fn test_create_region_rejects_overlap() {
        let control = control_with_stores(3);
        control
            .create_region(create_region_request(b"r:a", b"r:m", 3))
            .unwrap();
        let err = control
            .create_region(create_region_request(b"r:k", b"r:z", 3))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::RangeInvalid);
        // Non-overlapping sibling is fine.
        control
            .create_region(create_region_request(b"r:m", b"r:z", 3))
            .unwrap();
    }

    #[test]
    fn test_create_region_needs_enough_stores() {
        let control = control_with_stores(2);
        let err = control
            .create_region(create_region_request(b"r:a", b"r:z", 3))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::IllegalParameters);
    }

    #[test]
    fn test_split_job_updates_region_map() {
        let control = control_with_stores(3);
        let (region_id, create_job) = control
            .create_region(create_region_request(b"r:a", b"r:z", 3))
            .unwrap();
        finish_job(&control, create_job);

        let (to_region_id, split_job) = control.split_region(region_id, b"r:n".to_vec()).unwrap();
        assert_eq!(
            control.region(region_id).unwrap().state,
            RegionState::Splitting
        );
        finish_job(&control, split_job);

        let parent = control.region(region_id).unwrap();
        let child = control.region(to_region_id).unwrap();
        assert_eq!(parent.definition.range, Range::new(b"r:a".to_vec(), b"r:n".to_vec()));
        assert_eq!(child.definition.range, Range::new(b"r:n".to_vec(), b"r:z".to_vec()));
        assert_eq!(parent.definition.epoch.version, 2);
        assert_eq!(child.definition.epoch.version, 2);
        assert_eq!(parent.state, RegionState::Normal);
        assert_eq!(child.state, RegionState::Normal);
    }

    #[test]
    fn test_split_validations() {
        let control = control_with_stores(3);
        let (region_id, create_job) = control
            .create_region(create_region_request(b"r:a", b"r:z", 3))
            .unwrap();
        finish_job(&control, create_job);
        // Split key outside the range.
        assert!(control.split_region(region_id, b"r:a".to_vec()).is_err());
        assert!(control.split_region(region_id, b"s:m".to_vec()).is_err());
        // A second split while one is running is refused.
        control.split_region(region_id, b"r:n".to_vec()).unwrap();
        let err = control.split_region(region_id, b"r:p".to_vec()).unwrap_err();
        assert_eq!(err.code, ErrorCode::RegionUnavailable);
    }

    #[test]
    fn test_failed_cmd_fails_job() {
        let control = control_with_stores(3);
        let (region_id, job_id) = control
            .create_region(create_region_request(b"r:a", b"r:z", 3))
            .unwrap();
        let cmd_id = control.job(job_id).unwrap().current_cmds()[0].cmd_id;
        control
            .update_region_cmd_status(
                job_id,
                cmd_id,
                RegionCmdStatus::Failed,
                Some("disk full".to_owned()),
                false,
            )
            .unwrap();
        assert!(control.job(job_id).is_none());
        assert!(control
            .archived_jobs()
            .iter()
            .any(|j| j.job_id == job_id && j.status == JobStatus::Failed));
        // The region never went NORMAL.
        assert_eq!(control.region(region_id).unwrap().state, RegionState::New);
    }

    #[test]
    fn test_change_peer_single_steps() {
        let control = control_with_stores(4);
        let (region_id, create_job) = control
            .create_region(create_region_request(b"r:a", b"r:z", 3))
            .unwrap();
        finish_job(&control, create_job);

        let region = control.region(region_id).unwrap();
        let old_conf_version = region.definition.epoch.conf_version;
        // Replace the peer on store 3 with one on store 4.
        let target_store = control.store(4).unwrap();
        let mut new_peers: Vec<Peer> = region
            .definition
            .peers
            .iter()
            .filter(|p| p.store_id != 3)
            .cloned()
            .collect();
        new_peers.push(Peer {
            peer_id: 9999,
            store_id: 4,
            role: PeerRole::Voter,
            server_location: target_store.server_location.clone(),
            raft_location: target_store.raft_location.clone(),
        });
        let job_id = control.change_peer(region_id, new_peers.clone()).unwrap();
        let job = control.job(job_id).unwrap();
        // One task per single-peer change: one add, one remove.
        assert_eq!(job.tasks.len(), 2);
        assert_eq!(job.current_cmds().len(), 1);
        finish_job(&control, job_id);

        let region = control.region(region_id).unwrap();
        assert_eq!(region.state, RegionState::Normal);
        assert_eq!(region.definition.epoch.conf_version, old_conf_version + 2);
        assert!(region.definition.peers.iter().any(|p| p.store_id == 4));
        assert!(!region.definition.peers.iter().any(|p| p.store_id == 3));
    }

    #[test]
    fn test_drop_region_soft_then_permanent() {
        let control = control_with_stores(3);
        let (region_id, create_job) = control
            .create_region(create_region_request(b"r:a", b"r:z", 3))
            .unwrap();
        finish_job(&control, create_job);

        let job_id = control.drop_region(region_id, false).unwrap();
        assert_eq!(
            control.region(region_id).unwrap().state,
            RegionState::Deleted
        );
        finish_job(&control, job_id);
        assert_eq!(
            control.region(region_id).unwrap().state,
            RegionState::Deleted
        );

        let job_id = control.drop_region(region_id, true).unwrap();
        finish_job(&control, job_id);
        assert!(control.region(region_id).is_none());
    }

    #[test]
    fn test_gc_safe_point_never_regresses() {
        let control = control_with_stores(0);
        let state = control.update_gc_safe_point(100, vec![(7, 50)], 90).unwrap();
        assert_eq!(state.gc_safe_point, 100);
        assert_eq!(control.tenant_safe_point(7), 50);

        // A regression leaves everything unchanged.
        let state = control.update_gc_safe_point(40, vec![(7, 20)], 10).unwrap();
        assert_eq!(state.gc_safe_point, 100);
        assert_eq!(control.tenant_safe_point(7), 50);

        let state = control.update_gc_safe_point(150, vec![], 120).unwrap();
        assert_eq!(state.gc_safe_point, 150);
        assert!(!state.gc_stop);
        control.set_gc_stop(true).unwrap();
        assert!(control.cluster_state().gc_stop);
    }

    #[test]
    fn test_force_read_only_reason() {
        let control = control_with_stores(1);
        assert!(!control.cluster_state().cluster_read_only);
        control.config_coordinator(true, "maintenance").unwrap();
        let state = control.cluster_state();
        assert!(state.cluster_read_only);
        assert_eq!(state.read_only_reason, "maintenance");
        control.config_coordinator(false, "").unwrap();
        assert!(!control.cluster_state().cluster_read_only);
    }

    #[test]
    fn test_store_reported_read_only_propagates() {
        let control = control_with_stores(1);
        let mut store = store_fixture(1);
        store.is_read_only = true;
        control.store_heartbeat(store, None, vec![]).unwrap();
        let state = control.cluster_state();
        assert!(state.cluster_read_only);
        assert!(state.read_only_reason.contains("store 1"));
    }

    #[test]
    fn test_backup_restore_registration() {
        let control = control_with_stores(0);
        control
            .register_operation(RegistrationKind::Backup, "br-1", 60_000)
            .unwrap();
        // Re-register by the same holder refreshes.
        control
            .register_operation(RegistrationKind::Backup, "br-1", 60_000)
            .unwrap();
        // A second holder and a conflicting op are both BUSY.
        let err = control
            .register_operation(RegistrationKind::Backup, "br-2", 60_000)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Busy);
        let err = control
            .register_operation(RegistrationKind::Restore, "restore-1", 60_000)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Busy);

        control
            .unregister_operation(RegistrationKind::Backup, "br-1")
            .unwrap();
        control
            .register_operation(RegistrationKind::Restore, "restore-1", 60_000)
            .unwrap();
        assert_eq!(control.registration_status().len(), 1);
    }

    #[test]
    fn test_executor_heartbeat_generates_id() {
        let control = control_with_stores(0);
        let executor = Executor {
            executor_id: String::new(),
            user: ExecutorUser {
                user: "app".to_owned(),
                keyring: "keyring".to_owned(),
            },
            state: StoreState::New,
            server_location: Location::new("exec1", 30160),
            last_seen_ms: 0,
        };
        let executors = control.executor_heartbeat(executor).unwrap();
        assert_eq!(executors.len(), 1);
        assert_eq!(executors[0].executor_id, "exec1:30160");
    }

    #[test]
    fn test_lease_grant_bind_expire() {
        let control = control_with_stores(0);
        let (lease_id, ttl) = control.lease_grant(0, 60).unwrap();
        assert_eq!(ttl, 60);
        control
            .kv_put(b"/leased", b"v".to_vec(), lease_id, false, false, false)
            .unwrap();
        let (_, _, keys) = control.lease_query(lease_id).unwrap();
        assert_eq!(keys, vec![b"/leased".to_vec()]);

        // Revoking deletes the bound key.
        control.lease_revoke(lease_id).unwrap();
        let (rows, _) = control.kv_range(b"/leased", &[], 0, false, false).unwrap();
        assert!(rows.is_empty());
        assert!(control.lease_query(lease_id).is_err());
    }

    #[test]
    fn test_lease_sweep_deletes_bound_keys() {
        let control = control_with_stores(0);
        let (lease_id, _) = control.lease_grant(0, 60).unwrap();
        control
            .kv_put(b"/leased", b"v".to_vec(), lease_id, false, false, false)
            .unwrap();
        // Force the lease into the past, then sweep.
        let mut lease = control.leases.get(&lease_id).unwrap();
        lease.expire_ms = 1;
        control.leases.put(lease_id, lease);
        let swept = control.lease_sweep().unwrap();
        assert_eq!(swept, 1);
        let (rows, _) = control.kv_range(b"/leased", &[], 0, false, false).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_balance_leader_dry_run() {
        let control = control_with_stores(3);
        // 10 regions led by store 1, 2 by store 2, none by store 3; every
        // region has voters on all three stores.
        let mut deltas = Vec::new();
        for i in 0..12u64 {
            let leader = if i < 10 { 1 } else { 2 };
            let region_id = 100 + i;
            let peers = (1..=3u64)
                .map(|store_id| Peer {
                    peer_id: region_id * 10 + store_id,
                    store_id,
                    role: PeerRole::Voter,
                    server_location: Location::new(format!("s{}", store_id), 20160),
                    raft_location: Location::new(format!("s{}", store_id), 20161),
                })
                .collect();
            deltas.push(MetaDelta::RegionUpsert(RegionInternal {
                definition: RegionDefinition {
                    region_id,
                    epoch: crate::common::meta::RegionEpoch::new(1, 1),
                    range: Range::new(
                        format!("r:{:03}", i).into_bytes(),
                        format!("r:{:03}", i + 1).into_bytes(),
                    ),
                    peers,
                    region_type: RegionType::Store,
                    tenant_id: 0,
                    index_parameter: None,
                },
                state: RegionState::Normal,
                leader_store_id: leader,
                create_ts_ms: 0,
            }));
        }
        control
            .submit_increment(MetaIncrement { deltas })
            .unwrap();

        let plan: BalancePlan = control.balance_leader(StoreType::Store, true).unwrap();
        assert!(plan.scores[&1] > plan.expected_score);
        assert!(!plan.tasks.is_empty());
        assert!(plan
            .tasks
            .iter()
            .any(|t| t.source_store_id == 1 && t.target_store_id == 3));
        // Dry run creates no jobs and mutates nothing.
        assert!(plan.job_ids.is_empty());
        assert_eq!(control.region(100).unwrap().leader_store_id, 1);
    }

    #[test]
    fn test_balance_region_dry_run() {
        let control = control_with_stores(3);
        // Regions replicated on stores 1 and 2 only: store 3 is idle.
        let mut deltas = Vec::new();
        for i in 0..6u64 {
            let region_id = 200 + i;
            let peers = (1..=2u64)
                .map(|store_id| Peer {
                    peer_id: region_id * 10 + store_id,
                    store_id,
                    role: PeerRole::Voter,
                    server_location: Location::new(format!("s{}", store_id), 20160),
                    raft_location: Location::new(format!("s{}", store_id), 20161),
                })
                .collect();
            deltas.push(MetaDelta::RegionUpsert(RegionInternal {
                definition: RegionDefinition {
                    region_id,
                    epoch: crate::common::meta::RegionEpoch::new(1, 1),
                    range: Range::new(
                        format!("w:{:03}", i).into_bytes(),
                        format!("w:{:03}", i + 1).into_bytes(),
                    ),
                    peers,
                    region_type: RegionType::Store,
                    tenant_id: 0,
                    index_parameter: None,
                },
                state: RegionState::Normal,
                leader_store_id: 1,
                create_ts_ms: 0,
            }));
        }
        control.submit_increment(MetaIncrement { deltas }).unwrap();

        let plan = control.balance_region(StoreType::Store, true).unwrap();
        assert!(!plan.tasks.is_empty());
        assert!(plan.tasks.iter().all(|t| t.target_store_id == 3));
        assert!(plan.job_ids.is_empty());
    }
}

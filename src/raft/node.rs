// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

use std::collections::{BTreeSet, HashMap};

use rand::Rng;
use slog_global::{debug, info};

use super::log::RaftLog;
use super::{
    ConfChange, ConfChangeType, Entry, EntryPayload, Error, HardState, Message, MessageKind,
    PeerId, Result, Snapshot, SnapshotMeta,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

#[derive(Debug, Clone, Copy)]
pub struct RaftConfig {
    /// Base follower timeout, in ticks.
    pub election_tick: usize,
    pub heartbeat_tick: usize,
    /// Election jitter bounds, in ticks, added on every timer reset to
    /// avoid split votes.
    pub min_random_delta_ticks: usize,
    pub max_random_delta_ticks: usize,
    /// Max entries a transfer target may lag before the transfer is
    /// refused (unless forced).
    pub transfer_leader_lag: u64,
}

impl Default for RaftConfig {
    fn default() -> RaftConfig {
        RaftConfig {
            election_tick: 10,
            heartbeat_tick: 2,
            min_random_delta_ticks: 4,
            max_random_delta_ticks: 14,
            transfer_leader_lag:
                crate::common::constant::TRANSFER_LEADER_LOG_FALL_BEHIND_THRESHOLD,
        }
    }
}

/// Leader-side view of one follower.
#[derive(Debug, Clone, Copy, Default)]
pub struct Progress {
    pub match_index: u64,
    pub next_index: u64,
}

/// What the owner must process after driving the node: messages to put on
/// the wire, entries to apply, possibly a snapshot to install first.
#[derive(Debug, Default)]
pub struct Ready {
    pub messages: Vec<Message>,
    pub committed_entries: Vec<Entry>,
    pub snapshot: Option<Snapshot>,
}

impl Ready {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.committed_entries.is_empty() && self.snapshot.is_none()
    }
}

pub struct RaftNode {
    pub id: PeerId,
    config: RaftConfig,

    term: u64,
    vote: Option<PeerId>,
    role: Role,
    leader: Option<PeerId>,

    voters: BTreeSet<PeerId>,
    learners: BTreeSet<PeerId>,
    pub log: RaftLog,
    progress: HashMap<PeerId, Progress>,
    votes_granted: HashMap<PeerId, bool>,

    election_elapsed: usize,
    randomized_election_timeout: usize,
    heartbeat_elapsed: usize,

    msgs: Vec<Message>,
    pending_snapshot: Option<Snapshot>,
    /// Snapshot of the compacted prefix, for followers too far behind.
    stored_snapshot: Option<Snapshot>,
    leader_transferee: Option<PeerId>,
}

impl RaftNode {
    pub fn new(id: PeerId, voters: Vec<PeerId>, config: RaftConfig) -> RaftNode {
        Self::new_with_learners(id, voters, vec![], config)
    }

    pub fn new_with_learners(
        id: PeerId,
        voters: Vec<PeerId>,
        learners: Vec<PeerId>,
        config: RaftConfig,
    ) -> RaftNode {
        let mut node = RaftNode {
            id,
            config,
            term: 0,
            vote: None,
            role: Role::Follower,
            leader: None,
            voters: voters.into_iter().collect(),
            learners: learners.into_iter().collect(),
            log: RaftLog::new(),
            progress: HashMap::new(),
            votes_granted: HashMap::new(),
            election_elapsed: 0,
            randomized_election_timeout: 0,
            heartbeat_elapsed: 0,
            msgs: Vec::new(),
            pending_snapshot: None,
            stored_snapshot: None,
            leader_transferee: None,
        };
        node.reset_randomized_election_timeout();
        node
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    pub fn leader_id(&self) -> Option<PeerId> {
        self.leader
    }

    pub fn term(&self) -> u64 {
        self.term
    }

    pub fn voters(&self) -> &BTreeSet<PeerId> {
        &self.voters
    }

    pub fn learners(&self) -> &BTreeSet<PeerId> {
        &self.learners
    }

    pub fn progress(&self, peer: PeerId) -> Option<&Progress> {
        self.progress.get(&peer)
    }

    pub fn hard_state(&self) -> HardState {
        HardState {
            term: self.term,
            vote: self.vote,
            commit: self.log.committed,
        }
    }

    pub fn load_hard_state(&mut self, hs: HardState) {
        self.term = hs.term;
        self.vote = hs.vote;
        self.log.commit_to(hs.commit);
    }

    fn promotable(&self) -> bool {
        self.voters.contains(&self.id)
    }

    fn quorum(&self) -> usize {
        self.voters.len() / 2 + 1
    }

    fn reset_randomized_election_timeout(&mut self) {
        let delta = if self.config.max_random_delta_ticks > self.config.min_random_delta_ticks {
            rand::thread_rng()
                .gen_range(self.config.min_random_delta_ticks..=self.config.max_random_delta_ticks)
        } else {
            self.config.min_random_delta_ticks
        };
        self.randomized_election_timeout = self.config.election_tick + delta;
    }

    /// Advances timers by one tick. Followers and candidates campaign when
    /// the randomized election timeout fires; leaders heartbeat.
    pub fn tick(&mut self) {
        match self.role {
            Role::Leader => {
                self.heartbeat_elapsed += 1;
                if self.heartbeat_elapsed >= self.config.heartbeat_tick {
                    self.heartbeat_elapsed = 0;
                    self.bcast_append();
                }
            }
            Role::Follower | Role::Candidate => {
                self.election_elapsed += 1;
                if self.election_elapsed >= self.randomized_election_timeout && self.promotable() {
                    self.campaign();
                }
            }
        }
    }

    pub fn campaign(&mut self) {
        if !self.promotable() {
            return;
        }
        self.role = Role::Candidate;
        self.term += 1;
        self.vote = Some(self.id);
        self.leader = None;
        self.votes_granted.clear();
        self.votes_granted.insert(self.id, true);
        self.election_elapsed = 0;
        self.reset_randomized_election_timeout();
        debug!("starting campaign"; "id" => self.id, "term" => self.term);
        if self.votes_granted.len() >= self.quorum() {
            self.become_leader();
            return;
        }
        let (last_log_index, last_log_term) = (self.log.last_index(), self.log.last_term());
        for peer in self.voters.clone() {
            if peer == self.id {
                continue;
            }
            self.send(Message {
                from: self.id,
                to: peer,
                term: self.term,
                kind: MessageKind::RequestVote {
                    last_log_index,
                    last_log_term,
                },
            });
        }
    }

    fn become_follower(&mut self, term: u64, leader: Option<PeerId>) {
        self.role = Role::Follower;
        if term > self.term {
            self.term = term;
            self.vote = None;
        }
        self.leader = leader;
        self.leader_transferee = None;
        self.election_elapsed = 0;
        self.reset_randomized_election_timeout();
    }

    fn become_leader(&mut self) {
        info!("became leader"; "id" => self.id, "term" => self.term);
        self.role = Role::Leader;
        self.leader = Some(self.id);
        self.leader_transferee = None;
        self.heartbeat_elapsed = 0;
        let next = self.log.last_index() + 1;
        self.progress.clear();
        for peer in self.voters.iter().chain(self.learners.iter()) {
            self.progress.insert(
                *peer,
                Progress {
                    match_index: 0,
                    next_index: next,
                },
            );
        }
        // Commit a no-op of the new term so earlier entries become
        // committable.
        let entry = Entry {
            term: self.term,
            index: next,
            payload: EntryPayload::Noop,
        };
        self.log.append(entry);
        self.maybe_commit();
        self.bcast_append();
    }

    fn send(&mut self, msg: Message) {
        self.msgs.push(msg);
    }

    /// Proposes a payload; only valid on the leader, and refused while a
    /// leadership transfer is draining proposals away.
    pub fn propose(&mut self, data: Vec<u8>) -> Result<u64> {
        if self.role != Role::Leader {
            return Err(Error::NotLeader(self.leader));
        }
        if self.leader_transferee.is_some() {
            return Err(Error::ProposalDropped);
        }
        let index = self.log.last_index() + 1;
        self.log.append(Entry {
            term: self.term,
            index,
            payload: EntryPayload::Normal(data),
        });
        self.maybe_commit();
        self.bcast_append();
        Ok(index)
    }

    pub fn propose_conf_change(&mut self, cc: ConfChange) -> Result<u64> {
        if self.role != Role::Leader {
            return Err(Error::NotLeader(self.leader));
        }
        if self.has_pending_conf_change() {
            return Err(Error::ConfChangeInProgress);
        }
        let index = self.log.last_index() + 1;
        self.log.append(Entry {
            term: self.term,
            index,
            payload: EntryPayload::ConfChange(cc),
        });
        self.maybe_commit();
        self.bcast_append();
        Ok(index)
    }

    fn has_pending_conf_change(&self) -> bool {
        let mut index = self.log.applied + 1;
        while index <= self.log.last_index() {
            if let Some(entry) = self.log.entry(index) {
                if matches!(entry.payload, EntryPayload::ConfChange(_)) {
                    return true;
                }
            }
            index += 1;
        }
        false
    }

    /// The owner calls this after executing a committed conf-change entry.
    pub fn apply_conf_change(&mut self, cc: ConfChange) {
        match cc.change_type {
            ConfChangeType::AddNode => {
                self.learners.remove(&cc.peer_id);
                self.voters.insert(cc.peer_id);
            }
            ConfChangeType::AddLearner => {
                self.voters.remove(&cc.peer_id);
                self.learners.insert(cc.peer_id);
            }
            ConfChangeType::RemoveNode => {
                self.voters.remove(&cc.peer_id);
                self.learners.remove(&cc.peer_id);
                self.progress.remove(&cc.peer_id);
            }
        }
        if self.role == Role::Leader {
            if cc.change_type != ConfChangeType::RemoveNode {
                self.progress.entry(cc.peer_id).or_insert(Progress {
                    match_index: 0,
                    next_index: self.log.last_index() + 1,
                });
            }
            if cc.change_type == ConfChangeType::RemoveNode && cc.peer_id == self.id {
                self.become_follower(self.term, None);
            } else {
                // Quorum may have shrunk.
                self.maybe_commit();
            }
        }
    }

    /// Starts a leadership transfer. Refused when the target's log lags
    /// beyond the threshold, unless `force` is set.
    pub fn transfer_leader(&mut self, to: PeerId, force: bool) -> Result<()> {
        if self.role != Role::Leader {
            return Err(Error::NotLeader(self.leader));
        }
        if !self.voters.contains(&to) {
            return Err(Error::NotVoter(to));
        }
        let match_index = self.progress.get(&to).map(|p| p.match_index).unwrap_or(0);
        let lag = self.log.last_index().saturating_sub(match_index);
        if !force && lag > self.config.transfer_leader_lag {
            return Err(Error::TransferLagTooLarge {
                lag,
                threshold: self.config.transfer_leader_lag,
            });
        }
        self.leader_transferee = Some(to);
        if match_index == self.log.last_index() {
            self.send_timeout_now(to);
        } else {
            self.send_append(to);
        }
        Ok(())
    }

    fn send_timeout_now(&mut self, to: PeerId) {
        info!("sending timeout-now for leader transfer"; "id" => self.id, "to" => to);
        self.send(Message {
            from: self.id,
            to,
            term: self.term,
            kind: MessageKind::TimeoutNow,
        });
    }

    /// Compacts the log up to `applied_index`, retaining `data` as the
    /// snapshot payload for lagging followers.
    pub fn compact(&mut self, to_index: u64, data: Vec<u8>) -> Result<()> {
        if to_index > self.log.applied {
            return Err(Error::Compacted(to_index));
        }
        let term = self.log.term(to_index).ok_or(Error::Compacted(to_index))?;
        self.log.compact(to_index, term);
        self.stored_snapshot = Some(Snapshot {
            meta: SnapshotMeta {
                index: to_index,
                term,
                voters: self.voters.iter().copied().collect(),
                learners: self.learners.iter().copied().collect(),
            },
            data,
        });
        Ok(())
    }

    fn bcast_append(&mut self) {
        let peers: Vec<PeerId> = self
            .voters
            .iter()
            .chain(self.learners.iter())
            .copied()
            .filter(|p| *p != self.id)
            .collect();
        for peer in peers {
            self.send_append(peer);
        }
    }

    fn send_append(&mut self, to: PeerId) {
        let progress = match self.progress.get(&to) {
            Some(p) => *p,
            None => return,
        };
        match self.log.entries_from(progress.next_index) {
            Some(entries) => {
                let prev_log_index = progress.next_index - 1;
                let prev_log_term = self.log.term(prev_log_index).unwrap_or(0);
                let committed = self.log.committed;
                self.send(Message {
                    from: self.id,
                    to,
                    term: self.term,
                    kind: MessageKind::Append {
                        prev_log_index,
                        prev_log_term,
                        entries,
                        committed,
                    },
                });
            }
            None => {
                // The follower's next entry is compacted away.
                if let Some(snapshot) = self.stored_snapshot.clone() {
                    self.send(Message {
                        from: self.id,
                        to,
                        term: self.term,
                        kind: MessageKind::InstallSnapshot { snapshot },
                    });
                }
            }
        }
    }

    fn maybe_commit(&mut self) -> bool {
        if self.role != Role::Leader {
            return false;
        }
        let mut matches: Vec<u64> = self
            .voters
            .iter()
            .map(|peer| {
                if *peer == self.id {
                    self.log.last_index()
                } else {
                    self.progress.get(peer).map(|p| p.match_index).unwrap_or(0)
                }
            })
            .collect();
        matches.sort_unstable_by(|a, b| b.cmp(a));
        let quorum_index = matches[self.quorum() - 1];
        // Only entries of the current term commit by counting.
        if quorum_index > self.log.committed && self.log.term(quorum_index) == Some(self.term) {
            self.log.commit_to(quorum_index);
            return true;
        }
        false
    }

    /// Feeds one message from the wire.
    pub fn step(&mut self, msg: Message) {
        if msg.term > self.term {
            let leader = match msg.kind {
                MessageKind::Append { .. } | MessageKind::InstallSnapshot { .. } => Some(msg.from),
                _ => None,
            };
            self.become_follower(msg.term, leader);
        }
        if msg.term < self.term {
            match msg.kind {
                MessageKind::RequestVote { .. } => {
                    self.send(Message {
                        from: self.id,
                        to: msg.from,
                        term: self.term,
                        kind: MessageKind::RequestVoteResponse { granted: false },
                    });
                }
                MessageKind::Append { .. } => {
                    // Carry our term back so the stale leader steps down.
                    self.send(Message {
                        from: self.id,
                        to: msg.from,
                        term: self.term,
                        kind: MessageKind::AppendResponse {
                            success: false,
                            last_index: self.log.last_index(),
                        },
                    });
                }
                _ => {}
            }
            return;
        }

        match msg.kind {
            MessageKind::RequestVote {
                last_log_index,
                last_log_term,
            } => self.handle_request_vote(msg.from, last_log_index, last_log_term),
            MessageKind::RequestVoteResponse { granted } => {
                self.handle_vote_response(msg.from, granted)
            }
            MessageKind::Append {
                prev_log_index,
                prev_log_term,
                entries,
                committed,
            } => self.handle_append(msg.from, prev_log_index, prev_log_term, entries, committed),
            MessageKind::AppendResponse {
                success,
                last_index,
            } => self.handle_append_response(msg.from, success, last_index),
            MessageKind::InstallSnapshot { snapshot } => {
                self.handle_install_snapshot(msg.from, snapshot)
            }
            MessageKind::TimeoutNow => {
                if self.promotable() {
                    info!("received timeout-now, campaigning"; "id" => self.id);
                    self.campaign();
                }
            }
        }
    }

    fn handle_request_vote(&mut self, from: PeerId, last_log_index: u64, last_log_term: u64) {
        let can_vote = self.vote.is_none() || self.vote == Some(from);
        let granted =
            can_vote && self.role == Role::Follower
                && self.log.is_up_to_date(last_log_index, last_log_term);
        if granted {
            self.vote = Some(from);
            self.election_elapsed = 0;
        }
        self.send(Message {
            from: self.id,
            to: from,
            term: self.term,
            kind: MessageKind::RequestVoteResponse { granted },
        });
    }

    fn handle_vote_response(&mut self, from: PeerId, granted: bool) {
        if self.role != Role::Candidate {
            return;
        }
        self.votes_granted.insert(from, granted);
        let granted_count = self.votes_granted.values().filter(|g| **g).count();
        let rejected_count = self.votes_granted.values().filter(|g| !**g).count();
        if granted_count >= self.quorum() {
            self.become_leader();
        } else if rejected_count >= self.quorum() {
            self.become_follower(self.term, None);
        }
    }

    fn handle_append(
        &mut self,
        from: PeerId,
        prev_log_index: u64,
        prev_log_term: u64,
        entries: Vec<Entry>,
        committed: u64,
    ) {
        // Equal-term append means `from` is the legitimate leader.
        self.become_follower(self.term, Some(from));
        match self.log.try_append(prev_log_index, prev_log_term, entries) {
            Some(batch_last) => {
                self.log.commit_to(committed.min(batch_last));
                self.send(Message {
                    from: self.id,
                    to: from,
                    term: self.term,
                    kind: MessageKind::AppendResponse {
                        success: true,
                        last_index: batch_last,
                    },
                });
            }
            None => {
                self.send(Message {
                    from: self.id,
                    to: from,
                    term: self.term,
                    kind: MessageKind::AppendResponse {
                        success: false,
                        last_index: self.log.last_index(),
                    },
                });
            }
        }
    }

    fn handle_append_response(&mut self, from: PeerId, success: bool, last_index: u64) {
        if self.role != Role::Leader {
            return;
        }
        if success {
            let next_index = match self.progress.get_mut(&from) {
                Some(progress) => {
                    if last_index > progress.match_index {
                        progress.match_index = last_index;
                        progress.next_index = last_index + 1;
                    }
                    progress.next_index
                }
                None => return,
            };
            let caught_up = next_index > self.log.last_index();
            if self.maybe_commit() {
                self.bcast_append();
            } else if next_index <= self.log.last_index() {
                self.send_append(from);
            }
            if caught_up && self.leader_transferee == Some(from) {
                self.send_timeout_now(from);
            }
        } else {
            // Back off using the follower's hint and retry.
            match self.progress.get_mut(&from) {
                Some(progress) => {
                    progress.next_index =
                        progress.next_index.saturating_sub(1).max(1).min(last_index + 1);
                }
                None => return,
            }
            self.send_append(from);
        }
    }

    fn handle_install_snapshot(&mut self, from: PeerId, snapshot: Snapshot) {
        self.become_follower(self.term, Some(from));
        if snapshot.meta.index <= self.log.committed {
            // Stale snapshot; report progress instead.
            self.send(Message {
                from: self.id,
                to: from,
                term: self.term,
                kind: MessageKind::AppendResponse {
                    success: true,
                    last_index: self.log.committed,
                },
            });
            return;
        }
        self.log.restore(&snapshot.meta);
        self.voters = snapshot.meta.voters.iter().copied().collect();
        self.learners = snapshot.meta.learners.iter().copied().collect();
        let last_index = snapshot.meta.index;
        self.pending_snapshot = Some(snapshot);
        self.send(Message {
            from: self.id,
            to: from,
            term: self.term,
            kind: MessageKind::AppendResponse {
                success: true,
                last_index,
            },
        });
    }

    pub fn has_ready(&self) -> bool {
        !self.msgs.is_empty()
            || self.pending_snapshot.is_some()
            || self.log.applied < self.log.committed
    }

    /// Drains everything the owner must act on. Committed entries are
    /// handed out exactly once, in order; the snapshot (if any) must be
    /// installed before applying them.
    pub fn ready(&mut self) -> Ready {
        Ready {
            messages: std::mem::take(&mut self.msgs),
            snapshot: self.pending_snapshot.take(),
            committed_entries: self.log.take_committed_entries(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Delivers messages between nodes until the network is quiet.
    fn interact(nodes: &mut HashMap<PeerId, RaftNode>) -> Vec<Entry> {
        let mut all_committed = Vec::new();
        loop {
            let mut wire = Vec::new();
            for node in nodes.values_mut() {
                let ready = node.ready();
                wire.extend(ready.messages);
                all_committed.extend(ready.committed_entries);
            }
            if wire.is_empty() {
                break;
            }
            for msg in wire {
                if let Some(target) = nodes.get_mut(&msg.to) {
                    target.step(msg);
                }
            }
        }
        all_committed
    }

    fn cluster(ids: &[PeerId]) -> HashMap<PeerId, RaftNode> {
        ids.iter()
            .map(|id| {
                (
                    *id,
                    RaftNode::new(*id, ids.to_vec(), RaftConfig::default()),
                )
            })
            .collect()
    }

    fn leader_of(nodes: &HashMap<PeerId, RaftNode>) -> PeerId {
        let leaders: Vec<PeerId> = nodes
            .values()
            .filter(|n| n.is_leader())
            .map(|n| n.id)
            .collect();
        assert_eq!(leaders.len(), 1, "expected exactly one leader");
        leaders[0]
    }

    #[test]
    fn test_single_node_elects_and_commits() {
        let mut nodes = cluster(&[1]);
        nodes.get_mut(&1).unwrap().campaign();
        assert!(nodes[&1].is_leader());
        nodes.get_mut(&1).unwrap().propose(b"x".to_vec()).unwrap();
        let committed = interact(&mut nodes);
        assert!(committed
            .iter()
            .any(|e| e.payload == EntryPayload::Normal(b"x".to_vec())));
    }

    #[test]
    fn test_three_node_election_and_replication() {
        let mut nodes = cluster(&[1, 2, 3]);
        nodes.get_mut(&1).unwrap().campaign();
        interact(&mut nodes);
        assert_eq!(leader_of(&nodes), 1);
        assert_eq!(nodes[&2].leader_id(), Some(1));

        nodes.get_mut(&1).unwrap().propose(b"v".to_vec()).unwrap();
        interact(&mut nodes);
        for node in nodes.values() {
            assert!(node.log.committed >= 2, "node {} lagging", node.id);
        }
    }

    #[test]
    fn test_follower_rejects_propose() {
        let mut nodes = cluster(&[1, 2, 3]);
        nodes.get_mut(&1).unwrap().campaign();
        interact(&mut nodes);
        match nodes.get_mut(&2).unwrap().propose(b"x".to_vec()) {
            Err(Error::NotLeader(Some(1))) => {}
            other => panic!("unexpected: {:?}", other.err()),
        }
    }

    #[test]
    fn test_failover_preserves_committed_entries() {
        let mut nodes = cluster(&[1, 2, 3]);
        nodes.get_mut(&1).unwrap().campaign();
        interact(&mut nodes);
        nodes.get_mut(&1).unwrap().propose(b"v1".to_vec()).unwrap();
        interact(&mut nodes);

        // Kill the leader; another node campaigns and must carry the entry.
        nodes.remove(&1);
        nodes.get_mut(&2).unwrap().campaign();
        interact(&mut nodes);
        assert_eq!(leader_of(&nodes), 2);
        let has_v1 = (1..=nodes[&2].log.last_index()).any(|i| {
            matches!(
                nodes[&2].log.entry(i).map(|e| &e.payload),
                Some(EntryPayload::Normal(data)) if data == b"v1"
            )
        });
        assert!(has_v1);
    }

    #[test]
    fn test_election_requires_up_to_date_log() {
        let mut nodes = cluster(&[1, 2, 3]);
        nodes.get_mut(&1).unwrap().campaign();
        interact(&mut nodes);
        nodes.get_mut(&1).unwrap().propose(b"v".to_vec()).unwrap();
        interact(&mut nodes);

        // A node with a truncated log cannot win.
        let mut stale = RaftNode::new(3, vec![1, 2, 3], RaftConfig::default());
        stale.term = nodes[&1].term();
        nodes.insert(3, stale);
        nodes.get_mut(&3).unwrap().campaign();
        let mut wire = Vec::new();
        for node in nodes.values_mut() {
            wire.extend(node.ready().messages);
        }
        for msg in wire {
            if msg.to != 3 {
                if let Some(t) = nodes.get_mut(&msg.to) {
                    t.step(msg);
                }
            }
        }
        let mut wire = Vec::new();
        for node in nodes.values_mut() {
            wire.extend(node.ready().messages);
        }
        let granted = wire.iter().any(|m| {
            matches!(m.kind, MessageKind::RequestVoteResponse { granted: true }) && m.to == 3
        });
        assert!(!granted);
    }

    #[test]
    fn test_conf_change_single_step() {
        let mut nodes = cluster(&[1, 2, 3]);
        nodes.get_mut(&1).unwrap().campaign();
        interact(&mut nodes);

        let cc = ConfChange {
            change_type: ConfChangeType::AddLearner,
            peer_id: 4,
            context: vec![],
        };
        nodes.get_mut(&1).unwrap().propose_conf_change(cc).unwrap();
        // A second change is refused while the first is unapplied.
        assert!(matches!(
            nodes.get_mut(&1).unwrap().propose_conf_change(ConfChange {
                change_type: ConfChangeType::RemoveNode,
                peer_id: 3,
                context: vec![],
            }),
            Err(Error::ConfChangeInProgress)
        ));
        let committed = interact(&mut nodes);
        for node in nodes.values_mut() {
            for entry in &committed {
                if let EntryPayload::ConfChange(cc) = &entry.payload {
                    node.apply_conf_change(cc.clone());
                }
            }
        }
        assert!(nodes[&1].learners().contains(&4));
    }

    #[test]
    fn test_transfer_leader_requires_caught_up_target() {
        let mut nodes = cluster(&[1, 2, 3]);
        nodes.get_mut(&1).unwrap().campaign();
        interact(&mut nodes);
        for i in 0..4 {
            nodes
                .get_mut(&1)
                .unwrap()
                .propose(vec![i as u8])
                .unwrap();
        }
        interact(&mut nodes);

        nodes.get_mut(&1).unwrap().transfer_leader(2, false).unwrap();
        interact(&mut nodes);
        assert_eq!(leader_of(&nodes), 2);
    }

    #[test]
    fn test_transfer_leader_lag_threshold() {
        let mut nodes = cluster(&[1, 2]);
        nodes.get_mut(&1).unwrap().campaign();
        interact(&mut nodes);
        assert_eq!(leader_of(&nodes), 1);

        // Pile up proposals that node 2 never acknowledges.
        let mut leader = nodes.remove(&1).unwrap();
        for i in 0..32u8 {
            leader.propose(vec![i]).unwrap();
        }
        match leader.transfer_leader(2, false) {
            Err(Error::TransferLagTooLarge { threshold, .. }) => assert_eq!(threshold, 16),
            other => panic!("unexpected: {:?}", other.err()),
        }
        // The force flag bypasses the threshold.
        leader.transfer_leader(2, true).unwrap();
    }

    #[test]
    fn test_snapshot_install_for_lagging_follower() {
        let mut nodes = cluster(&[1, 2, 3]);
        nodes.get_mut(&1).unwrap().campaign();
        interact(&mut nodes);
        for i in 0..8u8 {
            nodes.get_mut(&1).unwrap().propose(vec![i]).unwrap();
        }
        interact(&mut nodes);

        // Compact the leader's log, then add a brand-new voter.
        let applied = {
            let leader = nodes.get_mut(&1).unwrap();
            let applied = leader.log.applied;
            leader.compact(applied, b"state".to_vec()).unwrap();
            applied
        };
        nodes
            .get_mut(&1)
            .unwrap()
            .propose_conf_change(ConfChange {
                change_type: ConfChangeType::AddNode,
                peer_id: 4,
                context: vec![],
            })
            .unwrap();
        let committed = interact(&mut nodes);
        for node in nodes.values_mut() {
            for entry in &committed {
                if let EntryPayload::ConfChange(cc) = &entry.payload {
                    node.apply_conf_change(cc.clone());
                }
            }
        }
        let mut newcomer = RaftNode::new(4, vec![], RaftConfig::default());
        newcomer.voters = [1, 2, 3, 4].into_iter().collect();
        nodes.insert(4, newcomer);

        // Drive the leader to bring the newcomer up via snapshot.
        nodes.get_mut(&1).unwrap().bcast_append();
        let mut got_snapshot = false;
        for _ in 0..8 {
            let mut wire = Vec::new();
            for node in nodes.values_mut() {
                let ready = node.ready();
                if node.id == 4 {
                    if let Some(snap) = &ready.snapshot {
                        assert!(snap.meta.index >= applied);
                        assert_eq!(snap.data, b"state");
                        got_snapshot = true;
                    }
                }
                wire.extend(ready.messages);
            }
            if wire.is_empty() {
                break;
            }
            for msg in wire {
                if let Some(t) = nodes.get_mut(&msg.to) {
                    t.step(msg);
                }
            }
        }
        assert!(got_snapshot);
        assert!(nodes[&4].log.committed >= applied);
    }

    #[test]
    fn test_randomized_timeout_in_bounds() {
        let config = RaftConfig::default();
        for _ in 0..32 {
            let node = RaftNode::new(1, vec![1, 2, 3], config);
            let t = node.randomized_election_timeout;
            assert!(t >= config.election_tick + config.min_random_delta_ticks);
            assert!(t <= config.election_tick + config.max_random_delta_ticks);
        }
    }
}

// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! A compact raft core. The surrounding peer owns a [`RaftNode`] and drives
//! it explicitly: `tick()` advances timers, `step()` feeds messages from
//! other replicas, `ready()` drains outgoing messages and committed
//! entries. Nothing here does IO; transport and persistence belong to the
//! store layer.

mod log;
pub use self::log::RaftLog;
mod node;
pub use self::node::{Progress, RaftConfig, RaftNode, Ready, Role};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type PeerId = u64;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not leader, current leader {0:?}")]
    NotLeader(Option<PeerId>),
    #[error("proposal dropped")]
    ProposalDropped,
    #[error("a conf change is already in flight")]
    ConfChangeInProgress,
    #[error("transfer target lags {lag} entries, threshold {threshold}")]
    TransferLagTooLarge { lag: u64, threshold: u64 },
    #[error("peer {0} is not a voter")]
    NotVoter(PeerId),
    #[error("log index {0} is compacted")]
    Compacted(u64),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntryPayload {
    /// Appended by a fresh leader to commit entries from earlier terms.
    Noop,
    Normal(Vec<u8>),
    ConfChange(ConfChange),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub term: u64,
    pub index: u64,
    pub payload: EntryPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfChangeType {
    AddNode,
    AddLearner,
    RemoveNode,
}

/// Single-peer membership change; one at a time, each bumping the region's
/// conf_version by one when applied. `context` carries the opaque metadata
/// the state machine needs when executing the change (the full peer
/// descriptor, in this codebase).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfChange {
    pub change_type: ConfChangeType,
    pub peer_id: PeerId,
    pub context: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub index: u64,
    pub term: u64,
    pub voters: Vec<PeerId>,
    pub learners: Vec<PeerId>,
}

/// A state-machine snapshot plus the log metadata needed to restart
/// replication after it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub meta: SnapshotMeta,
    pub data: Vec<u8>,
}

/// Term, vote and commit index; persisted so a restart cannot double-vote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HardState {
    pub term: u64,
    pub vote: Option<PeerId>,
    pub commit: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessageKind {
    RequestVote {
        last_log_index: u64,
        last_log_term: u64,
    },
    RequestVoteResponse {
        granted: bool,
    },
    Append {
        prev_log_index: u64,
        prev_log_term: u64,
        entries: Vec<Entry>,
        committed: u64,
    },
    AppendResponse {
        success: bool,
        /// On success the follower's new match index; on rejection its last
        /// index, as a hint for the leader's backoff.
        last_index: u64,
    },
    InstallSnapshot {
        snapshot: Snapshot,
    },
    /// Sent to the transfer target; the receiver campaigns immediately.
    TimeoutNow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub from: PeerId,
    pub to: PeerId,
    pub term: u64,
    pub kind: MessageKind,
}

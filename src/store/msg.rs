// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! Commands carried through the replicated log, and the callback plumbing
//! that connects a proposal to the response closure waiting on it.

use std::sync::mpsc;

use engine_traits::Modify;
use serde::{Deserialize, Serialize};

use crate::common::meta::RegionEpoch;
use crate::common::TrackerPtr;
use crate::error::{ErrorCode, Result, ServerError};

/// One engine mutation in wire form. CF names travel as strings and are
/// resolved back to static names at apply time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WriteOp {
    Put {
        cf: String,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        cf: String,
        key: Vec<u8>,
    },
    DeleteRange {
        cf: String,
        start: Vec<u8>,
        end: Vec<u8>,
    },
}

impl WriteOp {
    pub fn put(cf: &str, key: Vec<u8>, value: Vec<u8>) -> WriteOp {
        WriteOp::Put {
            cf: cf.to_owned(),
            key,
            value,
        }
    }

    pub fn delete(cf: &str, key: Vec<u8>) -> WriteOp {
        WriteOp::Delete {
            cf: cf.to_owned(),
            key,
        }
    }

    pub fn delete_range(cf: &str, start: Vec<u8>, end: Vec<u8>) -> WriteOp {
        WriteOp::DeleteRange {
            cf: cf.to_owned(),
            start,
            end,
        }
    }

    /// Keys the op touches, for range validation before proposing.
    pub fn touched_keys(&self) -> Vec<&[u8]> {
        match self {
            WriteOp::Put { key, .. } | WriteOp::Delete { key, .. } => vec![key],
            WriteOp::DeleteRange { start, .. } => vec![start],
        }
    }

    pub fn into_modify(self) -> Result<Modify> {
        let resolve = |cf: &str| {
            engine_traits::name_to_cf(cf).ok_or_else(|| {
                ServerError::new(ErrorCode::Internal, format!("unknown cf {}", cf))
            })
        };
        Ok(match self {
            WriteOp::Put { cf, key, value } => Modify::Put(resolve(&cf)?, key, value),
            WriteOp::Delete { cf, key } => Modify::Delete(resolve(&cf)?, key),
            WriteOp::DeleteRange { cf, start, end } => {
                Modify::DeleteRange(resolve(&cf)?, start, end)
            }
        })
    }
}

/// The payload of one replicated entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CmdKind {
    Write(Vec<WriteOp>),
    /// Shrink this region to `[start, split_key)` and activate the
    /// pre-created sibling over `[split_key, end)`.
    Split {
        to_region_id: u64,
        split_key: Vec<u8>,
    },
    /// On the merge target: absorb the adjacent source region's range.
    Merge {
        source_region_id: u64,
        new_start_key: Vec<u8>,
    },
}

/// What gets proposed: the command plus the epoch the proposer saw, checked
/// again at apply so a reordered entry cannot apply across a stale epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaftCmd {
    pub region_id: u64,
    pub epoch: RegionEpoch,
    pub kind: CmdKind,
}

pub type Callback = Box<dyn FnOnce(Result<()>) + Send>;

/// A proposal waiting in the peer for its entry to apply.
pub struct PendingCmd {
    pub index: u64,
    pub term: u64,
    pub callback: Callback,
    pub tracker: Option<TrackerPtr>,
    pub proposed_at: std::time::Instant,
}

/// Builds a callback plus the receiver the dispatch side blocks on.
pub fn paired_callback() -> (Callback, mpsc::Receiver<Result<()>>) {
    let (tx, rx) = mpsc::channel();
    let callback = Box::new(move |result: Result<()>| {
        // The receiver may have given up on the RPC deadline already.
        let _ = tx.send(result);
    });
    (callback, rx)
}

#[cfg(test)]
mod tests {
    use engine_traits::CF_DEFAULT;

    use super::*;

    #[test]
    fn test_write_op_into_modify() {
        let op = WriteOp::put(CF_DEFAULT, b"k".to_vec(), b"v".to_vec());
        assert_eq!(
            op.into_modify().unwrap(),
            Modify::Put(CF_DEFAULT, b"k".to_vec(), b"v".to_vec())
        );
        let bogus = WriteOp::put("nope", b"k".to_vec(), b"v".to_vec());
        assert!(bogus.into_modify().is_err());
    }

    #[test]
    fn test_cmd_roundtrip_through_codec() {
        let cmd = RaftCmd {
            region_id: 7,
            epoch: RegionEpoch::new(1, 2),
            kind: CmdKind::Split {
                to_region_id: 8,
                split_key: b"r:m".to_vec(),
            },
        };
        let bytes = crate::codec::encode_default(&cmd).unwrap();
        let decoded: RaftCmd = crate::codec::decode(&bytes).unwrap();
        assert_eq!(decoded, cmd);
    }

    #[test]
    fn test_paired_callback() {
        let (cb, rx) = paired_callback();
        cb(Ok(()));
        assert!(rx.recv().unwrap().is_ok());
    }
}

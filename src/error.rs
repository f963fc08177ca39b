// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! Error codes surfaced to clients, plus the response error carrying the
//! redirect payload (current leader, current region definition) a client
//! needs to retry against the right replica.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::meta::{Location, RegionDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    Ok,
    IllegalParameters,
    Internal,
    RequestFull,
    KeyEmpty,
    KeyNotFound,
    RangeInvalid,

    RaftNotFound,
    NotLeader,
    EpochNotMatch,
    KeyOutOfRange,
    RegionNotFound,
    RegionUnavailable,

    EngineDeadlock,
    EngineException,
    EngineCommit,
    Unknown,

    IndexNotReady,
    IndexBuildError,
    IndexExceedMaxElements,
    ExceedMaxBatchCount,
    ExceedMaxRequestSize,

    WriteConflict,
    PrimaryMismatch,
    TxnLockNotFound,

    ClusterReadOnly,
    GcStopped,
    Busy,
}

/// The error attached to every failed response. Routing errors carry the
/// corrective target so the client can redirect instead of guessing.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{code:?}: {message}")]
pub struct ServerError {
    pub code: ErrorCode,
    pub message: String,
    /// Present on `NotLeader`: where the leader lives, when known.
    pub leader_location: Option<Location>,
    /// Present on epoch/range mismatches: the region as this server sees it.
    pub region_definition: Option<RegionDefinition>,
}

impl ServerError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> ServerError {
        ServerError {
            code,
            message: message.into(),
            leader_location: None,
            region_definition: None,
        }
    }

    #[must_use]
    pub fn with_leader(mut self, leader: Option<Location>) -> ServerError {
        self.leader_location = leader;
        self
    }

    #[must_use]
    pub fn with_region(mut self, region: RegionDefinition) -> ServerError {
        self.region_definition = Some(region);
        self
    }

    pub fn region_not_found(region_id: u64) -> ServerError {
        ServerError::new(
            ErrorCode::RegionNotFound,
            format!("not found region {}", region_id),
        )
    }

    pub fn not_leader(region_id: u64, leader: Option<Location>) -> ServerError {
        ServerError::new(ErrorCode::NotLeader, format!("not leader on region {}", region_id))
            .with_leader(leader)
    }

    pub fn request_full(message: impl Into<String>) -> ServerError {
        ServerError::new(ErrorCode::RequestFull, message)
    }
}

impl From<engine_traits::Error> for ServerError {
    fn from(e: engine_traits::Error) -> ServerError {
        use engine_traits::Error as E;
        let code = match &e {
            E::Deadlock => ErrorCode::EngineDeadlock,
            E::Exception(_) => ErrorCode::EngineException,
            E::Commit(_) => ErrorCode::EngineCommit,
            E::Internal(_) | E::CfName(_) => ErrorCode::Internal,
            E::NotFound => ErrorCode::KeyNotFound,
            E::KeyEmpty => ErrorCode::KeyEmpty,
            E::Unknown(_) => ErrorCode::Unknown,
        };
        ServerError::new(code, e.to_string())
    }
}

impl From<keys::Error> for ServerError {
    fn from(e: keys::Error) -> ServerError {
        ServerError::new(ErrorCode::IllegalParameters, e.to_string())
    }
}

impl From<txn_types::Error> for ServerError {
    fn from(e: txn_types::Error) -> ServerError {
        ServerError::new(ErrorCode::Internal, e.to_string())
    }
}

impl From<crate::codec::Error> for ServerError {
    fn from(e: crate::codec::Error) -> ServerError {
        ServerError::new(ErrorCode::Internal, e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_mapping() {
        let e: ServerError = engine_traits::Error::Deadlock.into();
        assert_eq!(e.code, ErrorCode::EngineDeadlock);
        let e: ServerError = engine_traits::Error::KeyEmpty.into();
        assert_eq!(e.code, ErrorCode::KeyEmpty);
        let e: ServerError = engine_traits::Error::CfName("x".to_owned()).into();
        assert_eq!(e.code, ErrorCode::Internal);
    }
}

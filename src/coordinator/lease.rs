// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! Leases over metadata keys. A key bound to a lease is deleted when the
//! lease expires; expiry is detected by the sweeper on the coordinator
//! leader and executed through the normal increment path, so bound-key
//! deletes fire watches like any other delete.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use slog_global::info;

pub use dingo_util::time::now_ms;

use super::ids::IdEpochType;
use super::increment::{MetaDelta, MetaIncrement};
use super::kv::Revision;
use super::CoordinatorControl;
use crate::error::{ErrorCode, Result, ServerError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub lease_id: u64,
    pub granted_ttl_secs: u64,
    pub expire_ms: u64,
    pub keys: BTreeSet<Vec<u8>>,
}

impl Lease {
    pub fn remaining_ttl_secs(&self, now: u64) -> i64 {
        (self.expire_ms as i64 - now as i64) / 1000
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expire_ms <= now
    }
}

impl CoordinatorControl {
    /// Grants a lease; `lease_id == 0` allocates one.
    pub fn lease_grant(&self, lease_id: u64, ttl_secs: u64) -> Result<(u64, u64)> {
        if ttl_secs == 0 {
            return Err(ServerError::new(
                ErrorCode::IllegalParameters,
                "lease ttl must be positive",
            ));
        }
        let lease_id = if lease_id == 0 {
            self.create_ids(IdEpochType::LeaseId, 1)?.start
        } else {
            if self.leases.count(&lease_id) > 0 {
                return Err(ServerError::new(
                    ErrorCode::IllegalParameters,
                    format!("lease {} already exists", lease_id),
                ));
            }
            lease_id
        };
        let lease = Lease {
            lease_id,
            granted_ttl_secs: ttl_secs,
            expire_ms: now_ms() + ttl_secs * 1000,
            keys: BTreeSet::new(),
        };
        self.submit_increment(MetaIncrement {
            deltas: vec![MetaDelta::LeaseGrant(lease)],
        })?;
        Ok((lease_id, ttl_secs))
    }

    /// Revokes the lease and deletes every key bound to it.
    pub fn lease_revoke(&self, lease_id: u64) -> Result<()> {
        let lease = self
            .leases
            .get(&lease_id)
            .ok_or_else(|| lease_not_found(lease_id))?;
        let _serial = self.kv_submit_lock.lock();
        let main = self.next_revision_main();
        let mut deltas = vec![MetaDelta::IdAlloc {
            id_type: IdEpochType::Revision,
            count: 1,
        }];
        for (sub, key) in lease.keys.iter().enumerate() {
            deltas.push(MetaDelta::KvDelete {
                key: key.clone(),
                op_revision: Revision::new(main, sub as u64),
            });
        }
        deltas.push(MetaDelta::LeaseRevoke(lease_id));
        self.submit_increment(MetaIncrement { deltas })?;
        info!("lease revoked"; "lease_id" => lease_id, "bound_keys" => lease.keys.len());
        Ok(())
    }

    /// Keep-alive: pushes the expiry out by the granted TTL again.
    pub fn lease_renew(&self, lease_id: u64) -> Result<u64> {
        let lease = self
            .leases
            .get(&lease_id)
            .ok_or_else(|| lease_not_found(lease_id))?;
        let expire_ms = now_ms() + lease.granted_ttl_secs * 1000;
        self.submit_increment(MetaIncrement {
            deltas: vec![MetaDelta::LeaseRenew {
                lease_id,
                expire_ms,
            }],
        })?;
        Ok(lease.granted_ttl_secs)
    }

    /// `(granted_ttl, remaining_ttl, keys)`.
    pub fn lease_query(&self, lease_id: u64) -> Result<(u64, i64, Vec<Vec<u8>>)> {
        let lease = self
            .leases
            .get(&lease_id)
            .ok_or_else(|| lease_not_found(lease_id))?;
        Ok((
            lease.granted_ttl_secs,
            lease.remaining_ttl_secs(now_ms()),
            lease.keys.iter().cloned().collect(),
        ))
    }

    pub fn lease_list(&self) -> Vec<Lease> {
        let mut leases = self.leases.get_all_values(|_| true);
        leases.sort_by_key(|l| l.lease_id);
        leases
    }

    /// Leader-side sweeper: revokes every expired lease, deleting bound
    /// keys through the same path a client revoke takes.
    pub fn lease_sweep(&self) -> Result<usize> {
        let now = now_ms();
        let expired = self.leases.get_all_values(|lease| lease.is_expired(now));
        let mut swept = 0;
        for lease in expired {
            self.lease_revoke(lease.lease_id)?;
            swept += 1;
        }
        Ok(swept)
    }
}

fn lease_not_found(lease_id: u64) -> ServerError {
    ServerError::new(
        ErrorCode::KeyNotFound,
        format!("lease {} not found", lease_id),
    )
}

// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! Cluster governance: GC safe points (global, resolve-lock, per-tenant),
//! the force-read-only switch, and the single-holder backup/restore
//! registrations with TTL.

use std::sync::atomic::Ordering;

use serde::{Deserialize, Serialize};
use slog_global::{info, warn};

use super::increment::{MetaDelta, MetaIncrement};
use super::lease::now_ms;
use super::CoordinatorControl;
use crate::error::{ErrorCode, Result, ServerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistrationKind {
    Backup,
    Restore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub holder: String,
    pub expire_ms: u64,
}

/// Result of a safe-point update: the global value now in force and the
/// gc-stop flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafePointState {
    pub gc_safe_point: u64,
    pub gc_stop: bool,
}

impl CoordinatorControl {
    /// Monotonically advances the safe points; regressions are clamped to
    /// the current values rather than applied.
    pub fn update_gc_safe_point(
        &self,
        safe_point: u64,
        tenant_safe_points: Vec<(u64, u64)>,
        resolve_lock_safe_point: u64,
    ) -> Result<SafePointState> {
        let current = self.gc_safe_point.load(Ordering::Acquire);
        let clamped_global = safe_point.max(current);
        if safe_point < current {
            warn!(
                "refusing gc safe point regression";
                "proposed" => safe_point,
                "current" => current
            );
        }
        let clamped_resolve = resolve_lock_safe_point
            .max(self.resolve_lock_safe_point.load(Ordering::Acquire));
        let clamped_tenants: Vec<(u64, u64)> = tenant_safe_points
            .into_iter()
            .map(|(tenant, proposed)| {
                let current = self.tenant_safe_points.get(&tenant).unwrap_or(0);
                (tenant, proposed.max(current))
            })
            .collect();
        self.submit_increment(MetaIncrement {
            deltas: vec![MetaDelta::GcSafePoint {
                safe_point: clamped_global,
                tenant_safe_points: clamped_tenants,
                resolve_lock_safe_point: clamped_resolve,
            }],
        })?;
        Ok(SafePointState {
            gc_safe_point: self.gc_safe_point.load(Ordering::Acquire),
            gc_stop: self.gc_stop.load(Ordering::Acquire),
        })
    }

    pub(crate) fn apply_gc_safe_point(
        &self,
        safe_point: u64,
        tenant_safe_points: &[(u64, u64)],
        resolve_lock_safe_point: u64,
    ) {
        let current = self.gc_safe_point.load(Ordering::Acquire);
        self.gc_safe_point
            .store(safe_point.max(current), Ordering::Release);
        let current = self.resolve_lock_safe_point.load(Ordering::Acquire);
        self.resolve_lock_safe_point
            .store(resolve_lock_safe_point.max(current), Ordering::Release);
        for (tenant, proposed) in tenant_safe_points {
            let current = self.tenant_safe_points.get(tenant).unwrap_or(0);
            self.tenant_safe_points.put(*tenant, (*proposed).max(current));
        }
    }

    pub fn gc_safe_point(&self) -> u64 {
        self.gc_safe_point.load(Ordering::Acquire)
    }

    pub fn tenant_safe_point(&self, tenant_id: u64) -> u64 {
        self.tenant_safe_points.get(&tenant_id).unwrap_or(0)
    }

    pub fn set_gc_stop(&self, stop: bool) -> Result<()> {
        self.submit_increment(MetaIncrement {
            deltas: vec![MetaDelta::GcStop(stop)],
        })
    }

    /// Maintenance switch: refuse writes cluster-wide while reads keep
    /// flowing. The reason string travels back in every rejection.
    pub fn config_coordinator(&self, force_read_only: bool, reason: &str) -> Result<()> {
        self.submit_increment(MetaIncrement {
            deltas: vec![MetaDelta::ForceReadOnly {
                on: force_read_only,
                reason: reason.to_owned(),
            }],
        })?;
        info!("force read-only updated"; "on" => force_read_only, "reason" => reason);
        Ok(())
    }

    pub fn force_read_only_state(&self) -> (bool, String) {
        self.force_read_only.lock().clone()
    }

    /// Takes the single-holder registration for a backup or restore.
    /// Conflicting operations, or a second holder, get BUSY until the
    /// current registration is released or its TTL lapses.
    pub fn register_operation(
        &self,
        kind: RegistrationKind,
        holder: &str,
        timeout_ms: u64,
    ) -> Result<()> {
        let now = now_ms();
        let mut registrations = self.registrations.lock();
        registrations.retain(|_, r| r.expire_ms > now);
        let conflicting = match kind {
            RegistrationKind::Backup => RegistrationKind::Restore,
            RegistrationKind::Restore => RegistrationKind::Backup,
        };
        if let Some(active) = registrations.get(&conflicting) {
            return Err(ServerError::new(
                ErrorCode::Busy,
                format!("{:?} in progress by {}", conflicting, active.holder),
            ));
        }
        match registrations.get(&kind) {
            Some(active) if active.holder != holder => Err(ServerError::new(
                ErrorCode::Busy,
                format!("{:?} in progress by {}", kind, active.holder),
            )),
            _ => {
                registrations.insert(
                    kind,
                    Registration {
                        holder: holder.to_owned(),
                        expire_ms: now + timeout_ms,
                    },
                );
                Ok(())
            }
        }
    }

    pub fn unregister_operation(&self, kind: RegistrationKind, holder: &str) -> Result<()> {
        let mut registrations = self.registrations.lock();
        match registrations.get(&kind) {
            Some(active) if active.holder == holder => {
                registrations.remove(&kind);
                Ok(())
            }
            Some(active) => Err(ServerError::new(
                ErrorCode::Busy,
                format!("{:?} held by {}", kind, active.holder),
            )),
            None => Ok(()),
        }
    }

    /// Active registrations, expired ones swept.
    pub fn registration_status(&self) -> Vec<(RegistrationKind, Registration)> {
        let now = now_ms();
        let mut registrations = self.registrations.lock();
        registrations.retain(|_, r| r.expire_ms > now);
        let mut out: Vec<(RegistrationKind, Registration)> = registrations
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        out.sort_by_key(|(k, _)| format!("{:?}", k));
        out
    }
}

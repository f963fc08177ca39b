// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! The revisioned metadata kv: keys index into generations of revisions,
//! every revision is a full record, and mutation happens only inside the
//! coordinator's replicated apply. The semantics follow the etcd data
//! model: a generation is one lifecycle of a key between two deletes, a
//! trailing empty generation is a tombstone.

use serde::{Deserialize, Serialize};
use slog_global::{info, warn};

use super::ids::IdEpochType;
use super::increment::{MetaDelta, MetaIncrement};
use super::watch::WatchEventType;
use super::CoordinatorControl;
use crate::error::{ErrorCode, Result, ServerError};

/// `(main, sub)`: main advances per applied increment batch, sub per
/// operation within a batch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Revision {
    pub main: u64,
    pub sub: u64,
}

impl Revision {
    pub fn new(main: u64, sub: u64) -> Revision {
        Revision { main, sub }
    }

    /// 17 bytes: `main (8, BE) ++ b'_' ++ sub (8, BE)`, ordered like the
    /// `(main, sub)` pair itself.
    pub fn to_bytes(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(17);
        out.extend_from_slice(&self.main.to_be_bytes());
        out.push(b'_');
        out.extend_from_slice(&self.sub.to_be_bytes());
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Revision> {
        if data.len() != 17 || data[8] != b'_' {
            return Err(ServerError::new(
                ErrorCode::Internal,
                format!("bad revision encoding of {} bytes", data.len()),
            ));
        }
        let main = u64::from_be_bytes(data[0..8].try_into().unwrap_or_default());
        let sub = u64::from_be_bytes(data[9..17].try_into().unwrap_or_default());
        Ok(Revision { main, sub })
    }
}

/// One lifecycle of a key. `create_revision == None` only in the trailing
/// tombstone generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub create_revision: Option<Revision>,
    pub version: u64,
    pub revisions: Vec<Revision>,
}

impl Generation {
    pub fn is_live(&self) -> bool {
        self.create_revision.is_some() && !self.revisions.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KvIndex {
    pub id: Vec<u8>,
    pub mod_revision: Revision,
    pub generations: Vec<Generation>,
}

impl KvIndex {
    /// Whether the key currently holds a live value.
    pub fn is_live(&self) -> bool {
        self.generations.last().map(Generation::is_live).unwrap_or(false)
    }
}

/// The full record stored per revision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KvInternal {
    pub id: Vec<u8>,
    pub value: Vec<u8>,
    pub create_revision: Revision,
    pub mod_revision: Revision,
    pub version: u64,
    pub lease: u64,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KvRev {
    /// The encoded revision this record was written at.
    pub id: Vec<u8>,
    pub kv: KvInternal,
}

/// The client-visible row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Kv {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub create_revision: u64,
    pub mod_revision: u64,
    pub version: u64,
    pub lease: u64,
}

impl CoordinatorControl {
    fn kv_from_rev(&self, rev: &KvRev, keys_only: bool) -> Kv {
        Kv {
            key: rev.kv.id.clone(),
            value: if keys_only {
                vec![]
            } else {
                rev.kv.value.clone()
            },
            create_revision: rev.kv.create_revision.main,
            mod_revision: rev.kv.mod_revision.main,
            version: rev.kv.version,
            lease: rev.kv.lease,
        }
    }

    /// Point / range / prefix read. Empty `range_end` is a point get; a
    /// single zero byte means right-open from `key`; otherwise the range
    /// is `[key, range_end)`. `limit == 0` is unlimited.
    pub fn kv_range(
        &self,
        key: &[u8],
        range_end: &[u8],
        limit: u64,
        keys_only: bool,
        count_only: bool,
    ) -> Result<(Vec<Kv>, u64)> {
        let limit = if limit == 0 { u64::MAX } else { limit };
        let mut indexes: Vec<KvIndex> = if range_end.is_empty() {
            match self.kv_index_map.get(&key.to_vec()) {
                Some(index) if index.is_live() => vec![index],
                _ => vec![],
            }
        } else if range_end.len() == 1 && range_end[0] == 0 {
            self.kv_index_map
                .get_all_values(|index| index.is_live() && index.id.as_slice() >= key)
        } else {
            self.kv_index_map.get_all_values(|index| {
                index.is_live() && index.id.as_slice() >= key && index.id.as_slice() < range_end
            })
        };
        indexes.sort_by(|a, b| a.id.cmp(&b.id));

        let total = indexes.len() as u64;
        if count_only {
            return Ok((vec![], total));
        }
        let mut rows = Vec::new();
        for index in indexes.into_iter().take(limit as usize) {
            let rev_key = index.mod_revision.to_bytes();
            match self.kv_rev_map.get(&rev_key) {
                Some(rev) => rows.push(self.kv_from_rev(&rev, keys_only)),
                None => warn!("kv index without revision record"; "mod_revision" => ?index.mod_revision),
            }
        }
        Ok((rows, total))
    }

    /// Validates and drafts a PUT. Returns `(prev_kv, revision_main)`.
    pub fn kv_put(
        &self,
        key: &[u8],
        value: Vec<u8>,
        lease_id: u64,
        need_prev_kv: bool,
        ignore_value: bool,
        ignore_lease: bool,
    ) -> Result<(Option<Kv>, u64)> {
        if key.is_empty() {
            return Err(ServerError::new(ErrorCode::KeyEmpty, "put with empty key"));
        }
        if key.len() > self.config.max_kv_key_size {
            return Err(ServerError::new(
                ErrorCode::IllegalParameters,
                format!("key length {} over {}", key.len(), self.config.max_kv_key_size),
            ));
        }
        if !ignore_value && value.len() > self.config.max_kv_value_size {
            return Err(ServerError::new(
                ErrorCode::IllegalParameters,
                format!(
                    "value length {} over {}",
                    value.len(),
                    self.config.max_kv_value_size
                ),
            ));
        }

        let _serial = self.kv_submit_lock.lock();
        let (prev, _) = self.kv_range(key, &[], 1, false, false)?;
        let prev_kv = prev.into_iter().next();

        let mut effective_lease = lease_id;
        if ignore_lease {
            match &prev_kv {
                Some(prev) => effective_lease = prev.lease,
                None => {
                    return Err(ServerError::new(
                        ErrorCode::KeyNotFound,
                        "ignore_lease put on a missing key",
                    ));
                }
            }
        } else if lease_id != 0 {
            self.lease_query(lease_id)?;
        }
        if ignore_value && prev_kv.is_none() {
            return Err(ServerError::new(
                ErrorCode::KeyNotFound,
                "ignore_value put on a missing key",
            ));
        }

        let main = self.next_revision_main();
        let op_revision = Revision::new(main, 0);
        let mut deltas = vec![MetaDelta::IdAlloc {
            id_type: IdEpochType::Revision,
            count: 1,
        }];
        if effective_lease != 0 {
            deltas.push(MetaDelta::LeaseBindKey {
                lease_id: effective_lease,
                key: key.to_vec(),
            });
        }
        deltas.push(MetaDelta::KvPut {
            key: key.to_vec(),
            op_revision,
            ignore_lease,
            lease_id: effective_lease,
            ignore_value,
            value: if ignore_value { vec![] } else { value },
        });
        self.submit_increment(MetaIncrement { deltas })?;
        Ok((if need_prev_kv { prev_kv } else { None }, main))
    }

    /// Drafts tombstones for every live key in the range. Returns the
    /// previous rows when requested.
    pub fn kv_delete_range(
        &self,
        key: &[u8],
        range_end: &[u8],
        need_prev_kv: bool,
        need_lease_remove_keys: bool,
    ) -> Result<(Vec<Kv>, u64)> {
        let _serial = self.kv_submit_lock.lock();
        let (rows, _) = self.kv_range(key, range_end, 0, false, false)?;
        if rows.is_empty() {
            return Ok((vec![], 0));
        }
        let main = self.next_revision_main();
        let mut deltas = vec![MetaDelta::IdAlloc {
            id_type: IdEpochType::Revision,
            count: 1,
        }];
        for (sub, row) in rows.iter().enumerate() {
            if need_lease_remove_keys && row.lease != 0 {
                deltas.push(MetaDelta::LeaseUnbindKey {
                    lease_id: row.lease,
                    key: row.key.clone(),
                });
            }
            deltas.push(MetaDelta::KvDelete {
                key: row.key.clone(),
                op_revision: Revision::new(main, sub as u64),
            });
        }
        self.submit_increment(MetaIncrement { deltas })?;
        let deleted = rows.len() as u64;
        Ok((if need_prev_kv { rows } else { vec![] }, deleted))
    }

    /// Drops revisions strictly older than `revision`, keeping each key's
    /// newest record.
    pub fn kv_compact(&self, revision: u64) -> Result<u64> {
        let _serial = self.kv_submit_lock.lock();
        self.submit_increment(MetaIncrement {
            deltas: vec![MetaDelta::KvCompact { revision }],
        })?;
        Ok(revision)
    }

    // Apply side; only ever called from the replicated apply path.

    pub(crate) fn kv_put_apply(
        &self,
        key: &[u8],
        op_revision: Revision,
        ignore_lease: bool,
        lease_id: u64,
        ignore_value: bool,
        value: &[u8],
    ) {
        let mut index = self
            .kv_index_map
            .get(&key.to_vec())
            .unwrap_or_else(|| KvIndex {
                id: key.to_vec(),
                ..Default::default()
            });
        let last_mod_revision = index.mod_revision;

        let mut prev_kv = None;
        let (create_revision, version) = match index.generations.last_mut() {
            Some(generation) if generation.create_revision.is_some() => {
                generation.revisions.push(op_revision);
                generation.version += 1;
                // The only case where a previous record is visible.
                prev_kv = self
                    .kv_rev_map
                    .get(&last_mod_revision.to_bytes())
                    .filter(|rev| !rev.kv.is_deleted)
                    .map(|rev| self.kv_from_rev(&rev, false));
                (
                    generation.create_revision.unwrap_or(op_revision),
                    generation.version,
                )
            }
            Some(generation) => {
                // Trailing tombstone: this put starts the next lifecycle.
                generation.create_revision = Some(op_revision);
                generation.version = 1;
                generation.revisions.push(op_revision);
                (op_revision, 1)
            }
            None => {
                index.generations.push(Generation {
                    create_revision: Some(op_revision),
                    version: 1,
                    revisions: vec![op_revision],
                });
                (op_revision, 1)
            }
        };
        index.mod_revision = op_revision;

        let last_rev = self.kv_rev_map.get(&last_mod_revision.to_bytes());
        let effective_value = if ignore_value {
            last_rev.as_ref().map(|r| r.kv.value.clone()).unwrap_or_default()
        } else {
            value.to_vec()
        };
        let effective_lease = if ignore_lease {
            last_rev.as_ref().map(|r| r.kv.lease).unwrap_or_default()
        } else {
            lease_id
        };
        let kv_rev = KvRev {
            id: op_revision.to_bytes(),
            kv: KvInternal {
                id: key.to_vec(),
                value: effective_value,
                create_revision,
                mod_revision: op_revision,
                version,
                lease: effective_lease,
                is_deleted: false,
            },
        };

        self.kv_index_map.put(key.to_vec(), index);
        self.kv_rev_map.put(op_revision.to_bytes(), kv_rev.clone());
        info!("kv put applied"; "revision" => ?op_revision);

        let new_kv = self.kv_from_rev(&kv_rev, false);
        self.trigger_one_watch(key, WatchEventType::Put, new_kv, prev_kv);
    }

    pub(crate) fn kv_delete_apply(&self, key: &[u8], op_revision: Revision) {
        let mut index = match self.kv_index_map.get(&key.to_vec()) {
            Some(index) => index,
            // Nothing to delete; not an error.
            None => return,
        };
        let last_mod_revision = index.mod_revision;

        let mut prev_kv = None;
        let (create_revision, version) = match index.generations.last_mut() {
            Some(generation) if generation.create_revision.is_some() => {
                generation.revisions.push(op_revision);
                generation.version += 1;
                prev_kv = self
                    .kv_rev_map
                    .get(&last_mod_revision.to_bytes())
                    .filter(|rev| !rev.kv.is_deleted)
                    .map(|rev| self.kv_from_rev(&rev, false));
                let result = (
                    generation.create_revision.unwrap_or(op_revision),
                    generation.version,
                );
                // Tombstone: a fresh empty generation ends the lifecycle.
                index.generations.push(Generation::default());
                result
            }
            Some(_) => {
                // Already tombstoned; the generation list stays as is.
                return;
            }
            None => {
                index.generations.push(Generation::default());
                (op_revision, 1)
            }
        };
        index.mod_revision = op_revision;

        let kv_rev = KvRev {
            id: op_revision.to_bytes(),
            kv: KvInternal {
                id: key.to_vec(),
                value: vec![],
                create_revision,
                mod_revision: op_revision,
                version,
                lease: 0,
                is_deleted: true,
            },
        };
        self.kv_index_map.put(key.to_vec(), index);
        self.kv_rev_map.put(op_revision.to_bytes(), kv_rev.clone());
        info!("kv delete applied"; "revision" => ?op_revision);

        let new_kv = self.kv_from_rev(&kv_rev, false);
        self.trigger_one_watch(key, WatchEventType::Delete, new_kv, prev_kv);
    }

    pub(crate) fn kv_compact_apply(&self, revision: u64) {
        let cutoff = Revision::new(revision, 0);
        for (rev_key, rev) in self.kv_rev_map.get_all_key_values() {
            let rev_revision = match Revision::from_bytes(&rev_key) {
                Ok(r) => r,
                Err(_) => continue,
            };
            if rev_revision >= cutoff {
                continue;
            }
            // Keep each key's newest record.
            let is_newest = self
                .kv_index_map
                .get(&rev.kv.id)
                .map(|index| index.mod_revision == rev_revision)
                .unwrap_or(false);
            if !is_newest {
                self.kv_rev_map.erase(&rev_key);
            }
        }
    }
}

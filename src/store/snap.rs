// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! Region snapshots: a `region_meta` manifest plus one `*.dingo_sst`
//! payload per CF shard, chunked for transport. The raft layer moves the
//! encoded payload; this module builds it from an engine snapshot and
//! applies it onto a replica.

use engine_traits::{
    Iterable, Modify, Range, RawEngine, CF_DEFAULT, CF_TXN_DATA, CF_TXN_LOCK, CF_TXN_WRITE,
};
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::common::constant::FILE_TRANSPORT_CHUNK_SIZE;
use crate::error::Result;
use crate::store::meta::PersistedRegion;

/// CFs carried by a region snapshot.
const SNAPSHOT_CFS: &[&str] = &[CF_DEFAULT, CF_TXN_DATA, CF_TXN_LOCK, CF_TXN_WRITE];

/// Transactional CFs store keys in encoded form, so a region's raw range
/// must be translated before scanning them.
pub fn region_cf_range(cf: &str, range: &Range) -> Range {
    if engine_traits::TXN_CFS.contains(&cf) {
        Range::new(
            dingo_util::codec::bytes::encode_bytes(&range.start),
            dingo_util::codec::bytes::encode_bytes(&range.end),
        )
    } else {
        range.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFile {
    /// `{cf}_{shard}.dingo_sst`.
    pub name: String,
    pub cf: String,
    pub kvs: Vec<(Vec<u8>, Vec<u8>)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSnapshotPayload {
    /// The `region_meta` manifest.
    pub region_meta: PersistedRegion,
    pub files: Vec<SnapshotFile>,
}

impl RegionSnapshotPayload {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(codec::encode_default(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<RegionSnapshotPayload> {
        Ok(codec::decode(data)?)
    }
}

/// Scans the region's slice of every data CF out of a point-in-time engine
/// snapshot, sharding each CF at the transport chunk size.
pub fn build_region_snapshot<E: RawEngine>(
    engine: &E,
    region_meta: &PersistedRegion,
) -> Result<RegionSnapshotPayload> {
    let snapshot = engine.snapshot();
    let mut files = Vec::new();
    for cf in SNAPSHOT_CFS {
        let range = region_cf_range(cf, &region_meta.definition.range);
        if range.start.is_empty() || range.end.is_empty() {
            continue;
        }
        let kvs = snapshot.scan_cf(cf, &range.start, &range.end, 0, false)?;
        let mut shard = 0;
        let mut current: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        let mut current_bytes = 0usize;
        for (key, value) in kvs {
            current_bytes += key.len() + value.len();
            current.push((key, value));
            if current_bytes >= FILE_TRANSPORT_CHUNK_SIZE {
                files.push(SnapshotFile {
                    name: format!("{}_{}{}", cf, shard, keys::SNAPSHOT_DATA_FILE_SUFFIX),
                    cf: (*cf).to_owned(),
                    kvs: std::mem::take(&mut current),
                });
                shard += 1;
                current_bytes = 0;
            }
        }
        if !current.is_empty() {
            files.push(SnapshotFile {
                name: format!("{}_{}{}", cf, shard, keys::SNAPSHOT_DATA_FILE_SUFFIX),
                cf: (*cf).to_owned(),
                kvs: current,
            });
        }
    }
    Ok(RegionSnapshotPayload {
        region_meta: region_meta.clone(),
        files,
    })
}

/// Installs a snapshot: clears the region's slice of each CF, then writes
/// the shards. The whole install is one atomic engine write, so a reader
/// never observes a half-installed region.
pub fn apply_region_snapshot<E: RawEngine>(
    engine: &E,
    payload: &RegionSnapshotPayload,
) -> Result<()> {
    let mut batch = Vec::new();
    for cf in SNAPSHOT_CFS {
        let range = region_cf_range(cf, &payload.region_meta.definition.range);
        if range.start.is_empty() || range.end.is_empty() {
            continue;
        }
        if let Some(cf_name) = engine_traits::name_to_cf(cf) {
            batch.push(Modify::DeleteRange(cf_name, range.start, range.end));
        }
    }
    for file in &payload.files {
        if let Some(cf_name) = engine_traits::name_to_cf(&file.cf) {
            for (key, value) in &file.kvs {
                batch.push(Modify::Put(cf_name, key.clone(), value.clone()));
            }
        }
    }
    engine.write(batch)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use engine_memory::MemoryEngineBuilder;
    use engine_traits::Peekable;

    use crate::common::meta::{
        Location, Peer, PeerRole, RegionDefinition, RegionEpoch, RegionState, RegionType,
    };

    use super::*;

    fn region_meta(start: &[u8], end: &[u8]) -> PersistedRegion {
        PersistedRegion {
            definition: RegionDefinition {
                region_id: 1,
                epoch: RegionEpoch::new(1, 1),
                range: Range::new(start.to_vec(), end.to_vec()),
                peers: vec![Peer {
                    peer_id: 101,
                    store_id: 1,
                    role: PeerRole::Voter,
                    server_location: Location::new("s1", 20160),
                    raft_location: Location::new("s1", 20161),
                }],
                region_type: RegionType::Store,
                tenant_id: 0,
                index_parameter: None,
            },
            state: RegionState::Normal,
        }
    }

    #[test]
    fn test_snapshot_roundtrip_between_engines() {
        let source = MemoryEngineBuilder::new().build();
        source.put_cf(CF_DEFAULT, b"r:a", b"1").unwrap();
        source.put_cf(CF_DEFAULT, b"r:m", b"2").unwrap();
        // Outside the region: must not travel.
        source.put_cf(CF_DEFAULT, b"w:x", b"other").unwrap();

        let meta = region_meta(b"r:a", b"r:z");
        let payload = build_region_snapshot(&source, &meta).unwrap();
        assert!(payload
            .files
            .iter()
            .all(|f| f.name.ends_with(keys::SNAPSHOT_DATA_FILE_SUFFIX)));

        let target = MemoryEngineBuilder::new().build();
        // Stale data in range must be cleared by the install.
        target.put_cf(CF_DEFAULT, b"r:stale", b"x").unwrap();
        apply_region_snapshot(&target, &payload).unwrap();
        assert_eq!(target.get_value(b"r:a").unwrap().unwrap(), b"1");
        assert_eq!(target.get_value(b"r:m").unwrap().unwrap(), b"2");
        assert_eq!(target.get_value(b"r:stale").unwrap(), None);
        assert_eq!(target.get_value(b"w:x").unwrap(), None);
    }

    #[test]
    fn test_payload_encode_decode() {
        let source = MemoryEngineBuilder::new().build();
        source.put_cf(CF_DEFAULT, b"r:k", b"v").unwrap();
        let payload = build_region_snapshot(&source, &region_meta(b"r:a", b"r:z")).unwrap();
        let decoded = RegionSnapshotPayload::decode(&payload.encode().unwrap()).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_txn_cf_range_is_encoded() {
        let raw = Range::new(b"t:a".to_vec(), b"t:z".to_vec());
        let encoded = region_cf_range(CF_TXN_WRITE, &raw);
        assert_ne!(encoded, raw);
        let default = region_cf_range(CF_DEFAULT, &raw);
        assert_eq!(default, raw);
    }
}

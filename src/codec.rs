// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! The pluggable codec for persisted metadata (region definitions, raft
//! state, region cmds, metrics snapshots). Only this module knows the wire
//! format; everything else moves typed values. V1 is the self-describing
//! JSON format; V2 reserves a denser format and currently decodes as V1.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("encode: {0}")]
    Encode(String),
    #[error("decode: {0}")]
    Decode(String),
    #[error("unknown codec version {0}")]
    UnknownVersion(u8),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecVersion {
    #[default]
    V1,
    V2,
}

impl CodecVersion {
    fn tag(self) -> u8 {
        match self {
            CodecVersion::V1 => 1,
            CodecVersion::V2 => 2,
        }
    }

    fn from_tag(tag: u8) -> Result<CodecVersion> {
        match tag {
            1 => Ok(CodecVersion::V1),
            2 => Ok(CodecVersion::V2),
            other => Err(Error::UnknownVersion(other)),
        }
    }
}

/// Encodes `value` with a one-byte version tag in front.
pub fn encode<T: Serialize>(version: CodecVersion, value: &T) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(value).map_err(|e| Error::Encode(e.to_string()))?;
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(version.tag());
    out.extend_from_slice(&body);
    Ok(out)
}

pub fn encode_default<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    encode(CodecVersion::default(), value)
}

pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    let (tag, body) = data.split_first().ok_or_else(|| {
        Error::Decode("empty buffer".to_owned())
    })?;
    match CodecVersion::from_tag(*tag)? {
        // V2 payloads are written by newer deployments with the same JSON
        // body; the tag is what differs.
        CodecVersion::V1 | CodecVersion::V2 => {
            serde_json::from_slice(body).map_err(|e| Error::Decode(e.to_string()))
        }
    }
}

// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

use std::io::{Read, Write};
use std::path::Path;

use slog_global::warn;

use crate::metrics::ENGINE_RETRY_COUNTER;
use crate::{Error, Result, MAX_DEADLOCK_RETRIES};

/// Re-drives `f` while it reports a retryable failure, up to `max` attempts.
/// The operation must be idempotent; the caller sees either the first
/// non-retryable outcome or `Error::Deadlock` once attempts are exhausted.
pub fn retry_on_deadlock<T, F>(op: &str, max: usize, mut f: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 0;
    loop {
        match f() {
            Err(e) if e.is_retryable() => {
                attempt += 1;
                ENGINE_RETRY_COUNTER.with_label_values(&[op]).inc();
                if attempt >= max {
                    warn!("engine retries exhausted"; "op" => op, "attempts" => attempt);
                    return Err(Error::Deadlock);
                }
            }
            other => return other,
        }
    }
}

pub fn retry_default<T, F>(op: &str, f: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    retry_on_deadlock(op, MAX_DEADLOCK_RETRIES, f)
}

/// Minimal sorted-file format for bulk ingest: a count followed by
/// length-prefixed key/value pairs, everything big-endian.
pub fn write_external_file(path: &Path, kvs: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(kvs.len() as u32).to_be_bytes());
    for (k, v) in kvs {
        buf.extend_from_slice(&(k.len() as u32).to_be_bytes());
        buf.extend_from_slice(k);
        buf.extend_from_slice(&(v.len() as u32).to_be_bytes());
        buf.extend_from_slice(v);
    }
    let mut file = std::fs::File::create(path)
        .map_err(|e| Error::Exception(format!("create {}: {}", path.display(), e)))?;
    file.write_all(&buf)
        .map_err(|e| Error::Exception(format!("write {}: {}", path.display(), e)))
}

pub fn read_external_file(path: &Path) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut data = Vec::new();
    std::fs::File::open(path)
        .and_then(|mut f| f.read_to_end(&mut data))
        .map_err(|e| Error::Exception(format!("read {}: {}", path.display(), e)))?;
    let mut pos = 0usize;
    let take = |pos: &mut usize, n: usize| -> Result<&[u8]> {
        if *pos + n > data.len() {
            return Err(Error::Exception(format!(
                "truncated external file {}",
                path.display()
            )));
        }
        let s = &data[*pos..*pos + n];
        *pos += n;
        Ok(s)
    };
    let count = u32::from_be_bytes(take(&mut pos, 4)?.try_into().unwrap()) as usize;
    let mut kvs = Vec::with_capacity(count);
    for _ in 0..count {
        let klen = u32::from_be_bytes(take(&mut pos, 4)?.try_into().unwrap()) as usize;
        let key = take(&mut pos, klen)?.to_vec();
        let vlen = u32::from_be_bytes(take(&mut pos, 4)?.try_into().unwrap()) as usize;
        let value = take(&mut pos, vlen)?.to_vec();
        kvs.push((key, value));
    }
    Ok(kvs)
}

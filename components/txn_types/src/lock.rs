// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

use byteorder::{BigEndian, ByteOrder};

use crate::{Error, Mutation, Result, TimeStamp, TsSet, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    Put,
    Delete,
    /// Read fence left by a prewrite that writes no value.
    Lock,
    /// Taken before prewrite by pessimistic transactions.
    Pessimistic,
}

const FLAG_PUT: u8 = b'P';
const FLAG_DELETE: u8 = b'D';
const FLAG_LOCK: u8 = b'L';
const FLAG_PESSIMISTIC: u8 = b'S';

const SHORT_VALUE_PREFIX: u8 = b'v';
const FOR_UPDATE_TS_PREFIX: u8 = b'f';
const TXN_SIZE_PREFIX: u8 = b't';

impl LockType {
    pub fn from_mutation(mutation: &Mutation) -> Option<LockType> {
        match mutation {
            Mutation::Put(..) => Some(LockType::Put),
            Mutation::Delete(..) => Some(LockType::Delete),
            Mutation::Lock(..) => Some(LockType::Lock),
            Mutation::CheckNotExists(..) => None,
        }
    }

    fn from_u8(b: u8) -> Option<LockType> {
        match b {
            FLAG_PUT => Some(LockType::Put),
            FLAG_DELETE => Some(LockType::Delete),
            FLAG_LOCK => Some(LockType::Lock),
            FLAG_PESSIMISTIC => Some(LockType::Pessimistic),
            _ => None,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            LockType::Put => FLAG_PUT,
            LockType::Delete => FLAG_DELETE,
            LockType::Lock => FLAG_LOCK,
            LockType::Pessimistic => FLAG_PESSIMISTIC,
        }
    }
}

/// The record in the `lock` CF marking an in-progress transaction's claim
/// on a key.
#[derive(Debug, Clone, PartialEq)]
pub struct Lock {
    pub lock_type: LockType,
    pub primary: Vec<u8>,
    pub ts: TimeStamp,
    pub ttl: u64,
    pub short_value: Option<Value>,
    /// Non-zero iff the lock belongs to a pessimistic transaction.
    pub for_update_ts: TimeStamp,
    pub txn_size: u64,
}

impl Lock {
    pub fn new(
        lock_type: LockType,
        primary: Vec<u8>,
        ts: TimeStamp,
        ttl: u64,
        short_value: Option<Value>,
        for_update_ts: TimeStamp,
        txn_size: u64,
    ) -> Lock {
        Lock {
            lock_type,
            primary,
            ts,
            ttl,
            short_value,
            for_update_ts,
            txn_size,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut b = Vec::with_capacity(1 + 4 + self.primary.len() + 16 + 24);
        b.push(self.lock_type.to_u8());
        let mut len = [0; 4];
        BigEndian::write_u32(&mut len, self.primary.len() as u32);
        b.extend_from_slice(&len);
        b.extend_from_slice(&self.primary);
        let mut num = [0; 8];
        BigEndian::write_u64(&mut num, self.ts.into_inner());
        b.extend_from_slice(&num);
        BigEndian::write_u64(&mut num, self.ttl);
        b.extend_from_slice(&num);
        if let Some(v) = &self.short_value {
            b.push(SHORT_VALUE_PREFIX);
            b.push(v.len() as u8);
            b.extend_from_slice(v);
        }
        if !self.for_update_ts.is_zero() {
            b.push(FOR_UPDATE_TS_PREFIX);
            BigEndian::write_u64(&mut num, self.for_update_ts.into_inner());
            b.extend_from_slice(&num);
        }
        if self.txn_size > 0 {
            b.push(TXN_SIZE_PREFIX);
            BigEndian::write_u64(&mut num, self.txn_size);
            b.extend_from_slice(&num);
        }
        b
    }

    pub fn parse(mut data: &[u8]) -> Result<Lock> {
        let lock_type = LockType::from_u8(take_u8(&mut data)?).ok_or(Error::BadFormatLock)?;
        let primary_len = take_u32(&mut data)? as usize;
        let primary = take_bytes(&mut data, primary_len)?.to_vec();
        let ts = TimeStamp::new(take_u64(&mut data)?);
        let ttl = take_u64(&mut data)?;

        let mut lock = Lock::new(lock_type, primary, ts, ttl, None, TimeStamp::zero(), 0);
        while !data.is_empty() {
            match take_u8(&mut data)? {
                SHORT_VALUE_PREFIX => {
                    let len = take_u8(&mut data)? as usize;
                    lock.short_value = Some(take_bytes(&mut data, len)?.to_vec());
                }
                FOR_UPDATE_TS_PREFIX => {
                    lock.for_update_ts = TimeStamp::new(take_u64(&mut data)?);
                }
                TXN_SIZE_PREFIX => {
                    lock.txn_size = take_u64(&mut data)?;
                }
                _ => return Err(Error::BadFormatLock),
            }
        }
        Ok(lock)
    }

    pub fn is_pessimistic(&self) -> bool {
        self.lock_type == LockType::Pessimistic
    }

    /// Whether the lock is past its TTL at `current_ts`, comparing physical
    /// milliseconds the way the TSO composes them.
    pub fn is_expired(&self, current_ts: TimeStamp) -> bool {
        self.ts.physical() + self.ttl < current_ts.physical()
    }

    /// Whether a reader at `ts` must treat this lock as a conflict. Locks
    /// from later transactions, pessimistic placeholders and pure read
    /// fences never block a read; neither do locks whose transaction the
    /// reader already saw resolved.
    pub fn is_blocking_read(&self, ts: TimeStamp, resolved: &TsSet) -> bool {
        if self.ts > ts {
            return false;
        }
        if matches!(self.lock_type, LockType::Lock | LockType::Pessimistic) {
            return false;
        }
        !resolved.contains(self.ts)
    }
}

fn take_u8(data: &mut &[u8]) -> Result<u8> {
    let (first, rest) = data.split_first().ok_or(Error::BadFormatLock)?;
    *data = rest;
    Ok(*first)
}

fn take_u32(data: &mut &[u8]) -> Result<u32> {
    let bytes = take_bytes(data, 4)?;
    Ok(BigEndian::read_u32(bytes))
}

fn take_u64(data: &mut &[u8]) -> Result<u64> {
    let bytes = take_bytes(data, 8)?;
    Ok(BigEndian::read_u64(bytes))
}

fn take_bytes<'a>(data: &mut &'a [u8], len: usize) -> Result<&'a [u8]> {
    if data.len() < len {
        return Err(Error::BadFormatLock);
    }
    let (head, rest) = data.split_at(len);
    *data = rest;
    Ok(head)
}

// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

use byteorder::{BigEndian, ByteOrder};

use crate::{Error, LockType, Result, TimeStamp, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    Put,
    Delete,
    /// Commit record of a read fence; carries no value.
    Lock,
    /// Tombstone preventing the transaction from ever committing on this
    /// key.
    Rollback,
}

const FLAG_PUT: u8 = b'P';
const FLAG_DELETE: u8 = b'D';
const FLAG_LOCK: u8 = b'L';
const FLAG_ROLLBACK: u8 = b'R';

const SHORT_VALUE_PREFIX: u8 = b'v';

impl WriteType {
    pub fn from_lock_type(lock_type: LockType) -> Option<WriteType> {
        match lock_type {
            LockType::Put => Some(WriteType::Put),
            LockType::Delete => Some(WriteType::Delete),
            LockType::Lock => Some(WriteType::Lock),
            LockType::Pessimistic => None,
        }
    }

    fn from_u8(b: u8) -> Option<WriteType> {
        match b {
            FLAG_PUT => Some(WriteType::Put),
            FLAG_DELETE => Some(WriteType::Delete),
            FLAG_LOCK => Some(WriteType::Lock),
            FLAG_ROLLBACK => Some(WriteType::Rollback),
            _ => None,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            WriteType::Put => FLAG_PUT,
            WriteType::Delete => FLAG_DELETE,
            WriteType::Lock => FLAG_LOCK,
            WriteType::Rollback => FLAG_ROLLBACK,
        }
    }
}

/// The record in the `write` CF at `user_key ++ commit_ts`, pointing back at
/// the transaction's start_ts.
#[derive(Debug, Clone, PartialEq)]
pub struct Write {
    pub write_type: WriteType,
    pub start_ts: TimeStamp,
    pub short_value: Option<Value>,
}

impl Write {
    pub fn new(write_type: WriteType, start_ts: TimeStamp, short_value: Option<Value>) -> Write {
        Write {
            write_type,
            start_ts,
            short_value,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut b = Vec::with_capacity(9 + self.short_value.as_ref().map_or(0, |v| v.len() + 2));
        b.push(self.write_type.to_u8());
        let mut num = [0; 8];
        BigEndian::write_u64(&mut num, self.start_ts.into_inner());
        b.extend_from_slice(&num);
        if let Some(v) = &self.short_value {
            b.push(SHORT_VALUE_PREFIX);
            b.push(v.len() as u8);
            b.extend_from_slice(v);
        }
        b
    }

    pub fn parse(data: &[u8]) -> Result<Write> {
        WriteRef::parse(data).map(WriteRef::to_owned)
    }
}

/// Zero-copy view of an encoded write record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteRef<'a> {
    pub write_type: WriteType,
    pub start_ts: TimeStamp,
    pub short_value: Option<&'a [u8]>,
}

impl<'a> WriteRef<'a> {
    pub fn parse(data: &'a [u8]) -> Result<WriteRef<'a>> {
        if data.len() < 9 {
            return Err(Error::BadFormatWrite);
        }
        let write_type = WriteType::from_u8(data[0]).ok_or(Error::BadFormatWrite)?;
        let start_ts = TimeStamp::new(BigEndian::read_u64(&data[1..9]));
        let mut rest = &data[9..];
        let mut short_value = None;
        while !rest.is_empty() {
            match rest[0] {
                SHORT_VALUE_PREFIX => {
                    if rest.len() < 2 {
                        return Err(Error::BadFormatWrite);
                    }
                    let len = rest[1] as usize;
                    if rest.len() < 2 + len {
                        return Err(Error::BadFormatWrite);
                    }
                    short_value = Some(&rest[2..2 + len]);
                    rest = &rest[2 + len..];
                }
                _ => return Err(Error::BadFormatWrite),
            }
        }
        Ok(WriteRef {
            write_type,
            start_ts,
            short_value,
        })
    }

    pub fn to_owned(self) -> Write {
        Write::new(
            self.write_type,
            self.start_ts,
            self.short_value.map(|v| v.to_vec()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_roundtrip() {
        let writes = vec![
            Write::new(WriteType::Put, 100.into(), Some(b"v".to_vec())),
            Write::new(WriteType::Delete, 100.into(), None),
            Write::new(WriteType::Rollback, 7.into(), None),
            Write::new(WriteType::Lock, 1.into(), None),
        ];
        for write in writes {
            assert_eq!(Write::parse(&write.to_bytes()).unwrap(), write);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Write::parse(b"").is_err());
        assert!(Write::parse(b"Zxxxxxxxx").is_err());
        assert!(Write::parse(&[FLAG_PUT, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_from_lock_type() {
        assert_eq!(
            WriteType::from_lock_type(LockType::Put),
            Some(WriteType::Put)
        );
        assert_eq!(WriteType::from_lock_type(LockType::Pessimistic), None);
    }
}

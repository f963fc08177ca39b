// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

use byteorder::{BigEndian, ByteOrder};

use super::{Error, Result};

pub const U64_SIZE: usize = 8;

/// Encodes `v` in big-endian order, which preserves the unsigned ordering
/// under lexicographic byte comparison.
pub fn encode_u64(buf: &mut Vec<u8>, v: u64) {
    let mut data = [0; U64_SIZE];
    BigEndian::write_u64(&mut data, v);
    buf.extend_from_slice(&data);
}

/// Encodes `v` so that larger values order first. Used for timestamp
/// suffixes where the newest version must be seen first by a forward cursor.
pub fn encode_u64_desc(buf: &mut Vec<u8>, v: u64) {
    encode_u64(buf, !v);
}

pub fn decode_u64(data: &[u8]) -> Result<u64> {
    if data.len() < U64_SIZE {
        return Err(Error::BufferTooShort);
    }
    Ok(BigEndian::read_u64(data))
}

pub fn decode_u64_desc(data: &[u8]) -> Result<u64> {
    decode_u64(data).map(|v| !v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u64_order_preserved() {
        let mut small = vec![];
        let mut big = vec![];
        encode_u64(&mut small, 3);
        encode_u64(&mut big, 0xffff_0000);
        assert!(small < big);
        assert_eq!(decode_u64(&small).unwrap(), 3);
    }

    #[test]
    fn test_u64_desc_order_inverted() {
        let mut newer = vec![];
        let mut older = vec![];
        encode_u64_desc(&mut newer, 100);
        encode_u64_desc(&mut older, 1);
        assert!(newer < older);
        assert_eq!(decode_u64_desc(&newer).unwrap(), 100);
    }

    #[test]
    fn test_decode_short_buffer() {
        assert!(decode_u64(&[1, 2, 3]).is_err());
    }
}

// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! Memory-comparable byte encoding. The raw bytes are chopped into groups of
//! eight; every group is emitted in full, padded with zeroes, and followed by
//! a marker byte recording how many bytes of the group are payload. The
//! encoded form compares exactly like the raw form while never embedding a
//! raw terminator, so an encoded key can safely carry fixed-width suffixes
//! (timestamps) behind it.

use super::{Error, Result};

pub const ENC_GROUP_SIZE: usize = 8;
pub const ENC_MARKER: u8 = 0xff;
const ENC_PAD: u8 = 0x0;

/// Returns the size of the encoded form of a `len`-byte key.
pub fn max_encoded_bytes_size(len: usize) -> usize {
    (len / ENC_GROUP_SIZE + 1) * (ENC_GROUP_SIZE + 1)
}

pub fn encode_bytes(key: &[u8]) -> Vec<u8> {
    let cap = max_encoded_bytes_size(key.len());
    let mut encoded = Vec::with_capacity(cap);
    for chunk in key.chunks(ENC_GROUP_SIZE) {
        encoded.extend_from_slice(chunk);
        if chunk.len() == ENC_GROUP_SIZE {
            encoded.push(ENC_MARKER);
        } else {
            let pad = ENC_GROUP_SIZE - chunk.len();
            encoded.extend(std::iter::repeat(ENC_PAD).take(pad));
            encoded.push(ENC_MARKER - pad as u8);
        }
    }
    if key.len() % ENC_GROUP_SIZE == 0 {
        encoded.extend(std::iter::repeat(ENC_PAD).take(ENC_GROUP_SIZE));
        encoded.push(ENC_MARKER - ENC_GROUP_SIZE as u8);
    }
    encoded
}

/// Decodes a key produced by [`encode_bytes`], returning the raw key and the
/// number of encoded bytes consumed.
pub fn decode_bytes(data: &[u8]) -> Result<(Vec<u8>, usize)> {
    let mut key = Vec::with_capacity(data.len() / (ENC_GROUP_SIZE + 1) * ENC_GROUP_SIZE);
    let mut offset = 0;
    loop {
        let next = offset + ENC_GROUP_SIZE + 1;
        if next > data.len() {
            return Err(Error::KeyLength);
        }
        let group = &data[offset..next - 1];
        let marker = data[next - 1];
        let pad = (ENC_MARKER - marker) as usize;
        if pad > ENC_GROUP_SIZE {
            return Err(Error::KeyPadding);
        }
        let payload = ENC_GROUP_SIZE - pad;
        key.extend_from_slice(&group[..payload]);
        if pad > 0 {
            if group[payload..].iter().any(|b| *b != ENC_PAD) {
                return Err(Error::KeyPadding);
            }
            return Ok((key, next));
        }
        offset = next;
    }
}

/// Length of the encoded prefix at the head of `data`, without materializing
/// the decoded key.
pub fn encoded_bytes_len(data: &[u8]) -> Result<usize> {
    let mut offset = 0;
    loop {
        let next = offset + ENC_GROUP_SIZE + 1;
        if next > data.len() {
            return Err(Error::KeyLength);
        }
        let marker = data[next - 1];
        let pad = (ENC_MARKER - marker) as usize;
        if pad > ENC_GROUP_SIZE {
            return Err(Error::KeyPadding);
        }
        if pad > 0 {
            return Ok(next);
        }
        offset = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        for len in 0..20 {
            let key: Vec<u8> = (0..len as u8).collect();
            let encoded = encode_bytes(&key);
            let (decoded, read) = decode_bytes(&encoded).unwrap();
            assert_eq!(decoded, key);
            assert_eq!(read, encoded.len());
            assert_eq!(encoded_bytes_len(&encoded).unwrap(), encoded.len());
        }
    }

    #[test]
    fn test_encode_order_preserved() {
        let pairs = [
            (b"".to_vec(), b"\x00".to_vec()),
            (b"a".to_vec(), b"b".to_vec()),
            (b"abcdefgh".to_vec(), b"abcdefghi".to_vec()),
            (b"abcdefgh\x00".to_vec(), b"abcdefgi".to_vec()),
        ];
        for (a, b) in &pairs {
            assert!(encode_bytes(a) < encode_bytes(b), "{:?} {:?}", a, b);
        }
    }

    #[test]
    fn test_decode_with_suffix() {
        let key = b"key".to_vec();
        let mut encoded = encode_bytes(&key);
        let plain_len = encoded.len();
        encoded.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let (decoded, read) = decode_bytes(&encoded).unwrap();
        assert_eq!(decoded, key);
        assert_eq!(read, plain_len);
    }

    #[test]
    fn test_decode_bad_padding() {
        let mut encoded = encode_bytes(b"ab");
        let last_group_start = encoded.len() - ENC_GROUP_SIZE - 1;
        encoded[last_group_start + 5] = 1;
        assert!(decode_bytes(&encoded).is_err());
    }
}

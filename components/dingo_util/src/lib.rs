// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! Process-wide utilities shared by every crate in the workspace: codecs,
//! the read-mostly [`safe_map::SafeMap`], background [`worker`]s, readable
//! configuration types and logger bootstrap.

pub mod codec;
pub mod config;
pub mod logger;
pub mod safe_map;
pub mod time;
pub mod worker;

/// Byte size accounting for values stored in control-plane maps.
pub trait ByteSize {
    fn byte_size(&self) -> usize;
}

impl ByteSize for Vec<u8> {
    fn byte_size(&self) -> usize {
        self.len()
    }
}

impl ByteSize for String {
    fn byte_size(&self) -> usize {
        self.len()
    }
}

impl ByteSize for u64 {
    fn byte_size(&self) -> usize {
        std::mem::size_of::<u64>()
    }
}

impl ByteSize for i64 {
    fn byte_size(&self) -> usize {
        std::mem::size_of::<i64>()
    }
}

// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

pub mod bytes;
pub mod number;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("bad format key(length)")]
    KeyLength,
    #[error("bad format key(padding)")]
    KeyPadding,
    #[error("key not found")]
    KeyNotFound,
    #[error("buffer too short to decode")]
    BufferTooShort,
}

pub type Result<T> = std::result::Result<T, Error>;

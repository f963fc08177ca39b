// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("bad format lock data")]
    BadFormatLock,
    #[error("bad format write data")]
    BadFormatWrite,
    #[error("key codec: {0}")]
    Codec(#[from] dingo_util::codec::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

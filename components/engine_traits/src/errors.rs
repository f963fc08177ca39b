// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

use thiserror::Error;

/// The closed error set at the engine boundary. Whatever an engine throws
/// internally is mapped onto one of these before it crosses into the rest
/// of the process.
#[derive(Debug, Error)]
pub enum Error {
    /// A retryable conflict that survived every retry.
    #[error("engine deadlock, retry limit exhausted")]
    Deadlock,
    #[error("engine exception: {0}")]
    Exception(String),
    #[error("engine commit failed: {0}")]
    Commit(String),
    #[error("engine internal error: {0}")]
    Internal(String),
    #[error("key not found")]
    NotFound,
    #[error("empty key or empty range")]
    KeyEmpty,
    #[error("cf {0} not found")]
    CfName(String),
    #[error("unknown engine error: {0}")]
    Unknown(String),
}

impl Error {
    /// Whether the wrapper retry loop should re-drive the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Deadlock)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

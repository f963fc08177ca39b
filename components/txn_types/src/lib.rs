// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! Types shared by the transactional layer: timestamps from the TSO, the
//! encoded key form carrying a timestamp suffix, and the lock / write
//! records living in the `lock` and `write` column families.

mod errors;
pub use crate::errors::{Error, Result};
mod timestamp;
pub use crate::timestamp::{TimeStamp, TsSet};
mod types;
pub use crate::types::{Key, Mutation, Value, SHORT_VALUE_MAX_LEN};
mod lock;
pub use crate::lock::{Lock, LockType};
mod write;
pub use crate::write::{Write, WriteRef, WriteType};

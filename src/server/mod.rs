// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! Request acceptance: admission control over bounded worker sets, the
//! ordered validation ladder, and response closures that stamp timing and
//! redirect information onto every reply, including failed ones.

pub mod closure;
pub mod dispatch;
pub mod helper;

pub use self::closure::{Response, ServiceClosure};
pub use self::dispatch::{ServiceTask, WorkerSet, WorkerSets};

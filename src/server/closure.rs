// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! The response closure: created when a request is accepted, finished
//! exactly once when the response goes out — on success and on every
//! error path alike. Finishing stamps the tracker's timing block onto the
//! response, logs slow or failed requests, and optionally dumps the
//! request/response pair for postmortems.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use serde::Serialize;
use slog_global::{error, info, warn};

use crate::common::tracker::TimeInfo;
use crate::common::{Tracker, TrackerPtr};
use crate::error::ServerError;

/// Every RPC answer: payload or error, plus the timing block. Routing
/// errors carry their redirect target inside [`ServerError`].
#[derive(Debug, Clone, Serialize)]
pub struct Response<T> {
    pub payload: Option<T>,
    pub error: Option<ServerError>,
    pub time_info: TimeInfo,
}

impl<T> Response<T> {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Dump policy: where (and whether) request/response pairs land on disk.
#[derive(Debug, Clone, Default)]
pub struct DumpPolicy {
    pub enabled: bool,
    pub path: PathBuf,
}

impl DumpPolicy {
    fn dump<P: Serialize>(&self, name: &str, kind: &str, payload: &P) {
        if !self.enabled {
            return;
        }
        let file_name = self.path.join(format!("{}_{}.json", name, kind));
        let write = || -> std::io::Result<()> {
            fs::create_dir_all(&self.path)?;
            let mut file = fs::File::create(&file_name)?;
            let body = serde_json::to_vec_pretty(payload).unwrap_or_default();
            file.write_all(&body)
        };
        if let Err(e) = write() {
            warn!("dump failed"; "file" => %file_name.display(), "err" => %e);
        }
    }
}

pub struct ServiceClosure {
    method: &'static str,
    tracker: TrackerPtr,
    slow_threshold_ns: u64,
    dump: DumpPolicy,
    dump_name: String,
}

impl ServiceClosure {
    pub fn new(
        method: &'static str,
        slow_threshold_ns: u64,
        dump: DumpPolicy,
    ) -> ServiceClosure {
        let tracker = Tracker::new();
        let dump_name = format!("{}_{}", method, dingo_util::time::now_ns());
        ServiceClosure {
            method,
            tracker,
            slow_threshold_ns,
            dump,
            dump_name,
        }
    }

    pub fn tracker(&self) -> TrackerPtr {
        self.tracker.clone()
    }

    pub fn dump_request<R: Serialize>(&self, request: &R) {
        self.dump.dump(&self.dump_name, "request", request);
    }

    /// Consumes the closure, stamping timing and logging by outcome.
    pub fn finish<T: Serialize>(self, result: Result<T, ServerError>) -> Response<T> {
        self.tracker.set_total_rpc_time();
        let elapsed = self.tracker.total_rpc_time_ns();
        let response = match result {
            Ok(payload) => Response {
                payload: Some(payload),
                error: None,
                time_info: self.tracker.time_info(),
            },
            Err(e) => Response {
                payload: None,
                error: Some(e),
                time_info: self.tracker.time_info(),
            },
        };
        match &response.error {
            Some(e) => {
                error!(
                    "request failed";
                    "method" => self.method,
                    "elapsed_ns" => elapsed,
                    "code" => ?e.code,
                    "err" => %e
                );
            }
            None if elapsed >= self.slow_threshold_ns => {
                info!(
                    "slow request finished";
                    "method" => self.method,
                    "elapsed_ns" => elapsed
                );
            }
            None => {}
        }
        self.dump.dump(&self.dump_name, "response", &response);
        response
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorCode;

    use super::*;

    #[test]
    fn test_finish_stamps_timing_on_success_and_error() {
        let closure = ServiceClosure::new("kv_put", u64::MAX, DumpPolicy::default());
        closure.tracker().set_raft_commit(77);
        let response = closure.finish(Ok(1u64));
        assert!(response.is_ok());
        assert_eq!(response.time_info.raft_commit_time_ns, 77);
        assert!(response.time_info.total_rpc_time_ns > 0);

        let closure = ServiceClosure::new("kv_put", u64::MAX, DumpPolicy::default());
        closure.tracker().set_store_write(5);
        let response: Response<u64> = closure.finish(Err(ServerError::new(
            ErrorCode::ClusterReadOnly,
            "maintenance",
        )));
        assert!(!response.is_ok());
        // Timing is stamped even on the error path.
        assert_eq!(response.time_info.store_write_time_ns, 5);
        assert!(response.time_info.total_rpc_time_ns > 0);
    }

    #[test]
    fn test_dump_policy_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let closure = ServiceClosure::new(
            "probe",
            u64::MAX,
            DumpPolicy {
                enabled: true,
                path: dir.path().to_path_buf(),
            },
        );
        closure.dump_request(&"request-body");
        let _ = closure.finish(Ok("response-body"));
        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 2);
    }
}

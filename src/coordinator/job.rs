// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! The coordinator job engine: a job is an ordered list of tasks, each a
//! set of region cmds that must all reach DONE before the next task
//! starts. Completed jobs move to a bounded archive ring.

use serde::{Deserialize, Serialize};

use crate::common::meta::{RegionCmd, RegionCmdStatus, RegionDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

/// What the job is doing, used to finalize the coordinator maps when the
/// last task completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobKind {
    CreateRegion {
        region_id: u64,
    },
    DropRegion {
        region_id: u64,
        permanent: bool,
    },
    Split {
        from_region_id: u64,
        to_region_id: u64,
        split_key: Vec<u8>,
    },
    Merge {
        source_region_id: u64,
        target_region_id: u64,
    },
    ChangePeer {
        region_id: u64,
        new_definition: RegionDefinition,
    },
    TransferLeader {
        region_id: u64,
        to_store_id: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub cmds: Vec<RegionCmd>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: u64,
    pub kind: JobKind,
    pub tasks: Vec<Task>,
    pub current_task: usize,
    pub status: JobStatus,
    pub create_ts_ms: u64,
}

impl Job {
    pub fn new(job_id: u64, kind: JobKind, tasks: Vec<Task>, create_ts_ms: u64) -> Job {
        Job {
            job_id,
            kind,
            tasks,
            current_task: 0,
            status: JobStatus::Pending,
            create_ts_ms,
        }
    }

    pub fn current_cmds(&self) -> &[RegionCmd] {
        match self.tasks.get(self.current_task) {
            Some(task) => &task.cmds,
            None => &[],
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, JobStatus::Done | JobStatus::Failed)
    }

    /// Records one cmd acknowledgement. Returns true when the update moved
    /// the job forward (the same DONE twice is a no-op). Advances
    /// `current_task` when every cmd of the task is DONE, and finishes the
    /// job past the last task.
    pub fn update_cmd_status(
        &mut self,
        cmd_id: u64,
        status: RegionCmdStatus,
        error: Option<String>,
        retryable: bool,
    ) -> bool {
        if self.is_finished() {
            return false;
        }
        let task = match self.tasks.get_mut(self.current_task) {
            Some(task) => task,
            None => return false,
        };
        let cmd = match task.cmds.iter_mut().find(|c| c.cmd_id == cmd_id) {
            Some(cmd) => cmd,
            None => return false,
        };
        if cmd.status == RegionCmdStatus::Done {
            return false;
        }
        match status {
            RegionCmdStatus::Done => {
                cmd.status = RegionCmdStatus::Done;
                cmd.error = None;
            }
            RegionCmdStatus::Failed => {
                if retryable {
                    // Reissue to the same store: back to pending.
                    cmd.status = RegionCmdStatus::Pending;
                    cmd.error = error;
                    return true;
                }
                cmd.status = RegionCmdStatus::Failed;
                cmd.error = error;
                self.status = JobStatus::Failed;
                return true;
            }
            other => {
                cmd.status = other;
                return true;
            }
        }
        if task.cmds.iter().all(|c| c.status == RegionCmdStatus::Done) {
            self.current_task += 1;
            if self.current_task >= self.tasks.len() {
                self.status = JobStatus::Done;
            } else {
                self.status = JobStatus::InProgress;
            }
        }
        true
    }
}

// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! Admission control. Reads, writes and raft-apply work run on separate
//! worker sets; each set is a fixed pool of single-threaded workers fed
//! round-robin from bounded queues. A full queue rejects the request with
//! `RequestFull` instead of buffering without bound.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use dingo_util::worker::{self, Runnable, Scheduler, Worker};

use crate::common::TrackerPtr;
use crate::error::{ErrorCode, Result, ServerError};

/// A closure shipped onto a worker thread, with the tracker that will be
/// stamped with the queue wait.
pub struct ServiceTask {
    name: &'static str,
    tracker: Option<TrackerPtr>,
    enqueued_at: Instant,
    handler: Box<dyn FnOnce() + Send>,
}

impl ServiceTask {
    pub fn new(
        name: &'static str,
        tracker: Option<TrackerPtr>,
        handler: Box<dyn FnOnce() + Send>,
    ) -> ServiceTask {
        ServiceTask {
            name,
            tracker,
            enqueued_at: Instant::now(),
            handler,
        }
    }

    fn run(self) {
        if let Some(tracker) = &self.tracker {
            tracker.set_service_queue_wait(self.enqueued_at.elapsed().as_nanos() as u64);
        }
        (self.handler)();
    }
}

impl fmt::Display for ServiceTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service task {}", self.name)
    }
}

struct TaskRunner;

impl Runnable<ServiceTask> for TaskRunner {
    fn run(&mut self, task: ServiceTask) {
        task.run();
    }
}

/// A fixed pool of workers with round-robin placement.
pub struct WorkerSet {
    name: &'static str,
    workers: Vec<Worker<ServiceTask>>,
    schedulers: Vec<Scheduler<ServiceTask>>,
    next: AtomicUsize,
}

impl WorkerSet {
    pub fn new(name: &'static str, worker_num: usize, queue_capacity: usize) -> Result<WorkerSet> {
        let mut workers = Vec::with_capacity(worker_num);
        let mut schedulers = Vec::with_capacity(worker_num);
        for i in 0..worker_num.max(1) {
            let mut worker = Worker::new(format!("{}-{}", name, i), queue_capacity);
            worker
                .start(TaskRunner)
                .map_err(|e| ServerError::new(ErrorCode::Internal, e.to_string()))?;
            schedulers.push(worker.scheduler());
            workers.push(worker);
        }
        Ok(WorkerSet {
            name,
            workers,
            schedulers,
            next: AtomicUsize::new(0),
        })
    }

    /// Round-robin enqueue; a full target queue fails the request rather
    /// than probing the whole set, keeping placement O(1).
    pub fn execute(&self, task: ServiceTask) -> Result<()> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.schedulers.len();
        match self.schedulers[index].schedule(task) {
            Ok(()) => Ok(()),
            Err(worker::Error::Full(capacity)) => Err(ServerError::request_full(format!(
                "{} worker queue full (capacity {})",
                self.name, capacity
            ))),
            Err(e) => Err(ServerError::new(ErrorCode::Internal, e.to_string())),
        }
    }

    pub fn pending_task_count(&self) -> usize {
        self.schedulers.iter().map(Scheduler::pending).sum()
    }

    pub fn stop(&mut self) {
        for worker in &mut self.workers {
            worker.stop();
        }
    }
}

/// The three worker sets of the process.
pub struct WorkerSets {
    pub read: WorkerSet,
    pub write: WorkerSet,
    pub raft_apply: WorkerSet,
}

impl WorkerSets {
    pub fn new(config: &crate::config::StoreConfig) -> Result<WorkerSets> {
        Ok(WorkerSets {
            read: WorkerSet::new(
                "read-worker",
                config.read_worker_num,
                config.read_worker_queue_capacity,
            )?,
            write: WorkerSet::new(
                "write-worker",
                config.write_worker_num,
                config.write_worker_queue_capacity,
            )?,
            raft_apply: WorkerSet::new(
                "raft-apply-worker",
                1,
                config.raft_apply_queue_capacity,
            )?,
        })
    }

    pub fn pending_task_count(&self) -> usize {
        self.read.pending_task_count()
            + self.write.pending_task_count()
            + self.raft_apply.pending_task_count()
    }

    pub fn stop(&mut self) {
        self.read.stop();
        self.write.stop();
        self.raft_apply.stop();
    }
}

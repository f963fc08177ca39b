// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! Background workers doing the expensive jobs off the request path. A
//! `Worker` owns a thread draining a channel; a `Scheduler` is the cloneable
//! handle used to feed it. Queue depth is bounded so an overloaded worker
//! rejects instead of buffering without limit.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{Builder, JoinHandle};

use slog_global::{info, warn};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("worker is stopped")]
    Stopped,
    #[error("worker queue is full (capacity {0})")]
    Full(usize),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub trait Runnable<T: Display>: Send + 'static {
    fn run(&mut self, task: T);
    fn shutdown(&mut self) {}
}

/// Handle used to push tasks onto a worker.
pub struct Scheduler<T> {
    name: Arc<String>,
    counter: Arc<AtomicUsize>,
    capacity: usize,
    stopped: Arc<AtomicBool>,
    sender: Sender<Option<T>>,
}

impl<T: Display> Scheduler<T> {
    /// Schedules a task, failing with [`Error::Full`] when the pending count
    /// has reached the queue capacity.
    pub fn schedule(&self, task: T) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::Stopped);
        }
        if self.counter.load(Ordering::Acquire) >= self.capacity {
            warn!("worker queue full"; "worker" => %self.name, "capacity" => self.capacity);
            return Err(Error::Full(self.capacity));
        }
        self.counter.fetch_add(1, Ordering::AcqRel);
        self.sender.send(Some(task)).map_err(|_| Error::Stopped)
    }

    pub fn pending(&self) -> usize {
        self.counter.load(Ordering::Acquire)
    }

    pub fn is_busy(&self) -> bool {
        self.pending() > 0
    }
}

impl<T> Clone for Scheduler<T> {
    fn clone(&self) -> Scheduler<T> {
        Scheduler {
            name: self.name.clone(),
            counter: self.counter.clone(),
            capacity: self.capacity,
            stopped: self.stopped.clone(),
            sender: self.sender.clone(),
        }
    }
}

/// A worker draining tasks on its own thread.
pub struct Worker<T: Display> {
    scheduler: Scheduler<T>,
    receiver: Option<Receiver<Option<T>>>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Display + Send + 'static> Worker<T> {
    pub fn new(name: impl Into<String>, capacity: usize) -> Worker<T> {
        let (tx, rx) = mpsc::channel();
        Worker {
            scheduler: Scheduler {
                name: Arc::new(name.into()),
                counter: Arc::new(AtomicUsize::new(0)),
                capacity,
                stopped: Arc::new(AtomicBool::new(false)),
                sender: tx,
            },
            receiver: Some(rx),
            handle: None,
        }
    }

    pub fn start<R: Runnable<T>>(&mut self, mut runner: R) -> Result<()> {
        let rx = match self.receiver.take() {
            Some(rx) => rx,
            None => {
                warn!("worker already started"; "worker" => %self.scheduler.name);
                return Ok(());
            }
        };
        info!("starting worker thread"; "worker" => %self.scheduler.name);
        let counter = self.scheduler.counter.clone();
        let handle = Builder::new()
            .name(self.scheduler.name.as_ref().clone())
            .spawn(move || {
                while let Ok(msg) = rx.recv() {
                    match msg {
                        Some(task) => {
                            counter.fetch_sub(1, Ordering::AcqRel);
                            runner.run(task);
                        }
                        None => break,
                    }
                }
                runner.shutdown();
            })?;
        self.handle = Some(handle);
        Ok(())
    }

    pub fn scheduler(&self) -> Scheduler<T> {
        self.scheduler.clone()
    }

    pub fn stop(&mut self) {
        self.scheduler.stopped.store(true, Ordering::Release);
        if self.scheduler.sender.send(None).is_err() {
            return;
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("worker thread panicked"; "worker" => %self.scheduler.name);
            }
        }
    }
}

impl<T: Display> Drop for Worker<T> {
    fn drop(&mut self) {
        self.scheduler.stopped.store(true, Ordering::Release);
        let _ = self.scheduler.sender.send(None);
    }
}

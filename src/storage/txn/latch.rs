// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! Key-level latches serializing transactional commands that touch the
//! same keys. Keys hash onto a fixed set of slots; a command takes its
//! slots in sorted, deduplicated order (so two commands can never
//! deadlock) and waiters block on a condvar until every slot is theirs.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

pub const DEFAULT_LATCH_SLOTS: usize = 2048;

struct LatchState {
    /// Slot -> command id currently holding it.
    owners: HashMap<usize, u64>,
}

pub struct Latches {
    state: Mutex<LatchState>,
    waiters: Condvar,
    slots: usize,
}

impl Latches {
    pub fn new(slots: usize) -> Arc<Latches> {
        Arc::new(Latches {
            state: Mutex::new(LatchState {
                owners: HashMap::new(),
            }),
            waiters: Condvar::new(),
            slots,
        })
    }

    fn calc_slot<H: Hash>(&self, key: &H) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.slots
    }

    /// Sorted and deduplicated to rule out lock-order inversions.
    pub fn calc_slots<H: Hash>(&self, keys: &[H]) -> Vec<usize> {
        let mut slots: Vec<usize> = keys.iter().map(|k| self.calc_slot(k)).collect();
        slots.sort_unstable();
        slots.dedup();
        slots
    }

    /// Blocks until every slot is held by `cid`; returns a guard that
    /// releases them on drop, plus the time spent waiting.
    pub fn acquire(self: &Arc<Latches>, keys: &[Vec<u8>], cid: u64) -> (LatchGuard, u64) {
        let slots = self.calc_slots(keys);
        let started = Instant::now();
        let mut state = self.state.lock();
        loop {
            let blocked = slots.iter().any(|slot| state.owners.contains_key(slot));
            if !blocked {
                for slot in &slots {
                    state.owners.insert(*slot, cid);
                }
                break;
            }
            self.waiters.wait(&mut state);
        }
        let waited_ns = started.elapsed().as_nanos() as u64;
        (
            LatchGuard {
                latches: self.clone(),
                slots,
                cid,
            },
            waited_ns,
        )
    }
}

pub struct LatchGuard {
    latches: Arc<Latches>,
    slots: Vec<usize>,
    cid: u64,
}

impl Drop for LatchGuard {
    fn drop(&mut self) {
        let mut state = self.latches.state.lock();
        for slot in &self.slots {
            if matches!(state.owners.get(slot), Some(owner) if *owner == self.cid) {
                state.owners.remove(slot);
            }
        }
        drop(state);
        self.latches.waiters.notify_all();
    }
}

// Copyright 2024 DingoDB Project Authors. Licensed under Apache-2.0.

//! One-shot watches over the metadata kv. A watcher fires on the next PUT
//! or DELETE of its key, in revision order, and is removed by firing.

use std::sync::mpsc::Sender;

use serde::{Deserialize, Serialize};
use slog_global::debug;

use super::kv::Kv;
use super::CoordinatorControl;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchEventType {
    Put,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent {
    pub event_type: WatchEventType,
    pub kv: Kv,
    pub prev_kv: Option<Kv>,
}

#[derive(Clone)]
pub struct Watcher {
    pub watch_id: u64,
    pub sender: Sender<WatchEvent>,
    pub need_prev_kv: bool,
}

impl CoordinatorControl {
    /// Registers a one-shot watch on `key`.
    pub fn watch(&self, key: &[u8], need_prev_kv: bool, sender: Sender<WatchEvent>) -> u64 {
        let watch_id = self.next_watch_id();
        let watcher = Watcher {
            watch_id,
            sender,
            need_prev_kv,
        };
        let mut list = self.watches.get(&key.to_vec()).unwrap_or_default();
        list.push(watcher);
        self.watches.put(key.to_vec(), list);
        debug!("registered one-shot watch"; "watch_id" => watch_id);
        watch_id
    }

    pub fn cancel_watch(&self, key: &[u8], watch_id: u64) {
        if let Some(mut list) = self.watches.get(&key.to_vec()) {
            list.retain(|w| w.watch_id != watch_id);
            if list.is_empty() {
                self.watches.erase(&key.to_vec());
            } else {
                self.watches.put(key.to_vec(), list);
            }
        }
    }

    /// Fires every watcher of `key` exactly once and unregisters them.
    pub(crate) fn trigger_one_watch(
        &self,
        key: &[u8],
        event_type: WatchEventType,
        kv: Kv,
        prev_kv: Option<Kv>,
    ) {
        let watchers = match self.watches.get(&key.to_vec()) {
            Some(watchers) => watchers,
            None => return,
        };
        self.watches.erase(&key.to_vec());
        for watcher in watchers {
            let event = WatchEvent {
                event_type,
                kv: kv.clone(),
                prev_kv: if watcher.need_prev_kv {
                    prev_kv.clone()
                } else {
                    None
                },
            };
            // A hung-up receiver just means the client went away.
            let _ = watcher.sender.send(event);
        }
    }
}

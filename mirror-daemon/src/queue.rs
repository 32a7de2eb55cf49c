//! Deduplicating work queue of intent keys.
//!
//! A key sits in the queue at most once. A key re-added while the worker is
//! processing it is parked and released by [`WorkQueue::done`], so one intent
//! never has two passes in flight. Delayed keys wait in a deadline map until
//! they are due; adding a key that is already waiting keeps the earlier
//! deadline.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use mirror_core::IntentKey;

use crate::paths::{BACKOFF_BASE, BACKOFF_MAX};

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<IntentKey>,
    queued: HashSet<IntentKey>,
    processing: HashSet<IntentKey>,
    /// Re-added while processing.
    dirty: HashSet<IntentKey>,
    delayed: HashMap<IntentKey, Instant>,
    failures: HashMap<IntentKey, u32>,
}

impl QueueState {
    /// Returns `true` if the key became ready.
    fn enqueue(&mut self, key: IntentKey) -> bool {
        if self.queued.contains(&key) {
            return false;
        }
        if self.processing.contains(&key) {
            self.dirty.insert(key);
            return false;
        }
        self.queued.insert(key.clone());
        self.ready.push_back(key);
        true
    }

    fn promote_due(&mut self, now: Instant) {
        let mut due: Vec<(Instant, IntentKey)> = self
            .delayed
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, at)| (*at, key.clone()))
            .collect();
        due.sort();
        for (_, key) in due {
            self.delayed.remove(&key);
            self.enqueue(key);
        }
    }
}

#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `key` for an immediate pass. Supersedes a pending delayed add.
    pub fn add(&self, key: IntentKey) {
        let mut state = self.lock();
        state.delayed.remove(&key);
        if state.enqueue(key) {
            self.notify.notify_one();
        }
    }

    /// Queue `key` once `delay` has elapsed.
    pub fn add_after(&self, key: IntentKey, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let due = Instant::now() + delay;
        let mut state = self.lock();
        if state.queued.contains(&key) {
            return;
        }
        let at = state.delayed.entry(key).or_insert(due);
        if due < *at {
            *at = due;
        }
        drop(state);
        self.notify.notify_one();
    }

    /// Queue `key` after its current backoff delay and return that delay.
    pub fn add_rate_limited(&self, key: IntentKey) -> Duration {
        let delay = {
            let mut state = self.lock();
            let failures = state.failures.entry(key.clone()).or_insert(0);
            *failures += 1;
            backoff_delay(*failures)
        };
        self.add_after(key, delay);
        delay
    }

    /// Reset the failure count of `key`.
    pub fn forget(&self, key: &IntentKey) {
        self.lock().failures.remove(key);
    }

    /// Mark the pass for `key` finished.
    pub fn done(&self, key: &IntentKey) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.remove(key) && state.enqueue(key.clone()) {
            self.notify.notify_one();
        }
    }

    /// Keys waiting, ready or delayed.
    pub fn len(&self) -> usize {
        let state = self.lock();
        state.ready.len() + state.delayed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for the next due key and mark it as processing.
    pub async fn next(&self) -> IntentKey {
        loop {
            let wake_at = {
                let mut state = self.lock();
                state.promote_due(Instant::now());
                if let Some(key) = state.ready.pop_front() {
                    state.queued.remove(&key);
                    state.processing.insert(key.clone());
                    return key;
                }
                state.delayed.values().min().copied()
            };
            match wake_at {
                Some(at) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// `BACKOFF_BASE * 2^(failures - 1)`, capped at `BACKOFF_MAX`.
pub fn backoff_delay(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    BACKOFF_BASE.saturating_mul(1u32 << exponent).min(BACKOFF_MAX)
}

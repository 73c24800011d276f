//! Cancellable one-shot deadlines driven by the per-second tick
//!
//! Sessions never spawn their own timers; they record a deadline keyed by
//! event kind and drain the expired ones from their tick handler.
//! Re-scheduling a key supersedes the pending deadline, which is how a
//! later event of the same kind cancels an earlier one before it fires.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use crate::types::Timestamp;

/// Deadline map for a session's pending one-shot events
#[derive(Debug)]
pub struct DelayedEvents<K> {
    pending: HashMap<K, Timestamp>,
}

impl<K: Eq + Hash + Copy> DelayedEvents<K> {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Arm (or re-arm) the deadline for a key
    pub fn schedule(&mut self, key: K, delay: Duration, now: Timestamp) {
        self.pending.insert(key, now + delay.as_millis() as u64);
    }

    /// Drop a pending deadline, if any
    pub fn cancel(&mut self, key: &K) {
        self.pending.remove(key);
    }

    /// Whether a deadline is armed for this key
    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    /// Remove and return every key whose deadline has passed
    pub fn due(&mut self, now: Timestamp) -> Vec<K> {
        let expired: Vec<K> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            self.pending.remove(key);
        }
        expired
    }
}

impl<K: Eq + Hash + Copy> Default for DelayedEvents<K> {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

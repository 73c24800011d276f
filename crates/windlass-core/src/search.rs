//! Outgoing search scheduling
//!
//! Each hub session owns one `SearchQueue` that paces its outgoing search
//! requests. Entries are priority ordered, deduplicated by query (merging
//! the requesters into one owner set), and dispatched no faster than the
//! per-priority spacing interval allows. Priority alone would starve
//! low-priority entries under constant high-priority traffic; the spacing
//! interval additionally bounds how often this session searches at all,
//! independent of queue depth, to respect hub-side flood policies.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Timestamp;

// ----------------------------------------------------------------------------
// Search Requests
// ----------------------------------------------------------------------------

/// Opaque identifier for whoever asked for a search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerToken(Uuid);

impl OwnerToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OwnerToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Dispatch priority for a queued search
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum SearchPriority {
    Lowest,
    Low,
    Normal,
    High,
    Highest,
}

/// The query itself; equality on this type defines queue deduplication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            min_size: None,
            max_size: None,
        }
    }
}

/// A queued search with its priority and the requesters waiting on it
#[derive(Debug, Clone)]
pub struct Search {
    pub request: SearchRequest,
    pub priority: SearchPriority,
    pub owners: HashSet<OwnerToken>,
}

// ----------------------------------------------------------------------------
// Search Queue
// ----------------------------------------------------------------------------

/// Default floor for the spacing interval, in milliseconds
pub const DEFAULT_MIN_SEARCH_INTERVAL_MS: u64 = 5_000;

/// Priority-ordered, rate-limited queue of pending searches for one hub
///
/// The queue carries its own lock: it is polled from the per-second tick
/// and mutated from request-submission paths on other threads.
#[derive(Debug)]
pub struct SearchQueue {
    inner: Mutex<QueueInner>,
}

#[derive(Debug)]
struct QueueInner {
    queue: VecDeque<Search>,
    last_dispatch: Timestamp,
    /// Spacing until the next dispatch; None when the queue was drained and
    /// the interval of the next entry is not yet known
    next_interval: Option<u64>,
    min_interval: u64,
}

/// Spacing interval implied by an entry's priority, floored by the
/// configured minimum
fn interval_for(priority: SearchPriority, min_interval: u64) -> u64 {
    let base = match priority {
        SearchPriority::Highest | SearchPriority::High => 5_000,
        SearchPriority::Normal => 10_000,
        SearchPriority::Low => 15_000,
        _ => 20_000,
    };
    base.max(min_interval)
}

impl QueueInner {
    /// Milliseconds still left of the current spacing window
    fn remaining_window(&self, now: Timestamp) -> u64 {
        let interval = self.next_interval.unwrap_or(self.min_interval);
        (self.last_dispatch.as_millis() + interval).saturating_sub(now.as_millis())
    }
}

impl SearchQueue {
    pub fn new() -> Self {
        Self::with_min_interval(DEFAULT_MIN_SEARCH_INTERVAL_MS)
    }

    pub fn with_min_interval(min_interval_ms: u64) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                queue: VecDeque::new(),
                last_dispatch: Timestamp::new(0),
                next_interval: Some(10_000),
                min_interval: min_interval_ms,
            }),
        }
    }

    /// Update the spacing floor (from hub or global settings)
    pub fn set_min_interval(&self, min_interval_ms: u64) {
        self.inner.lock().unwrap().min_interval = min_interval_ms;
    }

    /// Queue a search, returning an estimate of the wait until dispatch
    ///
    /// A query-equal entry absorbs the new owner instead of being queued
    /// twice. New entries are placed before the first entry of strictly
    /// lower priority, after all equal-priority entries.
    pub fn add(
        &self,
        request: SearchRequest,
        owner: OwnerToken,
        priority: SearchPriority,
        now: Timestamp,
    ) -> Duration {
        let mut inner = self.inner.lock().unwrap();
        let min_interval = inner.min_interval;

        let mut ahead_ms: u64 = 0;
        let mut position = inner.queue.len();
        let mut merged = false;

        for (index, entry) in inner.queue.iter_mut().enumerate() {
            if priority > entry.priority {
                position = index;
                break;
            }
            if entry.request == request {
                entry.owners.insert(owner);
                merged = true;
                break;
            }
            ahead_ms += interval_for(entry.priority, min_interval);
        }

        if !merged {
            let mut owners = HashSet::new();
            owners.insert(owner);
            inner.queue.insert(
                position,
                Search {
                    request,
                    priority,
                    owners,
                },
            );
        }

        if ahead_ms == 0 {
            // The entry became (or merged into) the head; the spacing
            // window is recomputed from its priority right away
            let head_priority = inner.queue.front().map(|s| s.priority).unwrap_or(priority);
            inner.next_interval = Some(interval_for(head_priority, min_interval));
            Duration::from_millis(inner.remaining_window(now))
        } else {
            Duration::from_millis(ahead_ms + inner.remaining_window(now))
        }
    }

    /// Dequeue the head entry if the spacing window has elapsed
    pub fn pop(&self, now: Timestamp) -> Option<Search> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(interval) = inner.next_interval {
            if now.as_millis() < inner.last_dispatch.as_millis() + interval {
                return None;
            }
        }

        match inner.queue.pop_front() {
            Some(search) => {
                inner.last_dispatch = now;
                let next = match inner.queue.front() {
                    Some(head) => interval_for(head.priority, inner.min_interval),
                    None => inner.min_interval,
                };
                inner.next_interval = Some(next);
                Some(search)
            }
            None => {
                // Nothing was queued; the next add() decides the interval
                inner.next_interval = None;
                None
            }
        }
    }

    /// Remove a requester; entries left without owners are dropped entirely
    pub fn cancel(&self, owner: OwnerToken) -> bool {
        let mut inner = self.inner.lock().unwrap();

        for index in 0..inner.queue.len() {
            if inner.queue[index].owners.remove(&owner) {
                if inner.queue[index].owners.is_empty() {
                    inner.queue.remove(index);
                }
                return true;
            }
        }
        false
    }

    /// Cheap tick-path check: true when nothing can possibly be due
    pub fn has_waiting_time(&self, now: Timestamp) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.next_interval {
            None => true,
            Some(interval) => inner.last_dispatch.as_millis() + interval > now.as_millis(),
        }
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().queue.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SearchQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

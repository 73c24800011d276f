//! Process-wide session counting
//!
//! Hubs commonly ask clients to report how many hubs they are on as a
//! normal user, registered user and operator. Every session in NORMAL
//! state contributes to exactly one class; the aggregate lives in a
//! shared service constructed once at startup and handed to every
//! session, so totals can be read without walking the sessions.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Count Classification
// ----------------------------------------------------------------------------

/// How a session contributes to the aggregate hub counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountType {
    /// Not counted (not in NORMAL state, or explicitly excluded)
    Uncounted,
    Normal,
    Registered,
    Op,
}

// ----------------------------------------------------------------------------
// Session Counts
// ----------------------------------------------------------------------------

/// Shared aggregate counters across all live sessions
#[derive(Debug, Default)]
pub struct SessionCounts {
    normal: AtomicU64,
    registered: AtomicU64,
    op: AtomicU64,
}

impl SessionCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a session from one classification to another
    pub fn apply(&self, from: CountType, to: CountType) {
        if from == to {
            return;
        }
        if let Some(counter) = self.counter(from) {
            counter.fetch_sub(1, Ordering::SeqCst);
        }
        if let Some(counter) = self.counter(to) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counter(&self, class: CountType) -> Option<&AtomicU64> {
        match class {
            CountType::Uncounted => None,
            CountType::Normal => Some(&self.normal),
            CountType::Registered => Some(&self.registered),
            CountType::Op => Some(&self.op),
        }
    }

    pub fn normal(&self) -> u64 {
        self.normal.load(Ordering::SeqCst)
    }

    pub fn registered(&self) -> u64 {
        self.registered.load(Ordering::SeqCst)
    }

    pub fn op(&self) -> u64 {
        self.op.load(Ordering::SeqCst)
    }

    /// Total counted sessions across all classes
    pub fn total(&self) -> u64 {
        self.normal() + self.registered() + self.op()
    }

    /// The "n/r/o" rendering hubs expect in client info fields
    pub fn summary(&self) -> CountSummary {
        CountSummary {
            normal: self.normal(),
            registered: self.registered(),
            op: self.op(),
        }
    }
}

/// Point-in-time copy of the aggregate counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountSummary {
    pub normal: u64,
    pub registered: u64,
    pub op: u64,
}

impl fmt::Display for CountSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.normal, self.registered, self.op)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

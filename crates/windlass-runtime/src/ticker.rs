//! The shared per-second timer
//!
//! One process-wide ticker delivers a tick to every live session once per
//! second. Sessions are held weakly; whatever the rest of the application
//! drops simply stops ticking, so there is no unregister path to race
//! against session teardown.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use windlass_core::{TimeSource, Timestamp};

/// Anything that wants the 1 Hz heartbeat
pub trait TickListener: Send + Sync {
    fn tick(&self, now: Timestamp);
}

/// Fans the per-second tick out to registered sessions
pub struct Ticker<T: TimeSource> {
    time: T,
    listeners: Mutex<Vec<Weak<dyn TickListener>>>,
}

impl<T: TimeSource + Send + Sync + 'static> Ticker<T> {
    pub fn new(time: T) -> Arc<Self> {
        Arc::new(Self {
            time,
            listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn register(&self, listener: Weak<dyn TickListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    /// Deliver one tick to every live listener, pruning dead ones
    pub fn run_once(&self, now: Timestamp) {
        let live: Vec<Arc<dyn TickListener>> = {
            let mut listeners = self.listeners.lock().unwrap();
            listeners.retain(|weak| weak.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in live {
            listener.tick(now);
        }
    }

    pub fn listener_count(&self) -> usize {
        let mut listeners = self.listeners.lock().unwrap();
        listeners.retain(|weak| weak.strong_count() > 0);
        listeners.len()
    }

    /// Spawn the 1 Hz loop; abort the handle to stop it
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let ticker = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let now = ticker.time.now();
                debug!(listeners = ticker.listener_count(), "tick");
                ticker.run_once(now);
            }
        })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

//! The hub session registry
//!
//! Owns every live `HubConnection`, keyed by hub URL. The registry is the
//! session-facing `HubHost`: it answers the redirect loop guard and
//! executes redirects by swapping the old session for a new one that
//! inherits its identity and message cache. It also forwards the
//! per-second tick to all hub sessions, so sessions created mid-flight
//! (redirects) are picked up without extra wiring.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::info;

use windlass_core::{HubUrl, SessionCounts, TimeSource, Timestamp};

use crate::hub::{HubConnection, HubContext, HubHost};
use crate::ticker::TickListener;

/// Registry of live hub sessions
pub struct HubRegistry<T: TimeSource> {
    context: HubContext<T>,
    sessions: DashMap<String, Arc<HubConnection<T>>>,
    self_weak: Weak<HubRegistry<T>>,
}

impl<T: TimeSource + Clone + Send + Sync + 'static> HubRegistry<T> {
    pub fn new(context: HubContext<T>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            context,
            sessions: DashMap::new(),
            self_weak: weak.clone(),
        })
    }

    fn host_handle(&self) -> Option<Weak<dyn HubHost>> {
        let registry = self.self_weak.upgrade()?;
        let host: Arc<dyn HubHost> = registry;
        Some(Arc::downgrade(&host))
    }

    /// Create a session for a hub, or hand back the existing one
    pub fn open(&self, url: HubUrl) -> Arc<HubConnection<T>> {
        let entry = self
            .sessions
            .entry(url.as_str().to_string())
            .or_insert_with(|| {
                info!(hub = %url, "opening hub session");
                let session = HubConnection::new(url.clone(), self.context.clone(), None);
                if let Some(host) = self.host_handle() {
                    session.set_host(host);
                }
                session
            });
        entry.clone()
    }

    pub fn find(&self, url: &HubUrl) -> Option<Arc<HubConnection<T>>> {
        self.sessions
            .get(url.as_str())
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Close a hub for good: queued searches and cached messages go
    pub fn close(&self, url: &HubUrl) -> bool {
        match self.sessions.remove(url.as_str()) {
            Some((_, session)) => {
                info!(hub = %url, "closing hub session");
                session.shutdown(false);
                true
            }
            None => false,
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn sessions(&self) -> Vec<Arc<HubConnection<T>>> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// The shared aggregate counters
    pub fn counts(&self) -> &Arc<SessionCounts> {
        &self.context.counts
    }
}

impl<T: TimeSource + Clone + Send + Sync + 'static> HubHost for HubRegistry<T> {
    fn has_session(&self, url: &HubUrl) -> bool {
        self.sessions.contains_key(url.as_str())
    }

    fn redirect_session(&self, from: &HubUrl, to: &HubUrl) -> bool {
        let Some(old) = self.find(from) else {
            return false;
        };
        if self.has_session(to) {
            return false;
        }

        info!(from = %from, to = %to, "following hub redirect");
        let session = HubConnection::new(to.clone(), self.context.clone(), Some(&old));
        if let Some(host) = self.host_handle() {
            session.set_host(host);
        }

        old.shutdown(true);
        self.sessions.remove(from.as_str());
        self.sessions
            .insert(to.as_str().to_string(), session.clone());
        session.connect();
        true
    }
}

impl<T: TimeSource + Clone + Send + Sync + 'static> TickListener for HubRegistry<T> {
    fn tick(&self, now: Timestamp) {
        // Snapshot first so a session mutating the registry mid-tick
        // (redirect) never runs into the map locks
        let sessions = self.sessions();
        for session in sessions {
            session.tick(now);
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use windlass_core::{ManualTimeSource, Search, Severity, StaticSettings};

    use crate::hub::SearchSink;
    use crate::transport::{
        ConnectOptions, HubTransport, TransportCallback, TransportFactory,
    };

    struct NullSink;

    impl SearchSink for NullSink {
        fn dispatch(&self, _hub: &HubUrl, _search: Search) {}
    }

    struct NullTransport;

    impl HubTransport for NullTransport {
        fn send(&self, _data: &[u8]) -> windlass_core::Result<()> {
            Ok(())
        }
        fn disconnect(&self, _graceless: bool) {}
        fn is_secure(&self) -> bool {
            false
        }
        fn is_trusted(&self) -> bool {
            false
        }
        fn encryption_info(&self) -> String {
            String::new()
        }
        fn keyprint(&self) -> Option<Vec<u8>> {
            None
        }
        fn keyprint_match(&self) -> bool {
            true
        }
    }

    struct NullFactory;

    impl TransportFactory for NullFactory {
        fn open(
            &self,
            _options: ConnectOptions,
            _on_event: TransportCallback,
        ) -> windlass_core::Result<Arc<dyn HubTransport>> {
            Ok(Arc::new(NullTransport))
        }
    }

    fn test_registry() -> Arc<HubRegistry<ManualTimeSource>> {
        HubRegistry::new(HubContext {
            time: ManualTimeSource::starting_at(1_000_000),
            settings: Arc::new(StaticSettings::default()),
            transports: Arc::new(NullFactory),
            searches: Arc::new(NullSink),
            counts: Arc::new(SessionCounts::new()),
        })
    }

    #[test]
    fn test_open_reuses_existing_session() {
        let registry = test_registry();
        let url = HubUrl::parse("adc://hub.example:411");

        let first = registry.open(url.clone());
        let second = registry.open(url);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn test_close_removes_session() {
        let registry = test_registry();
        let url = HubUrl::parse("adc://hub.example:411");

        registry.open(url.clone());
        assert!(registry.close(&url));
        assert!(!registry.close(&url));
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn test_redirect_transfers_cache_and_id() {
        let registry = test_registry();
        let from = HubUrl::parse("adc://hub.old:411");
        let to = HubUrl::parse("adc://hub.new:411");

        let old = registry.open(from.clone());
        old.status_message("hello", Severity::Info);
        let old_id = old.id();

        assert!(registry.redirect_session(&from, &to));
        assert_eq!(registry.session_count(), 1);

        let new = registry.find(&to).unwrap();
        assert_eq!(new.id(), old_id);
        assert_eq!(new.cache().len(), 1);
        // Redirect-born sessions dial immediately
        assert_eq!(
            new.connect_state(),
            windlass_core::ConnectState::Connecting
        );
    }

    #[test]
    fn test_redirect_to_existing_session_is_refused() {
        let registry = test_registry();
        let from = HubUrl::parse("adc://hub.old:411");
        let to = HubUrl::parse("adc://hub.new:411");

        registry.open(from.clone());
        registry.open(to.clone());
        assert!(!registry.redirect_session(&from, &to));
        assert_eq!(registry.session_count(), 2);
    }

    #[test]
    fn test_on_redirect_already_connected_status() {
        let registry = test_registry();
        let from = HubUrl::parse("adc://hub.old:411");
        let to = HubUrl::parse("adc://hub.new:411");

        let session = registry.open(from);
        registry.open(to.clone());

        let statuses: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&statuses);
        session.listeners().subscribe(move |event| {
            if let windlass_core::HubEvent::StatusMessage(message) = event {
                sink.lock().unwrap().push(message.text.clone());
            }
        });

        session.on_redirect(to);
        let statuses = statuses.lock().unwrap();
        assert_eq!(statuses.len(), 1);
        assert!(statuses[0].contains("already connected"));
        // No new session, no session swap
        assert_eq!(registry.session_count(), 2);
    }
}

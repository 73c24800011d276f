//! End-to-end session behavior with mock collaborators

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use windlass_core::{
    CcpmState, ConnectState, GlobalSettings, HintedUser, HubEvent, HubUrl, Identity,
    ManualTimeSource, Search, SessionCounts, StaticSettings, TimeSource, UserFlags, UserId,
};
use windlass_runtime::{
    ChannelAttempt, ChannelConnector, ConnectOptions, DirectContext, DirectSession, HubConnection,
    HubContext, HubRegistry, HubTransport, PeerDirectory, SearchSink, TickListener, Ticker,
    TransportCallback, TransportEvent, TransportFactory,
};

// ----------------------------------------------------------------------------
// Mock Collaborators
// ----------------------------------------------------------------------------

#[derive(Default)]
struct RecordingSink {
    dispatched: Mutex<Vec<String>>,
}

impl SearchSink for RecordingSink {
    fn dispatch(&self, _hub: &HubUrl, search: Search) {
        self.dispatched.lock().unwrap().push(search.request.query);
    }
}

struct MockTransport {
    keyprint_match: AtomicBool,
    disconnects: AtomicUsize,
}

impl MockTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            keyprint_match: AtomicBool::new(true),
            disconnects: AtomicUsize::new(0),
        })
    }
}

impl HubTransport for MockTransport {
    fn send(&self, _data: &[u8]) -> windlass_core::Result<()> {
        Ok(())
    }
    fn disconnect(&self, _graceless: bool) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
    fn is_secure(&self) -> bool {
        true
    }
    fn is_trusted(&self) -> bool {
        self.keyprint_match.load(Ordering::SeqCst)
    }
    fn encryption_info(&self) -> String {
        "TLSv1.3".into()
    }
    fn keyprint(&self) -> Option<Vec<u8>> {
        Some(vec![0xAB; 32])
    }
    fn keyprint_match(&self) -> bool {
        self.keyprint_match.load(Ordering::SeqCst)
    }
}

struct MockFactory {
    opened: AtomicUsize,
    last_options: Mutex<Option<ConnectOptions>>,
    transport: Arc<MockTransport>,
}

impl MockFactory {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            opened: AtomicUsize::new(0),
            last_options: Mutex::new(None),
            transport: MockTransport::new(),
        })
    }

    fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl TransportFactory for MockFactory {
    fn open(
        &self,
        options: ConnectOptions,
        _on_event: TransportCallback,
    ) -> windlass_core::Result<Arc<dyn HubTransport>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        *self.last_options.lock().unwrap() = Some(options);
        Ok(self.transport.clone() as Arc<dyn HubTransport>)
    }
}

struct Fixture {
    time: ManualTimeSource,
    settings: Arc<StaticSettings>,
    factory: Arc<MockFactory>,
    sink: Arc<RecordingSink>,
    counts: Arc<SessionCounts>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            time: ManualTimeSource::starting_at(10_000_000),
            settings: Arc::new(StaticSettings::default()),
            factory: MockFactory::new(),
            sink: Arc::new(RecordingSink::default()),
            counts: Arc::new(SessionCounts::new()),
        }
    }

    fn context(&self) -> HubContext<ManualTimeSource> {
        HubContext {
            time: self.time.clone(),
            settings: self.settings.clone(),
            transports: self.factory.clone(),
            searches: self.sink.clone(),
            counts: self.counts.clone(),
        }
    }

    fn session(&self, url: &str) -> Arc<HubConnection<ManualTimeSource>> {
        HubConnection::new(HubUrl::parse(url), self.context(), None)
    }
}

// Bring a session to NORMAL through the usual event sequence
fn bring_to_normal(
    session: &Arc<HubConnection<ManualTimeSource>>,
    epoch: u64,
    registered: bool,
) {
    session.connect();
    session.on_transport_event(epoch, TransportEvent::Connected);
    session.on_handshake_complete(registered);
    assert_eq!(session.connect_state(), ConnectState::Normal);
}

// ----------------------------------------------------------------------------
// Reconnect Gating
// ----------------------------------------------------------------------------

#[test]
fn reconnect_waits_for_the_full_delay() {
    let fx = Fixture::new();
    let session = fx.session("adc://hub.example:411");

    session.connect();
    assert_eq!(fx.factory.open_count(), 1);
    let connected_at = fx.time.now().as_millis();

    session.on_transport_event(1, TransportEvent::Failed("connection reset".into()));
    assert_eq!(session.connect_state(), ConnectState::Disconnected);
    assert!(session.is_auto_reconnect());

    // Jittered delay in [120, 180) seconds, fixed for this cycle
    let delay_ms = session.reconnect_delay_secs() * 1000;
    assert!((120_000..180_000).contains(&delay_ms));

    // 100 ms short of the deadline: nothing happens
    fx.time.set(connected_at + delay_ms - 100);
    session.tick(fx.time.now());
    assert_eq!(fx.factory.open_count(), 1);
    assert_eq!(session.connect_state(), ConnectState::Disconnected);

    // On the deadline: redial
    fx.time.set(connected_at + delay_ms);
    session.tick(fx.time.now());
    assert_eq!(fx.factory.open_count(), 2);
    assert_eq!(session.connect_state(), ConnectState::Connecting);
}

#[test]
fn disabling_auto_reconnect_cancels_the_cycle() {
    let fx = Fixture::new();
    let session = fx.session("adc://hub.example:411");

    session.connect();
    session.on_transport_event(1, TransportEvent::Failed("gone".into()));

    session.shutdown(false);
    fx.time.advance(1_000_000);
    session.tick(fx.time.now());
    assert_eq!(fx.factory.open_count(), 1);
}

#[test]
fn explicit_reconnect_redials_on_the_next_tick() {
    let fx = Fixture::new();
    let session = fx.session("adc://hub.example:411");

    session.connect();
    session.on_transport_event(1, TransportEvent::Failed("gone".into()));

    session.reconnect();
    fx.time.advance(1_000);
    session.tick(fx.time.now());
    assert_eq!(fx.factory.open_count(), 2);
}

// ----------------------------------------------------------------------------
// Search Dispatch
// ----------------------------------------------------------------------------

#[test]
fn queued_searches_reach_the_sink_once_normal() {
    let fx = Fixture::new();
    let session = fx.session("adc://hub.example:411");

    let owner = windlass_core::OwnerToken::new();
    let wait = session.queue_search(
        windlass_core::SearchRequest::new("some file"),
        owner,
        windlass_core::SearchPriority::High,
    );
    assert_eq!(wait.as_millis(), 0);

    bring_to_normal(&session, 1, false);
    fx.time.advance(1_000);
    session.tick(fx.time.now());

    assert_eq!(*fx.sink.dispatched.lock().unwrap(), ["some file"]);

    // Cancelling an owner with nothing queued reports no effect
    assert!(!session.cancel_search(owner));
}

// ----------------------------------------------------------------------------
// Trust Override
// ----------------------------------------------------------------------------

#[test]
fn keyprint_mismatch_allows_explicit_untrusted_retry() {
    let fx = Fixture::new();
    fx.settings.set_global(GlobalSettings {
        allow_untrusted_hubs: true,
        ..GlobalSettings::default()
    });
    let session = fx.session("adcs://hub.example:411/?kp=SHA256ABC");

    session.connect();
    let options = fx.factory.last_options.lock().unwrap().clone().unwrap();
    assert_eq!(options.keyprint.as_deref(), Some("SHA256ABC"));

    let statuses: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&statuses);
    session.listeners().subscribe(move |event| {
        if let HubEvent::StatusMessage(message) = event {
            sink.lock().unwrap().push(message.text.clone());
        }
    });

    fx.factory
        .transport
        .keyprint_match
        .store(false, Ordering::SeqCst);
    session.on_transport_event(1, TransportEvent::Failed("certificate mismatch".into()));

    assert!(statuses.lock().unwrap()[0].contains("/allow"));

    // The explicit override redials with the pin dropped
    session.allow_untrusted_connect();
    assert_eq!(fx.factory.open_count(), 2);
    let options = fx.factory.last_options.lock().unwrap().clone().unwrap();
    assert_eq!(options.keyprint, None);
}

// ----------------------------------------------------------------------------
// Counting
// ----------------------------------------------------------------------------

#[test]
fn counts_track_sessions_in_normal_state() {
    let fx = Fixture::new();

    let plain = fx.session("adc://hub.one:411");
    let registered = fx.session("adc://hub.two:411");
    let op = fx.session("adc://hub.three:411");

    bring_to_normal(&plain, 1, false);
    bring_to_normal(&registered, 1, true);
    bring_to_normal(&op, 1, false);
    let mut identity = Identity::new(UserId::new([1; 8]), "me");
    identity.flags.op = true;
    op.on_my_identity(identity);

    let summary = fx.counts.summary();
    assert_eq!(summary.normal, 1);
    assert_eq!(summary.registered, 1);
    assert_eq!(summary.op, 1);
    assert_eq!(fx.counts.total(), 3);

    // A session leaving NORMAL releases exactly its own contribution
    registered.on_transport_event(1, TransportEvent::Failed("gone".into()));
    assert_eq!(fx.counts.total(), 2);
    assert_eq!(fx.counts.registered(), 0);

    plain.shutdown(false);
    op.shutdown(false);
    assert_eq!(fx.counts.total(), 0);
}

#[test]
fn unauthenticated_sessions_are_dropped_when_policy_forbids() {
    let fx = Fixture::new();
    fx.settings.set_global(GlobalSettings {
        disallow_unauthenticated: true,
        ..GlobalSettings::default()
    });
    let session = fx.session("adc://hub.example:411");

    session.connect();
    session.on_transport_event(1, TransportEvent::Connected);
    session.on_handshake_complete(false);

    // Never counted, auto-reconnect off, transport told to go away
    assert_eq!(fx.counts.total(), 0);
    assert!(!session.is_auto_reconnect());
    assert!(fx.factory.transport.disconnects.load(Ordering::SeqCst) >= 1);
}

// ----------------------------------------------------------------------------
// Redirects
// ----------------------------------------------------------------------------

#[test]
fn auto_follow_redirect_swaps_the_session() {
    let fx = Fixture::new();
    let registry = HubRegistry::new(fx.context());
    let from = HubUrl::parse("adc://hub.old:411");
    let to = HubUrl::parse("adc://hub.new:411");

    let session = registry.open(from.clone());
    session.connect();

    let redirected: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&redirected);
    session.listeners().subscribe(move |event| {
        if let HubEvent::Redirected(url) = event {
            sink.lock().unwrap().push(url.to_string());
        }
    });

    session.on_redirect(to.clone());

    assert_eq!(*redirected.lock().unwrap(), ["adc://hub.new:411"]);
    assert_eq!(registry.session_count(), 1);
    let successor = registry.find(&to).unwrap();
    assert_eq!(successor.id(), session.id());
    assert_eq!(successor.connect_state(), ConnectState::Connecting);
}

#[test]
fn redirect_to_connected_hub_is_refused() {
    let fx = Fixture::new();
    let registry = HubRegistry::new(fx.context());
    let from = HubUrl::parse("adc://hub.old:411");
    let to = HubUrl::parse("adc://hub.new:411");

    let session = registry.open(from);
    registry.open(to.clone());

    let statuses: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&statuses);
    session.listeners().subscribe(move |event| {
        if let HubEvent::StatusMessage(message) = event {
            sink.lock().unwrap().push(message.text.clone());
        }
    });

    session.on_redirect(to);

    assert!(statuses.lock().unwrap()[0].contains("already connected"));
    assert_eq!(registry.session_count(), 2);
    assert!(session.redirect_target().is_none());
}

// ----------------------------------------------------------------------------
// Direct Sessions
// ----------------------------------------------------------------------------

struct PresenceDirectory {
    online: AtomicBool,
    hubs: Mutex<Vec<(HubUrl, String)>>,
}

impl PresenceDirectory {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            online: AtomicBool::new(true),
            hubs: Mutex::new(vec![(HubUrl::parse("adc://hub.one:411"), "One".into())]),
        })
    }
}

impl PeerDirectory for PresenceDirectory {
    fn is_online(&self, _user: &UserId) -> bool {
        self.online.load(Ordering::SeqCst)
    }
    fn supports_ccpm(&self, _user: &UserId) -> (bool, String) {
        (true, String::new())
    }
    fn flags(&self, _user: &UserId) -> UserFlags {
        UserFlags::default()
    }
    fn hubs(&self, _user: &UserId) -> Vec<(HubUrl, String)> {
        self.hubs.lock().unwrap().clone()
    }
    fn hub_name(&self, url: &HubUrl) -> String {
        url.to_string()
    }
    fn nicks(&self, _user: &UserId) -> String {
        "peer".into()
    }
    fn relay_message(&self, _peer: &HintedUser, _text: &str) -> Result<(), String> {
        Ok(())
    }
}

struct CountingConnector {
    requests: AtomicUsize,
}

impl CountingConnector {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: AtomicUsize::new(0),
        })
    }
}

impl ChannelConnector for CountingConnector {
    fn request(&self, _peer: &HintedUser) -> ChannelAttempt {
        self.requests.fetch_add(1, Ordering::SeqCst);
        // Immediate failure, but the protocol itself is fine
        ChannelAttempt {
            started: false,
            protocol_unsupported: false,
            error: String::new(),
        }
    }
}

fn direct_fixture(
    always_ccpm: bool,
) -> (
    ManualTimeSource,
    Arc<PresenceDirectory>,
    Arc<CountingConnector>,
    Arc<DirectSession<ManualTimeSource>>,
) {
    let time = ManualTimeSource::starting_at(10_000_000);
    let directory = PresenceDirectory::new();
    let connector = CountingConnector::new();
    let settings = StaticSettings::default();
    settings.set_global(GlobalSettings {
        always_ccpm,
        ..GlobalSettings::default()
    });

    let session = DirectSession::new(
        HintedUser::new(UserId::new([9; 8]), HubUrl::parse("adc://hub.one:411")),
        DirectContext {
            time: time.clone(),
            settings: Arc::new(settings),
            directory: directory.clone(),
            connector: connector.clone(),
        },
        None,
    );
    (time, directory, connector, session)
}

#[test]
fn automatic_upgrades_stop_after_three_attempts() {
    let (time, _directory, connector, session) = direct_fixture(true);

    // Attempt 1 fires from the constructor's debounce
    time.advance(1_000);
    session.tick(time.now());
    assert_eq!(connector.requests.load(Ordering::SeqCst), 1);

    for expected in 2..=3 {
        session.on_peer_updated();
        time.advance(3_000);
        session.tick(time.now());
        assert_eq!(connector.requests.load(Ordering::SeqCst), expected);
    }
    assert!(!session.allow_auto_upgrade());

    // The fourth automatic trigger does nothing
    session.on_peer_updated();
    time.advance(3_000);
    session.tick(time.now());
    assert_eq!(connector.requests.load(Ordering::SeqCst), 3);

    // A manual attempt still goes out
    session.start_channel();
    assert_eq!(connector.requests.load(Ordering::SeqCst), 4);
}

#[test]
fn offline_peers_are_never_upgraded() {
    let (time, directory, connector, session) = direct_fixture(true);

    directory.online.store(false, Ordering::SeqCst);
    time.advance(1_000);
    session.tick(time.now());
    assert_eq!(connector.requests.load(Ordering::SeqCst), 0);

    session.start_channel();
    assert_eq!(connector.requests.load(Ordering::SeqCst), 0);
    assert_eq!(session.ccpm_state(), CcpmState::Disconnected);
}

#[test]
fn presence_flicker_is_debounced() {
    let (time, _directory, connector, session) = direct_fixture(true);

    // Three rapid updates within the window collapse into one check
    session.on_peer_updated();
    time.advance(500);
    session.tick(time.now());
    session.on_peer_updated();
    time.advance(500);
    session.tick(time.now());
    session.on_peer_updated();

    time.advance(3_000);
    session.tick(time.now());
    assert_eq!(connector.requests.load(Ordering::SeqCst), 1);
}

// ----------------------------------------------------------------------------
// Ticker
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn ticker_drives_registered_sessions() {
    let fx = Fixture::new();
    let registry = HubRegistry::new(fx.context());
    let url = HubUrl::parse("adc://hub.example:411");
    let session = registry.open(url);

    session.connect();
    session.on_transport_event(1, TransportEvent::Failed("gone".into()));
    session.reconnect();

    let ticker = Ticker::new(fx.time.clone());
    let weak: Weak<HubRegistry<ManualTimeSource>> = Arc::downgrade(&registry);
    ticker.register(weak as Weak<dyn TickListener>);
    let handle = ticker.spawn();

    // Two paused-clock seconds are enough for the zero-delay redial
    fx.time.advance(2_000);
    tokio::time::advance(std::time::Duration::from_secs(2)).await;
    tokio::task::yield_now().await;

    assert_eq!(fx.factory.open_count(), 2);
    handle.abort();
}

//! Hub session lifecycle
//!
//! A `HubConnection` owns one hub session: connect/reconnect, handshake
//! progression, identity and roster tracking, aggregate counting, redirect
//! handling, messaging, and the paced dispatch of queued searches. The
//! protocol codec sits outside; it feeds handshake progress and incoming
//! messages through the `on_*` hooks and receives due searches through the
//! `SearchSink` collaborator.
//!
//! All session state lives behind one lock, and a tick and a socket event
//! for the same session may race; every public method therefore takes the
//! lock, decides, and performs collaborator calls and listener fan-out
//! only after releasing it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info};

use windlass_core::{
    ChatMessage, ConnectState, CountType, FavoriteHubEntry, GlobalSettings, HubEvent, HubSettings,
    HubUrl, Identity, Listeners, MessageCache, OwnerToken, Search, SearchPriority, SearchQueue,
    SearchRequest, SessionCounts, SettingsSource, Severity, StatusMessage, TimeSource, Timestamp,
    TransportError, UserId,
};

use crate::ticker::TickListener;
use crate::transport::{
    ConnectOptions, HubTransport, TransportCallback, TransportEvent, TransportFactory,
};

// ----------------------------------------------------------------------------
// Collaborator Interfaces
// ----------------------------------------------------------------------------

/// Receives searches the moment their spacing window lets them out
pub trait SearchSink: Send + Sync {
    fn dispatch(&self, hub: &HubUrl, search: Search);
}

/// The registry-side view a session needs for redirect handling
pub trait HubHost: Send + Sync {
    /// Whether any live session exists for this URL
    fn has_session(&self, url: &HubUrl) -> bool;

    /// Replace the `from` session with one for `to`, transferring identity
    /// and cache; returns false when the redirect could not be executed
    fn redirect_session(&self, from: &HubUrl, to: &HubUrl) -> bool;
}

/// Shared collaborators handed to every hub session
#[derive(Clone)]
pub struct HubContext<T: TimeSource> {
    pub time: T,
    pub settings: Arc<dyn SettingsSource>,
    pub transports: Arc<dyn TransportFactory>,
    pub searches: Arc<dyn SearchSink>,
    pub counts: Arc<SessionCounts>,
}

// ----------------------------------------------------------------------------
// Status Lines
// ----------------------------------------------------------------------------

const MSG_CONNECTED: &str = "Connected";
const MSG_STORED_PASSWORD_SENT: &str = "Stored password sent";
const MSG_REDIRECT_ALREADY_CONNECTED: &str =
    "Redirect request received to a hub that's already connected";
const MSG_UNAUTHENTICATED_DISALLOWED: &str =
    "Connections to hubs without authentication are disallowed in the settings";
const MSG_UNTRUSTED_HINT: &str = ", type /allow to proceed with untrusted connection";

// ----------------------------------------------------------------------------
// Hub Connection
// ----------------------------------------------------------------------------

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// One hub session
pub struct HubConnection<T: TimeSource> {
    /// Stable across redirects, like the message cache
    id: u64,
    url: HubUrl,
    time: T,
    settings_source: Arc<dyn SettingsSource>,
    factory: Arc<dyn TransportFactory>,
    search_sink: Arc<dyn SearchSink>,
    counts: Arc<SessionCounts>,
    cache: Arc<MessageCache>,
    search_queue: SearchQueue,
    listeners: Listeners<HubEvent>,
    host: Mutex<Option<Weak<dyn HubHost>>>,
    self_weak: Weak<HubConnection<T>>,
    state: Mutex<HubState>,
}

struct HubState {
    connect_state: ConnectState,
    my_identity: Identity,
    hub_identity: Identity,
    global: GlobalSettings,
    settings: HubSettings,
    favorite: Option<FavoriteHubEntry>,
    registered: bool,
    auto_reconnect: bool,
    reconnect_delay_secs: u64,
    last_activity: Timestamp,
    count_type: CountType,
    redirect_target: Option<HubUrl>,
    /// A trust mismatch was reported under the allow-untrusted policy;
    /// an explicit retry may relax the pin
    keyprint_error: bool,
    /// Retry with the certificate pin dropped
    pin_relaxed: bool,
    users: HashMap<UserId, Identity>,
    transport: Option<Arc<dyn HubTransport>>,
    /// Bumped whenever the transport slot is replaced; callbacks from a
    /// superseded transport are dropped by comparing epochs
    epoch: u64,
}

impl<T: TimeSource + Send + Sync + 'static> HubConnection<T> {
    /// Create a session for a hub URL
    ///
    /// `previous` carries the session being replaced across a redirect;
    /// its message cache and session id are inherited.
    pub fn new(
        url: HubUrl,
        context: HubContext<T>,
        previous: Option<&Arc<HubConnection<T>>>,
    ) -> Arc<Self> {
        let global = context.settings.global();
        let cache = match previous {
            Some(old) => Arc::clone(&old.cache),
            None => Arc::new(MessageCache::new(global.hub_message_cache)),
        };
        let id = match previous {
            Some(old) => old.id,
            None => NEXT_SESSION_ID.fetch_add(1, Ordering::SeqCst),
        };
        let now = context.time.now();

        Arc::new_cyclic(|weak| Self {
            id,
            url,
            time: context.time,
            settings_source: context.settings,
            factory: context.transports,
            search_sink: context.searches,
            counts: context.counts,
            cache,
            search_queue: SearchQueue::new(),
            listeners: Listeners::new(),
            host: Mutex::new(None),
            self_weak: weak.clone(),
            state: Mutex::new(HubState {
                connect_state: ConnectState::Disconnected,
                my_identity: Identity::default(),
                hub_identity: Identity::default(),
                global,
                settings: HubSettings::default(),
                favorite: None,
                registered: false,
                auto_reconnect: false,
                reconnect_delay_secs: 120,
                last_activity: now,
                count_type: CountType::Uncounted,
                redirect_target: None,
                keyprint_error: false,
                pin_relaxed: false,
                users: HashMap::new(),
                transport: None,
                epoch: 0,
            }),
        })
    }

    /// Wire the session to its owning registry
    pub fn set_host(&self, host: Weak<dyn HubHost>) {
        *self.host.lock().unwrap() = Some(host);
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn url(&self) -> &HubUrl {
        &self.url
    }

    pub fn cache(&self) -> &Arc<MessageCache> {
        &self.cache
    }

    pub fn listeners(&self) -> &Listeners<HubEvent> {
        &self.listeners
    }

    pub fn connect_state(&self) -> ConnectState {
        self.state.lock().unwrap().connect_state
    }

    pub fn count_type(&self) -> CountType {
        self.state.lock().unwrap().count_type
    }

    pub fn my_identity(&self) -> Identity {
        self.state.lock().unwrap().my_identity.clone()
    }

    pub fn hub_identity(&self) -> Identity {
        self.state.lock().unwrap().hub_identity.clone()
    }

    /// Hub display name: hub-supplied nick, or the URL until one arrives
    pub fn hub_name(&self) -> String {
        let st = self.state.lock().unwrap();
        if st.hub_identity.nick.is_empty() {
            self.url.to_string()
        } else {
            st.hub_identity.nick.clone()
        }
    }

    pub fn redirect_target(&self) -> Option<HubUrl> {
        self.state.lock().unwrap().redirect_target.clone()
    }

    /// The favorite entry this session was configured from, if any
    pub fn favorite(&self) -> Option<FavoriteHubEntry> {
        self.state.lock().unwrap().favorite.clone()
    }

    pub fn is_auto_reconnect(&self) -> bool {
        self.state.lock().unwrap().auto_reconnect
    }

    /// Delay before the next automatic redial, fixed per connect cycle
    pub fn reconnect_delay_secs(&self) -> u64 {
        self.state.lock().unwrap().reconnect_delay_secs
    }

    pub fn user_count(&self) -> usize {
        self.state.lock().unwrap().users.len()
    }

    // ------------------------------------------------------------------
    // Connect / Disconnect
    // ------------------------------------------------------------------

    /// Open (or reopen) the connection to the hub
    pub fn connect(&self) {
        let now = self.time.now();

        // Settings snapshot, favorite merge on top of the defaults
        let global = self.settings_source.global();
        let mut settings = self.settings_source.hub_defaults();
        let favorite = self.settings_source.favorite(&self.url);
        if let Some(fav) = &favorite {
            settings.apply_favorite(fav);
        }
        self.search_queue
            .set_min_interval(settings.search_interval_ms(&global));

        let (epoch, options, events) = {
            let mut st = self.state.lock().unwrap();

            // Replace the transport slot; in-flight callbacks hold their
            // own Arc, so the old handle outlives them and no more
            if let Some(old) = st.transport.take() {
                old.disconnect(true);
            }
            st.epoch += 1;

            st.redirect_target = None;
            st.auto_reconnect = true;
            st.reconnect_delay_secs = 120 + rand::thread_rng().gen_range(0..60);
            st.registered = false;
            st.my_identity = Identity {
                user: st.my_identity.user,
                nick: settings.nick.clone(),
                description: settings.description.clone(),
                flags: Default::default(),
            };
            st.hub_identity = Identity::default();
            st.global = global;
            st.settings = settings;
            st.favorite = favorite;
            st.last_activity = now;

            let options = ConnectOptions {
                address: self.url.address().to_string(),
                port: self.url.port(),
                secure: self.url.is_secure(),
                allow_untrusted: st.global.allow_untrusted_hubs,
                keyprint: if st.pin_relaxed {
                    None
                } else {
                    self.url.keyprint().map(str::to_string)
                },
            };

            let events = self.apply_state_locked(&mut st, ConnectState::Connecting);
            (st.epoch, options, events)
        };
        self.fire_all(events);

        debug!(hub = %self.url, "connecting");
        let callback = self.transport_callback(epoch);
        match self.factory.open(options, callback) {
            Ok(transport) => {
                let mut st = self.state.lock().unwrap();
                if st.epoch == epoch {
                    st.transport = Some(transport);
                } else {
                    // A newer connect superseded this attempt
                    transport.disconnect(true);
                }
            }
            Err(error) => {
                let events = {
                    let mut st = self.state.lock().unwrap();
                    self.apply_state_locked(&mut st, ConnectState::Disconnected)
                };
                self.fire_all(events);
                self.listeners.fire(&HubEvent::Failed {
                    url: self.url.clone(),
                    reason: error.to_string(),
                });
            }
        }
    }

    /// Explicit user retry: drop the connection and redial on the next tick
    pub fn reconnect(&self) {
        self.disconnect(true);
        let mut st = self.state.lock().unwrap();
        st.auto_reconnect = true;
        st.reconnect_delay_secs = 0;
    }

    /// Ask the transport to go away; the state change arrives through the
    /// failure callback like any other loss
    pub fn disconnect(&self, graceless: bool) {
        let transport = self.state.lock().unwrap().transport.clone();
        if let Some(transport) = transport {
            transport.disconnect(graceless);
        }
    }

    /// Retry a trust-failed connection with the certificate pin dropped
    pub fn allow_untrusted_connect(&self) {
        {
            let mut st = self.state.lock().unwrap();
            if st.connect_state.is_connected() || !st.keyprint_error {
                return;
            }
            st.pin_relaxed = true;
        }
        self.connect();
    }

    /// Tear the session down for good
    ///
    /// On a redirect the cache survives into the successor session and no
    /// Disconnecting notification is sent.
    pub fn shutdown(&self, redirect: bool) {
        self.settings_source.remove_user_commands(&self.url);
        if !redirect {
            self.listeners.fire(&HubEvent::Disconnecting);
        }

        let transport = {
            let mut st = self.state.lock().unwrap();
            st.epoch += 1;
            st.auto_reconnect = false;
            st.connect_state = ConnectState::Disconnected;
            st.users.clear();
            let prev = st.count_type;
            st.count_type = CountType::Uncounted;
            self.counts.apply(prev, CountType::Uncounted);
            st.transport.take()
        };
        if let Some(transport) = transport {
            transport.disconnect(false);
        }

        if !redirect {
            self.cache.clear();
        }
        self.search_queue.clear();
    }

    // ------------------------------------------------------------------
    // Transport Events
    // ------------------------------------------------------------------

    fn transport_callback(&self, epoch: u64) -> TransportCallback {
        let weak = self.self_weak.clone();
        Arc::new(move |event| {
            if let Some(session) = weak.upgrade() {
                session.on_transport_event(epoch, event);
            }
        })
    }

    /// Handle one transport lifecycle event for the given connection epoch
    pub fn on_transport_event(&self, epoch: u64, event: TransportEvent) {
        {
            let st = self.state.lock().unwrap();
            if st.epoch != epoch {
                return;
            }
        }

        match event {
            TransportEvent::Connecting => {
                self.status_message(
                    format!("Connecting to {} ...", self.url),
                    Severity::Info,
                );
                self.listeners.fire(&HubEvent::Connecting);
            }
            TransportEvent::Connected => {
                self.status_message(MSG_CONNECTED, Severity::Info);
                self.update_activity();
                self.listeners.fire(&HubEvent::Connected);
                self.transition(ConnectState::Protocol);
            }
            TransportEvent::Line(_) => {
                // Parsing belongs to the protocol codec; any traffic
                // counts as activity
                self.update_activity();
            }
            TransportEvent::Failed(reason) => {
                self.on_failed(reason);
            }
        }
    }

    fn on_failed(&self, reason: String) {
        let (events, reason, was_normal) = {
            let mut st = self.state.lock().unwrap();
            st.users.clear();
            let was_normal = st.connect_state == ConnectState::Normal;

            let mut reason = reason;
            if self.url.is_secure() && st.global.allow_untrusted_hubs {
                let mismatch = st
                    .transport
                    .as_ref()
                    .map(|t| !t.keyprint_match())
                    .unwrap_or(false);
                if mismatch {
                    st.keyprint_error = true;
                    reason.push_str(MSG_UNTRUSTED_HINT);
                }
            }

            let events = self.apply_state_locked(&mut st, ConnectState::Disconnected);
            (events, reason, was_normal)
        };

        if was_normal {
            self.settings_source.remove_user_commands(&self.url);
        }
        self.fire_all(events);
        self.status_message(reason.clone(), Severity::Warning);
        self.listeners.fire(&HubEvent::Failed {
            url: self.url.clone(),
            reason,
        });
    }

    // ------------------------------------------------------------------
    // Handshake Hooks (driven by the protocol codec)
    // ------------------------------------------------------------------

    /// The hub moved on to identity exchange
    pub fn on_handshake_identify(&self) {
        self.transition(ConnectState::Identify);
    }

    /// The hub asked for a password
    ///
    /// Returns the stored password for the codec to send, or fires
    /// GetPassword and returns None when nothing is stored.
    pub fn on_password_required(&self) -> Option<String> {
        self.transition(ConnectState::Verify);
        let password = self.state.lock().unwrap().settings.password.clone();
        match password {
            Some(password) if !password.is_empty() => {
                self.status_message(MSG_STORED_PASSWORD_SENT, Severity::Info);
                Some(password)
            }
            _ => {
                self.listeners.fire(&HubEvent::GetPassword);
                None
            }
        }
    }

    /// Handshake finished; the session is live
    pub fn on_handshake_complete(&self, registered: bool) {
        {
            let mut st = self.state.lock().unwrap();
            st.registered = registered;
        }
        self.transition(ConnectState::Normal);
        self.update_counts();
    }

    /// The hub told us to go elsewhere
    pub fn on_redirect(&self, target: HubUrl) {
        if let Some(host) = self.host() {
            if host.has_session(&target) {
                self.status_message(MSG_REDIRECT_ALREADY_CONNECTED, Severity::Info);
                return;
            }
        }

        let auto_follow = {
            let mut st = self.state.lock().unwrap();
            st.redirect_target = Some(target.clone());
            st.global.auto_follow_redirects
        };

        if auto_follow {
            self.follow_redirect();
        } else {
            self.listeners.fire(&HubEvent::Redirect(target));
        }
    }

    /// Execute a stored redirect (called directly when auto-follow is on,
    /// or by the embedder once the user agrees)
    pub fn follow_redirect(&self) {
        let target = self.state.lock().unwrap().redirect_target.clone();
        let Some(target) = target else {
            return;
        };
        let Some(host) = self.host() else {
            return;
        };

        if host.has_session(&target) {
            self.status_message(MSG_REDIRECT_ALREADY_CONNECTED, Severity::Info);
            return;
        }
        if host.redirect_session(&self.url, &target) {
            self.listeners.fire(&HubEvent::Redirected(target));
        }
    }

    // ------------------------------------------------------------------
    // Roster
    // ------------------------------------------------------------------

    /// A user appeared or changed
    pub fn on_user_updated(&self, identity: Identity) {
        if let Some(user) = identity.user {
            let mut st = self.state.lock().unwrap();
            st.users.insert(user, identity.clone());
        }
        self.listeners.fire(&HubEvent::UserUpdated(identity));
    }

    /// A batch of roster updates arrived
    pub fn on_users_updated(&self, identities: Vec<Identity>) {
        let count = identities.len();
        {
            let mut st = self.state.lock().unwrap();
            for identity in identities {
                if let Some(user) = identity.user {
                    st.users.insert(user, identity);
                }
            }
        }
        self.listeners.fire(&HubEvent::UsersUpdated(count));
    }

    /// Our own identity changed (rights granted, registration seen)
    pub fn on_my_identity(&self, identity: Identity) {
        {
            let mut st = self.state.lock().unwrap();
            st.my_identity = identity;
        }
        self.update_counts();
    }

    pub fn on_hub_identity(&self, identity: Identity) {
        let mut st = self.state.lock().unwrap();
        st.hub_identity = identity;
    }

    pub fn find_user(&self, user: &UserId) -> Option<Identity> {
        self.state.lock().unwrap().users.get(user).cloned()
    }

    // ------------------------------------------------------------------
    // Counting
    // ------------------------------------------------------------------

    /// Recompute this session's contribution to the aggregate counts
    fn update_counts(&self) {
        let mut st = self.state.lock().unwrap();

        // Always drop the previous classification, then add the right one
        // back if the session still qualifies
        let prev = st.count_type;
        st.count_type = CountType::Uncounted;
        self.counts.apply(prev, CountType::Uncounted);

        if st.connect_state != ConnectState::Normal {
            return;
        }

        let decided = if st.my_identity.is_op() {
            Some(CountType::Op)
        } else if st.registered || st.my_identity.is_registered() {
            Some(CountType::Registered)
        } else if st.global.disallow_unauthenticated {
            // Drop the hub before it would be counted
            st.auto_reconnect = false;
            None
        } else {
            Some(CountType::Normal)
        };

        match decided {
            Some(class) => {
                st.count_type = class;
                self.counts.apply(CountType::Uncounted, class);
            }
            None => {
                let transport = st.transport.clone();
                drop(st);
                self.status_message(MSG_UNAUTHENTICATED_DISALLOWED, Severity::Warning);
                if let Some(transport) = transport {
                    transport.disconnect(true);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------

    /// Send raw protocol bytes to the hub
    pub fn send(&self, data: &[u8]) -> windlass_core::Result<()> {
        let transport = {
            let mut st = self.state.lock().unwrap();
            if !st.connect_state.is_connected() {
                return Err(TransportError::NotConnected.into());
            }
            st.last_activity = self.time.now();
            st.transport.clone()
        };
        match transport {
            Some(transport) => transport.send(data),
            None => Err(TransportError::NotConnected.into()),
        }
    }

    /// Append a status line to the window and notify observers
    pub fn status_message(&self, text: impl Into<String>, severity: Severity) {
        let message = StatusMessage::new(text, severity, self.time.now());
        self.cache.add_message(message.clone());
        if self.state.lock().unwrap().global.log_status_messages {
            info!(hub = %self.url, "{}", message.text);
        }
        self.listeners.fire(&HubEvent::StatusMessage(message));
    }

    /// An incoming (or echoed) chat message
    pub fn on_chat_message(&self, message: ChatMessage) {
        debug!(hub = %self.url, from = %message.from.nick, "chat message");
        self.cache.add_message(message.clone());
        self.listeners.fire(&HubEvent::ChatMessage(message));
    }

    /// Mark the window read; observers hear about it only if anything changed
    pub fn set_read(&self) {
        if self.cache.set_read() > 0 {
            self.listeners.fire(&HubEvent::MessagesRead);
        }
    }

    /// Drop the cached history, returning how many messages went
    pub fn clear_cache(&self) -> usize {
        let removed = self.cache.clear();
        if removed > 0 {
            self.listeners.fire(&HubEvent::MessagesCleared);
        }
        removed
    }

    // ------------------------------------------------------------------
    // Searches
    // ------------------------------------------------------------------

    /// Queue a search; returns the estimated wait until dispatch
    pub fn queue_search(
        &self,
        request: SearchRequest,
        owner: OwnerToken,
        priority: SearchPriority,
    ) -> Duration {
        debug!(hub = %self.url, query = %request.query, "queue search");
        self.search_queue
            .add(request, owner, priority, self.time.now())
    }

    /// Remove a requester's pending searches
    pub fn cancel_search(&self, owner: OwnerToken) -> bool {
        self.search_queue.cancel(owner)
    }

    pub fn queued_search_count(&self) -> usize {
        self.search_queue.len()
    }

    // ------------------------------------------------------------------
    // Timer
    // ------------------------------------------------------------------

    /// One second passed: evaluate reconnection, then search dispatch
    fn on_second(&self, now: Timestamp) {
        let reconnect_due = {
            let st = self.state.lock().unwrap();
            st.connect_state == ConnectState::Disconnected
                && st.auto_reconnect
                && now.as_millis()
                    >= st.last_activity.as_millis() + st.reconnect_delay_secs * 1000
        };
        if reconnect_due {
            info!(hub = %self.url, "reconnecting");
            self.connect();
        }

        if self.search_queue.has_waiting_time(now) {
            return;
        }

        let dispatching = self.state.lock().unwrap().connect_state == ConnectState::Normal;
        if dispatching {
            if let Some(search) = self.search_queue.pop(now) {
                self.search_sink.dispatch(&self.url, search);
            }
        }
    }

    // ------------------------------------------------------------------
    // Transport Queries
    // ------------------------------------------------------------------

    pub fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connect_state.is_connected()
    }

    pub fn is_secure(&self) -> bool {
        let st = self.state.lock().unwrap();
        st.connect_state.is_connected()
            && st.transport.as_ref().map(|t| t.is_secure()).unwrap_or(false)
    }

    pub fn is_trusted(&self) -> bool {
        let st = self.state.lock().unwrap();
        st.connect_state.is_connected()
            && st.transport.as_ref().map(|t| t.is_trusted()).unwrap_or(false)
    }

    pub fn encryption_info(&self) -> String {
        let st = self.state.lock().unwrap();
        if !st.connect_state.is_connected() {
            return String::new();
        }
        st.transport
            .as_ref()
            .map(|t| t.encryption_info())
            .unwrap_or_default()
    }

    pub fn keyprint(&self) -> Option<Vec<u8>> {
        let st = self.state.lock().unwrap();
        if !st.connect_state.is_connected() {
            return None;
        }
        st.transport.as_ref().and_then(|t| t.keyprint())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn host(&self) -> Option<Arc<dyn HubHost>> {
        self.host.lock().unwrap().as_ref().and_then(Weak::upgrade)
    }

    fn update_activity(&self) {
        let mut st = self.state.lock().unwrap();
        st.last_activity = self.time.now();
    }

    /// Apply a state transition under the lock; returns the notifications
    /// to fire once the lock is released, in order
    fn apply_state_locked(&self, st: &mut HubState, new: ConnectState) -> Vec<HubEvent> {
        if st.connect_state == new {
            return Vec::new();
        }
        let old = st.connect_state;
        st.connect_state = new;

        // Leaving NORMAL always releases the count; entering it goes
        // through update_counts so the policy check can run
        if old == ConnectState::Normal {
            let prev = st.count_type;
            st.count_type = CountType::Uncounted;
            self.counts.apply(prev, CountType::Uncounted);
        }

        vec![HubEvent::ConnectStateChanged(new)]
    }

    fn transition(&self, new: ConnectState) {
        let events = {
            let mut st = self.state.lock().unwrap();
            self.apply_state_locked(&mut st, new)
        };
        self.fire_all(events);
    }

    fn fire_all(&self, events: Vec<HubEvent>) {
        for event in events {
            self.listeners.fire(&event);
        }
    }
}

impl<T: TimeSource + Send + Sync + 'static> TickListener for HubConnection<T> {
    fn tick(&self, now: Timestamp) {
        self.on_second(now);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use windlass_core::{ManualTimeSource, StaticSettings};

    #[derive(Default)]
    struct RecordingSink {
        dispatched: Mutex<Vec<String>>,
    }

    impl SearchSink for RecordingSink {
        fn dispatch(&self, _hub: &HubUrl, search: Search) {
            self.dispatched.lock().unwrap().push(search.request.query);
        }
    }

    struct FakeTransport {
        disconnects: AtomicUsize,
    }

    impl FakeTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                disconnects: AtomicUsize::new(0),
            })
        }
    }

    impl HubTransport for FakeTransport {
        fn send(&self, _data: &[u8]) -> windlass_core::Result<()> {
            Ok(())
        }
        fn disconnect(&self, _graceless: bool) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
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

    struct FakeFactory {
        opened: AtomicUsize,
        transport: Arc<FakeTransport>,
    }

    impl FakeFactory {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                opened: AtomicUsize::new(0),
                transport: FakeTransport::new(),
            })
        }
    }

    impl TransportFactory for FakeFactory {
        fn open(
            &self,
            _options: ConnectOptions,
            _on_event: TransportCallback,
        ) -> windlass_core::Result<Arc<dyn HubTransport>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(self.transport.clone() as Arc<dyn HubTransport>)
        }
    }

    fn test_session(
        time: ManualTimeSource,
    ) -> (
        Arc<HubConnection<ManualTimeSource>>,
        Arc<FakeFactory>,
        Arc<RecordingSink>,
    ) {
        let factory = FakeFactory::new();
        let sink = Arc::new(RecordingSink::default());
        let context = HubContext {
            time,
            settings: Arc::new(StaticSettings::default()),
            transports: factory.clone(),
            searches: sink.clone(),
            counts: Arc::new(SessionCounts::new()),
        };
        let session = HubConnection::new(HubUrl::parse("adc://hub.example:1511"), context, None);
        (session, factory, sink)
    }

    #[test]
    fn test_connect_moves_to_connecting() {
        let time = ManualTimeSource::starting_at(1_000_000);
        let (session, factory, _sink) = test_session(time);

        assert_eq!(session.connect_state(), ConnectState::Disconnected);
        session.connect();
        assert_eq!(session.connect_state(), ConnectState::Connecting);
        assert_eq!(factory.opened.load(Ordering::SeqCst), 1);
        assert!(session.is_auto_reconnect());
    }

    #[test]
    fn test_transport_connected_enters_protocol() {
        let time = ManualTimeSource::starting_at(1_000_000);
        let (session, _factory, _sink) = test_session(time);
        session.connect();

        session.on_transport_event(1, TransportEvent::Connected);
        assert_eq!(session.connect_state(), ConnectState::Protocol);
    }

    #[test]
    fn test_stale_epoch_events_dropped() {
        let time = ManualTimeSource::starting_at(1_000_000);
        let (session, factory, _sink) = test_session(time);
        session.connect();
        session.connect(); // supersedes epoch 1

        // The superseded transport was told to go away
        assert!(factory.transport.disconnects.load(Ordering::SeqCst) >= 1);

        session.on_transport_event(1, TransportEvent::Failed("old socket".into()));
        assert_eq!(session.connect_state(), ConnectState::Connecting);
    }

    #[test]
    fn test_failure_is_notified_once_per_transition() {
        let time = ManualTimeSource::starting_at(1_000_000);
        let (session, _factory, _sink) = test_session(time);
        session.connect();

        let changes = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&changes);
        session.listeners().subscribe(move |event| {
            if matches!(event, HubEvent::ConnectStateChanged(_)) {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        session.on_transport_event(1, TransportEvent::Failed("closed".into()));
        assert_eq!(session.connect_state(), ConnectState::Disconnected);
        assert_eq!(changes.load(Ordering::SeqCst), 1);

        // A repeated failure for the same epoch changes nothing further
        session.on_transport_event(1, TransportEvent::Failed("closed".into()));
        assert_eq!(changes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_set_read_suppressed_when_nothing_unread() {
        let time = ManualTimeSource::starting_at(1_000_000);
        let (session, _factory, _sink) = test_session(time);

        let notified = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&notified);
        session.listeners().subscribe(move |event| {
            if matches!(event, HubEvent::MessagesRead) {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        session.set_read();
        assert_eq!(notified.load(Ordering::SeqCst), 0);

        session.status_message("hello", Severity::Info);
        session.set_read();
        assert_eq!(notified.load(Ordering::SeqCst), 1);

        session.set_read();
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_search_dispatch_only_in_normal() {
        let time = ManualTimeSource::starting_at(1_000_000);
        let (session, _factory, sink) = test_session(time.clone());

        session.queue_search(
            SearchRequest::new("linux iso"),
            OwnerToken::new(),
            SearchPriority::Normal,
        );

        // Not connected: the entry stays queued
        session.tick(time.now());
        assert_eq!(session.queued_search_count(), 1);

        session.connect();
        session.on_transport_event(1, TransportEvent::Connected);
        session.on_handshake_complete(false);
        assert_eq!(session.connect_state(), ConnectState::Normal);

        time.advance(20_000);
        session.tick(time.now());
        assert_eq!(session.queued_search_count(), 0);
        assert_eq!(*sink.dispatched.lock().unwrap(), ["linux iso"]);
    }
}

//! Private conversations and the optional direct channel
//!
//! A `DirectSession` tracks one private conversation with a peer. Messages
//! normally travel relayed through the hub the peer was last seen on; when
//! both sides support it, the session opportunistically upgrades to a
//! direct peer channel (CCPM), with automatic retry, a 30 second
//! establishment timeout, and silent fallback to the relay path.
//!
//! Presence flickers are coalesced: rapid online/update events only arm
//! short debounce deadlines, and the real work happens when they expire on
//! a later tick.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use windlass_core::{
    CcpmState, ChatMessage, DelayedEvents, DirectEvent, HintedUser, HubUrl, Listeners,
    MessageCache, PmSignal, SettingsSource, Severity, StatusMessage, TimeSource, Timestamp,
    UserFlags, UserId, WindlassError,
};

use crate::ticker::TickListener;

// ----------------------------------------------------------------------------
// Collaborator Interfaces
// ----------------------------------------------------------------------------

/// Outcome of asking for a new direct channel
#[derive(Debug, Clone, Default)]
pub struct ChannelAttempt {
    /// The attempt is underway; completion arrives asynchronously
    pub started: bool,
    /// The peer's protocol cannot do direct channels at all; automatic
    /// upgrades stay off for this session
    pub protocol_unsupported: bool,
    /// Reason for an immediate rejection, empty otherwise
    pub error: String,
}

/// Requests direct channels from the connection-establishment layer
pub trait ChannelConnector: Send + Sync {
    fn request(&self, peer: &HintedUser) -> ChannelAttempt;
}

/// A live direct channel to the peer
pub trait DirectChannel: Send + Sync {
    fn send_text(&self, text: &str, third_person: bool) -> windlass_core::Result<()>;

    fn send_signal(&self, signal: PmSignal) -> windlass_core::Result<()>;

    /// Whether the peer negotiated the info-signaling extension
    fn supports_signals(&self) -> bool;

    fn disconnect(&self, graceless: bool);
}

/// Presence, capability and relay access for peers across all hubs
pub trait PeerDirectory: Send + Sync {
    fn is_online(&self, user: &UserId) -> bool;

    /// Whether the peer advertises direct-channel support, plus a reason
    /// when it does not
    fn supports_ccpm(&self, user: &UserId) -> (bool, String);

    fn flags(&self, user: &UserId) -> UserFlags;

    /// Hubs the peer is currently on, as (url, hub name) pairs
    fn hubs(&self, user: &UserId) -> Vec<(HubUrl, String)>;

    fn hub_name(&self, url: &HubUrl) -> String;

    /// Formatted nick list for status lines
    fn nicks(&self, user: &UserId) -> String;

    /// Send a private message relayed through the hinted hub
    fn relay_message(&self, peer: &HintedUser, text: &str) -> Result<(), String>;
}

/// Shared collaborators handed to every direct session
#[derive(Clone)]
pub struct DirectContext<T: TimeSource> {
    pub time: T,
    pub settings: Arc<dyn SettingsSource>,
    pub directory: Arc<dyn PeerDirectory>,
    pub connector: Arc<dyn ChannelConnector>,
}

// ----------------------------------------------------------------------------
// Status Lines
// ----------------------------------------------------------------------------

const MSG_CCPM_ESTABLISHING: &str = "Establishing a direct encrypted channel ...";
const MSG_CCPM_ESTABLISHED: &str = "A direct encrypted channel has been established";
const MSG_CCPM_DISCONNECTED: &str = "The direct encrypted channel has been disconnected";
const MSG_CCPM_TIMEOUT: &str = "Could not establish a direct encrypted channel in time";
const MSG_USER_OFFLINE: &str = "User went offline";

const UPGRADE_TIMEOUT: Duration = Duration::from_secs(30);
const AUTO_UPGRADE_DEBOUNCE: Duration = Duration::from_secs(1);
const PRESENCE_DEBOUNCE: Duration = Duration::from_secs(1);
const AUTO_UPGRADE_PRESENCE_DELAY: Duration = Duration::from_secs(3);

/// Automatic upgrade attempts allowed per connect cycle
const MAX_AUTO_UPGRADE_ATTEMPTS: u32 = 3;

// ----------------------------------------------------------------------------
// Direct Session
// ----------------------------------------------------------------------------

/// Deadline keys for this session's one-shot events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DirectTimer {
    AutoUpgrade,
    UpgradeTimeout,
    PresenceUpdate,
}

/// One private conversation
pub struct DirectSession<T: TimeSource> {
    time: T,
    settings: Arc<dyn SettingsSource>,
    directory: Arc<dyn PeerDirectory>,
    connector: Arc<dyn ChannelConnector>,
    cache: MessageCache,
    listeners: Listeners<DirectEvent>,
    state: Mutex<DirectState>,
}

struct DirectState {
    peer: HintedUser,
    hub_name: String,
    online: bool,
    ccpm_state: CcpmState,
    ccpm_attempts: u32,
    allow_auto_ccpm: bool,
    last_error: String,
    supports_ccpm: bool,
    channel: Option<Arc<dyn DirectChannel>>,
    delay: DelayedEvents<DirectTimer>,
}

impl<T: TimeSource + Send + Sync + 'static> DirectSession<T> {
    /// Open a conversation with a peer
    ///
    /// `inbound` carries an already-established channel when the peer
    /// connected to us; otherwise the auto-upgrade debounce is armed.
    pub fn new(
        peer: HintedUser,
        context: DirectContext<T>,
        inbound: Option<Arc<dyn DirectChannel>>,
    ) -> Arc<Self> {
        let global = context.settings.global();
        let (supports_ccpm, last_error) = context.directory.supports_ccpm(&peer.user);
        let online = context.directory.is_online(&peer.user);
        let hub_name = context.directory.hub_name(&peer.hint);
        let now = context.time.now();

        let mut delay = DelayedEvents::new();
        let (ccpm_state, channel) = match inbound {
            Some(channel) => (CcpmState::Connected, Some(channel)),
            None => {
                delay.schedule(DirectTimer::AutoUpgrade, AUTO_UPGRADE_DEBOUNCE, now);
                (CcpmState::Disconnected, None)
            }
        };

        Arc::new(Self {
            time: context.time,
            settings: context.settings,
            directory: context.directory,
            connector: context.connector,
            cache: MessageCache::new(global.pm_message_cache),
            listeners: Listeners::new(),
            state: Mutex::new(DirectState {
                peer,
                hub_name,
                online,
                ccpm_state,
                ccpm_attempts: 0,
                allow_auto_ccpm: true,
                last_error,
                supports_ccpm,
                channel,
                delay,
            }),
        })
    }

    pub fn peer(&self) -> HintedUser {
        self.state.lock().unwrap().peer.clone()
    }

    pub fn hub_name(&self) -> String {
        self.state.lock().unwrap().hub_name.clone()
    }

    pub fn ccpm_state(&self) -> CcpmState {
        self.state.lock().unwrap().ccpm_state
    }

    pub fn is_online(&self) -> bool {
        self.state.lock().unwrap().online
    }

    pub fn supports_ccpm(&self) -> bool {
        self.state.lock().unwrap().supports_ccpm
    }

    pub fn allow_auto_upgrade(&self) -> bool {
        self.state.lock().unwrap().allow_auto_ccpm
    }

    pub fn last_error(&self) -> String {
        self.state.lock().unwrap().last_error.clone()
    }

    pub fn cache(&self) -> &MessageCache {
        &self.cache
    }

    pub fn listeners(&self) -> &Listeners<DirectEvent> {
        &self.listeners
    }

    // ------------------------------------------------------------------
    // Channel Upgrade
    // ------------------------------------------------------------------

    /// Try to upgrade the conversation to a direct channel
    ///
    /// No-op when the peer is offline or an attempt is already underway
    /// or established.
    pub fn start_channel(&self) {
        let peer = self.peer();
        if !self.directory.is_online(&peer.user) {
            return;
        }

        let now = self.time.now();
        {
            let mut st = self.state.lock().unwrap();
            if st.ccpm_state != CcpmState::Disconnected {
                return;
            }
            st.ccpm_state = CcpmState::Connecting;
            st.last_error.clear();
        }

        let attempt = self.connector.request(&peer);
        {
            let mut st = self.state.lock().unwrap();
            st.allow_auto_ccpm = !attempt.protocol_unsupported;
            if attempt.started {
                st.delay
                    .schedule(DirectTimer::UpgradeTimeout, UPGRADE_TIMEOUT, now);
            } else {
                st.ccpm_state = CcpmState::Disconnected;
                st.last_error = attempt.error.clone();
            }
        }

        if attempt.started {
            self.status_message(MSG_CCPM_ESTABLISHING, Severity::Info);
            self.listeners
                .fire(&DirectEvent::CcpmStatusUpdated(CcpmState::Connecting));
        } else if !attempt.error.is_empty() {
            self.status_message(attempt.error, Severity::Error);
        }
    }

    /// Debounced automatic-upgrade check
    fn check_auto_upgrade(&self) {
        let peer = self.peer();
        if !self.directory.is_online(&peer.user) || !self.settings.global().always_ccpm {
            return;
        }
        let flags = self.directory.flags(&peer.user);
        let supports = self.state.lock().unwrap().supports_ccpm;
        if !supports || flags.legacy || flags.bot {
            return;
        }

        let attempt_now = {
            let mut st = self.state.lock().unwrap();
            if st.allow_auto_ccpm && st.ccpm_state == CcpmState::Disconnected {
                true
            } else {
                if st.ccpm_state == CcpmState::Connected {
                    st.allow_auto_ccpm = true;
                }
                false
            }
        };

        if attempt_now {
            self.start_channel();
            let mut st = self.state.lock().unwrap();
            st.ccpm_attempts += 1;
            if st.ccpm_attempts >= MAX_AUTO_UPGRADE_ATTEMPTS {
                st.allow_auto_ccpm = false;
            }
        }
    }

    fn check_upgrade_timeout(&self) {
        {
            let mut st = self.state.lock().unwrap();
            if st.ccpm_state != CcpmState::Connecting {
                return;
            }
            st.ccpm_state = CcpmState::Disconnected;
        }
        self.status_message(MSG_CCPM_TIMEOUT, Severity::Info);
        self.listeners
            .fire(&DirectEvent::CcpmStatusUpdated(CcpmState::Disconnected));
    }

    /// The connection layer established our direct channel
    pub fn on_channel_connected(&self, channel: Arc<dyn DirectChannel>) {
        {
            let mut st = self.state.lock().unwrap();
            st.ccpm_state = CcpmState::Connected;
            st.channel = Some(channel);
            st.delay.cancel(&DirectTimer::UpgradeTimeout);
            // Fresh budget for the next reconnect cycle
            st.allow_auto_ccpm = true;
            st.ccpm_attempts = 0;
        }
        self.status_message(MSG_CCPM_ESTABLISHED, Severity::Info);
        self.listeners
            .fire(&DirectEvent::CcpmStatusUpdated(CcpmState::Connected));
    }

    /// The direct channel dropped
    pub fn on_channel_disconnected(&self) {
        let now = self.time.now();
        {
            let mut st = self.state.lock().unwrap();
            if st.ccpm_state != CcpmState::Connected {
                return;
            }
            st.ccpm_state = CcpmState::Disconnected;
            st.channel = None;
            st.delay
                .schedule(DirectTimer::AutoUpgrade, AUTO_UPGRADE_DEBOUNCE, now);
        }
        self.status_message(MSG_CCPM_DISCONNECTED, Severity::Info);
        self.listeners
            .fire(&DirectEvent::CcpmStatusUpdated(CcpmState::Disconnected));
    }

    /// Tear the channel down
    ///
    /// With `no_auto_connect` the decline signal goes out first and the
    /// teardown stays graceful so it can still be delivered.
    pub fn close_channel(&self, now: bool, no_auto_connect: bool) {
        let channel = {
            let st = self.state.lock().unwrap();
            if st.ccpm_state == CcpmState::Connected {
                st.channel.clone()
            } else {
                None
            }
        };
        let Some(channel) = channel else {
            return;
        };

        if no_auto_connect {
            if channel.supports_signals() {
                let _ = channel.send_signal(PmSignal::DeclineAutoConnect);
            }
            self.state.lock().unwrap().allow_auto_ccpm = false;
        }

        channel.disconnect(now && !no_auto_connect);
        if now {
            let mut st = self.state.lock().unwrap();
            st.ccpm_state = CcpmState::Disconnected;
            st.channel = None;
        }
    }

    // ------------------------------------------------------------------
    // Presence
    // ------------------------------------------------------------------

    /// The peer dropped off every hub
    pub fn on_peer_offline(&self) {
        let peer = self.peer();
        let (supports, error) = self.directory.supports_ccpm(&peer.user);
        {
            let mut st = self.state.lock().unwrap();
            st.supports_ccpm = supports;
            st.last_error = error;
            st.delay.cancel(&DirectTimer::PresenceUpdate);
            if st.ccpm_state == CcpmState::Connecting {
                st.delay.cancel(&DirectTimer::UpgradeTimeout);
                st.ccpm_state = CcpmState::Disconnected;
            }
        }

        self.close_channel(true, false);

        {
            let mut st = self.state.lock().unwrap();
            st.allow_auto_ccpm = true;
            st.online = false;
        }
        self.listeners.fire(&DirectEvent::UserUpdated);
        self.status_message(MSG_USER_OFFLINE, Severity::Info);
    }

    /// The peer came online somewhere, or its profile changed
    pub fn on_peer_updated(&self) {
        let peer = self.peer();
        let (supports, error) = self.directory.supports_ccpm(&peer.user);
        let now = self.time.now();

        let mut st = self.state.lock().unwrap();
        st.supports_ccpm = supports;
        st.last_error = error;
        st.delay
            .schedule(DirectTimer::PresenceUpdate, PRESENCE_DEBOUNCE, now);
        st.delay
            .schedule(DirectTimer::AutoUpgrade, AUTO_UPGRADE_PRESENCE_DELAY, now);
    }

    /// The hub this conversation is attributed to was closed
    pub fn on_hub_closed(&self, url: &HubUrl) {
        let current = self.state.lock().unwrap().peer.hint.clone();
        if &current == url {
            self.check_user_hub(true);
            self.listeners.fire(&DirectEvent::UserUpdated);
        }
    }

    fn evaluate_presence(&self) {
        let was_online = self.state.lock().unwrap().online;
        if !was_online {
            let peer = self.peer();
            let nicks = self.directory.nicks(&peer.user);
            let hub_names: Vec<String> = self
                .directory
                .hubs(&peer.user)
                .into_iter()
                .map(|(_, name)| name)
                .collect();
            self.status_message(
                format!("User went online [{} - {}]", nicks, hub_names.join(", ")),
                Severity::Info,
            );

            // Online from a different hub?
            self.check_user_hub(false);
            self.state.lock().unwrap().online = true;
        }
        self.listeners.fire(&DirectEvent::UserUpdated);
    }

    /// Re-evaluate which hub carries this conversation; switches to the
    /// first hub the peer is still on when the current one dropped out
    fn check_user_hub(&self, went_offline: bool) {
        let peer = self.peer();
        let hubs = self.directory.hubs(&peer.user);
        if hubs.is_empty() {
            return;
        }
        if hubs.iter().any(|(url, _)| url == &peer.hint) {
            return;
        }

        let (new_url, new_name) = hubs[0].clone();
        let (old_name, cc_ready) = {
            let st = self.state.lock().unwrap();
            (st.hub_name.clone(), st.ccpm_state == CcpmState::Connected)
        };

        if !cc_ready {
            let text = if went_offline {
                format!(
                    "The user went offline in the hub {}; messages will be sent through the hub {}",
                    old_name, new_name
                )
            } else {
                format!("Messages will be sent through the hub {}", new_name)
            };
            self.status_message(text, Severity::Info);
        }

        let mut st = self.state.lock().unwrap();
        st.peer.hint = new_url;
        st.hub_name = new_name;
    }

    // ------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------

    /// Send a message over the direct channel when it is up, relayed
    /// through the attributed hub otherwise
    pub fn send_message(&self, text: &str, third_person: bool) -> windlass_core::Result<()> {
        let (channel, peer) = {
            let st = self.state.lock().unwrap();
            let channel = if st.ccpm_state == CcpmState::Connected {
                st.channel.clone()
            } else {
                None
            };
            (channel, st.peer.clone())
        };

        if let Some(channel) = channel {
            return channel.send_text(text, third_person);
        }
        self.directory
            .relay_message(&peer, text)
            .map_err(WindlassError::relay_failed)
    }

    /// An incoming private message, with the hub it was relayed through
    /// (None when it arrived over the direct channel)
    pub fn on_private_message(&self, message: ChatMessage, via_hub: Option<HubUrl>) {
        if let Some(hub) = via_hub {
            let (current, cc_ready) = {
                let st = self.state.lock().unwrap();
                (st.peer.hint.clone(), st.ccpm_state == CcpmState::Connected)
            };
            if hub != current {
                let name = self.directory.hub_name(&hub);
                if !cc_ready {
                    self.status_message(
                        format!("Messages will be sent through the hub {}", name),
                        Severity::Info,
                    );
                }
                {
                    let mut st = self.state.lock().unwrap();
                    st.peer.hint = hub;
                    st.hub_name = name;
                }
                self.listeners.fire(&DirectEvent::UserUpdated);
            }
        }

        if self.settings.global().log_private_chat {
            debug!(from = %message.from.nick, "private message");
        }
        self.cache.add_message(message.clone());
        self.listeners.fire(&DirectEvent::PrivateMessage(message));
    }

    /// Send one advisory signal, when the channel and the peer allow it
    pub fn send_signal(&self, signal: PmSignal) {
        let channel = {
            let st = self.state.lock().unwrap();
            if st.ccpm_state == CcpmState::Connected {
                st.channel.clone()
            } else {
                None
            }
        };
        if let Some(channel) = channel {
            if channel.supports_signals() {
                let _ = channel.send_signal(signal);
            }
        }
    }

    /// An advisory signal arrived over the direct channel
    pub fn on_signal(&self, signal: PmSignal) {
        match signal {
            PmSignal::DeclineAutoConnect => {
                self.state.lock().unwrap().allow_auto_ccpm = false;
            }
            PmSignal::Quit => {
                // The peer closed its window and left teardown to us
                self.close_channel(true, false);
            }
            _ => {}
        }
        self.listeners.fire(&DirectEvent::PmStatus(signal));
    }

    /// Append a status line to the conversation and notify observers
    pub fn status_message(&self, text: impl Into<String>, severity: Severity) {
        let message = StatusMessage::new(text, severity, self.time.now());
        self.cache.add_message(message.clone());
        self.listeners.fire(&DirectEvent::StatusMessage(message));
    }

    /// Mark the conversation read; observers hear about it only if
    /// anything changed
    pub fn set_read(&self) {
        if self.cache.set_read() > 0 {
            self.listeners.fire(&DirectEvent::MessagesRead);
        }
    }

    /// Drop the cached history, returning how many messages went
    pub fn clear_cache(&self) -> usize {
        let removed = self.cache.clear();
        if removed > 0 {
            self.listeners.fire(&DirectEvent::MessagesCleared);
        }
        removed
    }

    // ------------------------------------------------------------------
    // Close
    // ------------------------------------------------------------------

    /// The conversation window is closing
    pub fn close(&self) {
        self.listeners.fire(&DirectEvent::Close);

        let channel = {
            let st = self.state.lock().unwrap();
            if st.ccpm_state == CcpmState::Connected {
                st.channel.clone()
            } else {
                None
            }
        };
        if let Some(channel) = channel {
            if channel.supports_signals() {
                // Polite goodbye; the peer's acknowledgment path tears the
                // transport down
                self.send_signal(PmSignal::Quit);
            } else {
                self.close_channel(true, false);
            }
        }

        debug!(user = %self.peer().user, "conversation closed");
    }

    // ------------------------------------------------------------------
    // Timer
    // ------------------------------------------------------------------

    fn on_second(&self, now: Timestamp) {
        let due = {
            let mut st = self.state.lock().unwrap();
            st.delay.due(now)
        };
        for timer in due {
            match timer {
                DirectTimer::AutoUpgrade => self.check_auto_upgrade(),
                DirectTimer::UpgradeTimeout => self.check_upgrade_timeout(),
                DirectTimer::PresenceUpdate => self.evaluate_presence(),
            }
        }
    }
}

impl<T: TimeSource + Send + Sync + 'static> TickListener for DirectSession<T> {
    fn tick(&self, now: Timestamp) {
        self.on_second(now);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

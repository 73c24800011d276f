//! Session state types for hub connections and direct-message channels

use core::fmt;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Hub Connection State
// ----------------------------------------------------------------------------

/// Lifecycle state of a hub session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectState {
    /// Waiting for the socket to connect
    Connecting,
    /// Protocol feature negotiation
    Protocol,
    /// Nick/identity setup
    Identify,
    /// Password challenge outstanding
    Verify,
    /// Running; the only state in which searches go out and the session
    /// counts toward the aggregate totals
    Normal,
    /// Nothing in particular
    Disconnected,
}

impl ConnectState {
    /// True once the socket is up, whether or not the handshake finished
    pub fn is_connected(&self) -> bool {
        !matches!(self, ConnectState::Connecting | ConnectState::Disconnected)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConnectState::Connecting => "Connecting",
            ConnectState::Protocol => "Protocol",
            ConnectState::Identify => "Identify",
            ConnectState::Verify => "Verify",
            ConnectState::Normal => "Normal",
            ConnectState::Disconnected => "Disconnected",
        }
    }
}

impl fmt::Display for ConnectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ----------------------------------------------------------------------------
// Direct Channel State
// ----------------------------------------------------------------------------

/// State of the optional direct (hub-bypassing) private-message channel,
/// independent of the conversation itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CcpmState {
    Disconnected,
    Connecting,
    Connected,
}

impl CcpmState {
    pub fn name(&self) -> &'static str {
        match self {
            CcpmState::Disconnected => "Disconnected",
            CcpmState::Connecting => "Connecting",
            CcpmState::Connected => "Connected",
        }
    }
}

impl fmt::Display for CcpmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ----------------------------------------------------------------------------
// Direct Channel Signals
// ----------------------------------------------------------------------------

/// Advisory one-shot flags exchanged over a direct channel when both peers
/// support the info-signaling extension; wire encoding belongs to the
/// protocol codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PmSignal {
    /// The last message was seen
    MessageSeen,
    TypingOn,
    TypingOff,
    /// The peer asks us not to auto-establish the channel again
    DeclineAutoConnect,
    /// The conversation window is closing
    Quit,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

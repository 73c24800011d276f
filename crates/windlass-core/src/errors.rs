//! Error types for the Windlass session engine
//!
//! This module contains all error types used throughout the engine,
//! including transport errors, session errors, direct-channel errors, and
//! the main WindlassError type that unifies them all.

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Transport-level failures reported by the socket collaborator
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Connection to {address}:{port} failed: {reason}")]
    ConnectionFailed {
        address: String,
        port: u16,
        reason: String,
    },
    #[error("Not connected")]
    NotConnected,
    #[error("Send failed: {reason}")]
    SendFailed { reason: String },
    #[error("Certificate fingerprint mismatch")]
    KeyprintMismatch,
}

/// Hub session failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("No session for hub {url}")]
    SessionNotFound { url: String },
    #[error("Already connected to {url}")]
    AlreadyConnected { url: String },
    #[error("Password rejected by {url}")]
    BadPassword { url: String },
    #[error("Hub session state invalid: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },
}

/// Direct-channel (CCPM) failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    #[error("Peer is offline")]
    PeerOffline,
    #[error("Peer protocol does not support direct channels")]
    ProtocolUnsupported,
    #[error("Channel establishment failed: {reason}")]
    EstablishFailed { reason: String },
    #[error("Relay delivery failed: {reason}")]
    RelayFailed { reason: String },
}

// ----------------------------------------------------------------------------
// Unified Error Type
// ----------------------------------------------------------------------------

/// Core error type for the Windlass engine
#[derive(Debug, Clone, thiserror::Error)]
pub enum WindlassError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl WindlassError {
    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        WindlassError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a transport connection failed error
    pub fn connection_failed<A: Into<String>, R: Into<String>>(
        address: A,
        port: u16,
        reason: R,
    ) -> Self {
        WindlassError::Transport(TransportError::ConnectionFailed {
            address: address.into(),
            port,
            reason: reason.into(),
        })
    }

    /// Create a relay failure error
    pub fn relay_failed<R: Into<String>>(reason: R) -> Self {
        WindlassError::Channel(ChannelError::RelayFailed {
            reason: reason.into(),
        })
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, WindlassError>;

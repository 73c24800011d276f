//! User identity snapshots
//!
//! Identities are plain value snapshots of what a hub has told us about a
//! user (or about ourselves); they carry no live references and can be
//! copied freely between sessions.

use serde::{Deserialize, Serialize};

use crate::types::{HubUrl, UserId};

// ----------------------------------------------------------------------------
// User Flags
// ----------------------------------------------------------------------------

/// Capability and status flags advertised for a user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFlags {
    /// Holds operator rights on the hub
    pub op: bool,
    /// Registered account on the hub
    pub registered: bool,
    /// Automated client (chatbot, opchat)
    pub bot: bool,
    /// Legacy-protocol peer without extension support
    pub legacy: bool,
}

// ----------------------------------------------------------------------------
// Identity
// ----------------------------------------------------------------------------

/// Snapshot of a user as seen on one hub
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user: Option<UserId>,
    pub nick: String,
    pub description: String,
    pub flags: UserFlags,
}

impl Identity {
    /// Create an identity for a known user
    pub fn new(user: UserId, nick: impl Into<String>) -> Self {
        Self {
            user: Some(user),
            nick: nick.into(),
            description: String::new(),
            flags: UserFlags::default(),
        }
    }

    pub fn is_op(&self) -> bool {
        self.flags.op
    }

    pub fn is_registered(&self) -> bool {
        self.flags.registered
    }

    pub fn is_bot(&self) -> bool {
        self.flags.bot
    }
}

// ----------------------------------------------------------------------------
// Hinted User
// ----------------------------------------------------------------------------

/// A user together with the hub the conversation is attributed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintedUser {
    pub user: UserId,
    pub hint: HubUrl,
}

impl HintedUser {
    pub fn new(user: UserId, hint: HubUrl) -> Self {
        Self { user, hint }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

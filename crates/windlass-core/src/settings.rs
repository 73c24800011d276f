//! Configuration snapshots and per-hub favorites
//!
//! Sessions never hold live references into a settings store; they take a
//! snapshot on connect (merging any favorite-hub entry over the global
//! defaults) and keep it for the lifetime of that connection attempt.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::HubUrl;

// ----------------------------------------------------------------------------
// Global Settings
// ----------------------------------------------------------------------------

/// Process-wide settings read by the session engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSettings {
    /// Floor for the search spacing interval, in seconds
    pub search_interval_secs: u32,
    /// Attempt a direct channel for every eligible private conversation
    pub always_ccpm: bool,
    /// Allow secure hub connections whose certificate cannot be verified
    pub allow_untrusted_hubs: bool,
    /// Refuse to stay on hubs where we are neither registered nor op
    pub disallow_unauthenticated: bool,
    /// Follow hub redirect instructions without asking
    pub auto_follow_redirects: bool,
    /// Write hub status lines to the log sink
    pub log_status_messages: bool,
    /// Write private conversations to the log sink
    pub log_private_chat: bool,
    /// Message cache capacity for hub windows
    pub hub_message_cache: usize,
    /// Message cache capacity for private conversations
    pub pm_message_cache: usize,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            search_interval_secs: 5,      // hub-friendly pacing floor
            always_ccpm: false,
            allow_untrusted_hubs: false,
            disallow_unauthenticated: false,
            auto_follow_redirects: true,
            log_status_messages: false,
            log_private_chat: false,
            hub_message_cache: 100,
            pm_message_cache: 50,
        }
    }
}

// ----------------------------------------------------------------------------
// Per-Hub Settings
// ----------------------------------------------------------------------------

/// Settings applied to one hub session, after favorite merge
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubSettings {
    pub nick: String,
    pub description: String,
    pub email: String,
    pub password: Option<String>,
    /// Hide client version details from the hub
    pub stealth: bool,
    /// Share profile presented to this hub
    pub share_profile: Option<Uuid>,
    /// Per-hub override of the search spacing floor, in seconds
    pub search_interval_secs: Option<u32>,
}

impl HubSettings {
    /// Overlay a favorite entry; password, stealth and share profile
    /// override the global defaults when the favorite defines them
    pub fn apply_favorite(&mut self, favorite: &FavoriteHubEntry) {
        if let Some(password) = &favorite.password {
            if !password.is_empty() {
                self.password = Some(password.clone());
            }
        }
        self.stealth = favorite.stealth;
        if favorite.share_profile.is_some() {
            self.share_profile = favorite.share_profile;
        }
    }

    /// Effective spacing floor in milliseconds
    pub fn search_interval_ms(&self, global: &GlobalSettings) -> u64 {
        let secs = self
            .search_interval_secs
            .unwrap_or(global.search_interval_secs);
        u64::from(secs) * 1000
    }
}

/// A saved hub with per-hub overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FavoriteHubEntry {
    pub url: HubUrl,
    pub name: String,
    pub password: Option<String>,
    pub stealth: bool,
    pub share_profile: Option<Uuid>,
    pub auto_connect: bool,
}

impl FavoriteHubEntry {
    pub fn new(url: HubUrl, name: impl Into<String>) -> Self {
        Self {
            url,
            name: name.into(),
            password: None,
            stealth: false,
            share_profile: None,
            auto_connect: false,
        }
    }
}

// ----------------------------------------------------------------------------
// Settings Source
// ----------------------------------------------------------------------------

/// Read access to settings and favorites, plus the per-hub user-command
/// registrations the favorites store owns
pub trait SettingsSource: Send + Sync {
    /// Snapshot of the global settings
    fn global(&self) -> GlobalSettings;

    /// Default per-hub settings before any favorite merge
    fn hub_defaults(&self) -> HubSettings;

    /// The favorite entry for a hub URL, if one is saved
    fn favorite(&self, url: &HubUrl) -> Option<FavoriteHubEntry>;

    /// Drop custom command registrations made on behalf of this hub
    fn remove_user_commands(&self, _url: &HubUrl) {}
}

/// In-memory settings source for embedders and tests
#[derive(Debug, Default)]
pub struct StaticSettings {
    global: Mutex<GlobalSettings>,
    defaults: Mutex<HubSettings>,
    favorites: Mutex<Vec<FavoriteHubEntry>>,
}

impl StaticSettings {
    pub fn new(global: GlobalSettings, defaults: HubSettings) -> Self {
        Self {
            global: Mutex::new(global),
            defaults: Mutex::new(defaults),
            favorites: Mutex::new(Vec::new()),
        }
    }

    pub fn set_global(&self, global: GlobalSettings) {
        *self.global.lock().unwrap() = global;
    }

    pub fn add_favorite(&self, entry: FavoriteHubEntry) {
        let mut favorites = self.favorites.lock().unwrap();
        favorites.retain(|existing| existing.url != entry.url);
        favorites.push(entry);
    }
}

impl SettingsSource for StaticSettings {
    fn global(&self) -> GlobalSettings {
        self.global.lock().unwrap().clone()
    }

    fn hub_defaults(&self) -> HubSettings {
        self.defaults.lock().unwrap().clone()
    }

    fn favorite(&self, url: &HubUrl) -> Option<FavoriteHubEntry> {
        self.favorites
            .lock()
            .unwrap()
            .iter()
            .find(|entry| &entry.url == url)
            .cloned()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

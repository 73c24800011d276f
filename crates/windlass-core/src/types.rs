//! Core types for the Windlass session engine
//!
//! This module defines the fundamental types used throughout the engine,
//! using newtype patterns for semantic validation and type safety.

use core::fmt;
use core::ops::{Add, Sub};
use core::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// User Identifier
// ----------------------------------------------------------------------------

/// Unique identifier for a user (8-byte truncated from the full client ID)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId([u8; 8]);

impl UserId {
    /// Create a new UserId from 8 bytes
    pub fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Create a UserId from the first 8 bytes of a longer identifier
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut id = [0u8; 8];
        let len = core::cmp::min(bytes.len(), 8);
        id[..len].copy_from_slice(&bytes[..len]);
        Self(id)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for UserId {
    type Err = crate::WindlassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let clean = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(clean)
            .map_err(|_| crate::WindlassError::config_error("Invalid hex in UserId"))?;
        Ok(Self::from_bytes(&bytes))
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a new timestamp
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Get the current wall-clock timestamp
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    /// Get the raw milliseconds
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Add seconds to this timestamp
    pub fn add_seconds(&self, seconds: u64) -> Self {
        Self(self.0 + seconds * 1000)
    }

    /// Get the duration since another timestamp (saturating)
    pub fn duration_since(&self, other: Self) -> core::time::Duration {
        core::time::Duration::from_millis(self.0.saturating_sub(other.0))
    }
}

impl Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, millis: u64) -> Timestamp {
        Timestamp(self.0 + millis)
    }
}

impl Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

// ----------------------------------------------------------------------------
// Time Source Trait
// ----------------------------------------------------------------------------

/// Trait for providing timestamps
///
/// Session objects never read the clock directly; they go through a
/// TimeSource so the tick-driven logic can be exercised with synthetic time.
pub trait TimeSource {
    /// Get the current timestamp
    fn now(&self) -> Timestamp;
}

/// Standard wall-clock implementation of TimeSource
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Manually advanced time source for tests and simulations
#[derive(Debug, Clone, Default)]
pub struct ManualTimeSource {
    millis: Arc<AtomicU64>,
}

impl ManualTimeSource {
    /// Create a manual time source starting at the given timestamp
    pub fn starting_at(millis: u64) -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(millis)),
        }
    }

    /// Advance the clock by the given number of milliseconds
    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }

    /// Set the clock to an absolute timestamp
    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.millis.load(Ordering::SeqCst))
    }
}

// ----------------------------------------------------------------------------
// Hub URL
// ----------------------------------------------------------------------------

/// A hub address with the fields derived from it at parse time
///
/// Recognized schemes are `adc://`, `adcs://`, `nmdc://`, `nmdcs://` and
/// `dchub://`; the `s` variants request TLS. A `kp` query parameter carries
/// the pinned certificate fingerprint used to detect man-in-the-middle on
/// secure connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HubUrl {
    url: String,
    address: String,
    port: u16,
    secure: bool,
    keyprint: Option<String>,
}

const DEFAULT_HUB_PORT: u16 = 411;

impl HubUrl {
    /// Parse a hub URL string
    pub fn parse(url: &str) -> Self {
        let lower = url.to_ascii_lowercase();
        let secure = lower.starts_with("adcs://") || lower.starts_with("nmdcs://");

        let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
        let (authority, query) = match rest.split_once(['/', '?']) {
            Some((auth, _)) => {
                // Anything after '?' may hold the keyprint parameter
                let query = rest[auth.len()..]
                    .split_once('?')
                    .map(|(_, q)| q)
                    .unwrap_or("");
                (auth, query)
            }
            None => (rest, ""),
        };

        let (address, port) = match authority.rsplit_once(':') {
            Some((host, port_str)) => match port_str.parse::<u16>() {
                Ok(port) => (host.to_string(), port),
                Err(_) => (authority.to_string(), DEFAULT_HUB_PORT),
            },
            None => (authority.to_string(), DEFAULT_HUB_PORT),
        };

        let keyprint = query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == "kp")
            .map(|(_, value)| value.to_string())
            .filter(|value| !value.is_empty());

        Self {
            url: url.to_string(),
            address,
            port,
            secure,
            keyprint,
        }
    }

    /// The full URL string this was parsed from
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// Resolved host portion
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Resolved port (411 when the URL does not name one)
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the scheme requests TLS
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Pinned certificate fingerprint from the `kp` query parameter
    pub fn keyprint(&self) -> Option<&str> {
        self.keyprint.as_deref()
    }
}

impl fmt::Display for HubUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

impl From<&str> for HubUrl {
    fn from(url: &str) -> Self {
        Self::parse(url)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

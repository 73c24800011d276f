//! Windlass Core
//!
//! Foundational types for the Windlass hub client engine: identifiers,
//! timestamps, messages and caches, the search dispatch queue, session
//! state enums, aggregate counters, settings snapshots and the typed
//! notification fan-out. Everything here is synchronous and testable with
//! a manual time source; the tokio wiring lives in `windlass-runtime`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod counts;
pub mod delay;
pub mod errors;
pub mod events;
pub mod identity;
pub mod message;
pub mod search;
pub mod settings;
pub mod state;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use counts::{CountSummary, CountType, SessionCounts};
pub use delay::DelayedEvents;
pub use errors::{ChannelError, Result, SessionError, TransportError, WindlassError};
pub use events::{DirectEvent, HubEvent, ListenerId, Listeners};
pub use identity::{HintedUser, Identity, UserFlags};
pub use message::{ChatMessage, Message, MessageCache, Severity, StatusMessage};
pub use search::{OwnerToken, Search, SearchPriority, SearchQueue, SearchRequest};
pub use settings::{
    FavoriteHubEntry, GlobalSettings, HubSettings, SettingsSource, StaticSettings,
};
pub use state::{CcpmState, ConnectState, PmSignal};
pub use types::{HubUrl, ManualTimeSource, SystemTimeSource, TimeSource, Timestamp, UserId};

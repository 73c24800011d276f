//! Windlass Runtime
//!
//! The session engine of the Windlass hub client: hub connection
//! lifecycle (`HubConnection`), paced search dispatch, private
//! conversations with opportunistic direct channels (`DirectSession`),
//! the session registry, and the shared per-second ticker. Transports,
//! protocol codecs, presence and persistence are collaborators behind
//! narrow traits; this crate owns the state machines between them.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod direct;
pub mod hub;
pub mod registry;
pub mod ticker;
pub mod transport;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use direct::{
    ChannelAttempt, ChannelConnector, DirectChannel, DirectContext, DirectSession, PeerDirectory,
};
pub use hub::{HubConnection, HubContext, HubHost, SearchSink};
pub use registry::HubRegistry;
pub use ticker::{TickListener, Ticker};
pub use transport::{
    ConnectOptions, HubTransport, TransportCallback, TransportEvent, TransportFactory,
};

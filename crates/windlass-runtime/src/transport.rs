//! Hub transport collaborator interfaces
//!
//! The engine never touches sockets. A `TransportFactory` opens one
//! transport per connection attempt; the transport reports lifecycle
//! events asynchronously through the callback handed to `open`, and the
//! session drives it through the `HubTransport` handle. Connect, send and
//! disconnect are all fire-and-forget: nothing here blocks on I/O.
//!
//! Every callback carries the *epoch* of the connection attempt it belongs
//! to. The session bumps its epoch each time it replaces the transport
//! slot, so events from a superseded transport are recognized and dropped.
//! Teardown of a replaced transport is deferred past in-flight callbacks
//! by plain `Arc` reference counting: whoever is still inside a callback
//! holds a clone, and the handle is only dropped when the last clone goes.

use std::sync::Arc;

use windlass_core::Result;

// ----------------------------------------------------------------------------
// Connection Parameters
// ----------------------------------------------------------------------------

/// Everything a transport needs to dial a hub
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub address: String,
    pub port: u16,
    /// Request TLS
    pub secure: bool,
    /// Accept certificates that cannot be verified
    pub allow_untrusted: bool,
    /// Pinned certificate fingerprint, when the hub URL carries one
    pub keyprint: Option<String>,
}

// ----------------------------------------------------------------------------
// Transport Events
// ----------------------------------------------------------------------------

/// Lifecycle events reported by a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Dialing has started
    Connecting,
    /// The socket (and TLS, when requested) is up
    Connected,
    /// One framed protocol line arrived
    Line(String),
    /// The connection failed or was lost
    Failed(String),
}

/// Callback through which a transport reports its events
pub type TransportCallback = Arc<dyn Fn(TransportEvent) + Send + Sync>;

// ----------------------------------------------------------------------------
// Transport Handle
// ----------------------------------------------------------------------------

/// Handle to one live hub connection
pub trait HubTransport: Send + Sync {
    /// Queue bytes for sending; never blocks
    fn send(&self, data: &[u8]) -> Result<()>;

    /// Request teardown; graceless skips the protocol goodbye
    fn disconnect(&self, graceless: bool);

    fn is_secure(&self) -> bool;

    /// Whether the peer certificate chain verified
    fn is_trusted(&self) -> bool;

    /// Human-readable cipher description, empty when plain
    fn encryption_info(&self) -> String;

    /// Fingerprint of the certificate actually presented
    fn keyprint(&self) -> Option<Vec<u8>>;

    /// Whether the presented certificate matched the pinned fingerprint
    fn keyprint_match(&self) -> bool;
}

// ----------------------------------------------------------------------------
// Transport Factory
// ----------------------------------------------------------------------------

/// Opens transports on behalf of hub sessions
pub trait TransportFactory: Send + Sync {
    /// Start a connection attempt; completion or failure arrives through
    /// `on_event`. A synchronous `Err` means the attempt never started.
    fn open(
        &self,
        options: ConnectOptions,
        on_event: TransportCallback,
    ) -> Result<Arc<dyn HubTransport>>;
}

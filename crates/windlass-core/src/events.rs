//! Typed session notifications and the per-session listener registry
//!
//! Every session fans out its state changes and messages to whoever cares
//! (UI windows, logging). Handlers run synchronously, in subscription
//! order, against a snapshot of the registry, so a handler adding or
//! removing listeners never invalidates the iteration.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::identity::Identity;
use crate::message::{ChatMessage, StatusMessage};
use crate::state::{CcpmState, ConnectState, PmSignal};
use crate::types::HubUrl;

// ----------------------------------------------------------------------------
// Listener Registry
// ----------------------------------------------------------------------------

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Fan-out registry for one session's notifications
pub struct Listeners<E> {
    handlers: Mutex<Vec<(ListenerId, Handler<E>)>>,
    next_id: AtomicU64,
}

impl<E> Listeners<E> {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler; it stays active until unsubscribed
    pub fn subscribe<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.handlers.lock().unwrap().push((id, Arc::new(handler)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.handlers
            .lock()
            .unwrap()
            .retain(|(handler_id, _)| *handler_id != id);
    }

    /// Deliver an event to a snapshot of the current handlers
    pub fn fire(&self, event: &E) {
        let snapshot: Vec<Handler<E>> = {
            let handlers = self.handlers.lock().unwrap();
            handlers.iter().map(|(_, h)| Arc::clone(h)).collect()
        };
        for handler in snapshot {
            handler(event);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.lock().unwrap().is_empty()
    }
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.handlers.lock().unwrap().len();
        f.debug_struct("Listeners").field("handlers", &count).finish()
    }
}

// ----------------------------------------------------------------------------
// Hub Session Events
// ----------------------------------------------------------------------------

/// Notifications published by a hub session
#[derive(Debug, Clone)]
pub enum HubEvent {
    ConnectStateChanged(ConnectState),
    Connecting,
    Connected,
    StatusMessage(StatusMessage),
    ChatMessage(ChatMessage),
    MessagesRead,
    MessagesCleared,
    UserUpdated(Identity),
    UsersUpdated(usize),
    /// The hub asked us to move and auto-follow is off; the target is
    /// stored on the session awaiting a decision
    Redirect(HubUrl),
    /// A redirect was executed; the payload is the new session's URL
    Redirected(HubUrl),
    /// A password is required and none is stored
    GetPassword,
    Failed {
        url: HubUrl,
        reason: String,
    },
    Disconnecting,
}

// ----------------------------------------------------------------------------
// Direct Session Events
// ----------------------------------------------------------------------------

/// Notifications published by a private conversation
#[derive(Debug, Clone)]
pub enum DirectEvent {
    CcpmStatusUpdated(CcpmState),
    StatusMessage(StatusMessage),
    PrivateMessage(ChatMessage),
    MessagesRead,
    MessagesCleared,
    UserUpdated,
    /// An advisory signal arrived over the direct channel
    PmStatus(PmSignal),
    Close,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

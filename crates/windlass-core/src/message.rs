//! Chat and status messages, and the per-session message cache
//!
//! Both hub sessions and private conversations keep a bounded history of
//! the messages shown in their window, with an unread counter that feeds
//! "mark read" notifications. The cache is internally synchronized: it is
//! appended to from socket callback threads and drained from UI actions.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::Identity;
use crate::types::Timestamp;

// ----------------------------------------------------------------------------
// Message Types
// ----------------------------------------------------------------------------

/// Severity of a status line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A chat message from a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub from: Identity,
    pub text: String,
    /// `/me` style message
    pub third_person: bool,
    pub time: Timestamp,
    pub read: bool,
}

impl ChatMessage {
    pub fn new(from: Identity, text: impl Into<String>, time: Timestamp) -> Self {
        Self {
            id: Uuid::new_v4(),
            from,
            text: text.into(),
            third_person: false,
            time,
            read: false,
        }
    }
}

/// An engine-generated status line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub id: Uuid,
    pub text: String,
    pub severity: Severity,
    pub time: Timestamp,
    pub read: bool,
}

impl StatusMessage {
    pub fn new(text: impl Into<String>, severity: Severity, time: Timestamp) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            severity,
            time,
            read: false,
        }
    }
}

/// Either kind of cached message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Chat(ChatMessage),
    Status(StatusMessage),
}

impl Message {
    pub fn text(&self) -> &str {
        match self {
            Message::Chat(m) => &m.text,
            Message::Status(m) => &m.text,
        }
    }

    pub fn is_read(&self) -> bool {
        match self {
            Message::Chat(m) => m.read,
            Message::Status(m) => m.read,
        }
    }

    fn mark_read(&mut self) {
        match self {
            Message::Chat(m) => m.read = true,
            Message::Status(m) => m.read = true,
        }
    }
}

impl From<ChatMessage> for Message {
    fn from(message: ChatMessage) -> Self {
        Message::Chat(message)
    }
}

impl From<StatusMessage> for Message {
    fn from(message: StatusMessage) -> Self {
        Message::Status(message)
    }
}

// ----------------------------------------------------------------------------
// Message Cache
// ----------------------------------------------------------------------------

/// Append-only bounded history of a conversation's messages
#[derive(Debug)]
pub struct MessageCache {
    inner: Mutex<CacheInner>,
}

#[derive(Debug)]
struct CacheInner {
    messages: VecDeque<Message>,
    capacity: usize,
}

impl MessageCache {
    /// Create a cache that retains at most `capacity` messages
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                messages: VecDeque::new(),
                capacity,
            }),
        }
    }

    /// Append a message, evicting the oldest entries beyond capacity
    pub fn add_message(&self, message: impl Into<Message>) {
        let mut inner = self.inner.lock().unwrap();
        inner.messages.push_back(message.into());
        while inner.messages.len() > inner.capacity {
            inner.messages.pop_front();
        }
    }

    /// Mark every message read, returning how many actually changed
    pub fn set_read(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let mut updated = 0;
        for message in inner.messages.iter_mut() {
            if !message.is_read() {
                message.mark_read();
                updated += 1;
            }
        }
        updated
    }

    /// Drop the whole history, returning how many messages were removed
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let removed = inner.messages.len();
        inner.messages.clear();
        removed
    }

    /// Number of unread messages
    pub fn unread_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.messages.iter().filter(|m| !m.is_read()).count()
    }

    /// Snapshot of the cached messages, oldest first
    pub fn messages(&self) -> Vec<Message> {
        let inner = self.inner.lock().unwrap();
        inner.messages.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn status(text: &str) -> StatusMessage {
        StatusMessage::new(text, Severity::Info, Timestamp::new(0))
    }

    #[test]
    fn test_capacity_eviction() {
        let cache = MessageCache::new(2);
        cache.add_message(status("one"));
        cache.add_message(status("two"));
        cache.add_message(status("three"));

        let messages = cache.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text(), "two");
        assert_eq!(messages[1].text(), "three");
    }

    #[test]
    fn test_set_read_counts_changes() {
        let cache = MessageCache::new(10);
        cache.add_message(status("a"));
        cache.add_message(status("b"));

        assert_eq!(cache.unread_count(), 2);
        assert_eq!(cache.set_read(), 2);

        // Second call changes nothing
        assert_eq!(cache.set_read(), 0);
        assert_eq!(cache.unread_count(), 0);
    }

    #[test]
    fn test_clear_counts_removed() {
        let cache = MessageCache::new(10);
        assert_eq!(cache.clear(), 0);

        cache.add_message(status("a"));
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
    }
}

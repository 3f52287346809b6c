//! Boundary to the external pub/sub and presence transport.
//!
//! The core only needs publish, subscribe and a presence channel. Delivery is
//! at-least-once with no ordering guarantee; duplicates are possible.
//! Every subscription is returned as a [`Subscription`] handle that releases
//! the registration when dropped.

mod memory;

pub use memory::{MemoryHub, MemoryPresence, MemoryTransport};

use crate::presence::{PresenceDescriptor, PresenceEntry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Not connected")]
    NotConnected,
    #[error("Channel not joined: {0}")]
    NotJoined(String),
    #[error("Publish rejected: {0}")]
    Rejected(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Connection error: {0}")]
    Connection(String),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// A delivered message: `{type, data}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }
}

/// Handler invoked for every delivered message.
pub type MessageHandler = Box<dyn FnMut(&Envelope)>;

/// Callback invoked with a full roster snapshot.
pub type RosterCallback = Box<dyn FnMut(&[PresenceEntry])>;

/// Queue of delivered messages waiting to be applied on the event thread.
pub type Inbox = Rc<RefCell<VecDeque<Envelope>>>;

/// A handler that only queues messages into `inbox`.
pub fn inbox_handler(inbox: &Inbox) -> MessageHandler {
    let inbox = Rc::clone(inbox);
    Box::new(move |envelope: &Envelope| {
        inbox.borrow_mut().push_back(envelope.clone());
    })
}

/// Handle to a live registration. Released on `unsubscribe` or drop.
pub struct Subscription {
    release: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// Wrap the function that undoes the registration.
    pub fn new(release: impl FnOnce() + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Release the registration now.
    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    /// Check if the registration has not been released yet.
    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Pub/sub transport used by the synchronization layer.
pub trait Transport {
    /// Broadcast `payload` as an `event` message on `channel`.
    ///
    /// Must not block; a failure only means this attempt did not go out.
    fn publish(&self, channel: &str, event: &str, payload: Value) -> TransportResult<()>;

    /// Register `handler` for messages on `channel`.
    fn subscribe(&self, channel: &str, handler: MessageHandler) -> TransportResult<Subscription>;

    /// Open the presence channel for `channel`.
    fn presence(&self, channel: &str) -> TransportResult<Box<dyn PresenceChannel>>;

    /// Dispatch deliveries that arrived since the last call.
    fn poll(&self) {}
}

/// Presence side of a channel.
pub trait PresenceChannel {
    /// Announce (or re-announce) the local participant.
    fn track(&mut self, descriptor: &PresenceDescriptor) -> TransportResult<()>;

    /// Receive the full roster whenever it changes.
    fn on_presence(&mut self, callback: RosterCallback) -> Subscription;

    /// Current roster snapshot.
    fn roster(&self) -> Vec<PresenceEntry>;

    /// Withdraw the local participant from the roster.
    fn untrack(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_subscription_releases_once() {
        let count = Rc::new(Cell::new(0));
        let counter = Rc::clone(&count);
        let sub = Subscription::new(move || counter.set(counter.get() + 1));
        assert!(sub.is_active());
        sub.unsubscribe();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_subscription_releases_on_drop() {
        let count = Rc::new(Cell::new(0));
        {
            let counter = Rc::clone(&count);
            let _sub = Subscription::new(move || counter.set(counter.get() + 1));
        }
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_envelope_wire_shape() {
        let envelope: Envelope = serde_json::from_str(r#"{"type":"clear"}"#).unwrap();
        assert_eq!(envelope.kind, "clear");
        assert!(envelope.data.is_null());

        let json = serde_json::to_string(&Envelope::new("stroke", serde_json::json!({"id": "x"}))).unwrap();
        assert!(json.contains(r#""type":"stroke""#));
    }

    #[test]
    fn test_inbox_handler_queues() {
        let inbox: Inbox = Rc::default();
        let mut handler = inbox_handler(&inbox);
        handler(&Envelope::new("clear", Value::Null));
        handler(&Envelope::new("stroke", Value::Null));
        assert_eq!(inbox.borrow().len(), 2);
    }
}

//! In-process transport.
//!
//! Several peers share one [`MemoryHub`] on the same thread. Deliveries are
//! synchronous and skip the sender. Publish failures, unreachable peers and
//! duplicate deliveries can be injected to exercise the failure paths of the synchronization layer.

use super::{
    Envelope, MessageHandler, PresenceChannel, RosterCallback, Subscription, Transport,
    TransportError, TransportResult,
};
use crate::presence::{PresenceDescriptor, PresenceEntry, sort_roster};
use crate::stroke::now_millis;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::{Rc, Weak};

type SharedHandler = Rc<RefCell<MessageHandler>>;
type SharedRosterCallback = Rc<RefCell<RosterCallback>>;

struct Subscriber {
    id: u64,
    peer: String,
    channel: String,
    handler: SharedHandler,
}

#[derive(Default)]
struct PresenceRoom {
    /// Entries keyed by presence member.
    entries: BTreeMap<u64, PresenceEntry>,
    listeners: Vec<(u64, SharedRosterCallback)>,
}

impl PresenceRoom {
    fn snapshot(&self) -> Vec<PresenceEntry> {
        let mut roster: Vec<PresenceEntry> = self.entries.values().cloned().collect();
        sort_roster(&mut roster);
        roster
    }
}

#[derive(Default)]
struct HubState {
    next_id: u64,
    last_tick: u64,
    subscribers: Vec<Subscriber>,
    rooms: HashMap<String, PresenceRoom>,
    failing_peers: HashSet<String>,
    offline_peers: HashSet<String>,
    duplicate_delivery: bool,
    published: usize,
}

impl HubState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Strictly increasing millisecond clock.
    fn tick(&mut self) -> u64 {
        self.last_tick = now_millis().max(self.last_tick + 1);
        self.last_tick
    }
}

/// Shared in-process pub/sub + presence hub.
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Rc<RefCell<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport endpoint for the peer named `peer`.
    pub fn transport(&self, peer: &str) -> MemoryTransport {
        MemoryTransport {
            hub: Rc::clone(&self.state),
            peer: peer.to_string(),
        }
    }

    /// Make every publish from `peer` fail (or succeed again).
    pub fn set_publish_failure(&self, peer: &str, failing: bool) {
        let mut state = self.state.borrow_mut();
        if failing {
            state.failing_peers.insert(peer.to_string());
        } else {
            state.failing_peers.remove(peer);
        }
    }

    /// Cut `peer` off the hub: subscribe, presence and publish all fail.
    pub fn set_offline(&self, peer: &str, offline: bool) {
        let mut state = self.state.borrow_mut();
        if offline {
            state.offline_peers.insert(peer.to_string());
        } else {
            state.offline_peers.remove(peer);
        }
    }

    /// Deliver every message twice.
    pub fn set_duplicate_delivery(&self, duplicate: bool) {
        self.state.borrow_mut().duplicate_delivery = duplicate;
    }

    /// Number of live message subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.state
            .borrow()
            .subscribers
            .iter()
            .filter(|s| s.channel == channel)
            .count()
    }

    /// Number of successful publishes so far.
    pub fn published_count(&self) -> usize {
        self.state.borrow().published
    }

    /// Roster of `channel`.
    pub fn roster(&self, channel: &str) -> Vec<PresenceEntry> {
        self.state
            .borrow()
            .rooms
            .get(channel)
            .map(PresenceRoom::snapshot)
            .unwrap_or_default()
    }
}

/// One peer's endpoint on a [`MemoryHub`].
#[derive(Clone)]
pub struct MemoryTransport {
    hub: Rc<RefCell<HubState>>,
    peer: String,
}

impl MemoryTransport {
    pub fn peer(&self) -> &str {
        &self.peer
    }

    fn ensure_online(&self) -> TransportResult<()> {
        if self.hub.borrow().offline_peers.contains(&self.peer) {
            return Err(TransportError::NotConnected);
        }
        Ok(())
    }
}

impl Transport for MemoryTransport {
    fn publish(&self, channel: &str, event: &str, payload: Value) -> TransportResult<()> {
        self.ensure_online()?;
        let (handlers, repeat) = {
            let mut state = self.hub.borrow_mut();
            if state.failing_peers.contains(&self.peer) {
                return Err(TransportError::Rejected(format!(
                    "publish from {} to {} failed",
                    self.peer, channel
                )));
            }
            state.published += 1;
            let handlers: Vec<SharedHandler> = state
                .subscribers
                .iter()
                .filter(|s| s.channel == channel && s.peer != self.peer)
                .map(|s| Rc::clone(&s.handler))
                .collect();
            (handlers, if state.duplicate_delivery { 2 } else { 1 })
        };

        let envelope = Envelope::new(event, payload);
        for _ in 0..repeat {
            for handler in &handlers {
                if let Ok(mut handler) = handler.try_borrow_mut() {
                    (*handler)(&envelope);
                }
            }
        }
        Ok(())
    }

    fn subscribe(&self, channel: &str, handler: MessageHandler) -> TransportResult<Subscription> {
        self.ensure_online()?;
        let id = {
            let mut state = self.hub.borrow_mut();
            let id = state.next_id();
            state.subscribers.push(Subscriber {
                id,
                peer: self.peer.clone(),
                channel: channel.to_string(),
                handler: Rc::new(RefCell::new(handler)),
            });
            id
        };
        let hub = Rc::downgrade(&self.hub);
        Ok(Subscription::new(move || {
            if let Some(hub) = hub.upgrade() {
                hub.borrow_mut().subscribers.retain(|s| s.id != id);
            }
        }))
    }

    fn presence(&self, channel: &str) -> TransportResult<Box<dyn PresenceChannel>> {
        self.ensure_online()?;
        let member = self.hub.borrow_mut().next_id();
        Ok(Box::new(MemoryPresence {
            hub: Rc::downgrade(&self.hub),
            channel: channel.to_string(),
            member,
        }))
    }
}

/// Presence channel of a [`MemoryTransport`].
pub struct MemoryPresence {
    hub: Weak<RefCell<HubState>>,
    channel: String,
    member: u64,
}

impl MemoryPresence {
    /// Notify every listener of the room with its current roster.
    fn broadcast_roster(hub: &Rc<RefCell<HubState>>, channel: &str) {
        let (roster, listeners) = {
            let state = hub.borrow();
            let Some(room) = state.rooms.get(channel) else {
                return;
            };
            let listeners: Vec<SharedRosterCallback> =
                room.listeners.iter().map(|(_, cb)| Rc::clone(cb)).collect();
            (room.snapshot(), listeners)
        };
        for listener in listeners {
            if let Ok(mut listener) = listener.try_borrow_mut() {
                (*listener)(&roster);
            }
        }
    }
}

impl PresenceChannel for MemoryPresence {
    fn track(&mut self, descriptor: &PresenceDescriptor) -> TransportResult<()> {
        let hub = self.hub.upgrade().ok_or(TransportError::NotConnected)?;
        {
            let mut state = hub.borrow_mut();
            let now = state.tick();
            let room = state.rooms.entry(self.channel.clone()).or_default();
            let joined_at = room
                .entries
                .get(&self.member)
                .map_or(now, |existing| existing.joined_at);
            room.entries.insert(
                self.member,
                PresenceEntry {
                    user_id: descriptor.user_id.clone(),
                    metadata: descriptor.metadata.clone(),
                    joined_at,
                    last_seen: now,
                },
            );
        }
        Self::broadcast_roster(&hub, &self.channel);
        Ok(())
    }

    fn on_presence(&mut self, callback: RosterCallback) -> Subscription {
        let Some(hub) = self.hub.upgrade() else {
            return Subscription::new(|| {});
        };
        let id = {
            let mut state = hub.borrow_mut();
            let id = state.next_id();
            state
                .rooms
                .entry(self.channel.clone())
                .or_default()
                .listeners
                .push((id, Rc::new(RefCell::new(callback))));
            id
        };
        let weak = self.hub.clone();
        let channel = self.channel.clone();
        Subscription::new(move || {
            if let Some(hub) = weak.upgrade() {
                if let Some(room) = hub.borrow_mut().rooms.get_mut(&channel) {
                    room.listeners.retain(|(listener, _)| *listener != id);
                }
            }
        })
    }

    fn roster(&self) -> Vec<PresenceEntry> {
        let Some(hub) = self.hub.upgrade() else {
            return Vec::new();
        };
        let state = hub.borrow();
        state
            .rooms
            .get(&self.channel)
            .map(PresenceRoom::snapshot)
            .unwrap_or_default()
    }

    fn untrack(&mut self) {
        let Some(hub) = self.hub.upgrade() else {
            return;
        };
        let removed = hub
            .borrow_mut()
            .rooms
            .get_mut(&self.channel)
            .and_then(|room| room.entries.remove(&self.member))
            .is_some();
        if removed {
            Self::broadcast_roster(&hub, &self.channel);
        }
    }
}

impl Drop for MemoryPresence {
    fn drop(&mut self) {
        self.untrack();
    }
}

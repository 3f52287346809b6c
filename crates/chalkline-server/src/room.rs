//! Room bookkeeping: members, broadcast history and presence.

use crate::config::ServerConfig;
use chalkline_core::collaboration::CLEAR_EVENT;
use chalkline_core::presence::{PresenceEntry, PresenceMetadata, sort_roster};
use chalkline_core::stroke::now_millis;
use chalkline_core::sync::ServerMessage;
use chalkline_core::transport::Envelope;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::broadcast;

/// A message fanned out to a room. `from` is excluded from delivery;
/// `None` goes to every member.
pub type RoomFrame = (Option<String>, ServerMessage);

struct Room {
    tx: broadcast::Sender<RoomFrame>,
    peers: HashSet<String>,
    /// Broadcasts since the last clear, oldest first.
    history: VecDeque<Envelope>,
    /// Presence entries keyed by connection.
    presence: HashMap<String, PresenceEntry>,
}

impl Room {
    fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            peers: HashSet::new(),
            history: VecDeque::new(),
            presence: HashMap::new(),
        }
    }

    fn roster(&self) -> Vec<PresenceEntry> {
        let mut roster: Vec<PresenceEntry> = self.presence.values().cloned().collect();
        sort_roster(&mut roster);
        roster
    }

    fn send_roster(&self) {
        let _ = self.tx.send((
            None,
            ServerMessage::Presence {
                roster: self.roster(),
            },
        ));
    }
}

/// Shared relay state.
pub struct RelayState {
    rooms: DashMap<String, Room>,
    config: ServerConfig,
}

impl RelayState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            rooms: DashMap::new(),
            config,
        }
    }

    /// Add `peer` to `room`. Returns the room feed and the `joined` reply.
    pub fn join(&self, room_id: &str, peer: &str) -> (broadcast::Receiver<RoomFrame>, ServerMessage) {
        let mut room = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room::new(self.config.channel_capacity));
        room.peers.insert(peer.to_string());
        let rx = room.tx.subscribe();
        let joined = ServerMessage::Joined {
            room: room_id.to_string(),
            peer_count: room.peers.len(),
            history: room.history.iter().cloned().collect(),
        };
        (rx, joined)
    }

    /// Remove `peer` and its presence from `room`. Empty rooms are dropped.
    pub fn leave(&self, room_id: &str, peer: &str) {
        let Some(mut room) = self.rooms.get_mut(room_id) else {
            return;
        };
        room.peers.remove(peer);
        if room.peers.is_empty() {
            drop(room);
            self.rooms.remove(room_id);
            return;
        }
        if room.presence.remove(peer).is_some() {
            room.send_roster();
        }
    }

    /// Relay an event to the other members and record it for late joiners.
    pub fn broadcast(&self, room_id: &str, peer: &str, event: String, data: Value) {
        let Some(mut room) = self.rooms.get_mut(room_id) else {
            return;
        };
        if event == CLEAR_EVENT {
            room.history.clear();
        } else {
            room.history.push_back(Envelope::new(event.clone(), data.clone()));
            while room.history.len() > self.config.history_cap {
                room.history.pop_front();
            }
        }
        let _ = room.tx.send((
            Some(peer.to_string()),
            ServerMessage::Broadcast {
                from: peer.to_string(),
                event,
                data,
            },
        ));
    }

    /// Announce or update `peer`'s presence. The roster goes to every member.
    pub fn track(&self, room_id: &str, peer: &str, user_id: String, metadata: PresenceMetadata) {
        let Some(mut room) = self.rooms.get_mut(room_id) else {
            return;
        };
        let now = now_millis();
        let joined_at = room.presence.get(peer).map_or(now, |entry| entry.joined_at);
        room.presence.insert(
            peer.to_string(),
            PresenceEntry {
                user_id,
                metadata,
                joined_at,
                last_seen: now,
            },
        );
        room.send_roster();
    }

    /// Withdraw `peer`'s presence.
    pub fn untrack(&self, room_id: &str, peer: &str) {
        let Some(mut room) = self.rooms.get_mut(room_id) else {
            return;
        };
        if room.presence.remove(peer).is_some() {
            room.send_roster();
        }
    }

    pub fn roster(&self, room_id: &str) -> Vec<PresenceEntry> {
        self.rooms
            .get(room_id)
            .map(|room| room.roster())
            .unwrap_or_default()
    }

    pub fn peer_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, |room| room.peers.len())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

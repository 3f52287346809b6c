//! Presence: who is online and which tool/color they hold.
//!
//! The roster is ephemeral. Every change arrives as a full snapshot that
//! replaces the previous one.

use crate::identity::Identity;
use crate::stroke::{ANONYMOUS, Brush};
use crate::transport::{PresenceChannel, RosterCallback, Subscription, Transport, TransportResult};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

/// Number of roster entries a UI shows individually.
pub const DISPLAY_CAP: usize = 5;

/// Metadata a peer declares about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// What the local participant announces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceDescriptor {
    pub user_id: String,
    #[serde(default)]
    pub metadata: PresenceMetadata,
}

impl PresenceDescriptor {
    /// Describe the given identity holding `brush`.
    pub fn new(identity: Option<&Identity>, brush: &Brush) -> Self {
        let (user_id, name, avatar) = match identity {
            Some(identity) => (
                identity.id.clone(),
                identity.presence_name(),
                identity.avatar_url.clone(),
            ),
            None => (ANONYMOUS.to_string(), "Anonymous".to_string(), None),
        };
        Self {
            user_id,
            metadata: PresenceMetadata {
                name: Some(name),
                avatar,
                tool: Some(brush.tool.name().to_string()),
                color: Some(brush.color.clone()),
            },
        }
    }
}

/// One connected peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub user_id: String,
    #[serde(default)]
    pub metadata: PresenceMetadata,
    pub joined_at: u64,
    pub last_seen: u64,
}

/// Order a roster by join time, then user id.
pub fn sort_roster(entries: &mut [PresenceEntry]) {
    entries.sort_by(|a, b| {
        a.joined_at
            .cmp(&b.joined_at)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
}

type SharedCallback = Rc<RefCell<RosterCallback>>;

#[derive(Default)]
struct RosterState {
    entries: Vec<PresenceEntry>,
    listeners: Vec<(u64, SharedCallback)>,
    next_listener: u64,
}

impl RosterState {
    /// Replace the roster and notify listeners outside of the borrow.
    fn replace(state: &Rc<RefCell<RosterState>>, roster: &[PresenceEntry]) {
        let (entries, listeners) = {
            let mut state = state.borrow_mut();
            state.entries = roster.to_vec();
            sort_roster(&mut state.entries);
            let listeners: Vec<SharedCallback> =
                state.listeners.iter().map(|(_, cb)| Rc::clone(cb)).collect();
            (state.entries.clone(), listeners)
        };
        for listener in listeners {
            // A listener that re-enters through its own callback is skipped.
            if let Ok(mut callback) = listener.try_borrow_mut() {
                (*callback)(&entries);
            }
        }
    }
}

/// Maintains the live roster for one channel.
pub struct PresenceTracker {
    channel: Option<Box<dyn PresenceChannel>>,
    channel_listener: Option<Subscription>,
    descriptor: Option<PresenceDescriptor>,
    state: Rc<RefCell<RosterState>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self {
            channel: None,
            channel_listener: None,
            descriptor: None,
            state: Rc::default(),
        }
    }

    /// Open the presence channel and announce `descriptor`.
    pub fn join(
        &mut self,
        transport: &dyn Transport,
        channel: &str,
        descriptor: PresenceDescriptor,
    ) -> TransportResult<()> {
        self.leave();

        let mut presence = transport.presence(channel)?;
        let weak = Rc::downgrade(&self.state);
        let listener = presence.on_presence(Box::new(move |roster: &[PresenceEntry]| {
            if let Some(state) = weak.upgrade() {
                RosterState::replace(&state, roster);
            }
        }));
        presence.track(&descriptor)?;
        RosterState::replace(&self.state, &presence.roster());

        log::info!("Joined presence on {} as {}", channel, descriptor.user_id);
        self.channel = Some(presence);
        self.channel_listener = Some(listener);
        self.descriptor = Some(descriptor);
        Ok(())
    }

    /// Re-announce with new metadata. Updates the existing entry in place.
    pub fn announce(&mut self, descriptor: PresenceDescriptor) -> TransportResult<()> {
        let result = match self.channel.as_mut() {
            Some(channel) => channel.track(&descriptor),
            None => Ok(()),
        };
        self.descriptor = Some(descriptor);
        result
    }

    /// Re-announce after a local tool or color change.
    pub fn update_brush(&mut self, brush: &Brush) -> TransportResult<()> {
        let Some(mut descriptor) = self.descriptor.clone() else {
            return Ok(());
        };
        descriptor.metadata.tool = Some(brush.tool.name().to_string());
        descriptor.metadata.color = Some(brush.color.clone());
        if Some(&descriptor) == self.descriptor.as_ref() {
            return Ok(());
        }
        self.announce(descriptor)
    }

    /// Be notified with the full roster whenever it changes.
    pub fn on_roster_changed(&self, callback: impl FnMut(&[PresenceEntry]) + 'static) -> Subscription {
        let id = {
            let mut state = self.state.borrow_mut();
            let id = state.next_listener;
            state.next_listener += 1;
            let callback: RosterCallback = Box::new(callback);
            state.listeners.push((id, Rc::new(RefCell::new(callback))));
            id
        };
        let weak = Rc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                state.borrow_mut().listeners.retain(|(listener, _)| *listener != id);
            }
        })
    }

    /// Check if the presence channel is open.
    pub fn is_joined(&self) -> bool {
        self.channel.is_some()
    }

    /// The last announced descriptor.
    pub fn descriptor(&self) -> Option<&PresenceDescriptor> {
        self.descriptor.as_ref()
    }

    /// Current roster snapshot.
    pub fn roster(&self) -> Vec<PresenceEntry> {
        self.state.borrow().entries.clone()
    }

    /// True number of connected peers.
    pub fn total(&self) -> usize {
        self.state.borrow().entries.len()
    }

    /// Entries shown individually (at most [`DISPLAY_CAP`]).
    pub fn visible(&self) -> Vec<PresenceEntry> {
        self.state
            .borrow()
            .entries
            .iter()
            .take(DISPLAY_CAP)
            .cloned()
            .collect()
    }

    /// Number of entries summarized as "+N".
    pub fn overflow(&self) -> usize {
        self.total().saturating_sub(DISPLAY_CAP)
    }

    /// Leave the presence channel and release its listener.
    pub fn leave(&mut self) {
        self.channel_listener = None;
        if let Some(mut channel) = self.channel.take() {
            channel.untrack();
            RosterState::replace(&self.state, &[]);
            log::info!("Left presence channel");
        }
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PresenceTracker {
    fn drop(&mut self) {
        self.leave();
    }
}

//! Relay wire protocol and the native WebSocket transport.
//!
//! The relay server groups connections into rooms. A room is the pub/sub
//! channel: broadcasts go to every other member, and presence rosters go to
//! every member whenever they change.

use crate::presence::{PresenceEntry, PresenceMetadata};
use crate::transport::Envelope;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages sent to the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room
    Join { room: String },
    /// Leave current room
    Leave,
    /// Broadcast an event to the other members of the room
    Broadcast {
        event: String,
        #[serde(default)]
        data: Value,
    },
    /// Announce or update presence in the room
    Track {
        user_id: String,
        #[serde(default)]
        metadata: PresenceMetadata,
    },
    /// Withdraw presence
    Untrack,
}

/// Messages received from the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirm room join, replaying broadcasts since the last clear
    Joined {
        room: String,
        peer_count: usize,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        history: Vec<Envelope>,
    },
    /// Broadcast from another member
    Broadcast {
        from: String,
        event: String,
        #[serde(default)]
        data: Value,
    },
    /// Full roster of the room
    Presence { roster: Vec<PresenceEntry> },
    /// Error message
    Error { message: String },
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Events from the WebSocket client
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Connected to server
    Connected,
    /// Disconnected from server
    Disconnected,
    /// A server message arrived
    Message(ServerMessage),
    /// Error occurred
    Error { message: String },
}

// ============================================================================
// Native WebSocket Client
// ============================================================================

#[cfg(not(target_arch = "wasm32"))]
mod native_client {
    use super::*;
    use crate::transport::TransportError;
    use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;
    use tungstenite::{Message, connect};
    use url::Url;

    /// Commands sent to the WebSocket thread.
    enum WsCommand {
        Send(String),
        Close,
    }

    /// WebSocket client for native platforms.
    ///
    /// The socket lives on a background thread; the owner polls events
    /// without blocking.
    pub struct NativeWebSocket {
        state: ConnectionState,
        events: Vec<SyncEvent>,
        /// Channel to send commands to the WebSocket thread.
        cmd_tx: Option<Sender<WsCommand>>,
        /// Channel to receive events from the WebSocket thread.
        event_rx: Option<Receiver<SyncEvent>>,
        /// Handle to the WebSocket thread.
        _thread: Option<JoinHandle<()>>,
    }

    impl NativeWebSocket {
        /// Create a new disconnected WebSocket client.
        pub fn new() -> Self {
            Self {
                state: ConnectionState::Disconnected,
                events: Vec::new(),
                cmd_tx: None,
                event_rx: None,
                _thread: None,
            }
        }

        /// Connect to a WebSocket server.
        ///
        /// Messages sent before the connection completes are queued.
        pub fn connect(&mut self, url: &str) -> Result<(), TransportError> {
            if self.cmd_tx.is_some() {
                return Err(TransportError::Connection("Already connected".to_string()));
            }

            let parsed_url =
                Url::parse(url).map_err(|e| TransportError::Connection(format!("Invalid URL: {}", e)))?;
            if parsed_url.scheme() != "ws" && parsed_url.scheme() != "wss" {
                return Err(TransportError::Connection(format!(
                    "Invalid WebSocket URL scheme: {}",
                    parsed_url.scheme()
                )));
            }

            self.state = ConnectionState::Connecting;

            let (cmd_tx, cmd_rx) = channel::<WsCommand>();
            let (event_tx, event_rx) = channel::<SyncEvent>();
            let url = url.to_string();

            let handle = thread::spawn(move || run_socket(url, cmd_rx, event_tx));

            self.cmd_tx = Some(cmd_tx);
            self.event_rx = Some(event_rx);
            self._thread = Some(handle);

            Ok(())
        }

        /// Disconnect from the server.
        pub fn disconnect(&mut self) {
            if let Some(tx) = self.cmd_tx.take() {
                let _ = tx.send(WsCommand::Close);
            }
            self.event_rx = None;
            self._thread = None;
            self.state = ConnectionState::Disconnected;
        }

        /// Send a protocol message.
        pub fn send(&self, msg: &ClientMessage) -> Result<(), TransportError> {
            let tx = self.cmd_tx.as_ref().ok_or(TransportError::NotConnected)?;
            let json = serde_json::to_string(msg)?;
            tx.send(WsCommand::Send(json))
                .map_err(|e| TransportError::Connection(format!("Send failed: {}", e)))
        }

        /// Poll for pending events (non-blocking).
        pub fn poll_events(&mut self) -> Vec<SyncEvent> {
            if let Some(ref rx) = self.event_rx {
                while let Ok(event) = rx.try_recv() {
                    match &event {
                        SyncEvent::Connected => self.state = ConnectionState::Connected,
                        SyncEvent::Disconnected => self.state = ConnectionState::Disconnected,
                        SyncEvent::Error { .. } => self.state = ConnectionState::Error,
                        SyncEvent::Message(_) => {}
                    }
                    self.events.push(event);
                }
            }

            std::mem::take(&mut self.events)
        }

        /// Get current connection state.
        pub fn state(&self) -> ConnectionState {
            self.state
        }

        /// Check if connected.
        pub fn is_connected(&self) -> bool {
            self.state == ConnectionState::Connected
        }
    }

    impl Default for NativeWebSocket {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Drop for NativeWebSocket {
        fn drop(&mut self) {
            self.disconnect();
        }
    }

    /// Body of the socket thread.
    fn run_socket(url: String, cmd_rx: Receiver<WsCommand>, event_tx: Sender<SyncEvent>) {
        log::info!("WebSocket thread: connecting to {}", url);

        let (mut socket, response) = match connect(&url) {
            Ok(pair) => pair,
            Err(e) => {
                log::error!("WebSocket connection failed: {}", e);
                let _ = event_tx.send(SyncEvent::Error {
                    message: format!("Connection failed: {}", e),
                });
                return;
            }
        };

        log::info!("WebSocket connected, status: {}", response.status());
        let _ = event_tx.send(SyncEvent::Connected);

        // Short read timeout so outgoing commands are not starved
        if let tungstenite::stream::MaybeTlsStream::Plain(tcp) = socket.get_mut() {
            let _ = tcp.set_read_timeout(Some(Duration::from_millis(50)));
            let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
        }

        loop {
            match cmd_rx.try_recv() {
                Ok(WsCommand::Send(msg)) => {
                    log::debug!("WebSocket sending: {}", &msg[..msg.len().min(100)]);
                    if let Err(e) = socket.send(Message::Text(msg)) {
                        log::error!("WebSocket send error: {}", e);
                        break;
                    }
                }
                Ok(WsCommand::Close) => {
                    log::info!("WebSocket close requested");
                    let _ = socket.close(None);
                    break;
                }
                Err(TryRecvError::Disconnected) => {
                    log::info!("WebSocket command channel disconnected");
                    break;
                }
                Err(TryRecvError::Empty) => {}
            }

            match socket.read() {
                Ok(Message::Text(txt)) => match serde_json::from_str::<ServerMessage>(&txt) {
                    Ok(server_msg) => {
                        let _ = event_tx.send(SyncEvent::Message(server_msg));
                    }
                    Err(e) => log::warn!("Failed to parse server message: {}", e),
                },
                Ok(Message::Ping(data)) => {
                    let _ = socket.send(Message::Pong(data));
                }
                Ok(Message::Close(_)) => {
                    log::info!("WebSocket received close frame");
                    break;
                }
                Ok(_) => {}
                Err(tungstenite::Error::Io(ref e))
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    log::error!("WebSocket read error: {}", e);
                    break;
                }
            }
        }

        log::info!("WebSocket thread exiting");
        let _ = event_tx.send(SyncEvent::Disconnected);
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use native_client::NativeWebSocket;

#[cfg(not(target_arch = "wasm32"))]
mod ws_transport {
    use super::*;
    use crate::presence::{PresenceDescriptor, sort_roster};
    use crate::transport::{
        MessageHandler, PresenceChannel, RosterCallback, Subscription, Transport, TransportError,
        TransportResult,
    };
    use std::cell::RefCell;
    use std::rc::{Rc, Weak};

    type SharedHandler = Rc<RefCell<MessageHandler>>;
    type SharedRosterCallback = Rc<RefCell<RosterCallback>>;

    struct WsInner {
        socket: NativeWebSocket,
        room: Option<String>,
        next_id: u64,
        handlers: Vec<(u64, SharedHandler)>,
        roster: Vec<PresenceEntry>,
        roster_listeners: Vec<(u64, SharedRosterCallback)>,
        tracking: bool,
    }

    impl WsInner {
        fn next_id(&mut self) -> u64 {
            self.next_id += 1;
            self.next_id
        }

        /// Join `channel` unless already in it. One room per connection.
        fn ensure_room(&mut self, channel: &str) -> TransportResult<()> {
            match &self.room {
                Some(room) if room == channel => Ok(()),
                Some(room) => Err(TransportError::Rejected(format!(
                    "connection already joined {}",
                    room
                ))),
                None => {
                    self.socket.send(&ClientMessage::Join {
                        room: channel.to_string(),
                    })?;
                    self.room = Some(channel.to_string());
                    Ok(())
                }
            }
        }

        /// Leave the room once nothing is subscribed or tracked.
        fn release_if_idle(&mut self) {
            if self.handlers.is_empty() && !self.tracking && self.room.take().is_some() {
                let _ = self.socket.send(&ClientMessage::Leave);
                self.roster.clear();
            }
        }
    }

    /// [`Transport`] backed by the relay server.
    #[derive(Clone)]
    pub struct WsTransport {
        inner: Rc<RefCell<WsInner>>,
    }

    impl WsTransport {
        /// Connect to the relay at `url` (e.g. `ws://localhost:3030/ws`).
        pub fn connect(url: &str) -> TransportResult<Self> {
            let mut socket = NativeWebSocket::new();
            socket.connect(url)?;
            Ok(Self {
                inner: Rc::new(RefCell::new(WsInner {
                    socket,
                    room: None,
                    next_id: 0,
                    handlers: Vec::new(),
                    roster: Vec::new(),
                    roster_listeners: Vec::new(),
                    tracking: false,
                })),
            })
        }

        pub fn state(&self) -> ConnectionState {
            self.inner.borrow().socket.state()
        }

        /// Room this connection is in.
        pub fn current_room(&self) -> Option<String> {
            self.inner.borrow().room.clone()
        }

        fn dispatch(&self, envelope: &Envelope) {
            let handlers: Vec<SharedHandler> = self
                .inner
                .borrow()
                .handlers
                .iter()
                .map(|(_, h)| Rc::clone(h))
                .collect();
            for handler in handlers {
                if let Ok(mut handler) = handler.try_borrow_mut() {
                    (*handler)(envelope);
                }
            }
        }

        fn replace_roster(&self, mut roster: Vec<PresenceEntry>) {
            sort_roster(&mut roster);
            let listeners: Vec<SharedRosterCallback> = {
                let mut inner = self.inner.borrow_mut();
                inner.roster = roster.clone();
                inner.roster_listeners.iter().map(|(_, cb)| Rc::clone(cb)).collect()
            };
            for listener in listeners {
                if let Ok(mut listener) = listener.try_borrow_mut() {
                    (*listener)(&roster);
                }
            }
        }
    }

    impl Transport for WsTransport {
        fn publish(&self, channel: &str, event: &str, payload: Value) -> TransportResult<()> {
            let inner = self.inner.borrow();
            if inner.room.as_deref() != Some(channel) {
                return Err(TransportError::NotJoined(channel.to_string()));
            }
            inner.socket.send(&ClientMessage::Broadcast {
                event: event.to_string(),
                data: payload,
            })
        }

        fn subscribe(&self, channel: &str, handler: MessageHandler) -> TransportResult<Subscription> {
            let id = {
                let mut inner = self.inner.borrow_mut();
                inner.ensure_room(channel)?;
                let id = inner.next_id();
                inner.handlers.push((id, Rc::new(RefCell::new(handler))));
                id
            };
            let weak = Rc::downgrade(&self.inner);
            Ok(Subscription::new(move || {
                if let Some(inner) = weak.upgrade() {
                    let mut inner = inner.borrow_mut();
                    inner.handlers.retain(|(handler, _)| *handler != id);
                    inner.release_if_idle();
                }
            }))
        }

        fn presence(&self, channel: &str) -> TransportResult<Box<dyn PresenceChannel>> {
            Ok(Box::new(WsPresence {
                inner: Rc::downgrade(&self.inner),
                channel: channel.to_string(),
            }))
        }

        fn poll(&self) {
            let events = self.inner.borrow_mut().socket.poll_events();
            for event in events {
                match event {
                    SyncEvent::Connected => log::info!("Connected to relay"),
                    SyncEvent::Disconnected => {
                        log::warn!("Disconnected from relay");
                        {
                            let mut inner = self.inner.borrow_mut();
                            inner.room = None;
                            inner.tracking = false;
                        }
                        // Peers seen through this connection are no longer known
                        self.replace_roster(Vec::new());
                    }
                    SyncEvent::Error { message } => log::warn!("Relay error: {}", message),
                    SyncEvent::Message(ServerMessage::Joined {
                        room,
                        peer_count,
                        history,
                    }) => {
                        log::info!(
                            "Joined room {} ({} peers, {} replayed)",
                            room,
                            peer_count,
                            history.len()
                        );
                        for envelope in &history {
                            self.dispatch(envelope);
                        }
                    }
                    SyncEvent::Message(ServerMessage::Broadcast { from, event, data }) => {
                        log::debug!("Broadcast {} from {}", event, from);
                        self.dispatch(&Envelope::new(event, data));
                    }
                    SyncEvent::Message(ServerMessage::Presence { roster }) => {
                        self.replace_roster(roster);
                    }
                    SyncEvent::Message(ServerMessage::Error { message }) => {
                        log::warn!("Relay rejected a message: {}", message);
                    }
                }
            }
        }
    }

    /// Presence channel of a [`WsTransport`].
    pub struct WsPresence {
        inner: Weak<RefCell<WsInner>>,
        channel: String,
    }

    impl PresenceChannel for WsPresence {
        fn track(&mut self, descriptor: &PresenceDescriptor) -> TransportResult<()> {
            let inner = self.inner.upgrade().ok_or(TransportError::NotConnected)?;
            let mut inner = inner.borrow_mut();
            inner.ensure_room(&self.channel)?;
            inner.socket.send(&ClientMessage::Track {
                user_id: descriptor.user_id.clone(),
                metadata: descriptor.metadata.clone(),
            })?;
            inner.tracking = true;
            Ok(())
        }

        fn on_presence(&mut self, callback: RosterCallback) -> Subscription {
            let Some(inner) = self.inner.upgrade() else {
                return Subscription::new(|| {});
            };
            let id = {
                let mut inner = inner.borrow_mut();
                let id = inner.next_id();
                inner.roster_listeners.push((id, Rc::new(RefCell::new(callback))));
                id
            };
            let weak = self.inner.clone();
            Subscription::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner
                        .borrow_mut()
                        .roster_listeners
                        .retain(|(listener, _)| *listener != id);
                }
            })
        }

        fn roster(&self) -> Vec<PresenceEntry> {
            match self.inner.upgrade() {
                Some(inner) => inner.borrow().roster.clone(),
                None => Vec::new(),
            }
        }

        fn untrack(&mut self) {
            let Some(inner) = self.inner.upgrade() else {
                return;
            };
            let mut inner = inner.borrow_mut();
            if inner.tracking {
                let _ = inner.socket.send(&ClientMessage::Untrack);
                inner.tracking = false;
                inner.release_if_idle();
            }
        }
    }

    impl Drop for WsPresence {
        fn drop(&mut self) {
            self.untrack();
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use ws_transport::{WsPresence, WsTransport};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_serialize() {
        let msg = ClientMessage::Join {
            room: "whiteboard-main".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"join""#));
        assert!(json.contains("whiteboard-main"));
    }

    #[test]
    fn test_broadcast_serialize() {
        let msg = ClientMessage::Broadcast {
            event: "clear".to_string(),
            data: serde_json::json!({}),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"broadcast""#));
        assert!(json.contains(r#""event":"clear""#));
    }

    #[test]
    fn test_server_message_deserialize() {
        let json = r#"{"type":"joined","room":"test","peer_count":2}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        match msg {
            ServerMessage::Joined {
                room,
                peer_count,
                history,
            } => {
                assert_eq!(room, "test");
                assert_eq!(peer_count, 2);
                assert!(history.is_empty());
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_presence_message_deserialize() {
        let json = r##"{"type":"presence","roster":[{"userId":"u1","metadata":{"name":"Ada","color":"#000000"},"joinedAt":1,"lastSeen":2}]}"##;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        let ServerMessage::Presence { roster } = msg else {
            panic!("Wrong message type");
        };
        assert_eq!(roster[0].user_id, "u1");
        assert_eq!(roster[0].metadata.name.as_deref(), Some("Ada"));
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn test_rejects_non_websocket_url() {
        let mut socket = NativeWebSocket::new();
        assert!(socket.connect("http://localhost:3030").is_err());
        assert!(socket.send(&ClientMessage::Leave).is_err());
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn test_disconnect_empties_roster() {
        use crate::transport::Transport;
        use std::cell::RefCell;
        use std::net::TcpListener;
        use std::rc::Rc;
        use std::time::{Duration, Instant};

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let relay = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut socket = tungstenite::accept(stream).unwrap();
            let roster = ServerMessage::Presence {
                roster: vec![PresenceEntry {
                    user_id: "bob".to_string(),
                    metadata: PresenceMetadata::default(),
                    joined_at: 1,
                    last_seen: 1,
                }],
            };
            let json = serde_json::to_string(&roster).unwrap();
            socket.send(tungstenite::Message::Text(json)).unwrap();
            let _ = socket.close(None);
            while socket.read().is_ok() {}
        });

        let transport = WsTransport::connect(&format!("ws://{}/ws", addr)).unwrap();
        let mut presence = transport.presence("whiteboard-main").unwrap();
        let sizes = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&sizes);
        let _sub = presence.on_presence(Box::new(move |roster: &[PresenceEntry]| {
            seen.borrow_mut().push(roster.len());
        }));

        let deadline = Instant::now() + Duration::from_secs(5);
        while sizes.borrow().len() < 2 && Instant::now() < deadline {
            transport.poll();
            std::thread::sleep(Duration::from_millis(20));
        }

        assert_eq!(*sizes.borrow(), vec![1, 0]);
        assert!(presence.roster().is_empty());
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        relay.join().unwrap();
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn test_publish_requires_joined_room() {
        use crate::transport::{Transport, TransportError};

        // Nothing listens on port 9; the socket thread just reports an error.
        let transport = WsTransport::connect("ws://127.0.0.1:9/ws").unwrap();
        let result = transport.publish("whiteboard-main", "clear", serde_json::json!({}));
        assert!(matches!(result, Err(TransportError::NotJoined(_))));
    }
}

//! Per-connection WebSocket loop.

use crate::room::{RelayState, RoomFrame};
use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use chalkline_core::sync::{ClientMessage, ServerMessage};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Build the relay router.
pub fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn index() -> &'static str {
    "Chalkline Relay Server - Connect via WebSocket at /ws"
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

type Sender = SplitSink<WebSocket, Message>;

/// Serialize and send; `false` once the client is gone.
async fn send(sender: &mut Sender, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!("Failed to encode server message: {}", e);
            true
        }
    }
}

async fn send_error(sender: &mut Sender, message: impl Into<String>) -> bool {
    send(
        sender,
        &ServerMessage::Error {
            message: message.into(),
        },
    )
    .await
}

/// Where a connection currently is.
struct Membership {
    room: String,
    rx: broadcast::Receiver<RoomFrame>,
}

async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let peer_id = Uuid::new_v4().to_string();
    info!("New connection: {}", peer_id);

    let (mut sender, mut receiver) = socket.split();
    let mut membership: Option<Membership> = None;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", peer_id, e);
                        break;
                    }
                };

                let client_msg = match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!("Invalid message from {}: {}", peer_id, e);
                        if !send_error(&mut sender, format!("Invalid message: {}", e)).await {
                            break;
                        }
                        continue;
                    }
                };

                let alive = match client_msg {
                    ClientMessage::Join { room } => {
                        if let Some(old) = membership.take() {
                            state.leave(&old.room, &peer_id);
                        }
                        let (rx, joined) = state.join(&room, &peer_id);
                        info!("Peer {} joined room {} ({} rooms open)", peer_id, room, state.room_count());
                        membership = Some(Membership { room, rx });
                        send(&mut sender, &joined).await
                    }
                    ClientMessage::Leave => {
                        if let Some(old) = membership.take() {
                            state.leave(&old.room, &peer_id);
                            info!(
                                "Peer {} left room {} ({} remaining)",
                                peer_id,
                                old.room,
                                state.peer_count(&old.room)
                            );
                        }
                        true
                    }
                    ClientMessage::Broadcast { event, data } => match &membership {
                        Some(m) => {
                            debug!("Peer {} broadcast {} in {}", peer_id, event, m.room);
                            state.broadcast(&m.room, &peer_id, event, data);
                            true
                        }
                        None => send_error(&mut sender, "Join a room before broadcasting").await,
                    },
                    ClientMessage::Track { user_id, metadata } => match &membership {
                        Some(m) => {
                            state.track(&m.room, &peer_id, user_id, metadata);
                            true
                        }
                        None => send_error(&mut sender, "Join a room before tracking presence").await,
                    },
                    ClientMessage::Untrack => {
                        if let Some(m) = &membership {
                            state.untrack(&m.room, &peer_id);
                        }
                        true
                    }
                };
                if !alive {
                    break;
                }
            }

            frame = async {
                match membership.as_mut() {
                    Some(m) => m.rx.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                match frame {
                    Ok((from, msg)) => {
                        // Never echo a broadcast back to its sender
                        if from.as_deref() != Some(peer_id.as_str()) && !send(&mut sender, &msg).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Peer {} lagged, {} messages dropped", peer_id, skipped);
                    }
                    Err(RecvError::Closed) => {
                        membership = None;
                    }
                }
            }
        }
    }

    if let Some(m) = membership {
        state.leave(&m.room, &peer_id);
    }
    info!("Connection closed: {}", peer_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use chalkline_core::collaboration::StrokeSync;
    use chalkline_core::identity::Identity;
    use chalkline_core::presence::{PresenceDescriptor, PresenceMetadata, PresenceTracker};
    use chalkline_core::stroke::{Brush, Stroke, Tool, now_millis};
    use chalkline_core::sync::WsTransport;
    use chalkline_core::transport::{Inbox, Transport, TransportError, inbox_handler};
    use kurbo::Point;
    use std::rc::Rc;
    use serde_json::json;
    use std::time::{Duration, Instant};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn spawn_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(RelayState::new(ServerConfig::default()));
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("ws://{}/ws", addr)
    }

    async fn connect(url: &str) -> Client {
        connect_async(url).await.unwrap().0
    }

    async fn send_msg(client: &mut Client, msg: &ClientMessage) {
        let json = serde_json::to_string(msg).unwrap();
        client.send(tungstenite::Message::Text(json.into())).await.unwrap();
    }

    async fn recv_msg(client: &mut Client) -> ServerMessage {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .expect("timed out")
                .unwrap()
                .unwrap();
            if let tungstenite::Message::Text(text) = msg {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    async fn join(client: &mut Client, room: &str) -> ServerMessage {
        send_msg(client, &ClientMessage::Join { room: room.to_string() }).await;
        recv_msg(client).await
    }

    #[tokio::test]
    async fn test_broadcast_reaches_others_only() {
        let url = spawn_server().await;
        let mut a = connect(&url).await;
        let mut b = connect(&url).await;
        join(&mut a, "board").await;
        join(&mut b, "board").await;

        send_msg(
            &mut a,
            &ClientMessage::Broadcast {
                event: "stroke".to_string(),
                data: json!({"id": "s1"}),
            },
        )
        .await;
        match recv_msg(&mut b).await {
            ServerMessage::Broadcast { event, data, .. } => {
                assert_eq!(event, "stroke");
                assert_eq!(data["id"], "s1");
            }
            other => panic!("unexpected {:?}", other),
        }

        // a gets b's broadcast, not its own
        send_msg(
            &mut b,
            &ClientMessage::Broadcast {
                event: "clear".to_string(),
                data: json!({}),
            },
        )
        .await;
        assert!(matches!(
            recv_msg(&mut a).await,
            ServerMessage::Broadcast { ref event, .. } if event == "clear"
        ));
    }

    #[tokio::test]
    async fn test_late_joiner_gets_history() {
        let url = spawn_server().await;
        let mut a = connect(&url).await;
        join(&mut a, "board").await;
        send_msg(
            &mut a,
            &ClientMessage::Broadcast {
                event: "stroke".to_string(),
                data: json!({"id": "s1"}),
            },
        )
        .await;

        // Let the relay process the broadcast before the second client joins.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut late = connect(&url).await;
        match join(&mut late, "board").await {
            ServerMessage::Joined {
                peer_count, history, ..
            } => {
                assert_eq!(peer_count, 2);
                assert_eq!(history.len(), 1);
                assert_eq!(history[0].kind, "stroke");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_presence_roster_sent_to_all() {
        let url = spawn_server().await;
        let mut a = connect(&url).await;
        join(&mut a, "board").await;

        send_msg(
            &mut a,
            &ClientMessage::Track {
                user_id: "alice".to_string(),
                metadata: PresenceMetadata::default(),
            },
        )
        .await;
        match recv_msg(&mut a).await {
            ServerMessage::Presence { roster } => {
                assert_eq!(roster.len(), 1);
                assert_eq!(roster[0].user_id, "alice");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_broadcast_without_room_is_rejected() {
        let url = spawn_server().await;
        let mut a = connect(&url).await;
        send_msg(
            &mut a,
            &ClientMessage::Broadcast {
                event: "stroke".to_string(),
                data: json!({}),
            },
        )
        .await;
        assert!(matches!(recv_msg(&mut a).await, ServerMessage::Error { .. }));
    }

    /// Poll `transports` until `done` holds or five seconds pass.
    fn wait_until(transports: &[&WsTransport], mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            for transport in transports {
                transport.poll();
            }
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    fn tracker(transport: &WsTransport, user: &str) -> PresenceTracker {
        let mut tracker = PresenceTracker::new();
        let descriptor = PresenceDescriptor::new(Some(&Identity::new(user)), &Brush::default());
        tracker.join(transport, CHANNEL, descriptor).unwrap();
        tracker
    }

    const CHANNEL: &str = "whiteboard-main";

    /// Two board clients and a late joiner talking through the relay.
    fn run_board_clients(url: &str) {
        let alice = WsTransport::connect(url).unwrap();
        let bob = WsTransport::connect(url).unwrap();
        let inbox_a: Inbox = Rc::default();
        let inbox_b: Inbox = Rc::default();
        let _sub_a = alice.subscribe(CHANNEL, inbox_handler(&inbox_a)).unwrap();
        let sub_b = bob.subscribe(CHANNEL, inbox_handler(&inbox_b)).unwrap();
        let presence_a = tracker(&alice, "alice");
        let mut presence_b = tracker(&bob, "bob");

        assert!(wait_until(&[&alice, &bob], || {
            presence_a.total() == 2 && presence_b.total() == 2
        }));

        let mut sync_a = StrokeSync::new(CHANNEL);
        let stroke = Stroke::commit(
            &Brush::new(Tool::Pen, "#000000", 3.0),
            vec![Point::new(0.0, 0.0), Point::new(10.0, 10.0)],
            "alice",
            now_millis(),
        );
        let outcome = sync_a.commit_local(stroke, &alice);
        assert!(outcome.notice.is_none());

        assert!(wait_until(&[&alice, &bob], || !inbox_b.borrow().is_empty()));
        let mut sync_b = StrokeSync::new(CHANNEL);
        for envelope in inbox_b.borrow_mut().drain(..) {
            sync_b.receive_remote(&envelope);
        }
        assert_eq!(sync_b.snapshot(), sync_a.snapshot());
        assert!(inbox_a.borrow().is_empty());

        // A connection serves a single room
        assert!(matches!(
            bob.subscribe("another-board", inbox_handler(&inbox_b)),
            Err(TransportError::Rejected(_))
        ));

        presence_b.leave();
        drop(sub_b);
        assert!(wait_until(&[&alice, &bob], || presence_a.total() == 1));
        assert_eq!(presence_a.roster()[0].user_id, "alice");

        let late = WsTransport::connect(url).unwrap();
        let inbox_late: Inbox = Rc::default();
        let _sub_late = late.subscribe(CHANNEL, inbox_handler(&inbox_late)).unwrap();
        assert!(wait_until(&[&late], || !inbox_late.borrow().is_empty()));
        let mut sync_late = StrokeSync::new(CHANNEL);
        for envelope in inbox_late.borrow_mut().drain(..) {
            sync_late.receive_remote(&envelope);
        }
        assert_eq!(sync_late.snapshot(), sync_a.snapshot());
    }

    #[tokio::test]
    async fn test_board_clients_through_relay() {
        let url = spawn_server().await;
        tokio::task::spawn_blocking(move || run_board_clients(&url))
            .await
            .unwrap();
    }
}

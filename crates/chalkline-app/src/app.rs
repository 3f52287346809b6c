//! Whiteboard controller: wires pointer input, the drawing session, stroke
//! synchronization, presence and the two raster layers together.
//!
//! Everything runs on one event thread. Transport handlers only queue
//! messages; [`Whiteboard::pump`] applies them.

use chalkline_core::collaboration::{Repaint, StrokeSync, SyncNotice};
use chalkline_core::geometry::smooth_path;
use chalkline_core::identity::{Identity, author_id};
use chalkline_core::presence::{PresenceDescriptor, PresenceTracker};
use chalkline_core::session::{DrawingSession, SessionState};
use chalkline_core::storage::{BoardSnapshot, SnapshotStore, StorageError};
use chalkline_core::stroke::{Brush, Stroke, Tool, now_millis};
use chalkline_core::stroke_log::StrokeLog;
use chalkline_core::transport::{Envelope, Inbox, Subscription, Transport, TransportError, inbox_handler};
use chalkline_render::{
    GridStyle, PixmapSurface, Renderer, RendererError, flatten, paint_background,
};
use kurbo::Point;
use std::rc::Rc;
use thiserror::Error;

/// Channel every board peer joins.
pub const DEFAULT_CHANNEL: &str = "whiteboard-main";

/// Whiteboard errors.
#[derive(Debug, Error)]
pub enum WhiteboardError {
    #[error("Render error: {0}")]
    Render(#[from] RendererError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub title: String,
    /// Pub/sub and presence channel of the board.
    pub channel: String,
    pub width: u32,
    pub height: u32,
    pub grid_style: GridStyle,
    /// Brush selected at startup.
    pub brush: Brush,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Chalkline".to_string(),
            channel: DEFAULT_CHANNEL.to_string(),
            width: 1280,
            height: 800,
            grid_style: GridStyle::Lines,
            brush: Brush::default(),
        }
    }
}

/// Severity of a user-visible notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Warning,
    Error,
}

/// A short message for the user (shown as a toast by the UI).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

impl From<SyncNotice> for Notice {
    fn from(notice: SyncNotice) -> Self {
        Notice::warning(notice.to_string())
    }
}

/// One peer's whiteboard.
pub struct Whiteboard<T: Transport> {
    config: AppConfig,
    transport: T,
    identity: Option<Identity>,
    brush: Brush,
    session: DrawingSession,
    sync: StrokeSync,
    presence: PresenceTracker,
    inbox: Inbox,
    /// Live message subscription; present while signed in.
    subscription: Option<Subscription>,
    background: PixmapSurface,
    drawing: PixmapSurface,
    notices: Vec<Notice>,
}

impl<T: Transport> Whiteboard<T> {
    /// Create a signed-out whiteboard on `transport`.
    pub fn new(config: AppConfig, transport: T) -> Result<Self, WhiteboardError> {
        let mut background = PixmapSurface::new(config.width, config.height)?;
        paint_background(&mut background, config.grid_style);
        let drawing = PixmapSurface::new(config.width, config.height)?;

        log::info!(
            "{} board on channel {} ({}x{})",
            config.title,
            config.channel,
            config.width,
            config.height
        );

        Ok(Self {
            brush: config.brush.clone(),
            sync: StrokeSync::new(config.channel.clone()),
            config,
            transport,
            identity: None,
            session: DrawingSession::new(),
            presence: PresenceTracker::new(),
            inbox: Rc::default(),
            subscription: None,
            background,
            drawing,
            notices: Vec::new(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    // --- Identity ---

    /// Sign in and start the collaborative session: subscribe to the board
    /// channel and announce presence.
    ///
    /// The identity is kept even when the realtime setup fails; the board
    /// then stays local and a notice is raised.
    pub fn sign_in(&mut self, identity: Identity) {
        self.sign_out();
        log::info!("Signed in as {}", identity.id);
        let descriptor = PresenceDescriptor::new(Some(&identity), &self.brush);
        self.identity = Some(identity);

        if let Err(e) = self.connect_realtime(descriptor) {
            log::warn!("Failed to connect to realtime features: {}", e);
            self.notices
                .push(Notice::error("Failed to connect to realtime features"));
        }
    }

    fn connect_realtime(&mut self, descriptor: PresenceDescriptor) -> Result<(), TransportError> {
        let subscription = self
            .transport
            .subscribe(&self.config.channel, inbox_handler(&self.inbox))?;
        self.presence
            .join(&self.transport, &self.config.channel, descriptor)?;
        self.subscription = Some(subscription);
        Ok(())
    }

    /// End the session and release every subscription.
    ///
    /// A gesture in progress is dropped and queued messages are discarded.
    pub fn sign_out(&mut self) {
        self.subscription = None;
        self.presence.leave();
        self.inbox.borrow_mut().clear();
        if self.session.is_drawing() {
            self.session.cancel();
            self.repaint();
        }
        if let Some(identity) = self.identity.take() {
            log::info!("Signed out {}", identity.id);
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn is_signed_in(&self) -> bool {
        self.identity.is_some()
    }

    /// Check if strokes and clears are shared with peers.
    pub fn is_live(&self) -> bool {
        self.subscription.is_some()
    }

    // --- Pointer input ---

    /// Pointer down / touch start.
    pub fn pointer_down(&mut self, point: Point) {
        let author = author_id(self.identity.as_ref());
        if let Some(previous) = self.session.begin(point, &self.brush, author, now_millis()) {
            self.commit(previous);
        }
    }

    /// Pointer move / touch move. Draws live feedback while a gesture is open.
    pub fn pointer_move(&mut self, point: Point) {
        if let Some(frame) = self.session.extend(point) {
            self.drawing.render_live(&frame, self.sync.log());
        }
    }

    /// Pointer up / touch end. Returns whether a stroke was committed.
    pub fn pointer_up(&mut self) -> bool {
        let author = author_id(self.identity.as_ref());
        match self.session.end(author, now_millis()) {
            Some(stroke) => {
                self.commit(stroke);
                true
            }
            None => false,
        }
    }

    /// The pointer left the surface; behaves like [`Self::pointer_up`].
    pub fn pointer_leave(&mut self) -> bool {
        self.pointer_up()
    }

    pub fn is_drawing(&self) -> bool {
        self.session.is_drawing()
    }

    fn commit(&mut self, stroke: Stroke) {
        if self.is_live() {
            let outcome = self.sync.commit_local(stroke, &self.transport);
            if let Some(notice) = outcome.notice {
                self.notices.push(notice.into());
            }
        } else {
            log::debug!("Not connected, keeping stroke {} local", stroke.id);
            self.sync.record_local(stroke);
        }
        // Also removes the live feedback of the finished gesture.
        self.repaint();
    }

    // --- Brush ---

    pub fn brush(&self) -> &Brush {
        &self.brush
    }

    /// Select a tool. Takes effect on the next gesture.
    pub fn set_tool(&mut self, tool: Tool) {
        self.brush.tool = tool;
        self.announce_brush();
    }

    pub fn set_color(&mut self, color: impl Into<String>) {
        self.brush.color = color.into();
        self.announce_brush();
    }

    /// Set the brush size (clamped).
    pub fn set_size(&mut self, size: f64) {
        self.brush.set_size(size);
    }

    fn announce_brush(&mut self) {
        if let Err(e) = self.presence.update_brush(&self.brush) {
            log::warn!("Failed to update presence: {}", e);
            self.notices.push(Notice::warning("Failed to update presence"));
        }
    }

    // --- Board ---

    /// Clear the board for everyone.
    pub fn clear(&mut self) {
        if self.is_live() {
            let outcome = self.sync.clear_all(&self.transport);
            self.notices.push(match outcome.notice {
                Some(notice) => notice.into(),
                None => Notice::success("Canvas cleared!"),
            });
        } else {
            self.sync.clear_local();
        }
        self.repaint();
    }

    /// Apply every message delivered since the last call.
    pub fn pump(&mut self) -> Repaint {
        self.transport.poll();
        let pending: Vec<Envelope> = self.inbox.borrow_mut().drain(..).collect();

        let mut repaint = Repaint::None;
        for envelope in &pending {
            if self.sync.receive_remote(envelope) == Repaint::Full {
                repaint = Repaint::Full;
            }
        }
        if repaint == Repaint::Full {
            self.repaint();
        }
        repaint
    }

    /// Redraw the committed log, then the gesture in progress.
    fn repaint(&mut self) {
        self.drawing.render_all(self.sync.log());
        if let SessionState::Drawing { brush, points } = self.session.state() {
            if points.len() >= 2 {
                self.drawing.render_path(&smooth_path(points), brush);
            }
        }
    }

    pub fn log(&self) -> &StrokeLog {
        self.sync.log()
    }

    /// Serializable stroke list in draw order.
    pub fn snapshot(&self) -> Vec<Stroke> {
        self.sync.snapshot()
    }

    /// Save the board to `store` under `id`.
    pub async fn save(
        &mut self,
        store: &dyn SnapshotStore,
        id: &str,
        name: &str,
    ) -> Result<(), WhiteboardError> {
        let snapshot = match BoardSnapshot::capture(name, self.sync.log(), self.identity.as_ref(), now_millis()) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.notices.push(Notice::error(e.to_string()));
                return Err(e.into());
            }
        };

        match store.save(id, &snapshot).await {
            Ok(()) => {
                log::info!("Saved {} strokes as {}", snapshot.strokes.len(), id);
                self.notices.push(Notice::success("Whiteboard saved!"));
                Ok(())
            }
            Err(e) => {
                log::warn!("Failed to save whiteboard: {}", e);
                self.notices.push(Notice::error("Failed to save whiteboard"));
                Err(e.into())
            }
        }
    }

    /// Replace the local board with the snapshot saved under `id`.
    ///
    /// Only the local log changes; peers are not told.
    pub async fn open(&mut self, store: &dyn SnapshotStore, id: &str) -> Result<(), WhiteboardError> {
        let snapshot = match store.load(id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::warn!("Failed to load whiteboard {}: {}", id, e);
                self.notices.push(Notice::error("Failed to load whiteboard"));
                return Err(e.into());
            }
        };
        self.sync = StrokeSync::with_log(self.config.channel.clone(), snapshot.to_log());
        log::info!("Opened {:?} with {} strokes", snapshot.name, self.sync.log().len());
        self.repaint();
        Ok(())
    }

    // --- Surfaces ---

    /// Resize both layers and repaint them.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), WhiteboardError> {
        self.background.resize(width, height)?;
        self.drawing.resize(width, height)?;
        paint_background(&mut self.background, self.config.grid_style);
        self.repaint();
        Ok(())
    }

    /// The stroke layer.
    pub fn surface(&self) -> &PixmapSurface {
        &self.drawing
    }

    /// The grid layer.
    pub fn background(&self) -> &PixmapSurface {
        &self.background
    }

    /// Both layers flattened and encoded as PNG.
    pub fn export_png(&self) -> Result<Vec<u8>, WhiteboardError> {
        Ok(flatten(&self.background, &self.drawing).encode_png()?)
    }

    // --- Presence and notices ---

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Number of peers online (including this one while signed in).
    pub fn online_count(&self) -> usize {
        self.presence.total()
    }

    /// Take the notices raised since the last call.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chalkline_core::storage::MemoryStorage;
    use chalkline_core::stroke::ANONYMOUS;
    use chalkline_core::transport::{MemoryHub, MemoryTransport};

    fn block_on<F: std::future::Future>(f: F) -> F::Output {
        use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

        fn dummy_raw_waker() -> RawWaker {
            fn no_op(_: *const ()) {}
            fn clone(_: *const ()) -> RawWaker {
                dummy_raw_waker()
            }
            static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
            RawWaker::new(std::ptr::null(), &VTABLE)
        }

        let waker = unsafe { Waker::from_raw(dummy_raw_waker()) };
        let mut cx = Context::from_waker(&waker);
        let mut f = std::pin::pin!(f);

        loop {
            if let Poll::Ready(result) = f.as_mut().poll(&mut cx) {
                return result;
            }
        }
    }

    fn board(hub: &MemoryHub, peer: &str) -> Whiteboard<MemoryTransport> {
        let config = AppConfig {
            width: 120,
            height: 80,
            ..AppConfig::default()
        };
        Whiteboard::new(config, hub.transport(peer)).unwrap()
    }

    fn signed_in(hub: &MemoryHub, peer: &str) -> Whiteboard<MemoryTransport> {
        let mut board = board(hub, peer);
        board.sign_in(Identity::new(peer).with_email(format!("{}@example.com", peer)));
        assert!(board.is_live());
        board
    }

    fn draw(board: &mut Whiteboard<MemoryTransport>, points: &[(f64, f64)]) -> bool {
        let (first, rest) = points.split_first().unwrap();
        board.pointer_down(Point::new(first.0, first.1));
        for p in rest {
            board.pointer_move(Point::new(p.0, p.1));
        }
        board.pointer_up()
    }

    #[test]
    fn test_strokes_reach_peers() {
        let hub = MemoryHub::new();
        let mut alice = signed_in(&hub, "alice");
        let mut bob = signed_in(&hub, "bob");

        assert!(draw(&mut alice, &[(10.0, 10.0), (30.0, 40.0), (60.0, 20.0)]));
        assert_eq!(alice.log().len(), 1);
        assert!(!alice.surface().is_blank());

        assert!(bob.log().is_empty());
        assert_eq!(bob.pump(), Repaint::Full);
        assert_eq!(bob.snapshot(), alice.snapshot());
        assert_eq!(bob.surface(), alice.surface());
    }

    #[test]
    fn test_click_is_not_broadcast() {
        let hub = MemoryHub::new();
        let mut alice = signed_in(&hub, "alice");
        alice.pointer_down(Point::new(5.0, 5.0));
        assert!(!alice.pointer_up());
        assert!(alice.log().is_empty());
        assert_eq!(hub.published_count(), 0);
    }

    #[test]
    fn test_pointer_leave_commits() {
        let hub = MemoryHub::new();
        let mut alice = signed_in(&hub, "alice");
        alice.pointer_down(Point::new(5.0, 5.0));
        alice.pointer_move(Point::new(25.0, 5.0));
        assert!(alice.pointer_leave());
        assert!(!alice.is_drawing());
        assert_eq!(alice.log().len(), 1);
    }

    #[test]
    fn test_duplicate_delivery_is_merged() {
        let hub = MemoryHub::new();
        hub.set_duplicate_delivery(true);
        let mut alice = signed_in(&hub, "alice");
        let mut bob = signed_in(&hub, "bob");

        draw(&mut alice, &[(0.0, 0.0), (20.0, 20.0)]);
        bob.pump();
        assert_eq!(bob.log().len(), 1);
    }

    #[test]
    fn test_clear_reaches_peers() {
        let hub = MemoryHub::new();
        let mut alice = signed_in(&hub, "alice");
        let mut bob = signed_in(&hub, "bob");

        draw(&mut alice, &[(0.0, 0.0), (20.0, 20.0)]);
        draw(&mut bob, &[(50.0, 0.0), (50.0, 40.0)]);
        alice.pump();
        bob.pump();
        assert_eq!(alice.log().len(), 2);

        alice.clear();
        assert!(alice.log().is_empty());
        assert!(alice.surface().is_blank());
        assert_eq!(alice.take_notices(), vec![Notice::success("Canvas cleared!")]);

        bob.pump();
        assert!(bob.log().is_empty());
        assert!(bob.surface().is_blank());
    }

    #[test]
    fn test_failed_publish_keeps_stroke_and_warns() {
        let hub = MemoryHub::new();
        let mut alice = signed_in(&hub, "alice");
        hub.set_publish_failure("alice", true);

        draw(&mut alice, &[(0.0, 0.0), (20.0, 20.0)]);
        assert_eq!(alice.log().len(), 1);
        let notices = alice.take_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Warning);
    }

    #[test]
    fn test_signed_out_strokes_stay_local() {
        let hub = MemoryHub::new();
        let mut guest = board(&hub, "guest");
        draw(&mut guest, &[(0.0, 0.0), (20.0, 20.0)]);

        let stroke = guest.log().iter().next().unwrap();
        assert_eq!(stroke.user_id, ANONYMOUS);
        assert_eq!(hub.published_count(), 0);
    }

    #[test]
    fn test_failed_realtime_setup_keeps_identity() {
        let hub = MemoryHub::new();
        hub.set_offline("alice", true);
        let mut alice = board(&hub, "alice");
        alice.sign_in(Identity::new("alice"));

        assert!(alice.is_signed_in());
        assert!(!alice.is_live());
        assert_eq!(
            alice.take_notices(),
            vec![Notice::error("Failed to connect to realtime features")]
        );
        assert_eq!(hub.subscriber_count(DEFAULT_CHANNEL), 0);

        draw(&mut alice, &[(0.0, 0.0), (20.0, 20.0)]);
        assert_eq!(alice.log().iter().next().unwrap().user_id, "alice");
        assert!(alice.take_notices().is_empty());

        let store = MemoryStorage::new();
        block_on(alice.save(&store, "main", "Board")).unwrap();
        assert_eq!(block_on(store.load("main")).unwrap().saved_by, "alice");
    }

    #[test]
    fn test_sign_out_releases_subscriptions() {
        let hub = MemoryHub::new();
        let mut alice = signed_in(&hub, "alice");
        let mut bob = signed_in(&hub, "bob");
        assert_eq!(hub.subscriber_count(DEFAULT_CHANNEL), 2);
        assert_eq!(alice.online_count(), 2);

        bob.pointer_down(Point::new(1.0, 1.0));
        bob.pointer_move(Point::new(9.0, 9.0));
        bob.sign_out();
        assert!(!bob.is_drawing());
        assert!(bob.surface().is_blank());
        assert_eq!(hub.subscriber_count(DEFAULT_CHANNEL), 1);
        assert_eq!(alice.online_count(), 1);

        draw(&mut alice, &[(0.0, 0.0), (20.0, 20.0)]);
        bob.pump();
        assert!(bob.log().is_empty());
    }

    #[test]
    fn test_brush_changes_update_presence() {
        let hub = MemoryHub::new();
        let alice = signed_in(&hub, "alice");
        let mut bob = signed_in(&hub, "bob");

        bob.set_tool(Tool::Eraser);
        bob.set_color("#dc2626");
        let roster = alice.presence().roster();
        let entry = roster.iter().find(|e| e.user_id == "bob").unwrap();
        assert_eq!(entry.metadata.tool.as_deref(), Some("eraser"));
        assert_eq!(entry.metadata.color.as_deref(), Some("#dc2626"));
        assert_eq!(entry.metadata.name.as_deref(), Some("bob"));
    }

    #[test]
    fn test_brush_is_captured_per_gesture() {
        let hub = MemoryHub::new();
        let mut alice = signed_in(&hub, "alice");
        alice.set_size(500.0);
        assert_eq!(alice.brush().size(), 50.0);

        alice.pointer_down(Point::new(0.0, 0.0));
        alice.set_tool(Tool::Pen);
        alice.pointer_move(Point::new(10.0, 10.0));
        alice.pointer_up();
        assert_eq!(alice.log().iter().next().unwrap().tool, Tool::Marker);
    }

    #[test]
    fn test_save_guards() {
        let hub = MemoryHub::new();
        let store = MemoryStorage::new();

        let mut alice = signed_in(&hub, "alice");
        let result = block_on(alice.save(&store, "main", "Board"));
        assert!(matches!(result, Err(WhiteboardError::Storage(StorageError::NothingToSave))));

        let mut guest = board(&hub, "guest");
        draw(&mut guest, &[(0.0, 0.0), (20.0, 20.0)]);
        let result = block_on(guest.save(&store, "main", "Board"));
        assert!(matches!(result, Err(WhiteboardError::Storage(StorageError::SignInRequired))));
        assert_eq!(guest.take_notices()[0].level, NoticeLevel::Error);

        draw(&mut alice, &[(0.0, 0.0), (20.0, 20.0)]);
        block_on(alice.save(&store, "main", "Board")).unwrap();
        let saved = block_on(store.load("main")).unwrap();
        assert_eq!(saved.strokes, alice.snapshot());
        assert_eq!(saved.saved_by, "alice");
    }

    #[test]
    fn test_open_restores_saved_board() {
        let hub = MemoryHub::new();
        let store = MemoryStorage::new();
        let mut alice = signed_in(&hub, "alice");
        draw(&mut alice, &[(0.0, 0.0), (20.0, 20.0)]);
        draw(&mut alice, &[(40.0, 0.0), (40.0, 60.0)]);
        block_on(alice.save(&store, "main", "Board")).unwrap();

        let mut guest = board(&hub, "guest");
        assert!(guest.surface().is_blank());
        block_on(guest.open(&store, "main")).unwrap();
        assert_eq!(guest.snapshot(), alice.snapshot());
        assert_eq!(guest.surface(), alice.surface());

        let result = block_on(guest.open(&store, "missing"));
        assert!(matches!(result, Err(WhiteboardError::Storage(StorageError::NotFound(_)))));
        assert_eq!(guest.log().len(), 2);
    }

    #[test]
    fn test_resize_repaints_layers() {
        let hub = MemoryHub::new();
        let mut alice = signed_in(&hub, "alice");
        draw(&mut alice, &[(0.0, 10.0), (100.0, 10.0)]);

        alice.resize(200, 100).unwrap();
        assert_eq!(alice.surface().width(), 200);
        assert_eq!(alice.background().height(), 100);
        assert!(!alice.surface().is_blank());
        assert!(!alice.export_png().unwrap().is_empty());
    }
}

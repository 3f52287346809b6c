//! Chalkline Core Library
//!
//! Stroke model, smoothing, drawing session and peer synchronization for the
//! Chalkline collaborative whiteboard.

pub mod collaboration;
pub mod geometry;
pub mod identity;
pub mod presence;
pub mod session;
pub mod storage;
pub mod stroke;
pub mod stroke_log;
pub mod sync;
pub mod transport;

pub use collaboration::{Repaint, StrokeSync, SyncNotice, SyncOutcome};
pub use geometry::{live_tail, smooth_path};
pub use identity::Identity;
pub use presence::{PresenceDescriptor, PresenceEntry, PresenceTracker};
pub use session::{DrawingSession, LiveFrame};
pub use storage::{BoardSnapshot, SnapshotStore, StorageError};
pub use stroke::{Brush, Stroke, StrokeError, Tool};
pub use stroke_log::StrokeLog;
pub use sync::{ConnectionState, SyncEvent};
pub use transport::{Envelope, Subscription, Transport, TransportError};

#[cfg(not(target_arch = "wasm32"))]
pub use sync::WsTransport;

//! Chalkline Application
//!
//! The whiteboard controller tying pointer input, the drawing session,
//! synchronization, presence and rendering together.

mod app;
mod event_handler;

pub use app::{AppConfig, DEFAULT_CHANNEL, Notice, NoticeLevel, Whiteboard, WhiteboardError};
pub use event_handler::{KeyAction, PointerEvent};

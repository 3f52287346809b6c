//! Stroke synchronization between peers.
//!
//! The log is a grow-only set keyed by stroke id, so merging the same stroke
//! twice, or in any order, converges. `"clear"` is the only removal and wipes
//! everything.

use crate::stroke::Stroke;
use crate::stroke_log::StrokeLog;
use crate::transport::{Envelope, Transport};
use serde_json::json;

/// Message type of a committed stroke.
pub const STROKE_EVENT: &str = "stroke";
/// Message type of a board clear.
pub const CLEAR_EVENT: &str = "clear";

/// Whether the surface has to be redrawn after applying a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repaint {
    /// Nothing visible changed.
    None,
    /// Redraw the whole log.
    Full,
}

/// A non-fatal condition to show to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncNotice {
    /// A stroke was kept locally but could not be sent.
    StrokeNotSent { id: String, reason: String },
    /// The local board was cleared but peers may still show strokes.
    ClearNotSent { reason: String },
}

impl std::fmt::Display for SyncNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncNotice::StrokeNotSent { reason, .. } => {
                write!(f, "Stroke saved locally but not shared: {}", reason)
            }
            SyncNotice::ClearNotSent { reason } => {
                write!(f, "Board cleared locally; other users may not see the clear: {}", reason)
            }
        }
    }
}

/// Result of a local change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub repaint: Repaint,
    pub notice: Option<SyncNotice>,
}

/// Owns the stroke log of one board channel.
#[derive(Debug, Clone)]
pub struct StrokeSync {
    log: StrokeLog,
    channel: String,
}

impl StrokeSync {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            log: StrokeLog::new(),
            channel: channel.into(),
        }
    }

    /// Start from a previously saved log.
    pub fn with_log(channel: impl Into<String>, log: StrokeLog) -> Self {
        Self {
            log,
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn log(&self) -> &StrokeLog {
        &self.log
    }

    /// Serializable stroke list in draw order.
    pub fn snapshot(&self) -> Vec<Stroke> {
        self.log.to_vec()
    }

    /// Record a locally committed stroke and broadcast it.
    ///
    /// The stroke stays in the log even when the broadcast fails.
    pub fn commit_local(&mut self, stroke: Stroke, transport: &dyn Transport) -> SyncOutcome {
        let payload = match serde_json::to_value(&stroke) {
            Ok(payload) => Some(payload),
            Err(e) => {
                log::warn!("Failed to serialize stroke {}: {}", stroke.id, e);
                None
            }
        };
        let id = stroke.id.clone();
        let repaint = if self.log.insert(stroke) {
            Repaint::Full
        } else {
            Repaint::None
        };

        let result = match payload {
            Some(payload) => transport
                .publish(&self.channel, STROKE_EVENT, payload)
                .map_err(|e| e.to_string()),
            None => Err("stroke could not be encoded".to_string()),
        };
        let notice = result.err().map(|reason| {
            log::warn!("Failed to broadcast stroke {}: {}", id, reason);
            SyncNotice::StrokeNotSent { id, reason }
        });

        SyncOutcome { repaint, notice }
    }

    /// Record a stroke without broadcasting it (no live channel).
    pub fn record_local(&mut self, stroke: Stroke) -> Repaint {
        if self.log.insert(stroke) {
            Repaint::Full
        } else {
            Repaint::None
        }
    }

    /// Empty the log without telling peers.
    pub fn clear_local(&mut self) -> Repaint {
        self.log.clear();
        Repaint::Full
    }

    /// Apply a message delivered by the transport.
    ///
    /// Unknown and malformed messages are ignored.
    pub fn receive_remote(&mut self, envelope: &Envelope) -> Repaint {
        match envelope.kind.as_str() {
            STROKE_EVENT => {
                let stroke: Stroke = match serde_json::from_value(envelope.data.clone()) {
                    Ok(stroke) => stroke,
                    Err(e) => {
                        log::debug!("Ignoring malformed stroke message: {}", e);
                        return Repaint::None;
                    }
                };
                if let Err(e) = stroke.validate() {
                    log::debug!("Ignoring invalid stroke {}: {}", stroke.id, e);
                    return Repaint::None;
                }
                if self.log.insert(stroke) {
                    Repaint::Full
                } else {
                    Repaint::None
                }
            }
            CLEAR_EVENT => {
                log::info!("Board cleared by a peer");
                self.log.clear();
                Repaint::Full
            }
            other => {
                log::debug!("Ignoring message of type {:?}", other);
                Repaint::None
            }
        }
    }

    /// Empty the board locally and tell every peer to do the same.
    pub fn clear_all(&mut self, transport: &dyn Transport) -> SyncOutcome {
        self.log.clear();
        let notice = transport
            .publish(&self.channel, CLEAR_EVENT, json!({}))
            .err()
            .map(|e| {
                log::warn!("Failed to broadcast clear: {}", e);
                SyncNotice::ClearNotSent {
                    reason: e.to_string(),
                }
            });
        SyncOutcome {
            repaint: Repaint::Full,
            notice,
        }
    }
}

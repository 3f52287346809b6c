//! Local drawing session for a single pointer.
//!
//! `Idle --begin--> Drawing --extend--> Drawing --end/leave--> Idle`.
//! Ending a gesture with fewer than two samples is treated as a click and
//! produces nothing.

use crate::geometry::live_tail;
use crate::stroke::{Brush, Stroke, Tool};
use kurbo::{BezPath, Point};

/// State of the local pointer.
#[derive(Debug, Clone, Default)]
pub enum SessionState {
    /// Waiting for a pointer-down.
    #[default]
    Idle,
    /// A gesture is in progress.
    Drawing {
        /// Brush captured when the gesture began.
        brush: Brush,
        /// Samples collected so far, in temporal order.
        points: Vec<Point>,
    },
}

/// What to paint after a sample has been appended.
#[derive(Debug)]
pub struct LiveFrame<'a> {
    pub brush: &'a Brush,
    /// All samples of the gesture so far.
    pub points: &'a [Point],
    /// Path segment that changed with the newest sample.
    pub tail: BezPath,
    /// Repaint the committed log before drawing the gesture. Set for the
    /// eraser, whose destructive compositing cannot be applied on top of
    /// stale live pixels.
    pub full_redraw: bool,
}

/// Tracks one local pointer's in-progress stroke.
#[derive(Debug, Clone, Default)]
pub struct DrawingSession {
    state: SessionState,
}

impl DrawingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Check if a gesture is in progress.
    pub fn is_drawing(&self) -> bool {
        matches!(self.state, SessionState::Drawing { .. })
    }

    /// Samples of the gesture in progress (empty when idle).
    pub fn points(&self) -> &[Point] {
        match &self.state {
            SessionState::Drawing { points, .. } => points.as_slice(),
            SessionState::Idle => &[],
        }
    }

    /// Start a gesture (pointer-down / touch-start).
    ///
    /// A gesture that is still open is committed first, exactly as `end` would.
    pub fn begin(&mut self, point: Point, brush: &Brush, author: &str, now: u64) -> Option<Stroke> {
        let previous = self.end(author, now);
        self.state = SessionState::Drawing {
            brush: brush.clone(),
            points: vec![point],
        };
        previous
    }

    /// Append a sample (pointer-move). Returns `None` while idle.
    pub fn extend(&mut self, point: Point) -> Option<LiveFrame<'_>> {
        let SessionState::Drawing { brush, points } = &mut self.state else {
            return None;
        };
        points.push(point);
        Some(LiveFrame {
            tail: live_tail(points),
            full_redraw: brush.tool == Tool::Eraser,
            brush,
            points,
        })
    }

    /// Finish the gesture (pointer-up / touch-end).
    ///
    /// Returns the committed stroke, or `None` for a click or when idle.
    /// The buffer is cleared either way.
    pub fn end(&mut self, author: &str, now: u64) -> Option<Stroke> {
        match std::mem::take(&mut self.state) {
            SessionState::Drawing { brush, points } if points.len() >= 2 => {
                Some(Stroke::commit(&brush, points, author, now))
            }
            SessionState::Drawing { points, .. } => {
                log::debug!("Discarding gesture with {} point(s)", points.len());
                None
            }
            SessionState::Idle => None,
        }
    }

    /// The pointer left the surface mid-gesture: commit what was captured.
    pub fn leave(&mut self, author: &str, now: u64) -> Option<Stroke> {
        self.end(author, now)
    }

    /// Drop the gesture without committing (e.g. on sign-out).
    pub fn cancel(&mut self) {
        self.state = SessionState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kurbo::PathEl;

    fn pen() -> Brush {
        Brush::new(Tool::Pen, "#000000", 4.0)
    }

    #[test]
    fn test_starts_idle() {
        let session = DrawingSession::new();
        assert!(!session.is_drawing());
        assert!(session.points().is_empty());
    }

    #[test]
    fn test_three_point_gesture_commits() {
        let mut session = DrawingSession::new();
        assert!(session.begin(Point::new(0.0, 0.0), &pen(), "alice", 1).is_none());
        session.extend(Point::new(5.0, 5.0));
        session.extend(Point::new(10.0, 0.0));

        let stroke = session.end("alice", 2).expect("stroke");
        assert_eq!(
            stroke.points,
            vec![Point::new(0.0, 0.0), Point::new(5.0, 5.0), Point::new(10.0, 0.0)]
        );
        assert_eq!(stroke.tool, Tool::Pen);
        assert_eq!(stroke.user_id, "alice");
        assert_eq!(stroke.timestamp, 2);
        assert!(!session.is_drawing());
    }

    #[test]
    fn test_single_point_is_discarded() {
        let mut session = DrawingSession::new();
        session.begin(Point::new(3.0, 3.0), &pen(), "bob", 1);
        assert!(session.end("bob", 2).is_none());
        assert!(!session.is_drawing());
        assert!(session.points().is_empty());
    }

    #[test]
    fn test_extend_while_idle_is_ignored() {
        let mut session = DrawingSession::new();
        assert!(session.extend(Point::new(1.0, 1.0)).is_none());
        assert!(session.end("u", 0).is_none());
    }

    #[test]
    fn test_live_frame_reports_tail_and_redraw() {
        let mut session = DrawingSession::new();
        session.begin(Point::new(0.0, 0.0), &pen(), "u", 0);
        let frame = session.extend(Point::new(10.0, 0.0)).unwrap();
        assert!(!frame.full_redraw);
        assert_eq!(frame.points.len(), 2);
        assert_eq!(frame.tail.elements()[1], PathEl::LineTo(Point::new(10.0, 0.0)));

        let mut erasing = DrawingSession::new();
        erasing.begin(Point::new(0.0, 0.0), &Brush::new(Tool::Eraser, "#000", 20.0), "u", 0);
        assert!(erasing.extend(Point::new(1.0, 1.0)).unwrap().full_redraw);
    }

    #[test]
    fn test_leave_commits_like_end() {
        let mut session = DrawingSession::new();
        session.begin(Point::new(0.0, 0.0), &pen(), "u", 0);
        session.extend(Point::new(2.0, 2.0));
        assert!(session.leave("u", 1).is_some());
        assert!(!session.is_drawing());
    }

    #[test]
    fn test_brush_is_captured_at_begin() {
        let mut session = DrawingSession::new();
        let mut brush = pen();
        session.begin(Point::new(0.0, 0.0), &brush, "u", 0);
        brush.tool = Tool::Eraser;
        session.extend(Point::new(1.0, 0.0));
        assert_eq!(session.end("u", 1).unwrap().tool, Tool::Pen);
    }

    #[test]
    fn test_begin_while_drawing_commits_previous() {
        let mut session = DrawingSession::new();
        session.begin(Point::new(0.0, 0.0), &pen(), "u", 0);
        session.extend(Point::new(1.0, 1.0));
        let previous = session.begin(Point::new(9.0, 9.0), &pen(), "u", 1);
        assert!(previous.is_some());
        assert_eq!(session.points(), &[Point::new(9.0, 9.0)]);
    }

    #[test]
    fn test_cancel_drops_gesture() {
        let mut session = DrawingSession::new();
        session.begin(Point::new(0.0, 0.0), &pen(), "u", 0);
        session.extend(Point::new(1.0, 1.0));
        session.cancel();
        assert!(session.end("u", 1).is_none());
    }
}

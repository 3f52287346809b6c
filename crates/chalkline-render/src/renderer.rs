//! Renderer trait abstraction and the per-tool compositing table.

use chalkline_core::geometry::smooth_path;
use chalkline_core::session::LiveFrame;
use chalkline_core::stroke::{Brush, Stroke, Tool};
use chalkline_core::stroke_log::StrokeLog;
use kurbo::BezPath;
use thiserror::Error;

/// Renderer errors.
#[derive(Debug, Error)]
pub enum RendererError {
    #[error("Invalid surface size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
    #[error("Encoding failed: {0}")]
    Encode(String),
}

/// Result type for renderer operations.
pub type RenderResult<T> = Result<T, RendererError>;

/// Grid spacing of the background layer in pixels.
pub const GRID_SPACING: u32 = 20;

/// Grid line color (`#f0f0f0`).
pub const GRID_COLOR: [u8; 3] = [0xf0, 0xf0, 0xf0];

/// Background style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GridStyle {
    /// Plain white background.
    None,
    /// Grid lines every [`GRID_SPACING`] pixels.
    #[default]
    Lines,
}

/// How stroke pixels combine with what is already on the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Composite {
    SourceOver,
    Multiply,
    DestinationOut,
}

/// Compositing parameters of a tool. Caps and joins are always round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToolStyle {
    pub composite: Composite,
    pub opacity: f32,
    /// Whether the stroke color is used (the eraser paints opaque black).
    pub uses_color: bool,
}

impl ToolStyle {
    pub fn for_tool(tool: Tool) -> Self {
        match tool {
            Tool::Pen => Self {
                composite: Composite::SourceOver,
                opacity: 1.0,
                uses_color: true,
            },
            Tool::Marker => Self {
                composite: Composite::Multiply,
                opacity: 0.8,
                uses_color: true,
            },
            Tool::Eraser => Self {
                composite: Composite::DestinationOut,
                opacity: 1.0,
                uses_color: false,
            },
        }
    }
}

/// Trait for stroke rendering backends.
pub trait Renderer {
    /// Reset the surface to fully transparent.
    fn clear(&mut self);

    /// Stroke `path` with the compositing of `brush`.
    fn render_path(&mut self, path: &BezPath, brush: &Brush);

    /// Draw one committed stroke. Strokes with fewer than two points draw nothing.
    fn render(&mut self, stroke: &Stroke) {
        if stroke.points.len() < 2 {
            return;
        }
        self.render_path(&smooth_path(&stroke.points), &stroke.brush());
    }

    /// Clear, then draw every stroke in log order.
    fn render_all(&mut self, log: &StrokeLog) {
        self.clear();
        for stroke in log {
            self.render(stroke);
        }
    }

    /// Draw live feedback for a gesture in progress.
    ///
    /// Only the changed tail is drawn, except for frames that ask for a full
    /// redraw: those repaint `log` and the whole gesture.
    fn render_live(&mut self, frame: &LiveFrame<'_>, log: &StrokeLog) {
        if frame.full_redraw {
            self.render_all(log);
            self.render_path(&smooth_path(frame.points), frame.brush);
        } else {
            self.render_path(&frame.tail, frame.brush);
        }
    }
}

//! The stroke model.

use kurbo::Point;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// Smallest allowed stroke width in surface pixels.
pub const MIN_SIZE: f64 = 1.0;
/// Largest allowed stroke width in surface pixels.
pub const MAX_SIZE: f64 = 50.0;

/// Author id used when no identity has been established.
pub const ANONYMOUS: &str = "anonymous";

/// Colors offered by the toolbar.
pub const PALETTE: [&str; 10] = [
    "#000000", // Black
    "#2563eb", // Blue
    "#dc2626", // Red
    "#16a34a", // Green
    "#ca8a04", // Yellow
    "#9333ea", // Purple
    "#ea580c", // Orange
    "#0891b2", // Cyan
    "#be185d", // Pink
    "#374151", // Gray
];

/// Drawing tools. The tool decides how a stroke is composited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Pen,
    #[default]
    Marker,
    Eraser,
}

impl Tool {
    /// Wire/display name of the tool.
    pub fn name(self) -> &'static str {
        match self {
            Tool::Pen => "pen",
            Tool::Marker => "marker",
            Tool::Eraser => "eraser",
        }
    }
}

/// Validation failures for strokes.
#[derive(Debug, Error, PartialEq)]
pub enum StrokeError {
    #[error("stroke id is empty")]
    EmptyId,
    #[error("stroke has {0} point(s), at least 2 are required")]
    TooFewPoints(usize),
    #[error("stroke size {0} is outside [1, 50]")]
    SizeOutOfRange(f64),
    #[error("stroke contains a non-finite coordinate")]
    NonFinitePoint,
}

/// The local tool selection applied to new strokes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Brush {
    pub tool: Tool,
    pub color: String,
    size: f64,
}

impl Default for Brush {
    fn default() -> Self {
        Self {
            tool: Tool::Marker,
            color: PALETTE[1].to_string(),
            size: 8.0,
        }
    }
}

impl Brush {
    /// Create a brush; the size is clamped into the allowed range.
    pub fn new(tool: Tool, color: impl Into<String>, size: f64) -> Self {
        let mut brush = Self {
            tool,
            color: color.into(),
            size: MIN_SIZE,
        };
        brush.set_size(size);
        brush
    }

    pub fn size(&self) -> f64 {
        self.size
    }

    /// Set the width, clamped into `[MIN_SIZE, MAX_SIZE]`.
    pub fn set_size(&mut self, size: f64) {
        self.size = if size.is_nan() {
            MIN_SIZE
        } else {
            size.clamp(MIN_SIZE, MAX_SIZE)
        };
    }
}

/// A committed freehand gesture. Never mutated after it has an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stroke {
    pub id: String,
    pub tool: Tool,
    pub color: String,
    pub size: f64,
    pub points: Vec<Point>,
    pub user_id: String,
    pub timestamp: u64,
}

impl Stroke {
    /// Package a finished gesture under a freshly generated id.
    pub fn commit(brush: &Brush, points: Vec<Point>, user_id: &str, timestamp: u64) -> Self {
        Self {
            id: generate_stroke_id(user_id, timestamp),
            tool: brush.tool,
            color: brush.color.clone(),
            size: brush.size(),
            points,
            user_id: user_id.to_string(),
            timestamp,
        }
    }

    /// The brush this stroke was drawn with.
    pub fn brush(&self) -> Brush {
        Brush::new(self.tool, self.color.clone(), self.size)
    }

    /// Check the invariants a committed stroke must satisfy.
    pub fn validate(&self) -> Result<(), StrokeError> {
        if self.id.is_empty() {
            return Err(StrokeError::EmptyId);
        }
        if self.points.len() < 2 {
            return Err(StrokeError::TooFewPoints(self.points.len()));
        }
        if !(MIN_SIZE..=MAX_SIZE).contains(&self.size) {
            return Err(StrokeError::SizeOutOfRange(self.size));
        }
        if self.points.iter().any(|p| !p.is_finite()) {
            return Err(StrokeError::NonFinitePoint);
        }
        Ok(())
    }
}

/// `{userId}-{timestampMillis}-{randomSuffix}`, unique without coordination.
pub fn generate_stroke_id(user_id: &str, timestamp: u64) -> String {
    format!("{}-{}-{}", user_id, timestamp, Uuid::new_v4().simple())
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Straight (non-premultiplied) RGBA8 color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn black() -> Self {
        Self::new(0, 0, 0, 255)
    }

    pub fn white() -> Self {
        Self::new(255, 255, 255, 255)
    }
}

/// Parse a CSS hex color (`#rgb`, `#rrggbb` or `#rrggbbaa`).
pub fn parse_color(color: &str) -> Option<Rgba> {
    let hex = color.trim().strip_prefix('#')?;
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let channel = |s: &str| u8::from_str_radix(s, 16).ok();
    match hex.len() {
        3 => {
            let r = channel(&hex[0..1])? * 17;
            let g = channel(&hex[1..2])? * 17;
            let b = channel(&hex[2..3])? * 17;
            Some(Rgba::new(r, g, b, 255))
        }
        6 => Some(Rgba::new(
            channel(&hex[0..2])?,
            channel(&hex[2..4])?,
            channel(&hex[4..6])?,
            255,
        )),
        8 => Some(Rgba::new(
            channel(&hex[0..2])?,
            channel(&hex[2..4])?,
            channel(&hex[4..6])?,
            channel(&hex[6..8])?,
        )),
        _ => None,
    }
}

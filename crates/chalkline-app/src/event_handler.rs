//! Input events delivered to a whiteboard.

use crate::app::Whiteboard;
use chalkline_core::stroke::{PALETTE, Tool};
use chalkline_core::transport::Transport;
use kurbo::Point;

/// Size step of the bracket shortcuts.
const SIZE_STEP: f64 = 2.0;

/// Pointer or touch input in surface-local coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Down(Point),
    Move(Point),
    Up,
    Leave,
}

/// Toolbar actions bound to single keys.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyAction {
    SelectTool(Tool),
    /// Pick a palette color by index.
    SelectColor(usize),
    GrowBrush,
    ShrinkBrush,
    Clear,
}

impl KeyAction {
    /// Map a key press to an action.
    ///
    /// `p`/`m`/`e` select a tool, `1`-`9` and `0` pick palette colors,
    /// `[`/`]` change the size, `Delete` clears the board.
    pub fn from_key(key: &str) -> Option<Self> {
        let action = match key {
            "p" | "P" => KeyAction::SelectTool(Tool::Pen),
            "m" | "M" => KeyAction::SelectTool(Tool::Marker),
            "e" | "E" => KeyAction::SelectTool(Tool::Eraser),
            "[" => KeyAction::ShrinkBrush,
            "]" => KeyAction::GrowBrush,
            "Delete" => KeyAction::Clear,
            "0" => KeyAction::SelectColor(9),
            digit => match digit.as_bytes() {
                [d @ b'1'..=b'9'] => KeyAction::SelectColor(usize::from(d - b'1')),
                _ => return None,
            },
        };
        Some(action)
    }
}

impl<T: Transport> Whiteboard<T> {
    /// Dispatch a pointer event. Returns whether a stroke was committed.
    pub fn handle_pointer(&mut self, event: PointerEvent) -> bool {
        match event {
            PointerEvent::Down(point) => {
                let was_drawing = self.is_drawing();
                let before = self.log().len();
                self.pointer_down(point);
                was_drawing && self.log().len() > before
            }
            PointerEvent::Move(point) => {
                self.pointer_move(point);
                false
            }
            PointerEvent::Up => self.pointer_up(),
            PointerEvent::Leave => self.pointer_leave(),
        }
    }

    /// Apply a keyboard shortcut.
    pub fn handle_key(&mut self, action: KeyAction) {
        match action {
            KeyAction::SelectTool(tool) => self.set_tool(tool),
            KeyAction::SelectColor(index) => {
                if let Some(color) = PALETTE.get(index) {
                    self.set_color(*color);
                }
            }
            KeyAction::GrowBrush => self.set_size(self.brush().size() + SIZE_STEP),
            KeyAction::ShrinkBrush => self.set_size(self.brush().size() - SIZE_STEP),
            KeyAction::Clear => self.clear(),
        }
    }
}

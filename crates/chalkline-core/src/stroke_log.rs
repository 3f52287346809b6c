//! The stroke log held by each participant.

use crate::stroke::Stroke;
use std::collections::HashMap;

/// Strokes keyed by id, plus the order in which they arrived locally.
///
/// The arrival order is the draw order for full repaints. It is local to this
/// participant: two peers can hold the same strokes in different orders.
#[derive(Debug, Clone, Default)]
pub struct StrokeLog {
    strokes: HashMap<String, Stroke>,
    order: Vec<String>,
}

impl StrokeLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a stroke unless one with the same id is already present.
    /// Returns true if the stroke was inserted.
    pub fn insert(&mut self, stroke: Stroke) -> bool {
        if self.strokes.contains_key(&stroke.id) {
            return false;
        }
        self.order.push(stroke.id.clone());
        self.strokes.insert(stroke.id.clone(), stroke);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.strokes.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Stroke> {
        self.strokes.get(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Remove every stroke.
    pub fn clear(&mut self) {
        self.strokes.clear();
        self.order.clear();
    }

    /// Strokes in local arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &Stroke> {
        self.order.iter().filter_map(|id| self.strokes.get(id))
    }

    /// The serializable stroke list, in arrival order.
    pub fn to_vec(&self) -> Vec<Stroke> {
        self.iter().cloned().collect()
    }

    /// Serialize the stroke list to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_vec())
    }
}

impl<'a> IntoIterator for &'a StrokeLog {
    type Item = &'a Stroke;
    type IntoIter = Box<dyn Iterator<Item = &'a Stroke> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

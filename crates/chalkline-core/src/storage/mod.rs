//! Persistence of board snapshots.

mod memory;

#[cfg(not(target_arch = "wasm32"))]
mod file;

pub use memory::MemoryStorage;

#[cfg(not(target_arch = "wasm32"))]
pub use file::FileStorage;

use crate::identity::Identity;
use crate::stroke::Stroke;
use crate::stroke_log::StrokeLog;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Snapshot not found: {0}")]
    NotFound(String),
    #[error("Nothing to save")]
    NothingToSave,
    #[error("Sign in to save")]
    SignInRequired,
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    Io(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Boxed future for async operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// A saved copy of a board's stroke log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardSnapshot {
    pub name: String,
    /// Strokes in draw order.
    pub strokes: Vec<Stroke>,
    pub saved_by: String,
    /// Epoch milliseconds.
    pub saved_at: u64,
}

impl BoardSnapshot {
    /// Capture `log` for saving.
    ///
    /// Refuses an empty board and a signed-out user.
    pub fn capture(
        name: impl Into<String>,
        log: &StrokeLog,
        identity: Option<&Identity>,
        now: u64,
    ) -> StorageResult<Self> {
        if log.is_empty() {
            return Err(StorageError::NothingToSave);
        }
        let identity = identity.ok_or(StorageError::SignInRequired)?;
        Ok(Self {
            name: name.into(),
            strokes: log.to_vec(),
            saved_by: identity.id.clone(),
            saved_at: now,
        })
    }

    /// Rebuild a stroke log, skipping strokes that fail validation.
    pub fn to_log(&self) -> StrokeLog {
        let mut log = StrokeLog::new();
        for stroke in &self.strokes {
            match stroke.validate() {
                Ok(()) => {
                    log.insert(stroke.clone());
                }
                Err(e) => log::warn!("Skipping stroke {} in snapshot: {}", stroke.id, e),
            }
        }
        log
    }

    pub fn to_json(&self) -> StorageResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> StorageResult<Self> {
        serde_json::from_str(json).map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

/// Snapshot storage backend.
pub trait SnapshotStore {
    /// Save a snapshot under `id`, replacing any previous one.
    fn save(&self, id: &str, snapshot: &BoardSnapshot) -> BoxFuture<'_, StorageResult<()>>;

    /// Load a snapshot.
    fn load(&self, id: &str) -> BoxFuture<'_, StorageResult<BoardSnapshot>>;

    /// List all snapshot IDs.
    fn list(&self) -> BoxFuture<'_, StorageResult<Vec<String>>>;
}

#[cfg(test)]
pub(crate) fn block_on<F: Future>(f: F) -> F::Output {
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

//! In-memory snapshot storage.

use super::{BoardSnapshot, BoxFuture, SnapshotStore, StorageError, StorageResult};
use std::cell::RefCell;
use std::collections::BTreeMap;

/// In-memory storage for tests and ephemeral boards.
#[derive(Default)]
pub struct MemoryStorage {
    snapshots: RefCell<BTreeMap<String, BoardSnapshot>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.borrow().is_empty()
    }
}

impl SnapshotStore for MemoryStorage {
    fn save(&self, id: &str, snapshot: &BoardSnapshot) -> BoxFuture<'_, StorageResult<()>> {
        let id = id.to_string();
        let snapshot = snapshot.clone();
        Box::pin(async move {
            self.snapshots.borrow_mut().insert(id, snapshot);
            Ok(())
        })
    }

    fn load(&self, id: &str) -> BoxFuture<'_, StorageResult<BoardSnapshot>> {
        let id = id.to_string();
        Box::pin(async move {
            self.snapshots
                .borrow()
                .get(&id)
                .cloned()
                .ok_or(StorageError::NotFound(id))
        })
    }

    fn list(&self) -> BoxFuture<'_, StorageResult<Vec<String>>> {
        Box::pin(async move { Ok(self.snapshots.borrow().keys().cloned().collect()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::block_on;

    fn snapshot(name: &str) -> BoardSnapshot {
        BoardSnapshot {
            name: name.to_string(),
            strokes: Vec::new(),
            saved_by: "alice".to_string(),
            saved_at: 7,
        }
    }

    #[test]
    fn test_save_and_load() {
        let storage = MemoryStorage::new();
        block_on(storage.save("board", &snapshot("Board"))).unwrap();
        let loaded = block_on(storage.load("board")).unwrap();
        assert_eq!(loaded.name, "Board");
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_not_found() {
        let storage = MemoryStorage::new();
        let result = block_on(storage.load("nonexistent"));
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_save_replaces() {
        let storage = MemoryStorage::new();
        block_on(storage.save("board", &snapshot("First"))).unwrap();
        block_on(storage.save("board", &snapshot("Second"))).unwrap();
        assert_eq!(block_on(storage.load("board")).unwrap().name, "Second");
        assert_eq!(block_on(storage.list()).unwrap(), vec!["board".to_string()]);
    }
}

use std::collections::HashMap;
use std::fs::File;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Open files produced by `create`, keyed by the handle returned to the
/// kernel. A handle is inserted by `create`, written through by `write`
/// and dropped (closing the descriptor) by `release`.
#[derive(Debug)]
pub struct HandleTable {
    entries: Mutex<HashMap<u64, Arc<File>>>,
    next: AtomicU64,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next: AtomicU64::new(1),
        }
    }

    pub fn insert(&self, file: File) -> u64 {
        let fh = self.next.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().unwrap().insert(fh, Arc::new(file));
        fh
    }

    pub fn get(&self, fh: u64) -> Option<Arc<File>> {
        self.entries.lock().unwrap().get(&fh).cloned()
    }

    pub fn remove(&self, fh: u64) -> Option<Arc<File>> {
        self.entries.lock().unwrap().remove(&fh)
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let table = HandleTable::new();
        let fh = table.insert(tempfile::tempfile().unwrap());
        assert!(fh > 0);
        assert!(table.get(fh).is_some());
        assert!(table.remove(fh).is_some());
        assert!(table.get(fh).is_none());
        assert!(table.remove(fh).is_none());
    }

    #[test]
    fn handles_are_distinct() {
        let table = HandleTable::new();
        let a = table.insert(tempfile::tempfile().unwrap());
        let b = table.insert(tempfile::tempfile().unwrap());
        assert_ne!(a, b);
    }
}

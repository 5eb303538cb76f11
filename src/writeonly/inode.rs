use std::collections::HashMap;

/// Inode number of the virtual filesystem root.
pub const ROOT_INODE: u64 = 1;

/// Bidirectional inode <-> virtual path table.
///
/// The kernel addresses requests by inode, the naming policy and the
/// backing storage work on rooted virtual paths, so every inode handed
/// out maps back to the path it was created for. Entries are added by
/// successful lookup/mkdir/create and kept for the lifetime of the
/// mount; forget messages are ignored.
#[derive(Debug)]
pub struct InodeTable {
    paths: HashMap<u64, String>,
    index: HashMap<String, u64>,
    next: u64,
}

impl InodeTable {
    pub fn new() -> Self {
        let mut paths = HashMap::new();
        let mut index = HashMap::new();
        paths.insert(ROOT_INODE, "/".to_string());
        index.insert("/".to_string(), ROOT_INODE);
        Self {
            paths,
            index,
            next: ROOT_INODE + 1,
        }
    }

    /// Virtual path registered for `ino`, if any.
    pub fn path_of(&self, ino: u64) -> Option<&str> {
        self.paths.get(&ino).map(String::as_str)
    }

    /// Inode for `path`, allocating a fresh one on first sight.
    pub fn assign(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.index.get(path) {
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.paths.insert(ino, path.to_string());
        self.index.insert(path.to_string(), ino);
        ino
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_preregistered() {
        let table = InodeTable::new();
        assert_eq!(table.path_of(ROOT_INODE), Some("/"));
    }

    #[test]
    fn assign_is_stable_per_path() {
        let mut table = InodeTable::new();
        let a = table.assign("/a");
        let b = table.assign("/b");
        assert_ne!(a, b);
        assert_eq!(table.assign("/a"), a);
        assert_eq!(table.path_of(a), Some("/a"));
        assert_eq!(table.path_of(b), Some("/b"));
    }

    #[test]
    fn unknown_inode_has_no_path() {
        let table = InodeTable::new();
        assert_eq!(table.path_of(42), None);
    }
}

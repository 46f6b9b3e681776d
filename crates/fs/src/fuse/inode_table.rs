//! Bidirectional inode ↔ virtual path mapping
//!
//! The kernel addresses files by 64-bit inode numbers while [`TextFs`]
//! works on virtual paths. Inodes are handed out on first lookup and follow
//! their path through renames.
//!
//! [`TextFs`]: crate::TextFs

use std::collections::HashMap;

#[derive(Debug)]
pub struct InodeTable {
    path_to_inode: HashMap<String, u64>,
    inode_to_path: HashMap<u64, String>,
    /// Next inode to hand out (1 is the root)
    next_inode: u64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    /// Root inode number (always 1 in FUSE)
    pub const ROOT_INODE: u64 = 1;

    pub fn new() -> Self {
        let mut table = Self {
            path_to_inode: HashMap::new(),
            inode_to_path: HashMap::new(),
            next_inode: Self::ROOT_INODE + 1,
        };
        table.insert("/".to_string(), Self::ROOT_INODE);
        table
    }

    fn insert(&mut self, path: String, inode: u64) {
        self.path_to_inode.insert(path.clone(), inode);
        self.inode_to_path.insert(inode, path);
    }

    pub fn get_or_create(&mut self, path: &str) -> u64 {
        let normalized = normalize(path);
        if let Some(&inode) = self.path_to_inode.get(&normalized) {
            return inode;
        }

        let inode = self.next_inode;
        self.next_inode += 1;
        self.insert(normalized, inode);
        inode
    }

    pub fn get_inode(&self, path: &str) -> Option<u64> {
        self.path_to_inode.get(&normalize(path)).copied()
    }

    pub fn get_path(&self, inode: u64) -> Option<&str> {
        self.inode_to_path.get(&inode).map(String::as_str)
    }

    /// Forget a path that no longer exists
    pub fn remove_by_path(&mut self, path: &str) -> Option<u64> {
        let inode = self.path_to_inode.remove(&normalize(path))?;
        self.inode_to_path.remove(&inode);
        Some(inode)
    }

    /// Move an inode to a new path, replacing whatever was mapped there
    pub fn rename(&mut self, old_path: &str, new_path: &str) -> Option<u64> {
        let inode = self.path_to_inode.remove(&normalize(old_path))?;
        self.remove_by_path(new_path);
        self.insert(normalize(new_path), inode);
        Some(inode)
    }

    pub fn len(&self) -> usize {
        self.inode_to_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inode_to_path.is_empty()
    }
}

/// Leading slash, no trailing slash, `/` for the root
fn normalize(path: &str) -> String {
    let path = path.trim().trim_end_matches('/');
    if path.is_empty() {
        return "/".to_string();
    }
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

//! Shared helpers for the FUSE glue: the logical-path inode table, the
//! `Iatt` -> `FileAttr` conversion, and the path-joining convention every
//! `striped-rs` fanout module already uses.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use fuser::{FileAttr, FileType};
use striped_rs::subvolume::Iatt;

/// Every reply's attribute cache is valid for this long before the kernel
/// re-asks (matches the fixed one-second TTL the rest of the translator's
/// metadata paths assume).
pub const TTL: Duration = Duration::from_secs(1);

pub const ROOT_INO: u64 = 1;

/// Joins a logical parent path and a child name the same way every
/// `striped-rs` fanout module does.
pub fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Returns the logical parent path of `path` (the root is its own parent).
pub fn parent_path(path: &str) -> String {
    if path == "/" {
        return "/".to_string();
    }
    match path.rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((prefix, _)) => prefix.to_string(),
    }
}

pub fn file_attr(ino: u64, attr: &Iatt) -> FileAttr {
    FileAttr {
        ino,
        size: attr.size,
        blocks: attr.blocks,
        atime: SystemTime::UNIX_EPOCH,
        mtime: SystemTime::UNIX_EPOCH,
        ctime: SystemTime::UNIX_EPOCH,
        crtime: SystemTime::UNIX_EPOCH,
        kind: if attr.is_dir { FileType::Directory } else { FileType::RegularFile },
        perm: (attr.mode & 0o7777) as u16,
        nlink: if attr.is_dir { 2 } else { 1 },
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: 512,
        flags: 0,
    }
}

struct InodeEntry {
    path: String,
    is_dir: bool,
    nlookup: u64,
}

/// Maps the logical path tree onto the inode numbers FUSE requires, since
/// `striped-rs`'s engine only ever treats an inode as an opaque geometry-cache
/// key (spec's dentry/inode graph is a frontend concern, not the core's).
pub struct InodeTable {
    by_ino: HashMap<u64, InodeEntry>,
    by_path: HashMap<String, u64>,
    next_ino: u64,
}

impl InodeTable {
    pub fn new() -> Self {
        let mut by_ino = HashMap::new();
        by_ino.insert(
            ROOT_INO,
            InodeEntry { path: "/".to_string(), is_dir: true, nlookup: 1 },
        );
        let mut by_path = HashMap::new();
        by_path.insert("/".to_string(), ROOT_INO);
        Self { by_ino, by_path, next_ino: ROOT_INO + 1 }
    }

    pub fn path(&self, ino: u64) -> Option<String> {
        self.by_ino.get(&ino).map(|e| e.path.clone())
    }

    pub fn is_dir(&self, ino: u64) -> Option<bool> {
        self.by_ino.get(&ino).map(|e| e.is_dir)
    }

    /// Returns this path's inode, allocating one on first sight. Reused
    /// across repeated lookups of the same path, matching FUSE's
    /// expectation that an inode number is stable for a dentry's lifetime.
    pub fn ino_for_path(&mut self, path: &str, is_dir: bool) -> u64 {
        if let Some(&ino) = self.by_path.get(path) {
            if let Some(entry) = self.by_ino.get_mut(&ino) {
                entry.is_dir = is_dir;
            }
            return ino;
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        self.by_path.insert(path.to_string(), ino);
        self.by_ino.insert(ino, InodeEntry { path: path.to_string(), is_dir, nlookup: 0 });
        ino
    }

    pub fn bump(&mut self, ino: u64, n: u64) {
        if let Some(entry) = self.by_ino.get_mut(&ino) {
            entry.nlookup += n;
        }
    }

    /// Decrements `ino`'s lookup count by `n` and evicts it once it hits
    /// zero, returning the evicted path so the caller can purge the
    /// geometry cache under the same key. The root is never evicted.
    pub fn forget(&mut self, ino: u64, n: u64) -> Option<String> {
        if ino == ROOT_INO {
            return None;
        }
        let entry = self.by_ino.get_mut(&ino)?;
        entry.nlookup = entry.nlookup.saturating_sub(n);
        if entry.nlookup == 0 {
            let path = entry.path.clone();
            self.by_ino.remove(&ino);
            self.by_path.remove(&path);
            return Some(path);
        }
        None
    }

    pub fn remove_path(&mut self, path: &str) -> Option<u64> {
        let ino = self.by_path.remove(path)?;
        self.by_ino.remove(&ino);
        Some(ino)
    }

    /// Rewrites `old_path` (and, for a directory, every path nested under
    /// it) to `new_path` after a successful rename.
    pub fn rename(&mut self, old_path: &str, new_path: &str) {
        if let Some(ino) = self.by_path.remove(old_path) {
            if let Some(entry) = self.by_ino.get_mut(&ino) {
                entry.path = new_path.to_string();
            }
            self.by_path.insert(new_path.to_string(), ino);
        }

        let prefix = format!("{old_path}/");
        let nested: Vec<String> = self.by_path.keys().filter(|p| p.starts_with(&prefix)).cloned().collect();
        for old_nested in nested {
            let ino = self.by_path.remove(&old_nested).expect("just matched");
            let rest = &old_nested[prefix.len()..];
            let new_nested = join(new_path, rest);
            if let Some(entry) = self.by_ino.get_mut(&ino) {
                entry.path = new_nested.clone();
            }
            self.by_path.insert(new_nested, ino);
        }
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

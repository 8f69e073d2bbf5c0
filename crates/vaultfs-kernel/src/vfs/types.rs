//! Nodes of the projected secret tree.
//!
//! Path-based and inode-free; the FUSE adapter translates these into
//! kernel attributes.

use std::sync::Arc;
use std::time::SystemTime;

/// Permissions reported for directories.
pub const DIRECTORY_PERM: u32 = 0o755;

/// Permissions reported for secret attributes.
pub const SECRET_PERM: u32 = 0o444;

/// What a projected path turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Fixed namespace, or a secret path holding values or children.
    Directory,
    /// One attribute of the parent path's value map.
    Secret,
}

impl NodeKind {
    pub fn is_dir(self) -> bool {
        self == NodeKind::Directory
    }

    pub fn is_secret(self) -> bool {
        self == NodeKind::Secret
    }
}

/// Attributes derived for a path on one call.
///
/// `mtime` is the moment of derivation; the backend has no timestamps.
#[derive(Debug, Clone)]
pub struct NodeAttr {
    pub kind: NodeKind,
    pub size: u64,
    pub perm: u32,
    pub mtime: SystemTime,
}

impl NodeAttr {
    /// Directory attributes. Size is a fixed 1.
    pub fn directory() -> Self {
        Self {
            kind: NodeKind::Directory,
            size: 1,
            perm: DIRECTORY_PERM,
            mtime: SystemTime::now(),
        }
    }

    /// Attributes of a secret attribute whose rendered content is `size` bytes.
    pub fn secret(size: u64) -> Self {
        Self {
            kind: NodeKind::Secret,
            size,
            perm: SECRET_PERM,
            mtime: SystemTime::now(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    pub fn is_secret(&self) -> bool {
        self.kind.is_secret()
    }

    /// Link count: directories count `.` and their entry in the parent.
    pub fn nlink(&self) -> u32 {
        match self.kind {
            NodeKind::Directory => 2,
            NodeKind::Secret => 1,
        }
    }
}

/// One name in a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: NodeKind,
}

impl DirEntry {
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Directory,
        }
    }

    pub fn secret(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Secret,
        }
    }
}

/// Access mode requested at open.
///
/// Write access is accepted but the returned handle never writes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Access {
    #[default]
    Read,
    /// Any of write, append or truncate was requested.
    Write,
}

impl Access {
    pub fn is_write(self) -> bool {
        self == Access::Write
    }
}

/// An opened secret attribute.
///
/// Content is captured once at open time and never changes.
#[derive(Debug, Clone)]
pub struct SecretFile {
    data: Arc<[u8]>,
}

impl SecretFile {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }

    /// Content length in bytes.
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    /// Read up to `size` bytes starting at `offset`.
    ///
    /// Returns fewer bytes (or none) past end of file.
    pub fn read(&self, offset: u64, size: u32) -> &[u8] {
        let len = self.data.len();
        let start = usize::try_from(offset).unwrap_or(len).min(len);
        let end = start.saturating_add(size as usize).min(len);
        &self.data[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_attr_constructors() {
        let secret = NodeAttr::secret(6);
        assert!(secret.is_secret());
        assert_eq!(secret.size, 6);
        assert_eq!(secret.perm, 0o444);
        assert_eq!(secret.nlink(), 1);

        let dir = NodeAttr::directory();
        assert!(dir.is_dir());
        assert_eq!(dir.size, 1);
        assert_eq!(dir.perm, 0o755);
        assert_eq!(dir.nlink(), 2);
    }

    #[test]
    fn test_dir_entry_kinds() {
        assert!(DirEntry::secret("password").kind.is_secret());
        assert!(DirEntry::directory("db").kind.is_dir());
        assert_ne!(DirEntry::secret("b"), DirEntry::directory("b"));
    }

    #[test]
    fn test_access_default_is_read() {
        assert_eq!(Access::default(), Access::Read);
        assert!(!Access::Read.is_write());
        assert!(Access::Write.is_write());
    }

    #[test]
    fn test_secret_file_read_ranges() {
        let file = SecretFile::new(b"hunter2\n".to_vec());
        assert_eq!(file.len(), 8);
        assert_eq!(file.read(0, 100), b"hunter2\n");
        assert_eq!(file.read(6, 2), b"2\n");
        assert!(file.read(8, 10).is_empty());
        assert!(file.read(u64::MAX, 10).is_empty());
    }
}

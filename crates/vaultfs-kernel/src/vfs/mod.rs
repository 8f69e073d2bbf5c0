//! Virtual filesystem projection of the secret store.
//!
//! Key components:
//!
//! - [`VfsOps`] - Read-only filesystem operations trait
//! - [`SecretFs`] - Projects secret store paths as directories and files
//! - [`Mounter`] - Attaches a filesystem at a host path (FUSE lives in the server)
//!
//! ## Design Decisions
//!
//! - **Path-based, no inodes**: Operations use paths, not inode numbers.
//!   The FUSE adapter handles inode ↔ path mapping locally.
//! - **No caching**: Every call is a live backend round trip, so two calls
//!   for the same path may disagree if the backend changes in between.
//! - **Read-only**: Content is snapshotted at open; writes never reach the
//!   backend.

mod error;
mod mounter;
mod ops;
mod secret_fs;
mod types;

pub use error::{VfsError, VfsResult};
pub use mounter::{MountGuard, Mounter, NullMounter};
pub use ops::VfsOps;
pub use secret_fs::SecretFs;
pub use types::{
    Access, DIRECTORY_PERM, DirEntry, NodeAttr, NodeKind, SECRET_PERM, SecretFile,
};

//! Attaching a filesystem at a host path.
//!
//! The kernel decides *when* a volume is mounted; a [`Mounter`] decides
//! *how*. The server provides a FUSE implementation. [`NullMounter`] keeps
//! attached filesystems in memory and is what tests and FUSE-less builds use.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::error::VfsResult;
use super::ops::VfsOps;

/// A live attachment. Dropping it without [`detach`](MountGuard::detach)
/// leaves teardown to the implementation.
pub trait MountGuard: Send + Sync {
    /// Host path the filesystem is attached at.
    fn mountpoint(&self) -> &Path;

    /// Detach the filesystem from the host path.
    fn detach(self: Box<Self>) -> VfsResult<()>;
}

/// Attaches filesystems at host paths.
pub trait Mounter: Send + Sync {
    /// Attach `fs` at `mountpoint`. The directory must already exist.
    fn attach(&self, mountpoint: &Path, fs: Arc<dyn VfsOps>) -> VfsResult<Box<dyn MountGuard>>;
}

type Attached = Arc<Mutex<HashMap<PathBuf, Arc<dyn VfsOps>>>>;

/// Mounter that touches no host path.
///
/// Attached filesystems stay reachable through [`NullMounter::filesystem`]
/// until their guard detaches.
#[derive(Clone, Default)]
pub struct NullMounter {
    live: Attached,
    attached: Arc<AtomicUsize>,
    detached: Arc<AtomicUsize>,
}

impl std::fmt::Debug for NullMounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NullMounter")
            .field("attached", &self.attached())
            .field("detached", &self.detached())
            .finish_non_exhaustive()
    }
}

impl NullMounter {
    /// Create a new mounter with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful attach calls.
    pub fn attached(&self) -> usize {
        self.attached.load(Ordering::SeqCst)
    }

    /// Number of detach calls.
    pub fn detached(&self) -> usize {
        self.detached.load(Ordering::SeqCst)
    }

    /// Filesystem attached at `mountpoint`, if its guard is still live.
    pub fn filesystem(&self, mountpoint: &Path) -> Option<Arc<dyn VfsOps>> {
        self.live.lock().get(mountpoint).cloned()
    }
}

impl Mounter for NullMounter {
    fn attach(&self, mountpoint: &Path, fs: Arc<dyn VfsOps>) -> VfsResult<Box<dyn MountGuard>> {
        self.live.lock().insert(mountpoint.to_path_buf(), fs);
        self.attached.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(mountpoint = %mountpoint.display(), "null attach");
        Ok(Box::new(NullGuard {
            mountpoint: mountpoint.to_path_buf(),
            live: Arc::clone(&self.live),
            detached: Arc::clone(&self.detached),
        }))
    }
}

struct NullGuard {
    mountpoint: PathBuf,
    live: Attached,
    detached: Arc<AtomicUsize>,
}

impl MountGuard for NullGuard {
    fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    fn detach(self: Box<Self>) -> VfsResult<()> {
        self.live.lock().remove(&self.mountpoint);
        self.detached.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

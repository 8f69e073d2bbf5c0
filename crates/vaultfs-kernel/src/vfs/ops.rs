//! The operations a projected filesystem answers.

use async_trait::async_trait;
use std::path::Path;

use super::VfsResult;
use super::types::{Access, DirEntry, NodeAttr, SecretFile};

/// Read-only, path-based filesystem operations.
///
/// Paths are relative to the filesystem root; `""` is the root itself.
/// Implementations must not cache: each call reflects the backend as it is
/// at that moment.
#[async_trait]
pub trait VfsOps: Send + Sync {
    async fn getattr(&self, path: &Path) -> VfsResult<NodeAttr>;

    /// All entries of a directory, unpaged and in backend order.
    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>>;

    /// Snapshot the content of a secret attribute.
    async fn open(&self, path: &Path, access: Access) -> VfsResult<SecretFile>;

    async fn unlink(&self, path: &Path) -> VfsResult<()>;

    fn read_only(&self) -> bool;

    async fn exists(&self, path: &Path) -> bool {
        self.getattr(path).await.is_ok()
    }

    /// Open for reading and copy out the whole snapshot.
    async fn read_to_end(&self, path: &Path) -> VfsResult<Vec<u8>> {
        let file = self.open(path, Access::Read).await?;
        Ok(file.contents().to_vec())
    }
}

//! Secret store projection.
//!
//! The backend has no directories. A path is shown as a directory when it
//! is one of the fixed roots, when it holds a non-empty value map, or when
//! it has children. Anything else is a file: the last path segment names
//! one attribute inside the value map of the parent path.
//!
//! ```text
//! secret/app            (values {user, pass}, child db/)  -> directory
//! secret/app/user       (attribute of secret/app)         -> file "alice\n"
//! secret/app/db         (child of secret/app)             -> directory
//! ```
//!
//! Classification is derived again on every call. Nothing is cached.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Component, Path};
use std::sync::Arc;

use vaultfs_store::{SecretStore, StoreResult};

use super::error::{VfsError, VfsResult};
use super::ops::VfsOps;
use super::types::{Access, DirEntry, NodeAttr, SecretFile};

/// Mount namespace whose paths are resolved against the backend.
const SECRET_ROOT: &str = "secret";

/// System namespace, always a directory and never looked up.
const SYS_ROOT: &str = "sys";

/// Read-only filesystem over a [`SecretStore`].
pub struct SecretFs {
    store: Arc<dyn SecretStore>,
}

impl std::fmt::Debug for SecretFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretFs").finish_non_exhaustive()
    }
}

impl SecretFs {
    /// Create a filesystem that queries `store` for every operation.
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    /// Turn a filesystem path into a backend path (`secret/a/b`).
    fn backend_path(path: &Path) -> VfsResult<String> {
        let mut parts = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(s) => parts.push(s.to_string_lossy().into_owned()),
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(VfsError::invalid_path(path.display().to_string()));
                }
            }
        }
        Ok(parts.join("/"))
    }

    /// The root and the top-level namespaces are directories without asking.
    fn is_fixed_directory(path: &str) -> bool {
        path.is_empty() || path == SECRET_ROOT || path == SYS_ROOT
    }

    fn is_secret_path(path: &str) -> bool {
        path.strip_prefix(SECRET_ROOT)
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Look up the attribute named by the last segment of `path` in its parent.
    ///
    /// Returns `Ok(None)` when the parent has no values or lacks the attribute.
    async fn attribute(&self, path: &str) -> StoreResult<Option<SecretFile>> {
        let Some((parent, name)) = path.rsplit_once('/') else {
            return Ok(None);
        };
        let values = self.store.read_values(parent).await?;
        Ok(values
            .and_then(|values| values.get(name).map(render_value))
            .map(SecretFile::new))
    }

    /// Size of a secret attribute, or 0 when it cannot be determined.
    async fn secret_size(&self, path: &str) -> u64 {
        match self.attribute(path).await {
            Ok(Some(file)) => file.len(),
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!(path, error = %e, "cannot size secret attribute");
                0
            }
        }
    }

    /// Ask the backend whether a `secret/` path is a directory.
    async fn is_directory(&self, path: &str) -> VfsResult<bool> {
        match self.store.read_values(path).await {
            Ok(Some(values)) if !values.is_empty() => return Ok(true),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(path, error = %e, "read failed during getattr");
                return Err(VfsError::not_found(path));
            }
        }

        match self.store.list_children(path).await {
            Ok(Some(children)) => Ok(!children.is_empty()),
            Ok(None) => Ok(false),
            Err(e) => {
                tracing::warn!(path, error = %e, "list failed during getattr");
                Err(VfsError::not_found(path))
            }
        }
    }
}

/// File content for a secret value: its string form plus one newline.
///
/// Strings are used as-is; other JSON values use their JSON text.
fn render_value(value: &Value) -> Vec<u8> {
    let mut text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    text.push('\n');
    text.into_bytes()
}

#[async_trait]
impl VfsOps for SecretFs {
    async fn getattr(&self, path: &Path) -> VfsResult<NodeAttr> {
        let path = Self::backend_path(path)?;
        if Self::is_fixed_directory(&path) {
            return Ok(NodeAttr::directory());
        }

        if Self::is_secret_path(&path) {
            if self.is_directory(&path).await? {
                return Ok(NodeAttr::directory());
            }
            let size = self.secret_size(&path).await;
            return Ok(NodeAttr::secret(size));
        }

        Ok(NodeAttr::secret(0))
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let path = Self::backend_path(path)?;

        if path.is_empty() {
            return match self.store.list_mounts().await {
                Ok(mounts) => Ok(mounts.into_iter().map(DirEntry::directory).collect()),
                Err(e) => {
                    tracing::warn!(error = %e, "cannot list mounts");
                    Ok(Vec::new())
                }
            };
        }

        if !path.starts_with(SECRET_ROOT) {
            return Ok(Vec::new());
        }

        // Children and values are listed side by side. A name present in
        // both shows up twice, once per kind.
        let mut entries = Vec::new();
        match self.store.list_children(&path).await {
            Ok(Some(children)) => entries.extend(children.into_iter().map(DirEntry::directory)),
            Ok(None) => {}
            Err(e) => tracing::warn!(path, error = %e, "list failed during readdir"),
        }
        match self.store.read_values(&path).await {
            Ok(Some(values)) => entries.extend(values.keys().map(DirEntry::secret)),
            Ok(None) => {}
            Err(e) => tracing::warn!(path, error = %e, "read failed during readdir"),
        }
        Ok(entries)
    }

    async fn open(&self, path: &Path, access: Access) -> VfsResult<SecretFile> {
        let path = Self::backend_path(path)?;
        if Self::is_fixed_directory(&path) {
            return Err(VfsError::is_a_directory(path));
        }
        if access.is_write() {
            tracing::debug!(path, "write access requested; handle stays read-only");
        }
        if !Self::is_secret_path(&path) {
            return Err(VfsError::not_found(path));
        }

        match self.attribute(&path).await {
            Ok(Some(file)) => Ok(file),
            Ok(None) => Err(VfsError::not_found(path)),
            Err(e) => {
                tracing::warn!(path, error = %e, "read failed during open");
                Err(VfsError::not_found(path))
            }
        }
    }

    async fn unlink(&self, path: &Path) -> VfsResult<()> {
        Err(VfsError::permission_denied(path.display().to_string()))
    }

    fn read_only(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vaultfs_store::MemoryStore;

    fn fs(store: &MemoryStore) -> SecretFs {
        SecretFs::new(Arc::new(store.clone()))
    }

    fn p(path: &str) -> &Path {
        Path::new(path)
    }

    #[tokio::test]
    async fn test_fixed_directories_ignore_backend() {
        let store = MemoryStore::new();
        store.fail_path("");
        store.fail_path("secret");
        store.fail_path("sys");
        let fs = fs(&store);

        for path in ["", "/", "secret", "sys", "/secret/"] {
            let attr = fs.getattr(p(path)).await.unwrap();
            assert!(attr.is_dir(), "{path:?} should be a directory");
            assert_eq!(attr.size, 1);
            assert_eq!(attr.perm, 0o755);
        }
    }

    #[tokio::test]
    async fn test_path_with_values_is_directory() {
        let store = MemoryStore::new();
        store.set_values("secret/app", [("user", "alice")]);
        assert!(fs(&store).getattr(p("secret/app")).await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_path_with_children_is_directory() {
        let store = MemoryStore::new();
        store.set_children("secret/app", ["db/"]);
        assert!(fs(&store).getattr(p("secret/app")).await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_empty_values_and_children_is_file() {
        let store = MemoryStore::new();
        store.set_values("secret/a", Vec::<(String, Value)>::new());
        store.set_children("secret/a", Vec::<String>::new());

        let attr = fs(&store).getattr(p("secret/a")).await.unwrap();
        assert!(attr.is_secret());
        assert_eq!(attr.perm, 0o444);
    }

    #[tokio::test]
    async fn test_file_size_matches_content() {
        let store = MemoryStore::new();
        store.set_values("secret/app", [("user", "alice")]);
        let fs = fs(&store);

        let attr = fs.getattr(p("secret/app/user")).await.unwrap();
        let content = fs.read_to_end(p("secret/app/user")).await.unwrap();
        assert!(attr.is_secret());
        assert_eq!(attr.size, content.len() as u64);
        assert_eq!(attr.size, 6);
    }

    #[tokio::test]
    async fn test_unknown_attribute_is_placeholder_file() {
        let store = MemoryStore::new();
        let attr = fs(&store).getattr(p("secret/nothing/here")).await.unwrap();
        assert!(attr.is_secret());
        assert_eq!(attr.size, 0);
    }

    #[tokio::test]
    async fn test_backend_error_is_not_found() {
        let store = MemoryStore::new();
        store.fail_reads("secret/app");
        let err = fs(&store).getattr(p("secret/app")).await.unwrap_err();
        assert!(matches!(err, VfsError::NotFound(_)));

        let store = MemoryStore::new();
        store.fail_lists("secret/app");
        let err = fs(&store).getattr(p("secret/app")).await.unwrap_err();
        assert!(matches!(err, VfsError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_other_namespaces_are_files() {
        let store = MemoryStore::new();
        store.set_children("cubbyhole", ["x"]);
        let fs = fs(&store);

        assert!(fs.getattr(p("cubbyhole")).await.unwrap().is_secret());
        assert!(fs.getattr(p("sys/mounts")).await.unwrap().is_secret());
    }

    #[tokio::test]
    async fn test_parent_dir_component_rejected() {
        let store = MemoryStore::new();
        let err = fs(&store).getattr(p("secret/../sys")).await.unwrap_err();
        assert!(matches!(err, VfsError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_readdir_merges_children_and_values() {
        let store = MemoryStore::new();
        store.set_values("secret/a", [("x", "v")]);
        store.set_children("secret/a", ["b"]);

        let mut entries = fs(&store).readdir(p("secret/a")).await.unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(entries, vec![DirEntry::directory("b"), DirEntry::secret("x")]);
    }

    #[tokio::test]
    async fn test_readdir_keeps_same_name_of_both_kinds() {
        let store = MemoryStore::new();
        store.set_values("secret/a", [("b", "v")]);
        store.set_children("secret/a", ["b/", "b"]);

        let entries = fs(&store).readdir(p("secret/a")).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.contains(&DirEntry::directory("b")));
        assert!(entries.contains(&DirEntry::secret("b")));
    }

    #[tokio::test]
    async fn test_readdir_degrades_failed_call() {
        let store = MemoryStore::new();
        store.set_values("secret/a", [("x", "v")]);
        store.set_children("secret/a", ["b"]);
        store.fail_lists("secret/a");

        let entries = fs(&store).readdir(p("secret/a")).await.unwrap();
        assert_eq!(entries, vec![DirEntry::secret("x")]);

        store.fail_reads("secret/a");
        assert!(fs(&store).readdir(p("secret/a")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_readdir_root_lists_mounts() {
        let store = MemoryStore::new();
        store.set_mounts(["secret/", "sys/", "cubbyhole/"]);

        let entries = fs(&store).readdir(p("")).await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["cubbyhole", "secret", "sys"]);
        assert!(entries.iter().all(|e| e.kind.is_dir()));
    }

    #[tokio::test]
    async fn test_readdir_root_failure_is_empty() {
        let store = MemoryStore::new();
        store.fail_mounts();
        assert!(fs(&store).readdir(p("")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_readdir_other_paths_empty() {
        let store = MemoryStore::new();
        store.set_children("sys/policy", ["default"]);
        assert!(fs(&store).readdir(p("sys/policy")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_returns_value_with_newline() {
        let store = MemoryStore::new();
        store.set_values("secret/a", [("x", "v")]);

        let file = fs(&store).open(p("secret/a/x"), Access::Read).await.unwrap();
        assert_eq!(file.contents(), b"v\n");
    }

    #[tokio::test]
    async fn test_open_renders_non_string_values() {
        let store = MemoryStore::new();
        store.set_values(
            "secret/a",
            [("port", json!(5432)), ("tls", json!(true)), ("extra", json!({"k": 1}))],
        );
        let fs = fs(&store);

        assert_eq!(fs.read_to_end(p("secret/a/port")).await.unwrap(), b"5432\n");
        assert_eq!(fs.read_to_end(p("secret/a/tls")).await.unwrap(), b"true\n");
        assert_eq!(fs.read_to_end(p("secret/a/extra")).await.unwrap(), b"{\"k\":1}\n");
    }

    #[tokio::test]
    async fn test_open_write_flags_still_succeed() {
        let store = MemoryStore::new();
        store.set_values("secret/a", [("x", "v")]);

        let file = fs(&store).open(p("secret/a/x"), Access::Write).await.unwrap();
        assert_eq!(file.contents(), b"v\n");
    }

    #[tokio::test]
    async fn test_open_missing_is_not_found() {
        let store = MemoryStore::new();
        store.set_values("secret/a", [("x", "v")]);
        let fs = fs(&store);

        for path in ["secret/a/y", "secret/b/x", "cubbyhole/x"] {
            let err = fs.open(p(path), Access::Read).await.unwrap_err();
            assert!(matches!(err, VfsError::NotFound(_)), "{path}");
        }

        store.fail_reads("secret/a");
        let err = fs.open(p("secret/a/x"), Access::Read).await.unwrap_err();
        assert!(matches!(err, VfsError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_open_directory_fails() {
        let store = MemoryStore::new();
        let fs = fs(&store);
        for path in ["", "secret", "sys"] {
            let err = fs.open(p(path), Access::Read).await.unwrap_err();
            assert!(matches!(err, VfsError::IsADirectory(_)), "{path:?}");
        }
    }

    #[tokio::test]
    async fn test_unlink_always_denied() {
        let store = MemoryStore::new();
        store.set_values("secret/a", [("x", "v")]);
        let fs = fs(&store);

        for path in ["secret/a/x", "secret/a", "", "nowhere"] {
            let err = fs.unlink(p(path)).await.unwrap_err();
            assert!(matches!(err, VfsError::PermissionDenied(_)));
        }
        assert_eq!(fs.read_to_end(p("secret/a/x")).await.unwrap(), b"v\n");
        assert!(fs.read_only());
    }
}

//! Secret store operations trait.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::StoreResult;

/// The value map stored at one backend path.
pub type Values = serde_json::Map<String, serde_json::Value>;

/// Operations against the secret store, bound to a single credential.
///
/// Paths are backend-relative without a leading `/` (e.g. `secret/app/db`).
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read the value map stored at `path`.
    ///
    /// Returns `Ok(None)` if nothing is stored there.
    async fn read_values(&self, path: &str) -> StoreResult<Option<Values>>;

    /// List the children of `path`.
    ///
    /// Names come back normalized: a trailing `/` (the backend's "this child
    /// has children" marker) is stripped, and names that collapse together
    /// are merged. Returns `Ok(None)` if `path` has no children.
    async fn list_children(&self, path: &str) -> StoreResult<Option<BTreeSet<String>>>;

    /// List the backend's mount namespaces (`secret`, `sys`, ...).
    async fn list_mounts(&self) -> StoreResult<BTreeSet<String>>;

    /// Create or replace the access policy `name`.
    async fn put_policy(&self, name: &str, rules: &str) -> StoreResult<()>;

    /// Issue a new token scoped to `policies`.
    async fn issue_token(&self, policies: &[String]) -> StoreResult<String>;
}

/// Hands out [`SecretStore`] clients bound to a credential.
///
/// Holds the process-wide backend configuration so callers never touch it.
pub trait Connector: Send + Sync {
    /// Create a client that authenticates with `token`.
    fn connect(&self, token: &str) -> Arc<dyn SecretStore>;
}

/// Strip trailing separators from backend key names and merge duplicates.
///
/// `"a/"` and `"a"` both become `"a"`; empty names are dropped.
pub fn normalize_keys<I, S>(keys: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    keys.into_iter()
        .map(|k| k.as_ref().trim_end_matches('/').to_string())
        .filter(|k| !k.is_empty())
        .collect()
}

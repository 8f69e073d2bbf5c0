//! In-memory secret store.
//!
//! Used for testing. Values, child listings and mounts are seeded
//! explicitly, so a test controls exactly what each backend query returns.
//! Failures can be injected per path and per operation.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::ops::{Connector, SecretStore, Values, normalize_keys};
use crate::{StoreError, StoreResult};

#[derive(Debug, Default)]
struct State {
    values: BTreeMap<String, Values>,
    /// Raw child keys, as the backend would send them (may end in `/`).
    children: BTreeMap<String, Vec<String>>,
    /// Raw mount keys (e.g. `secret/`).
    mounts: Vec<String>,
    policies: BTreeMap<String, String>,
    issued: Vec<(String, Vec<String>)>,
    connections: Vec<String>,
    failing_reads: BTreeSet<String>,
    failing_lists: BTreeSet<String>,
    fail_mounts: bool,
    fail_policies: bool,
    fail_tokens: bool,
    /// Tokens that may read but not write policies or issue tokens.
    read_only_tokens: BTreeSet<String>,
}

/// In-memory [`SecretStore`] and [`Connector`].
///
/// Clones share state. A client obtained through [`Connector::connect`]
/// sees the same data and records which token it was bound to.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    token: Option<String>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value map at `path`, replacing any previous one.
    pub fn set_values<K, V>(&self, path: &str, values: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let values: Values = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.state.write().values.insert(path.to_string(), values);
    }

    /// Set the raw child keys listed under `path`.
    pub fn set_children<S: Into<String>>(&self, path: &str, keys: impl IntoIterator<Item = S>) {
        let keys = keys.into_iter().map(Into::into).collect();
        self.state.write().children.insert(path.to_string(), keys);
    }

    /// Set the raw mount keys (e.g. `secret/`).
    pub fn set_mounts<S: Into<String>>(&self, mounts: impl IntoIterator<Item = S>) {
        self.state.write().mounts = mounts.into_iter().map(Into::into).collect();
    }

    /// Make value reads at `path` fail.
    pub fn fail_reads(&self, path: &str) {
        self.state.write().failing_reads.insert(path.to_string());
    }

    /// Make child listings at `path` fail.
    pub fn fail_lists(&self, path: &str) {
        self.state.write().failing_lists.insert(path.to_string());
    }

    /// Make both reads and listings at `path` fail.
    pub fn fail_path(&self, path: &str) {
        self.fail_reads(path);
        self.fail_lists(path);
    }

    /// Make mount enumeration fail.
    pub fn fail_mounts(&self) {
        self.state.write().fail_mounts = true;
    }

    /// Make policy writes fail.
    pub fn fail_policies(&self) {
        self.state.write().fail_policies = true;
    }

    /// Make token issuance fail.
    pub fn fail_tokens(&self) {
        self.state.write().fail_tokens = true;
    }

    /// Mark `token` read-only: clients connected with it get 403 from
    /// policy writes and token issuance.
    pub fn read_only_token(&self, token: &str) {
        self.state.write().read_only_tokens.insert(token.to_string());
    }

    fn is_read_only(&self, state: &State) -> bool {
        self.token
            .as_ref()
            .is_some_and(|token| state.read_only_tokens.contains(token))
    }

    /// Rules stored for policy `name`.
    pub fn policy(&self, name: &str) -> Option<String> {
        self.state.read().policies.get(name).cloned()
    }

    /// Tokens issued so far, with the policies each was scoped to.
    pub fn issued_tokens(&self) -> Vec<(String, Vec<String>)> {
        self.state.read().issued.clone()
    }

    /// Tokens passed to [`Connector::connect`], in order.
    pub fn connections(&self) -> Vec<String> {
        self.state.read().connections.clone()
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn read_values(&self, path: &str) -> StoreResult<Option<Values>> {
        let state = self.state.read();
        if state.failing_reads.contains(path) {
            return Err(StoreError::unavailable(format!("read {}", path)));
        }
        Ok(state.values.get(path).cloned())
    }

    async fn list_children(&self, path: &str) -> StoreResult<Option<BTreeSet<String>>> {
        let state = self.state.read();
        if state.failing_lists.contains(path) {
            return Err(StoreError::unavailable(format!("list {}", path)));
        }
        Ok(state.children.get(path).map(normalize_keys))
    }

    async fn list_mounts(&self) -> StoreResult<BTreeSet<String>> {
        let state = self.state.read();
        if state.fail_mounts {
            return Err(StoreError::unavailable("list mounts"));
        }
        Ok(normalize_keys(&state.mounts))
    }

    async fn put_policy(&self, name: &str, rules: &str) -> StoreResult<()> {
        let mut state = self.state.write();
        if state.fail_policies || self.is_read_only(&state) {
            return Err(permission_denied());
        }
        state.policies.insert(name.to_string(), rules.to_string());
        Ok(())
    }

    async fn issue_token(&self, policies: &[String]) -> StoreResult<String> {
        let mut state = self.state.write();
        if state.fail_tokens {
            return Err(StoreError::unavailable("token create"));
        }
        if self.is_read_only(&state) {
            return Err(permission_denied());
        }
        let token = format!("mem-token-{}", state.issued.len() + 1);
        state.issued.push((token.clone(), policies.to_vec()));
        Ok(token)
    }
}

fn permission_denied() -> StoreError {
    StoreError::Status {
        status: 403,
        errors: vec!["permission denied".into()],
    }
}

impl Connector for MemoryStore {
    fn connect(&self, token: &str) -> Arc<dyn SecretStore> {
        self.state.write().connections.push(token.to_string());
        Arc::new(Self {
            state: Arc::clone(&self.state),
            token: Some(token.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_and_list() {
        let store = MemoryStore::new();
        store.set_values("secret/a", [("x", "v")]);
        store.set_children("secret/a", ["b/", "b", "c"]);

        let values = store.read_values("secret/a").await.unwrap().unwrap();
        assert_eq!(values.get("x"), Some(&Value::from("v")));

        let children = store.list_children("secret/a").await.unwrap().unwrap();
        let names: Vec<_> = children.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["b", "c"]);

        assert!(store.read_values("secret/missing").await.unwrap().is_none());
        assert!(store.list_children("secret/missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MemoryStore::new();
        store.set_values("secret/a", [("x", "v")]);
        store.fail_reads("secret/a");

        assert!(store.read_values("secret/a").await.is_err());
        assert!(store.list_children("secret/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_only_token_cannot_provision() {
        let store = MemoryStore::new();
        store.set_values("secret/a", [("x", "v")]);
        store.read_only_token("reader");

        let reader = store.connect("reader");
        assert!(reader.read_values("secret/a").await.unwrap().is_some());
        let err = reader.put_policy("p", "rules").await.unwrap_err();
        assert!(err.is_auth());
        let err = reader.issue_token(&["p".to_string()]).await.unwrap_err();
        assert!(err.is_auth());
        assert!(store.policy("p").is_none());

        let root = store.connect("root");
        root.put_policy("p", "rules").await.unwrap();
        root.issue_token(&["p".to_string()]).await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_shares_state() {
        let store = MemoryStore::new();
        let client = store.connect("root");
        client.put_policy("p", "path \"secret/*\" {}").await.unwrap();
        let token = client.issue_token(&["p".to_string()]).await.unwrap();

        assert_eq!(store.policy("p").as_deref(), Some("path \"secret/*\" {}"));
        assert_eq!(store.issued_tokens(), vec![(token, vec!["p".to_string()])]);
        assert_eq!(store.connections(), vec!["root".to_string()]);
    }
}

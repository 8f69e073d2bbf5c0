//! HTTP client for the Vault v1 API.
//!
//! Maps [`SecretStore`] operations onto Vault endpoints:
//!
//! ```text
//! read_values(p)   GET  /v1/{p}
//! list_children(p) GET  /v1/{p}?list=true
//! list_mounts()    GET  /v1/sys/mounts
//! put_policy(n, r) PUT  /v1/sys/policy/{n}        {"rules": r}
//! issue_token(ps)  POST /v1/auth/token/create     {"policies": ps}
//! ```

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use url::{ParseError, Url};

use crate::ops::{Connector, SecretStore, Values, normalize_keys};
use crate::{StoreError, StoreResult};

const TOKEN_HEADER: &str = "X-Vault-Token";

/// Process-wide backend configuration, fixed at startup.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Backend base address (e.g. `https://vault.internal:8200`).
    pub address: String,
    /// Skip TLS certificate verification.
    pub insecure: bool,
    /// Per-request timeout. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl StoreConfig {
    /// Create a configuration with no request timeout.
    pub fn new(address: impl Into<String>, insecure: bool) -> Self {
        Self {
            address: address.into(),
            insecure,
            timeout: None,
        }
    }

    /// Set a per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Builds [`VaultClient`]s that share one connection pool.
#[derive(Debug, Clone)]
pub struct VaultConnector {
    http: reqwest::Client,
    base: Url,
}

impl VaultConnector {
    /// Create a connector from the process configuration.
    pub fn new(config: &StoreConfig) -> StoreResult<Self> {
        let mut base = Url::parse(&config.address)?;
        if base.cannot_be_a_base() {
            return Err(ParseError::RelativeUrlWithCannotBeABaseBase.into());
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let mut builder = reqwest::Client::builder().danger_accept_invalid_certs(config.insecure);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;

        Ok(Self { http, base })
    }

    /// Create a client that authenticates with `token`.
    pub fn client(&self, token: impl Into<String>) -> VaultClient {
        VaultClient {
            http: self.http.clone(),
            base: self.base.clone(),
            token: token.into(),
        }
    }
}

impl Connector for VaultConnector {
    fn connect(&self, token: &str) -> Arc<dyn SecretStore> {
        Arc::new(self.client(token))
    }
}

/// Vault client bound to one token.
#[derive(Clone)]
pub struct VaultClient {
    http: reqwest::Client,
    base: Url,
    token: String,
}

impl std::fmt::Debug for VaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultClient")
            .field("base", &self.base.as_str())
            .field("token", &"<redacted>")
            .finish()
    }
}

impl VaultClient {
    /// Build the API URL for a backend path.
    ///
    /// Every path segment is percent-encoded on its own, so `#`, `?` and
    /// `%` in a key stay part of that key.
    fn url(&self, path: &str) -> StoreResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| StoreError::InvalidAddress(ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .push("v1")
            .extend(path.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }

    /// Send a request and decode its JSON body.
    ///
    /// Returns `Ok(None)` on 404 and `Ok(Some(Value::Null))` on an empty
    /// success body (e.g. 204).
    async fn send(&self, request: RequestBuilder) -> StoreResult<Option<Value>> {
        let response = request.header(TOKEN_HEADER, &self.token).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
                errors: parse_errors(&body),
            });
        }
        if body.trim().is_empty() {
            return Ok(Some(Value::Null));
        }

        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| StoreError::decode(e.to_string()))
    }
}

#[async_trait]
impl SecretStore for VaultClient {
    async fn read_values(&self, path: &str) -> StoreResult<Option<Values>> {
        tracing::debug!(path, "read");
        let url = self.url(path)?;
        let body = self.send(self.http.get(url)).await?;

        Ok(body.and_then(|mut b| match b.get_mut("data").map(Value::take) {
            Some(Value::Object(data)) => Some(data),
            _ => None,
        }))
    }

    async fn list_children(&self, path: &str) -> StoreResult<Option<BTreeSet<String>>> {
        tracing::debug!(path, "list");
        let url = self.url(path)?;
        let Some(body) = self.send(self.http.get(url).query(&[("list", "true")])).await? else {
            return Ok(None);
        };

        let keys = body
            .pointer("/data/keys")
            .and_then(Value::as_array)
            .map(|keys| normalize_keys(keys.iter().filter_map(Value::as_str)));
        Ok(keys)
    }

    async fn list_mounts(&self) -> StoreResult<BTreeSet<String>> {
        tracing::debug!("list mounts");
        let url = self.url("sys/mounts")?;
        let body = self.send(self.http.get(url)).await?.unwrap_or(Value::Null);
        Ok(mount_names(&body))
    }

    async fn put_policy(&self, name: &str, rules: &str) -> StoreResult<()> {
        tracing::debug!(policy = name, "put policy");
        let url = self.url(&format!("sys/policy/{}", name))?;
        match self.send(self.http.put(url).json(&json!({ "rules": rules }))).await? {
            Some(_) => Ok(()),
            None => Err(StoreError::Status {
                status: 404,
                errors: vec![format!("policy endpoint not found for {}", name)],
            }),
        }
    }

    async fn issue_token(&self, policies: &[String]) -> StoreResult<String> {
        tracing::debug!(?policies, "issue token");
        let url = self.url("auth/token/create")?;
        let body = self
            .send(self.http.post(url).json(&json!({ "policies": policies })))
            .await?
            .ok_or_else(|| StoreError::decode("token create returned 404"))?;

        body.pointer("/auth/client_token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| StoreError::decode("token create response has no auth.client_token"))
    }
}

/// Extract the `errors` array from a failure body, falling back to the raw text.
fn parse_errors(body: &str) -> Vec<String> {
    let parsed = serde_json::from_str::<Value>(body).ok();
    match parsed.as_ref().and_then(|v| v.get("errors")).and_then(Value::as_array) {
        Some(errors) => errors
            .iter()
            .map(|e| e.as_str().map(str::to_string).unwrap_or_else(|| e.to_string()))
            .collect(),
        None if body.trim().is_empty() => Vec::new(),
        None => vec![body.trim().to_string()],
    }
}

/// Mount names from a `sys/mounts` body.
///
/// Older servers put mounts at the top level, newer ones also nest them
/// under `data`. Mount keys end in `/` and map to objects; response
/// metadata (`request_id`, `lease_id`, ...) does not.
fn mount_names(body: &Value) -> BTreeSet<String> {
    let table = match body.get("data") {
        Some(data @ Value::Object(_)) => data,
        _ => body,
    };
    let Some(table) = table.as_object() else {
        return BTreeSet::new();
    };
    normalize_keys(
        table
            .iter()
            .filter(|(key, value)| key.ends_with('/') && value.is_object())
            .map(|(key, _)| key.as_str()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse_errors(r#"{"errors":["permission denied"]}"#),
            vec!["permission denied".to_string()]
        );
        assert_eq!(parse_errors("bad gateway"), vec!["bad gateway".to_string()]);
        assert!(parse_errors("").is_empty());
    }

    #[test]
    fn test_mount_names_top_level() {
        let body = json!({
            "secret/": {"type": "generic"},
            "sys/": {"type": "system"},
            "request_id": "abc",
        });
        let names: Vec<_> = mount_names(&body).into_iter().collect();
        assert_eq!(names, vec!["secret", "sys"]);
    }

    #[test]
    fn test_mount_names_nested_data() {
        let body = json!({
            "data": {"cubbyhole/": {"type": "cubbyhole"}, "secret/": {"type": "kv"}},
            "secret/": {"type": "kv"},
        });
        let names: Vec<_> = mount_names(&body).into_iter().collect();
        assert_eq!(names, vec!["cubbyhole", "secret"]);
    }

    #[test]
    fn test_url_keeps_base_path() {
        let connector = VaultConnector::new(&StoreConfig::new("http://vault:8200/proxy", false))
            .unwrap();
        let client = connector.client("t");
        assert_eq!(
            client.url("/secret/a/").unwrap().as_str(),
            "http://vault:8200/proxy/v1/secret/a"
        );
    }

    #[test]
    fn test_url_encodes_each_segment() {
        let connector = VaultConnector::new(&StoreConfig::new("http://vault:8200", false)).unwrap();
        let client = connector.client("t");
        assert_eq!(
            client.url("secret/app/a#b").unwrap().as_str(),
            "http://vault:8200/v1/secret/app/a%23b"
        );
        assert_eq!(
            client.url("secret/app/what?x=1").unwrap().as_str(),
            "http://vault:8200/v1/secret/app/what%3Fx=1"
        );
        assert_eq!(
            client.url("secret/app/%2e%2e").unwrap().as_str(),
            "http://vault:8200/v1/secret/app/%252e%252e"
        );
    }

    #[test]
    fn test_invalid_address() {
        for address in ["not a url", "mailto:vault@example.com"] {
            let err = VaultConnector::new(&StoreConfig::new(address, false)).unwrap_err();
            assert!(matches!(err, StoreError::InvalidAddress(_)), "{address}");
        }
    }

    #[test]
    fn test_debug_redacts_token() {
        let connector = VaultConnector::new(&StoreConfig::new("http://vault:8200", false)).unwrap();
        let client = connector.client("s.supersecret");
        assert!(!format!("{:?}", client).contains("supersecret"));
    }
}

//! Create-time policy options.
//!
//! A volume may ask for a scoped token by passing policy rules at create
//! time, either inline as base64 or as `@/path/to/rules.hcl`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::collections::BTreeMap;

use crate::error::{DriverError, DriverResult};

/// Option carrying the policy rules.
pub const POLICY_RULES_OPTION: &str = "policy-rules";

/// Option naming the policy. Defaults to [`default_policy_name`].
pub const POLICY_NAME_OPTION: &str = "policy-name";

/// A decoded policy ready to be written to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRequest {
    pub name: String,
    pub rules: String,
}

impl PolicyRequest {
    /// Extract and decode the policy requested by `options`, if any.
    pub async fn from_options(
        volume: &str,
        options: &BTreeMap<String, String>,
    ) -> DriverResult<Option<Self>> {
        let Some(spec) = options.get(POLICY_RULES_OPTION) else {
            return Ok(None);
        };
        let name = match options.get(POLICY_NAME_OPTION) {
            Some(name) if !name.is_empty() => name.clone(),
            _ => default_policy_name(volume),
        };
        let rules = decode_rules(spec).await?;
        Ok(Some(Self { name, rules }))
    }
}

/// Policy name used when the caller does not pick one.
pub fn default_policy_name(volume: &str) -> String {
    format!("docker-policy-{}", volume)
}

/// Decode a `policy-rules` value: `@path` is read from disk, anything else
/// is standard base64.
pub async fn decode_rules(spec: &str) -> DriverResult<String> {
    let bytes = match spec.strip_prefix('@') {
        Some(path) => tokio::fs::read(path)
            .await
            .map_err(|e| DriverError::invalid_policy(format!("{}: {}", path, e)))?,
        None => STANDARD
            .decode(spec)
            .map_err(|e| DriverError::invalid_policy(format!("bad base64: {}", e)))?,
    };
    String::from_utf8(bytes).map_err(|_| DriverError::invalid_policy("rules are not UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const RULES: &str = "path \"secret/db/*\" { capabilities = [\"read\"] }";

    fn options(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_inline_base64() {
        let encoded = STANDARD.encode(RULES);
        assert_eq!(decode_rules(&encoded).await.unwrap(), RULES);
    }

    #[tokio::test]
    async fn test_file_reference() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(RULES.as_bytes()).unwrap();
        let spec = format!("@{}", file.path().display());

        assert_eq!(decode_rules(&spec).await.unwrap(), RULES);
    }

    #[tokio::test]
    async fn test_invalid_base64() {
        let err = decode_rules("not base64!").await.unwrap_err();
        assert!(matches!(err, DriverError::InvalidPolicySpec(_)));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let spec = format!("@{}", dir.path().join("absent.hcl").display());
        let err = decode_rules(&spec).await.unwrap_err();
        assert!(matches!(err, DriverError::InvalidPolicySpec(_)));
    }

    #[tokio::test]
    async fn test_from_options_names() {
        let encoded = STANDARD.encode(RULES);

        let none = PolicyRequest::from_options("db", &options(&[])).await.unwrap();
        assert!(none.is_none());

        let default = PolicyRequest::from_options("db", &options(&[("policy-rules", encoded.as_str())]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(default.name, "docker-policy-db");
        assert_eq!(default.rules, RULES);

        let named = PolicyRequest::from_options(
            "db",
            &options(&[("policy-rules", encoded.as_str()), ("policy-name", "readers")]),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(named.name, "readers");

        let empty_name = PolicyRequest::from_options(
            "db",
            &options(&[("policy-rules", encoded.as_str()), ("policy-name", "")]),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(empty_name.name, "docker-policy-db");
    }
}

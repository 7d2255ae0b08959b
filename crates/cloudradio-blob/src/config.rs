//! Shared configuration pieces for the blob blocks.
//!
//! Both blocks accept either a serde config struct or a flat string map
//! (`auth.method`, `container`, `block.len`, ...), the way flowgraph
//! parameters arrive from a host.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::auth::{AuthMethod, BlobAuth, DefaultCredentialOptions};
use crate::error::{BlobError, Result};

/// Where `drain_queue_to_remote` runs for the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagingMode {
    /// Inside the work call, after the window hand-off.
    #[default]
    Inline,
    /// On a spawned task that waits on the queue.
    Background,
}

impl StagingMode {
    pub fn from_str_config(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "inline" => Ok(StagingMode::Inline),
            "background" => Ok(StagingMode::Background),
            other => Err(BlobError::Config(format!(
                "unknown staging mode: '{}'",
                other
            ))),
        }
    }
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub method: AuthMethod,
    #[serde(default)]
    pub connection_string: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub default_credentials: DefaultCredentialOptions,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("method", &self.method)
            .field(
                "connection_string",
                &self.connection_string.as_ref().map(|_| "***"),
            )
            .field("url", &self.url.as_ref().map(|u| redact_query(u)))
            .field("default_credentials", &self.default_credentials)
            .finish()
    }
}

impl AuthConfig {
    pub fn from_config_map(config: &HashMap<String, String>) -> Result<Self> {
        let method = config
            .get("auth.method")
            .map(|s| AuthMethod::from_str_config(s))
            .transpose()?
            .unwrap_or_default();

        let defaults = DefaultCredentialOptions::default();
        let default_credentials = DefaultCredentialOptions {
            enable_environment: parse_or(
                config,
                "auth.default.enable_environment",
                defaults.enable_environment,
            )?,
            enable_cli: parse_or(config, "auth.default.enable_cli", defaults.enable_cli)?,
            enable_managed_identity: parse_or(
                config,
                "auth.default.enable_managed_identity",
                defaults.enable_managed_identity,
            )?,
            authority: config.get("auth.default.authority").cloned(),
        };

        Ok(Self {
            method,
            connection_string: config.get("auth.connection_string").cloned(),
            url: config.get("auth.url").cloned(),
            default_credentials,
        })
    }

    pub fn resolve(&self) -> Result<BlobAuth> {
        BlobAuth::resolve(
            self.method,
            self.connection_string.as_deref(),
            self.url.as_deref(),
            &self.default_credentials,
        )
    }
}

/// Value of a required key.
pub(crate) fn required(config: &HashMap<String, String>, key: &str) -> Result<String> {
    config
        .get(key)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| BlobError::Config(format!("missing required '{}'", key)))
}

/// Parse `key` if present, else fall back to `default`.
pub(crate) fn parse_or<T>(config: &HashMap<String, String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    config
        .get(key)
        .map(|s| {
            s.trim()
                .parse::<T>()
                .map_err(|e| BlobError::Config(format!("invalid {}: {}", key, e)))
        })
        .transpose()
        .map(|v| v.unwrap_or(default))
}

/// Parse `key` if present.
pub(crate) fn parse_opt<T>(config: &HashMap<String, String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    config
        .get(key)
        .map(|s| {
            s.trim()
                .parse::<T>()
                .map_err(|e| BlobError::Config(format!("invalid {}: {}", key, e)))
        })
        .transpose()
}

fn redact_query(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{}?***", base),
        None => url.to_string(),
    }
}

pub(crate) fn default_vlen() -> usize {
    1
}

pub(crate) fn default_queue_size() -> usize {
    4
}

pub(crate) fn default_retry_total() -> usize {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_staging_mode_parse() {
        assert_eq!(StagingMode::from_str_config("Inline").unwrap(), StagingMode::Inline);
        assert_eq!(
            StagingMode::from_str_config("background").unwrap(),
            StagingMode::Background
        );
        assert!(StagingMode::from_str_config("threaded").is_err());
    }

    #[test]
    fn test_auth_config_defaults() {
        let auth = AuthConfig::from_config_map(&map(&[])).unwrap();
        assert_eq!(auth.method, AuthMethod::Default);
        assert!(auth.connection_string.is_none());
        assert_eq!(auth.default_credentials, DefaultCredentialOptions::default());
    }

    #[test]
    fn test_auth_config_from_map() {
        let auth = AuthConfig::from_config_map(&map(&[
            ("auth.method", "url_with_sas"),
            ("auth.url", "https://acct.blob.core.windows.net/?sig=abc"),
            ("auth.default.enable_cli", "false"),
        ]))
        .unwrap();
        assert_eq!(auth.method, AuthMethod::UrlWithSas);
        assert!(!auth.default_credentials.enable_cli);
        assert_eq!(auth.resolve().unwrap().account_name(), "acct");
    }

    #[test]
    fn test_auth_config_bad_method() {
        let err = AuthConfig::from_config_map(&map(&[("auth.method", "kerberos")])).unwrap_err();
        assert!(matches!(err, BlobError::Config(_)));
    }

    #[test]
    fn test_auth_config_debug_redacts_secrets() {
        let auth = AuthConfig {
            method: AuthMethod::ConnectionString,
            connection_string: Some("AccountName=a;AccountKey=secret".to_string()),
            url: Some("https://a.blob.core.windows.net/?sig=secret".to_string()),
            default_credentials: DefaultCredentialOptions::default(),
        };
        let debug = format!("{:?}", auth);
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_parse_helpers() {
        let config = map(&[("block.len", "1024"), ("repeat", "yes"), ("blob", "")]);
        assert_eq!(parse_or(&config, "block.len", 1usize).unwrap(), 1024);
        assert_eq!(parse_or(&config, "queue.size", 4usize).unwrap(), 4);
        assert!(parse_or(&config, "repeat", false).is_err());
        assert_eq!(parse_opt::<f64>(&config, "sigmf.sample_rate").unwrap(), None);
        assert!(required(&config, "blob").is_err());
        assert!(required(&config, "container").is_err());
    }
}

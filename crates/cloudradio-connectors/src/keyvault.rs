//! Key Vault secret lookup.
//!
//! Flowgraph parameters (seeds, keys, connection strings) can be pulled from
//! a vault by name at startup with [`pull_key`]. The vault client sits behind
//! [`SecretStore`]; [`EnvSecretStore`] serves the same names from the
//! environment for local runs.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use url::Url;

use crate::error::{ConnectorError, Result};

pub const VAULT_DOMAIN: &str = "vault.azure.net";

#[async_trait]
pub trait SecretStore: Send + Sync + std::fmt::Debug {
    /// Current value of `name`, or `None` if the store has no such secret.
    async fn get_secret(&self, name: &str) -> Result<Option<String>>;
}

/// `https://{vault_name}.vault.azure.net`
///
/// Vault names are 3 to 24 characters of ASCII letters, digits and `-`,
/// starting with a letter.
pub fn vault_url(vault_name: &str) -> Result<Url> {
    let valid_len = (3..=24).contains(&vault_name.len());
    let valid_start = vault_name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic());
    let valid_chars = vault_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-');
    if !(valid_len && valid_start && valid_chars) {
        return Err(ConnectorError::ConfigError(format!(
            "invalid key vault name: '{}'",
            vault_name
        )));
    }
    Ok(Url::parse(&format!("https://{}.{}", vault_name, VAULT_DOMAIN))?)
}

fn validate_secret_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.len() > 127
        || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err(ConnectorError::ConfigError(format!(
            "invalid secret name: '{}'",
            name
        )));
    }
    Ok(())
}

/// Fetch `key` from `store`; a missing secret is an error.
pub async fn pull_key(store: &dyn SecretStore, key: &str) -> Result<String> {
    validate_secret_name(key)?;
    match store.get_secret(key).await? {
        Some(value) => {
            tracing::debug!(secret = %key, "pulled secret");
            Ok(value)
        }
        None => Err(ConnectorError::NotFound(format!("secret '{}'", key))),
    }
}

/// Secrets from environment variables: `my-seed` is read from `MY_SEED`,
/// or `{PREFIX}_MY_SEED` with a prefix.
#[derive(Debug, Clone, Default)]
pub struct EnvSecretStore {
    prefix: Option<String>,
}

impl EnvSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    pub fn var_name(&self, name: &str) -> String {
        let base = name.to_uppercase().replace('-', "_");
        match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix.to_uppercase(), base),
            None => base,
        }
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get_secret(&self, name: &str) -> Result<Option<String>> {
        Ok(std::env::var(self.var_name(name)).ok())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemorySecretStore {
    secrets: Arc<RwLock<HashMap<String, String>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, value: impl Into<String>) {
        self.secrets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), value.into());
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get_secret(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .secrets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned())
    }
}

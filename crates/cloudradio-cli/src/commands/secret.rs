//! `radioctl secret`

use anyhow::{Context, Result};
use clap::Args;
use cloudradio_connectors::{pull_key, vault_url, EnvSecretStore, SecretStore};

#[derive(Debug, Clone, Args)]
pub struct SecretArgs {
    /// Secret name (letters, digits and '-')
    pub name: String,

    /// Key vault the secret belongs to
    #[arg(long, env = "AZURE_KEYVAULT_NAME")]
    pub vault: Option<String>,

    /// Environment variable prefix for locally provided secrets
    #[arg(long, env = "RADIOCTL_SECRET_PREFIX")]
    pub prefix: Option<String>,
}

impl SecretArgs {
    pub fn store(&self) -> EnvSecretStore {
        match &self.prefix {
            Some(prefix) => EnvSecretStore::with_prefix(prefix),
            None => EnvSecretStore::new(),
        }
    }
}

pub async fn fetch(args: &SecretArgs, store: &dyn SecretStore) -> Result<String> {
    if let Some(vault) = &args.vault {
        let url = vault_url(vault)?;
        tracing::debug!(vault = %url, secret = %args.name, "resolving secret");
    }
    pull_key(store, &args.name)
        .await
        .with_context(|| format!("Failed to fetch secret '{}'", args.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudradio_connectors::MemorySecretStore;

    #[tokio::test]
    async fn test_fetch() {
        let store = MemorySecretStore::new();
        store.insert("lo-offset", "125000");
        let args = SecretArgs {
            name: "lo-offset".to_string(),
            vault: Some("radio-keys".to_string()),
            prefix: None,
        };
        assert_eq!(fetch(&args, &store).await.unwrap(), "125000");

        let args = SecretArgs {
            vault: Some("x".to_string()),
            ..args
        };
        assert!(fetch(&args, &store).await.is_err());
    }

    #[test]
    fn test_prefixed_store() {
        let args = SecretArgs {
            name: "seed".to_string(),
            vault: None,
            prefix: Some("radio".to_string()),
        };
        assert_eq!(args.store().var_name("seed"), "RADIO_SEED");
    }
}

//! Ambient credential selection shared by the Azure clients.

pub use cloudradio_blob::DefaultCredentialOptions;

/// Names of the enabled credential sources, in lookup order.
pub fn enabled_sources(options: &DefaultCredentialOptions) -> Vec<&'static str> {
    let mut sources = Vec::new();
    if options.enable_environment {
        sources.push("environment");
    }
    if options.enable_cli {
        sources.push("azure_cli");
    }
    if options.enable_managed_identity {
        sources.push("managed_identity");
    }
    sources
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enabled_sources_order() {
        let options = DefaultCredentialOptions::default();
        assert_eq!(
            enabled_sources(&options),
            vec!["environment", "azure_cli", "managed_identity"]
        );

        let options = DefaultCredentialOptions {
            enable_environment: false,
            enable_cli: false,
            ..DefaultCredentialOptions::default()
        };
        assert_eq!(enabled_sources(&options), vec!["managed_identity"]);
    }
}

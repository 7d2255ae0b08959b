//! Credential selection for the blob service.
//!
//! Three ways to reach a storage account:
//!
//! | method              | inputs                                   |
//! |---------------------|------------------------------------------|
//! | `connection_string` | `AccountName=..;AccountKey=..;...`       |
//! | `url_with_sas`      | `https://acct.blob.core.windows.net/?sv=..` |
//! | `default`           | account URL + ambient credential chain   |
//!
//! Nothing here signs requests; the chosen credential is handed to the
//! object store builder as-is.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{BlobError, Result};

const DEVSTORE_ACCOUNT: &str = "devstoreaccount1";
const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

/// Which credential constructor to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    ConnectionString,
    UrlWithSas,
    #[default]
    Default,
}

impl AuthMethod {
    /// Parse from a string (case-insensitive).
    pub fn from_str_config(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "connection_string" => Ok(AuthMethod::ConnectionString),
            "url_with_sas" => Ok(AuthMethod::UrlWithSas),
            "default" => Ok(AuthMethod::Default),
            other => Err(BlobError::Config(format!(
                "unknown auth method: '{}' (expected connection_string, url_with_sas or default)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::ConnectionString => write!(f, "connection_string"),
            AuthMethod::UrlWithSas => write!(f, "url_with_sas"),
            AuthMethod::Default => write!(f, "default"),
        }
    }
}

/// Ambient credential sources the `default` method may try.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultCredentialOptions {
    #[serde(default = "default_true")]
    pub enable_environment: bool,
    #[serde(default = "default_true")]
    pub enable_cli: bool,
    #[serde(default = "default_true")]
    pub enable_managed_identity: bool,
    /// Authority host, e.g. `https://login.microsoftonline.us` for sovereign clouds.
    #[serde(default)]
    pub authority: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for DefaultCredentialOptions {
    fn default() -> Self {
        Self {
            enable_environment: true,
            enable_cli: true,
            enable_managed_identity: true,
            authority: None,
        }
    }
}

impl DefaultCredentialOptions {
    pub fn validate(&self) -> Result<()> {
        if !self.enable_environment && !self.enable_cli && !self.enable_managed_identity {
            return Err(BlobError::Config(
                "every default credential source is disabled".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parsed storage connection string.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub account_name: String,
    pub account_key: Option<String>,
    pub sas_token: Option<String>,
    pub blob_endpoint: Option<Url>,
    pub endpoint_suffix: String,
    pub use_emulator: bool,
}

impl std::fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionString")
            .field("account_name", &self.account_name)
            .field("account_key", &self.account_key.as_ref().map(|_| "***"))
            .field("sas_token", &self.sas_token.as_ref().map(|_| "***"))
            .field("blob_endpoint", &self.blob_endpoint.as_ref().map(Url::as_str))
            .field("endpoint_suffix", &self.endpoint_suffix)
            .field("use_emulator", &self.use_emulator)
            .finish()
    }
}

impl ConnectionString {
    pub fn parse(s: &str) -> Result<Self> {
        let mut account_name = None;
        let mut account_key = None;
        let mut sas_token = None;
        let mut blob_endpoint = None;
        let mut endpoint_suffix = None;
        let mut use_emulator = false;

        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                BlobError::MalformedDestination(format!(
                    "connection string segment '{}' is not key=value",
                    key_only(part)
                ))
            })?;

            match key {
                k if k.eq_ignore_ascii_case("AccountName") => account_name = Some(value.to_string()),
                k if k.eq_ignore_ascii_case("AccountKey") => account_key = Some(value.to_string()),
                k if k.eq_ignore_ascii_case("SharedAccessSignature") => {
                    sas_token = Some(value.trim_start_matches('?').to_string())
                }
                k if k.eq_ignore_ascii_case("BlobEndpoint") => {
                    let url = Url::parse(value).map_err(|e| {
                        BlobError::MalformedDestination(format!("invalid BlobEndpoint: {}", e))
                    })?;
                    blob_endpoint = Some(url);
                }
                k if k.eq_ignore_ascii_case("EndpointSuffix") => {
                    endpoint_suffix = Some(value.to_string())
                }
                k if k.eq_ignore_ascii_case("UseDevelopmentStorage") => {
                    use_emulator = value.eq_ignore_ascii_case("true")
                }
                // DefaultEndpointsProtocol, QueueEndpoint, ...
                _ => {}
            }
        }

        if blob_endpoint.as_ref().is_some_and(is_local) {
            use_emulator = true;
        }

        let account_name = match account_name {
            Some(name) => name,
            None if use_emulator => DEVSTORE_ACCOUNT.to_string(),
            None => blob_endpoint
                .as_ref()
                .and_then(account_from_host)
                .ok_or_else(|| {
                    BlobError::MalformedDestination(
                        "connection string has neither AccountName nor BlobEndpoint".to_string(),
                    )
                })?,
        };

        Ok(Self {
            account_name,
            account_key,
            sas_token,
            blob_endpoint,
            endpoint_suffix: endpoint_suffix.unwrap_or_else(|| DEFAULT_ENDPOINT_SUFFIX.to_string()),
            use_emulator,
        })
    }

    /// Endpoint to use instead of the public cloud default, if any.
    pub fn custom_endpoint(&self) -> Option<String> {
        if let Some(url) = &self.blob_endpoint {
            return Some(url.as_str().trim_end_matches('/').to_string());
        }
        if self.endpoint_suffix != DEFAULT_ENDPOINT_SUFFIX {
            return Some(format!(
                "https://{}.blob.{}",
                self.account_name, self.endpoint_suffix
            ));
        }
        None
    }
}

/// Account URL plus SAS query pairs.
#[derive(Clone, PartialEq, Eq)]
pub struct SasUrl {
    pub account_name: String,
    pub endpoint: Url,
    pub query_pairs: Vec<(String, String)>,
    pub use_emulator: bool,
}

impl std::fmt::Debug for SasUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SasUrl")
            .field("account_name", &self.account_name)
            .field("endpoint", &self.endpoint.as_str())
            .field("query_pairs", &self.query_pairs.len())
            .field("use_emulator", &self.use_emulator)
            .finish()
    }
}

/// Account URL for the ambient credential chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountUrl {
    pub account_name: String,
    pub endpoint: Url,
    pub use_emulator: bool,
}

/// A fully resolved credential choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobAuth {
    ConnectionString(ConnectionString),
    UrlWithSas(SasUrl),
    Default {
        account: AccountUrl,
        options: DefaultCredentialOptions,
    },
}

impl BlobAuth {
    /// Resolve the inputs required by `method`.
    ///
    /// A missing input is a configuration error; an input that does not parse
    /// is a malformed destination.
    pub fn resolve(
        method: AuthMethod,
        connection_string: Option<&str>,
        url: Option<&str>,
        options: &DefaultCredentialOptions,
    ) -> Result<Self> {
        match method {
            AuthMethod::ConnectionString => {
                let cs = connection_string.ok_or_else(|| {
                    BlobError::Config(
                        "auth.method 'connection_string' requires 'auth.connection_string'"
                            .to_string(),
                    )
                })?;
                Ok(BlobAuth::ConnectionString(ConnectionString::parse(cs)?))
            }
            AuthMethod::UrlWithSas => {
                let raw = url.ok_or_else(|| {
                    BlobError::Config("auth.method 'url_with_sas' requires 'auth.url'".to_string())
                })?;
                let parsed = Url::parse(raw)?;
                let query_pairs: Vec<(String, String)> = parsed
                    .query_pairs()
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect();
                if query_pairs.is_empty() {
                    return Err(BlobError::MalformedDestination(
                        "auth.url carries no SAS token".to_string(),
                    ));
                }
                let account = account_url(&parsed)?;
                Ok(BlobAuth::UrlWithSas(SasUrl {
                    account_name: account.account_name,
                    endpoint: account.endpoint,
                    query_pairs,
                    use_emulator: account.use_emulator,
                }))
            }
            AuthMethod::Default => {
                options.validate()?;
                let raw = url.ok_or_else(|| {
                    BlobError::Config("auth.method 'default' requires 'auth.url'".to_string())
                })?;
                let account = account_url(&Url::parse(raw)?)?;
                Ok(BlobAuth::Default {
                    account,
                    options: options.clone(),
                })
            }
        }
    }

    pub fn method(&self) -> AuthMethod {
        match self {
            BlobAuth::ConnectionString(_) => AuthMethod::ConnectionString,
            BlobAuth::UrlWithSas(_) => AuthMethod::UrlWithSas,
            BlobAuth::Default { .. } => AuthMethod::Default,
        }
    }

    pub fn account_name(&self) -> &str {
        match self {
            BlobAuth::ConnectionString(cs) => &cs.account_name,
            BlobAuth::UrlWithSas(sas) => &sas.account_name,
            BlobAuth::Default { account, .. } => &account.account_name,
        }
    }
}

fn account_url(url: &Url) -> Result<AccountUrl> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(BlobError::MalformedDestination(format!(
            "unsupported URL scheme '{}'",
            url.scheme()
        )));
    }
    let use_emulator = is_local(url);

    // Emulator URLs carry the account in the path: http://127.0.0.1:10000/devstoreaccount1
    let account_name = if use_emulator {
        url.path_segments()
            .and_then(|mut segs| segs.next())
            .filter(|s| !s.is_empty())
            .unwrap_or(DEVSTORE_ACCOUNT)
            .to_string()
    } else {
        account_from_host(url).ok_or_else(|| {
            BlobError::MalformedDestination(format!("no account name in host of '{}'", url.origin().ascii_serialization()))
        })?
    };

    let mut endpoint = url.clone();
    endpoint.set_query(None);
    endpoint.set_fragment(None);
    if !use_emulator {
        endpoint.set_path("");
    }

    Ok(AccountUrl {
        account_name,
        endpoint,
        use_emulator,
    })
}

fn account_from_host(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let (account, rest) = host.split_once('.')?;
    if account.is_empty() || rest.is_empty() {
        return None;
    }
    Some(account.to_string())
}

fn is_local(url: &Url) -> bool {
    matches!(url.host_str(), Some("localhost") | Some("127.0.0.1") | Some("[::1]"))
}

fn key_only(part: &str) -> &str {
    part.split('=').next().unwrap_or(part)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CS: &str = "DefaultEndpointsProtocol=https;AccountName=radiodata;AccountKey=c2VjcmV0LWtleQ==;EndpointSuffix=core.windows.net";

    #[test]
    fn test_auth_method_parse() {
        assert_eq!(
            AuthMethod::from_str_config("CONNECTION_STRING").unwrap(),
            AuthMethod::ConnectionString
        );
        assert_eq!(
            AuthMethod::from_str_config("url_with_sas").unwrap(),
            AuthMethod::UrlWithSas
        );
        assert_eq!(AuthMethod::from_str_config("default").unwrap(), AuthMethod::Default);
    }

    #[test]
    fn test_auth_method_unknown_is_config_error() {
        let err = AuthMethod::from_str_config("certificate").unwrap_err();
        assert!(matches!(err, BlobError::Config(_)));
        assert!(err.to_string().contains("certificate"));
    }

    #[test]
    fn test_parse_connection_string() {
        let cs = ConnectionString::parse(CS).unwrap();
        assert_eq!(cs.account_name, "radiodata");
        assert_eq!(cs.account_key.as_deref(), Some("c2VjcmV0LWtleQ=="));
        assert!(cs.custom_endpoint().is_none());
        assert!(!cs.use_emulator);
    }

    #[test]
    fn test_connection_string_debug_redacts_key() {
        let cs = ConnectionString::parse(CS).unwrap();
        let debug = format!("{:?}", cs);
        assert!(!debug.contains("c2VjcmV0"));
        assert!(debug.contains("radiodata"));
    }

    #[test]
    fn test_connection_string_sovereign_suffix() {
        let cs = ConnectionString::parse(
            "AccountName=gov;AccountKey=a2V5;EndpointSuffix=core.usgovcloudapi.net",
        )
        .unwrap();
        assert_eq!(
            cs.custom_endpoint().as_deref(),
            Some("https://gov.blob.core.usgovcloudapi.net")
        );
    }

    #[test]
    fn test_connection_string_sas_endpoint_only() {
        let cs = ConnectionString::parse(
            "BlobEndpoint=https://radiodata.blob.core.windows.net/;SharedAccessSignature=?sv=2022&sig=abc",
        )
        .unwrap();
        assert_eq!(cs.account_name, "radiodata");
        assert_eq!(cs.sas_token.as_deref(), Some("sv=2022&sig=abc"));
        assert!(cs.account_key.is_none());
    }

    #[test]
    fn test_connection_string_development_storage() {
        let cs = ConnectionString::parse("UseDevelopmentStorage=true").unwrap();
        assert!(cs.use_emulator);
        assert_eq!(cs.account_name, DEVSTORE_ACCOUNT);
    }

    #[test]
    fn test_connection_string_malformed() {
        let err = ConnectionString::parse("AccountName=x;garbage").unwrap_err();
        assert!(matches!(err, BlobError::MalformedDestination(_)));

        let err = ConnectionString::parse("AccountKey=abc").unwrap_err();
        assert!(matches!(err, BlobError::MalformedDestination(_)));

        let err = ConnectionString::parse("BlobEndpoint=::nope").unwrap_err();
        assert!(matches!(err, BlobError::MalformedDestination(_)));
    }

    #[test]
    fn test_resolve_missing_input_is_config_error() {
        let opts = DefaultCredentialOptions::default();
        let err = BlobAuth::resolve(AuthMethod::ConnectionString, None, None, &opts).unwrap_err();
        assert!(matches!(err, BlobError::Config(_)));
        let err = BlobAuth::resolve(AuthMethod::UrlWithSas, None, None, &opts).unwrap_err();
        assert!(matches!(err, BlobError::Config(_)));
        let err = BlobAuth::resolve(AuthMethod::Default, None, None, &opts).unwrap_err();
        assert!(matches!(err, BlobError::Config(_)));
    }

    #[test]
    fn test_resolve_url_with_sas() {
        let auth = BlobAuth::resolve(
            AuthMethod::UrlWithSas,
            None,
            Some("https://radiodata.blob.core.windows.net/?sv=2022-11-02&ss=b&sig=c2ln"),
            &DefaultCredentialOptions::default(),
        )
        .unwrap();
        let BlobAuth::UrlWithSas(sas) = &auth else {
            panic!("expected url_with_sas");
        };
        assert_eq!(sas.account_name, "radiodata");
        assert_eq!(sas.query_pairs.len(), 3);
        assert_eq!(sas.endpoint.as_str(), "https://radiodata.blob.core.windows.net/");
        assert_eq!(auth.method(), AuthMethod::UrlWithSas);
    }

    #[test]
    fn test_resolve_url_without_sas_is_malformed() {
        let err = BlobAuth::resolve(
            AuthMethod::UrlWithSas,
            None,
            Some("https://radiodata.blob.core.windows.net/"),
            &DefaultCredentialOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, BlobError::MalformedDestination(_)));
    }

    #[test]
    fn test_resolve_bad_url_is_malformed() {
        let err = BlobAuth::resolve(
            AuthMethod::Default,
            None,
            Some("radiodata blob"),
            &DefaultCredentialOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, BlobError::MalformedDestination(_)));

        let err = BlobAuth::resolve(
            AuthMethod::Default,
            None,
            Some("ftp://radiodata.blob.core.windows.net"),
            &DefaultCredentialOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, BlobError::MalformedDestination(_)));
    }

    #[test]
    fn test_resolve_default_emulator_url() {
        let auth = BlobAuth::resolve(
            AuthMethod::Default,
            None,
            Some("http://127.0.0.1:10000/devstoreaccount1"),
            &DefaultCredentialOptions::default(),
        )
        .unwrap();
        assert_eq!(auth.account_name(), "devstoreaccount1");
        let BlobAuth::Default { account, .. } = auth else {
            panic!("expected default");
        };
        assert!(account.use_emulator);
    }

    #[test]
    fn test_all_default_sources_disabled() {
        let opts = DefaultCredentialOptions {
            enable_environment: false,
            enable_cli: false,
            enable_managed_identity: false,
            authority: None,
        };
        let err = BlobAuth::resolve(
            AuthMethod::Default,
            None,
            Some("https://radiodata.blob.core.windows.net"),
            &opts,
        )
        .unwrap_err();
        assert!(matches!(err, BlobError::Config(_)));
    }

    #[test]
    fn test_default_options_serde_defaults() {
        let opts: DefaultCredentialOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts, DefaultCredentialOptions::default());
        let opts: DefaultCredentialOptions =
            serde_json::from_str(r#"{"enable_cli": false}"#).unwrap();
        assert!(!opts.enable_cli);
        assert!(opts.enable_environment);
    }
}

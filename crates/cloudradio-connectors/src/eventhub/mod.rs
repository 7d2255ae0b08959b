//! Azure Event Hub message blocks.
//!
//! [`EventHubSink`] turns each flowgraph message into a JSON event and sends
//! it as a one-event batch. [`EventHubSource`] runs a receive task that
//! decodes each event body back into a message and publishes it on an output
//! channel.
//!
//! The AMQP client sits behind the [`EventHubConnector`], [`EventProducer`]
//! and [`EventConsumer`] traits; [`MemoryEventHubs`] implements them in
//! process.

mod memory;
mod sink;
mod source;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::credentials::DefaultCredentialOptions;
use crate::error::{ConnectorError, Result};

pub use memory::{MemoryEventConsumer, MemoryEventHubs, MemoryEventProducer};
pub use sink::EventHubSink;
pub use source::EventHubSource;

pub const DEFAULT_CONSUMER_GROUP: &str = "$Default";

/// How the block authenticates to the namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventHubAuthMethod {
    ConnectionString,
    SasToken,
    #[default]
    Default,
}

impl EventHubAuthMethod {
    pub fn from_str_config(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "connection_string" => Ok(EventHubAuthMethod::ConnectionString),
            "sas_token" | "sas" => Ok(EventHubAuthMethod::SasToken),
            "default" => Ok(EventHubAuthMethod::Default),
            other => Err(ConnectorError::ConfigError(format!(
                "unsupported authentication method: '{}'",
                other
            ))),
        }
    }
}

/// Parsed `Endpoint=sb://...;SharedAccessKeyName=...;SharedAccessKey=...`.
#[derive(Clone, PartialEq, Eq)]
pub struct EventHubConnectionString {
    pub namespace: String,
    pub key_name: Option<String>,
    pub key: Option<String>,
    pub signature: Option<String>,
    pub entity_path: Option<String>,
}

impl std::fmt::Debug for EventHubConnectionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHubConnectionString")
            .field("namespace", &self.namespace)
            .field("key_name", &self.key_name)
            .field("key", &self.key.as_ref().map(|_| "***"))
            .field("signature", &self.signature.as_ref().map(|_| "***"))
            .field("entity_path", &self.entity_path)
            .finish()
    }
}

impl EventHubConnectionString {
    pub fn parse(s: &str) -> Result<Self> {
        let mut endpoint = None;
        let mut key_name = None;
        let mut key = None;
        let mut signature = None;
        let mut entity_path = None;

        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (k, v) = part.split_once('=').ok_or_else(|| {
                ConnectorError::ConfigError("connection string segment without '='".to_string())
            })?;
            match k.to_lowercase().as_str() {
                "endpoint" => endpoint = Some(v.to_string()),
                "sharedaccesskeyname" => key_name = Some(v.to_string()),
                "sharedaccesskey" => key = Some(v.to_string()),
                "sharedaccesssignature" => signature = Some(v.to_string()),
                "entitypath" => entity_path = Some(v.to_string()),
                _ => {}
            }
        }

        let endpoint = endpoint.ok_or_else(|| {
            ConnectorError::ConfigError("connection string has no Endpoint".to_string())
        })?;
        let url = Url::parse(&endpoint)?;
        let namespace = url
            .host_str()
            .ok_or_else(|| ConnectorError::ConfigError(format!("endpoint has no host: {}", endpoint)))?
            .to_string();

        if key.is_none() && signature.is_none() {
            return Err(ConnectorError::ConfigError(
                "connection string has neither SharedAccessKey nor SharedAccessSignature"
                    .to_string(),
            ));
        }

        Ok(Self {
            namespace,
            key_name,
            key,
            signature,
            entity_path,
        })
    }
}

/// Resolved credentials for one namespace.
#[derive(Clone, PartialEq)]
pub enum EventHubAuth {
    ConnectionString(EventHubConnectionString),
    SasToken {
        namespace: String,
        token: String,
    },
    Default {
        namespace: String,
        options: DefaultCredentialOptions,
    },
}

impl std::fmt::Debug for EventHubAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventHubAuth::ConnectionString(cs) => f.debug_tuple("ConnectionString").field(cs).finish(),
            EventHubAuth::SasToken { namespace, .. } => f
                .debug_struct("SasToken")
                .field("namespace", namespace)
                .field("token", &"***")
                .finish(),
            EventHubAuth::Default { namespace, options } => f
                .debug_struct("Default")
                .field("namespace", namespace)
                .field("options", options)
                .finish(),
        }
    }
}

impl EventHubAuth {
    /// Fully qualified namespace host, e.g. `radio.servicebus.windows.net`.
    pub fn namespace(&self) -> &str {
        match self {
            EventHubAuth::ConnectionString(cs) => &cs.namespace,
            EventHubAuth::SasToken { namespace, .. } => namespace,
            EventHubAuth::Default { namespace, .. } => namespace,
        }
    }

    pub fn method(&self) -> EventHubAuthMethod {
        match self {
            EventHubAuth::ConnectionString(_) => EventHubAuthMethod::ConnectionString,
            EventHubAuth::SasToken { .. } => EventHubAuthMethod::SasToken,
            EventHubAuth::Default { .. } => EventHubAuthMethod::Default,
        }
    }
}

/// Where a consumer starts reading a partition.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartingPosition {
    Earliest,
    #[default]
    Latest,
    /// After the event at this offset.
    Offset(String),
    /// After the event with this sequence number.
    SequenceNumber(i64),
}

impl StartingPosition {
    /// `earliest`, `latest`, `-1` (earliest), `@latest`, `offset:<o>`,
    /// `seq:<n>` or a bare sequence number.
    pub fn from_str_config(s: &str) -> Result<Self> {
        let s = s.trim();
        match s.to_lowercase().as_str() {
            "earliest" | "-1" => return Ok(StartingPosition::Earliest),
            "latest" | "@latest" => return Ok(StartingPosition::Latest),
            _ => {}
        }
        if let Some(offset) = s.strip_prefix("offset:") {
            return Ok(StartingPosition::Offset(offset.to_string()));
        }
        let seq = s.strip_prefix("seq:").unwrap_or(s);
        seq.parse::<i64>()
            .map(StartingPosition::SequenceNumber)
            .map_err(|_| ConnectorError::ConfigError(format!("invalid starting position: '{}'", s)))
    }
}

/// One event on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EventData {
    pub body: Bytes,
    pub properties: BTreeMap<String, String>,
    /// Set by the service on receive.
    pub sequence_number: Option<i64>,
    pub offset: Option<String>,
}

impl EventData {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }
}

/// Sending half of an Event Hub client.
#[async_trait]
pub trait EventProducer: Send + Sync + std::fmt::Debug {
    fn eventhub(&self) -> &str;

    /// Send the events as one batch.
    async fn send_batch(&self, events: Vec<EventData>) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Receiving half of an Event Hub client, bound to one partition.
#[async_trait]
pub trait EventConsumer: Send + std::fmt::Debug {
    fn eventhub(&self) -> &str;

    /// Wait for the next event. `None` once the consumer is closed.
    async fn receive(&mut self) -> Result<Option<EventData>>;

    async fn close(&mut self) -> Result<()>;
}

/// Opens producers and consumers for a namespace.
pub trait EventHubConnector: Send + Sync + std::fmt::Debug {
    fn producer(&self, auth: &EventHubAuth, eventhub: &str) -> Result<Arc<dyn EventProducer>>;

    fn consumer(
        &self,
        auth: &EventHubAuth,
        eventhub: &str,
        consumer_group: &str,
        partition_id: &str,
        position: &StartingPosition,
    ) -> Result<Box<dyn EventConsumer>>;
}

fn default_consumer_group() -> String {
    DEFAULT_CONSUMER_GROUP.to_string()
}

fn default_partition_id() -> String {
    "0".to_string()
}

fn default_output_capacity() -> usize {
    1024
}

/// Settings shared by the sink and source blocks.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventHubConfig {
    #[serde(default)]
    pub auth_method: EventHubAuthMethod,
    #[serde(default)]
    pub connection_string: Option<String>,
    #[serde(default)]
    pub sas_token: Option<String>,
    /// Fully qualified namespace; required for `sas_token` and `default`.
    #[serde(default)]
    pub host_name: Option<String>,
    /// Falls back to the connection string's `EntityPath`.
    #[serde(default)]
    pub eventhub: Option<String>,
    #[serde(default)]
    pub default_credentials: DefaultCredentialOptions,
}

impl std::fmt::Debug for EventHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHubConfig")
            .field("auth_method", &self.auth_method)
            .field("connection_string", &self.connection_string.as_ref().map(|_| "***"))
            .field("sas_token", &self.sas_token.as_ref().map(|_| "***"))
            .field("host_name", &self.host_name)
            .field("eventhub", &self.eventhub)
            .finish()
    }
}

impl EventHubConfig {
    pub fn from_config_map(config: &HashMap<String, String>) -> Result<Self> {
        let auth_method = config
            .get("auth.method")
            .map(|s| EventHubAuthMethod::from_str_config(s))
            .transpose()?
            .unwrap_or_default();

        let defaults = DefaultCredentialOptions::default();
        let flag = |key: &str, default: bool| -> Result<bool> {
            config
                .get(key)
                .map(|v| {
                    v.trim().parse::<bool>().map_err(|e| {
                        ConnectorError::ConfigError(format!("invalid {}: {}", key, e))
                    })
                })
                .transpose()
                .map(|v| v.unwrap_or(default))
        };

        Ok(Self {
            auth_method,
            connection_string: config.get("auth.connection_string").cloned(),
            sas_token: config.get("auth.sas_token").cloned(),
            host_name: config.get("eventhub.host_name").cloned(),
            eventhub: config.get("eventhub.name").cloned(),
            default_credentials: DefaultCredentialOptions {
                enable_environment: flag(
                    "auth.default.enable_environment",
                    defaults.enable_environment,
                )?,
                enable_cli: flag("auth.default.enable_cli", defaults.enable_cli)?,
                enable_managed_identity: flag(
                    "auth.default.enable_managed_identity",
                    defaults.enable_managed_identity,
                )?,
                authority: config.get("auth.default.authority").cloned(),
            },
        })
    }

    /// Pick the credentials for `auth_method` and the event hub name.
    pub fn resolve(&self) -> Result<(EventHubAuth, String)> {
        let missing =
            |what: &str| ConnectorError::ConfigError(format!("{} auth requires {}", self.method_name(), what));

        let auth = match self.auth_method {
            EventHubAuthMethod::ConnectionString => {
                let cs = self
                    .connection_string
                    .as_deref()
                    .ok_or_else(|| missing("a connection string"))?;
                EventHubAuth::ConnectionString(EventHubConnectionString::parse(cs)?)
            }
            EventHubAuthMethod::SasToken => EventHubAuth::SasToken {
                namespace: self.host_name.clone().ok_or_else(|| missing("a host name"))?,
                token: self.sas_token.clone().ok_or_else(|| missing("a SAS token"))?,
            },
            EventHubAuthMethod::Default => {
                self.default_credentials
                    .validate()
                    .map_err(|e| ConnectorError::ConfigError(e.to_string()))?;
                EventHubAuth::Default {
                    namespace: self.host_name.clone().ok_or_else(|| missing("a host name"))?,
                    options: self.default_credentials.clone(),
                }
            }
        };

        let eventhub = match (&self.eventhub, &auth) {
            (Some(name), _) if !name.is_empty() => name.clone(),
            (_, EventHubAuth::ConnectionString(cs)) => cs
                .entity_path
                .clone()
                .ok_or_else(|| missing("an event hub name or EntityPath"))?,
            _ => return Err(missing("an event hub name")),
        };

        Ok((auth, eventhub))
    }

    fn method_name(&self) -> &'static str {
        match self.auth_method {
            EventHubAuthMethod::ConnectionString => "connection_string",
            EventHubAuthMethod::SasToken => "sas_token",
            EventHubAuthMethod::Default => "default",
        }
    }
}

/// Source-only settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventHubSourceConfig {
    #[serde(default)]
    pub hub: EventHubConfig,
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    #[serde(default = "default_partition_id")]
    pub partition_id: String,
    #[serde(default)]
    pub starting_position: StartingPosition,
    /// Messages buffered between the receive task and the reader.
    #[serde(default = "default_output_capacity")]
    pub output_capacity: usize,
}

impl EventHubSourceConfig {
    pub fn new(hub: EventHubConfig) -> Self {
        Self {
            hub,
            consumer_group: default_consumer_group(),
            partition_id: default_partition_id(),
            starting_position: StartingPosition::default(),
            output_capacity: default_output_capacity(),
        }
    }

    pub fn from_config_map(config: &HashMap<String, String>) -> Result<Self> {
        let output_capacity = config
            .get("output.capacity")
            .map(|v| {
                v.trim().parse::<usize>().map_err(|e| {
                    ConnectorError::ConfigError(format!("invalid output.capacity: {}", e))
                })
            })
            .transpose()?
            .unwrap_or_else(default_output_capacity);
        if output_capacity == 0 {
            return Err(ConnectorError::ConfigError(
                "output.capacity must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            hub: EventHubConfig::from_config_map(config)?,
            consumer_group: config
                .get("consumer_group")
                .cloned()
                .unwrap_or_else(default_consumer_group),
            partition_id: config
                .get("partition_id")
                .cloned()
                .unwrap_or_else(default_partition_id),
            starting_position: config
                .get("starting_position")
                .map(|s| StartingPosition::from_str_config(s))
                .transpose()?
                .unwrap_or_default(),
            output_capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CS: &str = "Endpoint=sb://radio.servicebus.windows.net/;SharedAccessKeyName=send;SharedAccessKey=c2VjcmV0;EntityPath=telemetry";

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_auth_method_parse() {
        assert_eq!(
            EventHubAuthMethod::from_str_config("connection_string").unwrap(),
            EventHubAuthMethod::ConnectionString
        );
        assert_eq!(
            EventHubAuthMethod::from_str_config("sas").unwrap(),
            EventHubAuthMethod::SasToken
        );
        assert_eq!(
            EventHubAuthMethod::from_str_config("SAS_TOKEN").unwrap(),
            EventHubAuthMethod::SasToken
        );
        assert!(matches!(
            EventHubAuthMethod::from_str_config("kerberos").unwrap_err(),
            ConnectorError::ConfigError(_)
        ));
    }

    #[test]
    fn test_parse_connection_string() {
        let cs = EventHubConnectionString::parse(CS).unwrap();
        assert_eq!(cs.namespace, "radio.servicebus.windows.net");
        assert_eq!(cs.key_name.as_deref(), Some("send"));
        assert_eq!(cs.entity_path.as_deref(), Some("telemetry"));
        assert!(!format!("{:?}", cs).contains("c2VjcmV0"));
    }

    #[test]
    fn test_parse_connection_string_without_key() {
        let err = EventHubConnectionString::parse("Endpoint=sb://radio.servicebus.windows.net/")
            .unwrap_err();
        assert!(matches!(err, ConnectorError::ConfigError(_)));
        assert!(EventHubConnectionString::parse("SharedAccessKey=abc").is_err());
    }

    #[test]
    fn test_resolve_connection_string_uses_entity_path() {
        let config = EventHubConfig {
            auth_method: EventHubAuthMethod::ConnectionString,
            connection_string: Some(CS.to_string()),
            ..Default::default()
        };
        let (auth, hub) = config.resolve().unwrap();
        assert_eq!(auth.namespace(), "radio.servicebus.windows.net");
        assert_eq!(hub, "telemetry");
    }

    #[test]
    fn test_resolve_sas_requires_host() {
        let config = EventHubConfig {
            auth_method: EventHubAuthMethod::SasToken,
            sas_token: Some("SharedAccessSignature sr=...".to_string()),
            eventhub: Some("telemetry".to_string()),
            ..Default::default()
        };
        assert!(config.resolve().is_err());

        let config = EventHubConfig {
            host_name: Some("radio.servicebus.windows.net".to_string()),
            ..config
        };
        let (auth, _) = config.resolve().unwrap();
        assert_eq!(auth.method(), EventHubAuthMethod::SasToken);
        assert!(!format!("{:?}", auth).contains("sr="));
    }

    #[test]
    fn test_resolve_default_needs_eventhub_name() {
        let config = EventHubConfig {
            host_name: Some("radio.servicebus.windows.net".to_string()),
            ..Default::default()
        };
        assert!(config.resolve().is_err());
    }

    #[test]
    fn test_starting_position_parse() {
        assert_eq!(
            StartingPosition::from_str_config("earliest").unwrap(),
            StartingPosition::Earliest
        );
        assert_eq!(
            StartingPosition::from_str_config("-1").unwrap(),
            StartingPosition::Earliest
        );
        assert_eq!(
            StartingPosition::from_str_config("@latest").unwrap(),
            StartingPosition::Latest
        );
        assert_eq!(
            StartingPosition::from_str_config("seq:42").unwrap(),
            StartingPosition::SequenceNumber(42)
        );
        assert_eq!(
            StartingPosition::from_str_config("17").unwrap(),
            StartingPosition::SequenceNumber(17)
        );
        assert_eq!(
            StartingPosition::from_str_config("offset:4096").unwrap(),
            StartingPosition::Offset("4096".to_string())
        );
        assert!(StartingPosition::from_str_config("yesterday").is_err());
    }

    #[test]
    fn test_source_config_from_map() {
        let config = EventHubSourceConfig::from_config_map(&map(&[
            ("auth.method", "connection_string"),
            ("auth.connection_string", CS),
            ("starting_position", "earliest"),
            ("partition_id", "3"),
        ]))
        .unwrap();
        assert_eq!(config.consumer_group, "$Default");
        assert_eq!(config.partition_id, "3");
        assert_eq!(config.starting_position, StartingPosition::Earliest);
        assert_eq!(config.output_capacity, 1024);
        assert_eq!(config.hub.resolve().unwrap().1, "telemetry");

        assert!(EventHubSourceConfig::from_config_map(&map(&[("output.capacity", "0")])).is_err());
    }
}

//! CloudRadio Connectors
//!
//! Message-level glue between a flowgraph and Azure services.
//!
//! - **Event Hub**: [`EventHubSink`] sends flowgraph messages as JSON events;
//!   [`EventHubSource`] receives JSON events and republishes them as messages.
//! - **Key Vault**: [`pull_key`] fetches a named secret through a
//!   [`SecretStore`].
//! - **Credentials**: [`DefaultCredentialOptions`] picks the ambient
//!   credential sources shared with the blob blocks.

pub mod credentials;
pub mod error;
pub mod eventhub;
pub mod keyvault;

pub use credentials::DefaultCredentialOptions;
pub use error::{ConnectorError, Result};
pub use eventhub::{
    EventConsumer, EventData, EventHubAuth, EventHubAuthMethod, EventHubConfig, EventHubConnector,
    EventHubSink, EventHubSource, EventHubSourceConfig, EventProducer, MemoryEventHubs,
    StartingPosition,
};
pub use keyvault::{pull_key, vault_url, EnvSecretStore, MemorySecretStore, SecretStore};

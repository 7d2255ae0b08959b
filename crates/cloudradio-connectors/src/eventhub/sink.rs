use std::collections::HashMap;
use std::sync::Arc;

use cloudradio_core::{BlockState, Lifecycle, Message};
use cloudradio_observability::metrics::{EVENTHUB_ERRORS_TOTAL, EVENTHUB_EVENTS_SENT_TOTAL};

use super::{EventData, EventHubAuth, EventHubConfig, EventHubConnector, EventProducer};
use crate::error::Result;

/// Sends each flowgraph message to an event hub as one JSON event.
#[derive(Debug)]
pub struct EventHubSink {
    name: String,
    auth: EventHubAuth,
    eventhub: String,
    producer: Arc<dyn EventProducer>,
    lifecycle: Lifecycle,
    sent: u64,
}

impl EventHubSink {
    pub fn connect(
        name: impl Into<String>,
        config: &EventHubConfig,
        connector: &dyn EventHubConnector,
    ) -> Result<Self> {
        let (auth, eventhub) = config.resolve()?;
        let producer = connector.producer(&auth, &eventhub)?;
        let name = name.into();
        tracing::info!(
            block = %name,
            namespace = %auth.namespace(),
            eventhub = %eventhub,
            auth = ?auth.method(),
            "event hub sink connected"
        );
        Ok(Self {
            name,
            auth,
            eventhub,
            producer,
            lifecycle: Lifecycle::new(),
            sent: 0,
        })
    }

    pub fn from_config_map(
        name: impl Into<String>,
        config: &HashMap<String, String>,
        connector: &dyn EventHubConnector,
    ) -> Result<Self> {
        Self::connect(name, &EventHubConfig::from_config_map(config)?, connector)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn eventhub(&self) -> &str {
        &self.eventhub
    }

    pub fn namespace(&self) -> &str {
        self.auth.namespace()
    }

    pub fn state(&self) -> BlockState {
        self.lifecycle.state()
    }

    pub fn events_sent(&self) -> u64 {
        self.sent
    }

    /// Encode `msg` as JSON and send it as a single-event batch.
    pub async fn handle_message(&mut self, msg: &Message) -> Result<()> {
        self.lifecycle.ensure_open()?;

        let body = msg.to_bytes()?;
        tracing::debug!(block = %self.name, bytes = body.len(), "sending message");

        if let Err(e) = self.producer.send_batch(vec![EventData::new(body)]).await {
            EVENTHUB_ERRORS_TOTAL
                .with_label_values(&[self.eventhub.as_str(), e.kind()])
                .inc();
            tracing::error!(block = %self.name, eventhub = %self.eventhub, error = %e, "send failed");
            return Err(e);
        }

        if self.lifecycle.state() == BlockState::Uninitialized {
            self.lifecycle.transition(BlockState::Validated)?;
            self.lifecycle.transition(BlockState::Streaming)?;
        }
        self.sent += 1;
        EVENTHUB_EVENTS_SENT_TOTAL
            .with_label_values(&[self.eventhub.as_str()])
            .inc();
        Ok(())
    }

    /// Close the producer. Calling it again is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        if self.lifecycle.state() == BlockState::Closed {
            return Ok(());
        }
        self.producer.close().await?;
        if self.lifecycle.state() != BlockState::Failed {
            self.lifecycle.transition(BlockState::Closed)?;
        }
        tracing::info!(block = %self.name, sent = self.sent, "event hub sink stopped");
        Ok(())
    }
}

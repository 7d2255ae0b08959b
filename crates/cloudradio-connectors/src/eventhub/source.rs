use std::collections::HashMap;

use cloudradio_core::{BlockState, Lifecycle, Message};
use cloudradio_observability::metrics::{EVENTHUB_ERRORS_TOTAL, EVENTHUB_EVENTS_RECEIVED_TOTAL};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{EventConsumer, EventHubAuth, EventHubConnector, EventHubSourceConfig};
use crate::error::{ConnectorError, Result};

/// Receives JSON events from one partition and publishes them as messages.
///
/// `start` spawns the receive task; messages arrive on the channel returned
/// by [`EventHubSource::take_output`]. `stop` closes the consumer and joins
/// the task.
#[derive(Debug)]
pub struct EventHubSource {
    name: String,
    auth: EventHubAuth,
    eventhub: String,
    config: EventHubSourceConfig,
    consumer: Option<Box<dyn EventConsumer>>,
    lifecycle: Lifecycle,
    output_tx: Option<mpsc::Sender<Message>>,
    output_rx: Option<mpsc::Receiver<Message>>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<u64>>>,
    received: u64,
}

impl EventHubSource {
    pub fn connect(
        name: impl Into<String>,
        config: EventHubSourceConfig,
        connector: &dyn EventHubConnector,
    ) -> Result<Self> {
        let (auth, eventhub) = config.hub.resolve()?;
        let consumer = connector.consumer(
            &auth,
            &eventhub,
            &config.consumer_group,
            &config.partition_id,
            &config.starting_position,
        )?;
        let (output_tx, output_rx) = mpsc::channel(config.output_capacity.max(1));

        Ok(Self {
            name: name.into(),
            auth,
            eventhub,
            config,
            consumer: Some(consumer),
            lifecycle: Lifecycle::new(),
            output_tx: Some(output_tx),
            output_rx: Some(output_rx),
            stop_tx: None,
            task: None,
            received: 0,
        })
    }

    pub fn from_config_map(
        name: impl Into<String>,
        config: &HashMap<String, String>,
        connector: &dyn EventHubConnector,
    ) -> Result<Self> {
        Self::connect(name, EventHubSourceConfig::from_config_map(config)?, connector)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn eventhub(&self) -> &str {
        &self.eventhub
    }

    pub fn state(&self) -> BlockState {
        self.lifecycle.state()
    }

    /// Messages received by the task, valid after `stop`.
    pub fn events_received(&self) -> u64 {
        self.received
    }

    /// The output channel. Only the first call returns it.
    pub fn take_output(&mut self) -> Option<mpsc::Receiver<Message>> {
        self.output_rx.take()
    }

    pub async fn start(&mut self) -> Result<()> {
        let (Some(consumer), Some(output)) = (self.consumer.take(), self.output_tx.take()) else {
            return Err(ConnectorError::RuntimeError(format!(
                "event hub source '{}' already started",
                self.name
            )));
        };
        self.lifecycle.transition(BlockState::Validated)?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(receive_loop(
            self.name.clone(),
            self.eventhub.clone(),
            consumer,
            output,
            stop_rx,
        ));
        self.stop_tx = Some(stop_tx);
        self.task = Some(task);
        self.lifecycle.transition(BlockState::Streaming)?;

        tracing::info!(
            block = %self.name,
            namespace = %self.auth.namespace(),
            eventhub = %self.eventhub,
            consumer_group = %self.config.consumer_group,
            partition = %self.config.partition_id,
            position = ?self.config.starting_position,
            "event hub source started"
        );
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            // The task may already have exited; that is fine.
            let _ = stop_tx.send(());
        }

        let result = match self.task.take() {
            Some(task) => match task.await {
                Ok(result) => result,
                Err(e) => Err(ConnectorError::RuntimeError(format!(
                    "receive task failed: {}",
                    e
                ))),
            },
            None => {
                if let Some(mut consumer) = self.consumer.take() {
                    consumer.close().await?;
                }
                Ok(0)
            }
        };

        match result {
            Ok(received) => {
                self.received = received;
                if !self.lifecycle.state().is_terminal() {
                    self.lifecycle.transition(BlockState::Closed)?;
                }
                tracing::info!(block = %self.name, received, "event hub source stopped");
                Ok(())
            }
            Err(e) => {
                self.lifecycle.fail();
                Err(e)
            }
        }
    }
}

async fn receive_loop(
    name: String,
    eventhub: String,
    mut consumer: Box<dyn EventConsumer>,
    output: mpsc::Sender<Message>,
    mut stop_rx: oneshot::Receiver<()>,
) -> Result<u64> {
    let mut received = 0u64;
    let mut outcome = Ok(());

    loop {
        let event = tokio::select! {
            _ = &mut stop_rx => break,
            event = consumer.receive() => event,
        };

        let event = match event {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(e) => {
                EVENTHUB_ERRORS_TOTAL
                    .with_label_values(&[eventhub.as_str(), e.kind()])
                    .inc();
                tracing::error!(block = %name, error = %e, "receive failed");
                outcome = Err(e);
                break;
            }
        };

        let msg = match Message::from_bytes(&event.body) {
            Ok(msg) => msg,
            Err(e) => {
                EVENTHUB_ERRORS_TOTAL
                    .with_label_values(&[eventhub.as_str(), "decode"])
                    .inc();
                tracing::warn!(
                    block = %name,
                    sequence_number = ?event.sequence_number,
                    error = %e,
                    "dropping event that is not JSON"
                );
                continue;
            }
        };

        tokio::select! {
            _ = &mut stop_rx => break,
            sent = output.send(msg) => {
                if sent.is_err() {
                    tracing::debug!(block = %name, "output channel closed");
                    break;
                }
            }
        }
        received += 1;
        EVENTHUB_EVENTS_RECEIVED_TOTAL
            .with_label_values(&[eventhub.as_str()])
            .inc();
    }

    consumer.close().await?;
    outcome.map(|_| received)
}

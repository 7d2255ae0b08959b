//! In-process event hubs.
//!
//! Each hub is one partition's append-only log. Producers append and wake
//! waiting consumers; consumers keep their own cursor. Offsets are the
//! decimal index of the event in the log.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;

use super::{EventConsumer, EventData, EventHubAuth, EventHubConnector, EventProducer, StartingPosition};
use crate::error::{ConnectorError, Result};

#[derive(Debug, Default)]
struct Hubs {
    logs: HashMap<String, Vec<EventData>>,
    fail_sends: bool,
    batches_sent: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryEventHubs {
    hubs: Arc<Mutex<Hubs>>,
    notify: Arc<Notify>,
}

impl MemoryEventHubs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Hubs> {
        self.hubs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_hub(&self, name: &str) {
        self.lock().logs.entry(name.to_string()).or_default();
    }

    /// Every event sent to `hub` so far.
    pub fn events(&self, hub: &str) -> Vec<EventData> {
        self.lock().logs.get(hub).cloned().unwrap_or_default()
    }

    pub fn batches_sent(&self) -> usize {
        self.lock().batches_sent
    }

    pub fn fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    /// Append a raw event body, as an outside producer would.
    pub fn publish(&self, hub: &str, body: impl Into<Bytes>) -> Result<()> {
        self.append(hub, vec![EventData::new(body)])
    }

    fn append(&self, hub: &str, events: Vec<EventData>) -> Result<()> {
        {
            let mut hubs = self.lock();
            if hubs.fail_sends {
                return Err(ConnectorError::ConnectionError(
                    "injected send failure".to_string(),
                ));
            }
            hubs.batches_sent += 1;
            let log = hubs
                .logs
                .get_mut(hub)
                .ok_or_else(|| ConnectorError::NotFound(format!("event hub '{}'", hub)))?;
            for mut event in events {
                let seq = log.len() as i64;
                event.sequence_number = Some(seq);
                event.offset = Some(seq.to_string());
                log.push(event);
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }

    fn event_at(&self, hub: &str, index: usize) -> Result<Option<EventData>> {
        let hubs = self.lock();
        let log = hubs
            .logs
            .get(hub)
            .ok_or_else(|| ConnectorError::NotFound(format!("event hub '{}'", hub)))?;
        Ok(log.get(index).cloned())
    }

    fn start_index(&self, hub: &str, position: &StartingPosition) -> Result<usize> {
        let hubs = self.lock();
        let log = hubs
            .logs
            .get(hub)
            .ok_or_else(|| ConnectorError::NotFound(format!("event hub '{}'", hub)))?;
        let after = |seq: i64| (seq + 1).clamp(0, log.len() as i64) as usize;
        match position {
            StartingPosition::Earliest => Ok(0),
            StartingPosition::Latest => Ok(log.len()),
            StartingPosition::SequenceNumber(seq) => Ok(after(*seq)),
            StartingPosition::Offset(offset) => {
                let seq = offset.parse::<i64>().map_err(|_| {
                    ConnectorError::ConfigError(format!("invalid offset: '{}'", offset))
                })?;
                Ok(after(seq))
            }
        }
    }
}

impl EventHubConnector for MemoryEventHubs {
    fn producer(&self, _auth: &EventHubAuth, eventhub: &str) -> Result<Arc<dyn EventProducer>> {
        Ok(Arc::new(MemoryEventProducer {
            hubs: self.clone(),
            eventhub: eventhub.to_string(),
            closed: Mutex::new(false),
        }))
    }

    fn consumer(
        &self,
        _auth: &EventHubAuth,
        eventhub: &str,
        _consumer_group: &str,
        _partition_id: &str,
        position: &StartingPosition,
    ) -> Result<Box<dyn EventConsumer>> {
        let cursor = self.start_index(eventhub, position)?;
        Ok(Box::new(MemoryEventConsumer {
            hubs: self.clone(),
            eventhub: eventhub.to_string(),
            cursor,
            closed: false,
        }))
    }
}

#[derive(Debug)]
pub struct MemoryEventProducer {
    hubs: MemoryEventHubs,
    eventhub: String,
    closed: Mutex<bool>,
}

#[async_trait]
impl EventProducer for MemoryEventProducer {
    fn eventhub(&self) -> &str {
        &self.eventhub
    }

    async fn send_batch(&self, events: Vec<EventData>) -> Result<()> {
        if *self.closed.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(ConnectorError::SinkError("producer is closed".to_string()));
        }
        self.hubs.append(&self.eventhub, events)
    }

    async fn close(&self) -> Result<()> {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner) = true;
        Ok(())
    }
}

#[derive(Debug)]
pub struct MemoryEventConsumer {
    hubs: MemoryEventHubs,
    eventhub: String,
    cursor: usize,
    closed: bool,
}

#[async_trait]
impl EventConsumer for MemoryEventConsumer {
    fn eventhub(&self) -> &str {
        &self.eventhub
    }

    async fn receive(&mut self) -> Result<Option<EventData>> {
        loop {
            let notified = self.hubs.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.closed {
                return Ok(None);
            }
            if let Some(event) = self.hubs.event_at(&self.eventhub, self.cursor)? {
                self.cursor += 1;
                return Ok(Some(event));
            }
            notified.await;
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::DefaultCredentialOptions;
    use std::time::Duration;

    fn auth() -> EventHubAuth {
        EventHubAuth::Default {
            namespace: "radio.servicebus.windows.net".to_string(),
            options: DefaultCredentialOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_send_assigns_sequence_numbers() {
        let hubs = MemoryEventHubs::new();
        hubs.create_hub("telemetry");
        let producer = hubs.producer(&auth(), "telemetry").unwrap();
        producer
            .send_batch(vec![EventData::new("a"), EventData::new("b")])
            .await
            .unwrap();

        let events = hubs.events("telemetry");
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].sequence_number, Some(1));
        assert_eq!(events[1].offset.as_deref(), Some("1"));
        assert_eq!(hubs.batches_sent(), 1);
    }

    #[tokio::test]
    async fn test_send_to_missing_hub() {
        let hubs = MemoryEventHubs::new();
        let producer = hubs.producer(&auth(), "nope").unwrap();
        let err = producer.send_batch(vec![EventData::new("a")]).await.unwrap_err();
        assert!(matches!(err, ConnectorError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_closed_producer_rejects_sends() {
        let hubs = MemoryEventHubs::new();
        hubs.create_hub("telemetry");
        let producer = hubs.producer(&auth(), "telemetry").unwrap();
        producer.close().await.unwrap();
        assert!(producer.send_batch(vec![EventData::new("a")]).await.is_err());
    }

    #[tokio::test]
    async fn test_starting_positions() {
        let hubs = MemoryEventHubs::new();
        hubs.create_hub("telemetry");
        for body in ["0", "1", "2"] {
            hubs.publish("telemetry", body).unwrap();
        }

        let open = |position: StartingPosition| {
            hubs.consumer(&auth(), "telemetry", "$Default", "0", &position)
                .unwrap()
        };

        let mut earliest = open(StartingPosition::Earliest);
        assert_eq!(earliest.receive().await.unwrap().unwrap().body, Bytes::from("0"));

        let mut after_seq = open(StartingPosition::SequenceNumber(0));
        assert_eq!(after_seq.receive().await.unwrap().unwrap().body, Bytes::from("1"));

        let mut after_offset = open(StartingPosition::Offset("1".to_string()));
        assert_eq!(after_offset.receive().await.unwrap().unwrap().body, Bytes::from("2"));

        let mut latest = open(StartingPosition::Latest);
        hubs.publish("telemetry", "3").unwrap();
        assert_eq!(latest.receive().await.unwrap().unwrap().body, Bytes::from("3"));
    }

    #[tokio::test]
    async fn test_receive_waits_for_publish() {
        let hubs = MemoryEventHubs::new();
        hubs.create_hub("telemetry");
        let mut consumer = hubs
            .consumer(&auth(), "telemetry", "$Default", "0", &StartingPosition::Latest)
            .unwrap();

        let publisher = hubs.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish("telemetry", "late").unwrap();
        });

        let event = tokio::time::timeout(Duration::from_secs(5), consumer.receive())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(event.body, Bytes::from("late"));
    }

    #[tokio::test]
    async fn test_closed_consumer_returns_none() {
        let hubs = MemoryEventHubs::new();
        hubs.create_hub("telemetry");
        hubs.publish("telemetry", "x").unwrap();
        let mut consumer = hubs
            .consumer(&auth(), "telemetry", "$Default", "0", &StartingPosition::Earliest)
            .unwrap();
        consumer.close().await.unwrap();
        assert!(consumer.receive().await.unwrap().is_none());
    }
}

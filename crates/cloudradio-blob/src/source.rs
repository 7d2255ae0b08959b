//! Blob Source
//!
//! Streams the items of one blob out of the block. The download arrives in
//! chunks of arbitrary length; the [`Prefetcher`] reassembles them into whole
//! items and the [`ReadBuffer`] serves them to work calls.
//!
//! The blob's properties are fetched on the first work call so a missing
//! blob fails before any download is opened. With `repeat` set, the source
//! reopens the download at the end and plays the blob again.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cloudradio_core::{
    BlockState, ItemFormat, ItemSpec, Lifecycle, ReadBuffer, SourceBlock, WorkStatus,
};
use cloudradio_observability::metrics::SOURCE_PASSES_TOTAL;
use serde::{Deserialize, Serialize};

use crate::azure::{AzureBlobService, RetryPolicy};
use crate::client::{BlobServiceClient, BlockBlobClient};
use crate::config::{
    default_queue_size, default_retry_total, default_vlen, parse_or, required, AuthConfig,
};
use crate::error::{BlobError, Result};
use crate::prefetch::Prefetcher;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobSourceConfig {
    #[serde(default)]
    pub auth: AuthConfig,

    pub container: String,

    pub blob: String,

    #[serde(default)]
    pub item_format: ItemFormat,

    #[serde(default = "default_vlen")]
    pub vlen: usize,

    /// Reassembled item arrays kept ahead of the reader.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Replay the blob from the start after the last item.
    #[serde(default)]
    pub repeat: bool,

    #[serde(default = "default_retry_total")]
    pub retry_total: usize,
}

impl BlobSourceConfig {
    pub fn new(container: impl Into<String>, blob: impl Into<String>) -> Self {
        Self {
            auth: AuthConfig::default(),
            container: container.into(),
            blob: blob.into(),
            item_format: ItemFormat::default(),
            vlen: default_vlen(),
            queue_size: default_queue_size(),
            repeat: false,
            retry_total: default_retry_total(),
        }
    }

    pub fn from_config_map(config: &HashMap<String, String>) -> Result<Self> {
        let item_format = config
            .get("item.format")
            .map(|s| ItemFormat::from_str_config(s))
            .transpose()?
            .unwrap_or_default();

        let cfg = Self {
            auth: AuthConfig::from_config_map(config)?,
            container: required(config, "container")?,
            blob: required(config, "blob")?,
            item_format,
            vlen: parse_or(config, "item.vlen", default_vlen())?,
            queue_size: parse_or(config, "queue.size", default_queue_size())?,
            repeat: parse_or(config, "repeat", false)?,
            retry_total: parse_or(config, "retry.total", default_retry_total())?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.container.is_empty() || self.blob.is_empty() {
            return Err(BlobError::Config(
                "container and blob must not be empty".to_string(),
            ));
        }
        if self.queue_size == 0 {
            return Err(BlobError::Config("queue.size must be at least 1".to_string()));
        }
        self.item_spec()?;
        Ok(())
    }

    pub fn item_spec(&self) -> Result<ItemSpec> {
        Ok(ItemSpec::new(self.item_format, self.vlen)?)
    }
}

pub struct BlobSource {
    name: String,
    config: BlobSourceConfig,
    item: ItemSpec,
    service: Arc<dyn BlobServiceClient>,
    lifecycle: Lifecycle,
    client: Option<Arc<dyn BlockBlobClient>>,
    prefetcher: Option<Prefetcher>,
    buffer: ReadBuffer,
    blob_size: u64,
    passes: u64,
    pass_items: u64,
    items_produced: u64,
    finished: bool,
}

impl std::fmt::Debug for BlobSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobSource")
            .field("name", &self.name)
            .field("container", &self.config.container)
            .field("blob", &self.config.blob)
            .field("state", &self.lifecycle.state())
            .field("passes", &self.passes)
            .field("items_produced", &self.items_produced)
            .finish()
    }
}

impl BlobSource {
    pub fn new(name: impl Into<String>, config: BlobSourceConfig) -> Result<Self> {
        config.validate()?;
        let auth = config.auth.resolve()?;
        let service = AzureBlobService::new(
            auth,
            RetryPolicy {
                total: config.retry_total,
            },
        );
        Self::with_service(name, config, Arc::new(service))
    }

    pub fn with_service(
        name: impl Into<String>,
        config: BlobSourceConfig,
        service: Arc<dyn BlobServiceClient>,
    ) -> Result<Self> {
        config.validate()?;
        let item = config.item_spec()?;
        Ok(Self {
            name: name.into(),
            buffer: ReadBuffer::new(item.item_size()),
            config,
            item,
            service,
            lifecycle: Lifecycle::new(),
            client: None,
            prefetcher: None,
            blob_size: 0,
            passes: 0,
            pass_items: 0,
            items_produced: 0,
            finished: false,
        })
    }

    pub fn from_config_map(name: impl Into<String>, config: &HashMap<String, String>) -> Result<Self> {
        Self::new(name, BlobSourceConfig::from_config_map(config)?)
    }

    pub fn config(&self) -> &BlobSourceConfig {
        &self.config
    }

    pub fn state(&self) -> BlockState {
        self.lifecycle.state()
    }

    pub fn items_produced(&self) -> u64 {
        self.items_produced
    }

    /// Completed passes over the blob.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Blob size in bytes, known after the first work call.
    pub fn blob_size(&self) -> u64 {
        self.blob_size
    }

    async fn ensure_streaming(&mut self) -> Result<()> {
        match self.lifecycle.state() {
            BlockState::Streaming => return Ok(()),
            BlockState::Uninitialized => {}
            other => {
                return Err(cloudradio_core::Error::InvalidTransition {
                    from: other,
                    to: BlockState::Streaming,
                }
                .into())
            }
        }

        let client = self
            .service
            .get_blob_client(&self.config.container, &self.config.blob)?;
        let properties = client.get_properties().await?;
        self.lifecycle.transition(BlockState::Validated)?;

        if properties.size % self.item.item_size() as u64 != 0 {
            tracing::warn!(
                block = %self.name,
                size = properties.size,
                item_size = self.item.item_size(),
                "blob size is not a whole number of items"
            );
        }

        let stream = client.download_stream().await?;
        self.prefetcher = Some(Prefetcher::new(
            &self.config.container,
            stream,
            self.item.item_size(),
            self.config.queue_size,
        )?);
        self.client = Some(client);
        self.blob_size = properties.size;
        self.lifecycle.transition(BlockState::Streaming)?;

        tracing::info!(
            block = %self.name,
            container = %self.config.container,
            blob = %self.config.blob,
            size = properties.size,
            repeat = self.config.repeat,
            "blob source streaming"
        );
        Ok(())
    }

    async fn work_inner(&mut self, output: &mut [u8]) -> Result<WorkStatus> {
        self.lifecycle.ensure_open()?;
        if self.finished {
            return Ok(WorkStatus::Done);
        }
        self.ensure_streaming().await?;

        let Some(prefetcher) = self.prefetcher.as_mut() else {
            return Err(BlobError::Worker("download is not open".to_string()));
        };

        if self.buffer.is_exhausted() {
            prefetcher.prefetch().await?;
            if let Some(array) = prefetcher.next_array() {
                self.buffer.replace(array);
            }
        }

        let n = self.buffer.fill(output);
        if n > 0 {
            self.items_produced += n as u64;
            self.pass_items += n as u64;
            return Ok(WorkStatus::Produced(n));
        }

        if !(self.buffer.is_exhausted() && prefetcher.is_drained()) {
            // Output too small for one item.
            return Ok(WorkStatus::Produced(0));
        }

        self.passes += 1;
        SOURCE_PASSES_TOTAL
            .with_label_values(&[self.name.as_str()])
            .inc();

        if self.config.repeat && self.pass_items > 0 {
            let client = self
                .client
                .as_ref()
                .ok_or_else(|| BlobError::Worker("download is not open".to_string()))?;
            let stream = client.download_stream().await?;
            prefetcher.restart(stream);
            self.buffer.clear();
            self.pass_items = 0;
            tracing::debug!(block = %self.name, passes = self.passes, "replaying blob");
            return Ok(WorkStatus::Produced(0));
        }

        if self.config.repeat {
            tracing::warn!(block = %self.name, "blob holds no whole items; not repeating");
        }
        self.finished = true;
        tracing::info!(
            block = %self.name,
            items = self.items_produced,
            "blob source reached end of blob"
        );
        Ok(WorkStatus::Done)
    }
}

#[async_trait]
impl SourceBlock for BlobSource {
    type Error = BlobError;

    async fn start(&mut self) -> Result<()> {
        tracing::info!(
            block = %self.name,
            container = %self.config.container,
            blob = %self.config.blob,
            "blob source started"
        );
        Ok(())
    }

    async fn work(&mut self, output: &mut [u8]) -> Result<WorkStatus> {
        let result = self.work_inner(output).await;
        if let Err(e) = &result {
            tracing::error!(block = %self.name, error = %e, "blob source failed");
            self.lifecycle.fail();
        }
        result
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(mut prefetcher) = self.prefetcher.take() {
            prefetcher.stop();
        }
        self.client = None;
        self.buffer.clear();

        match self.lifecycle.state() {
            BlockState::Closed | BlockState::Failed => Ok(()),
            _ => {
                self.lifecycle.transition(BlockState::Closed)?;
                tracing::info!(
                    block = %self.name,
                    items = self.items_produced,
                    passes = self.passes,
                    "blob source stopped"
                );
                Ok(())
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn item_size(&self) -> usize {
        self.item.item_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBlobService;

    fn items(range: std::ops::Range<u32>) -> Vec<u8> {
        range.flat_map(|i| i.to_le_bytes()).collect()
    }

    fn setup(data: Vec<u8>, repeat: bool) -> (MemoryBlobService, BlobSource) {
        let service = MemoryBlobService::new();
        service.create_container("radio");
        service.put_blob("radio", "capture.bin", data);
        let config = BlobSourceConfig {
            item_format: ItemFormat::Int32,
            repeat,
            ..BlobSourceConfig::new("radio", "capture.bin")
        };
        let source = BlobSource::with_service("source", config, Arc::new(service.clone())).unwrap();
        (service, source)
    }

    async fn read_all(source: &mut BlobSource, out_items: usize) -> Vec<u8> {
        let mut collected = Vec::new();
        let mut out = vec![0u8; out_items * 4];
        loop {
            match source.work(&mut out).await.unwrap() {
                WorkStatus::Produced(n) => collected.extend_from_slice(&out[..n * 4]),
                WorkStatus::Done => return collected,
            }
        }
    }

    #[test]
    fn test_config_from_map() {
        let map: HashMap<String, String> = [
            ("container", "radio"),
            ("blob", "capture"),
            ("repeat", "true"),
            ("item.format", "float32"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let cfg = BlobSourceConfig::from_config_map(&map).unwrap();
        assert!(cfg.repeat);
        assert_eq!(cfg.queue_size, 4);
        assert_eq!(cfg.item_format, ItemFormat::Float32);
    }

    #[tokio::test]
    async fn test_reads_whole_blob_across_odd_chunks() {
        let (service, mut source) = setup(items(0..100), false);
        service.set_chunk_sizes(vec![7, 13, 1]);
        assert_eq!(read_all(&mut source, 9).await, items(0..100));
        assert_eq!(source.items_produced(), 100);
        assert_eq!(source.passes(), 1);
        assert_eq!(source.blob_size(), 400);

        // Done stays Done.
        let mut out = [0u8; 4];
        assert_eq!(source.work(&mut out).await.unwrap(), WorkStatus::Done);
        source.stop().await.unwrap();
        assert_eq!(source.state(), BlockState::Closed);
    }

    #[tokio::test]
    async fn test_missing_blob_fails_before_download() {
        let service = MemoryBlobService::new();
        service.create_container("radio");
        let mut source = BlobSource::with_service(
            "source",
            BlobSourceConfig::new("radio", "missing.bin"),
            Arc::new(service.clone()),
        )
        .unwrap();

        let mut out = [0u8; 64];
        assert!(source.work(&mut out).await.unwrap_err().is_not_found());
        assert_eq!(service.download_requests(), 0);
        assert_eq!(source.state(), BlockState::Failed);
        source.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_small_output_produces_zero() {
        let (_service, mut source) = setup(items(0..4), false);
        let mut out = [0u8; 3];
        assert_eq!(source.work(&mut out).await.unwrap(), WorkStatus::Produced(0));
        let mut out = [0u8; 4];
        assert_eq!(source.work(&mut out).await.unwrap(), WorkStatus::Produced(1));
    }

    #[tokio::test]
    async fn test_repeat_replays_blob() {
        let (service, mut source) = setup(items(0..10), true);
        let mut collected = Vec::new();
        let mut out = vec![0u8; 3 * 4];
        while source.passes() < 3 {
            if let WorkStatus::Produced(n) = source.work(&mut out).await.unwrap() {
                collected.extend_from_slice(&out[..n * 4]);
            }
        }
        let expected: Vec<u8> = [items(0..10), items(0..10), items(0..10)].concat();
        assert_eq!(collected, expected);
        assert_eq!(service.download_requests(), 4);
    }

    #[tokio::test]
    async fn test_repeat_on_empty_blob_ends() {
        let (_service, mut source) = setup(Vec::new(), true);
        let mut out = [0u8; 16];
        assert_eq!(source.work(&mut out).await.unwrap(), WorkStatus::Done);
    }

    #[tokio::test]
    async fn test_trailing_partial_item_dropped() {
        let mut data = items(0..5);
        data.extend_from_slice(&[0xAA, 0xBB]);
        let (_service, mut source) = setup(data, false);
        assert_eq!(read_all(&mut source, 2).await, items(0..5));
    }
}

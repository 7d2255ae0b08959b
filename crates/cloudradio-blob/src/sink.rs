//! Blob Sink
//!
//! Streams items into a single block blob. Items are collected in an
//! [`UploadWindow`] of `block_len` items; every full window goes through a
//! bounded queue to an [`UploadStager`], which stages it as one block. At
//! stop the partial window is staged too and the whole block list is
//! committed in order.
//!
//! ## Work call
//!
//! ```text
//! work(input)
//!   ├─ first call: validate container, open queue (+ spawn stager)
//!   ├─ window full?  re-offer it to the queue
//!   ├─ window open?  copy min(remaining, input) items
//!   ├─ just filled?  offer it to the queue
//!   └─ inline mode:  stage everything queued
//! ```
//!
//! A full window that finds the queue full stays put and the call consumes
//! nothing, so the host keeps the input and calls again. After
//! `max_full_retries` consecutive refusals the sink waits for queue space
//! instead.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use cloudradio_core::{
    bounded, BlockState, Enqueue, ItemFormat, ItemSpec, Lifecycle, QueueReceiver, QueueSender,
    SinkBlock, UploadWindow,
};
use cloudradio_observability::metrics::{SINK_BLOCKING_HANDOFFS_TOTAL, SINK_QUEUE_FULL_TOTAL};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::azure::{AzureBlobService, RetryPolicy};
use crate::client::{BlobServiceClient, BlockIdList};
use crate::config::{
    default_queue_size, default_retry_total, default_vlen, parse_opt, parse_or, required,
    AuthConfig, StagingMode,
};
use crate::error::{BlobError, Result};
use crate::sigmf::{data_blob_name, meta_blob_name, SigmfMeta, SigmfOptions};
use crate::stager::UploadStager;

fn default_block_len() -> usize {
    500_000
}

fn default_max_full_retries() -> u32 {
    8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobSinkConfig {
    #[serde(default)]
    pub auth: AuthConfig,

    pub container: String,

    pub blob: String,

    #[serde(default)]
    pub item_format: ItemFormat,

    #[serde(default = "default_vlen")]
    pub vlen: usize,

    /// Items per staged block.
    #[serde(default = "default_block_len")]
    pub block_len: usize,

    /// Full windows that may wait for staging.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    #[serde(default)]
    pub staging_mode: StagingMode,

    /// Consecutive queue-full refusals before a blocking hand-off. Zero hands
    /// off immediately.
    #[serde(default = "default_max_full_retries")]
    pub max_full_retries: u32,

    #[serde(default = "default_retry_total")]
    pub retry_total: usize,

    #[serde(default)]
    pub sigmf: SigmfOptions,
}

impl BlobSinkConfig {
    pub fn new(container: impl Into<String>, blob: impl Into<String>) -> Self {
        Self {
            auth: AuthConfig::default(),
            container: container.into(),
            blob: blob.into(),
            item_format: ItemFormat::default(),
            vlen: default_vlen(),
            block_len: default_block_len(),
            queue_size: default_queue_size(),
            staging_mode: StagingMode::default(),
            max_full_retries: default_max_full_retries(),
            retry_total: default_retry_total(),
            sigmf: SigmfOptions::default(),
        }
    }

    pub fn from_config_map(config: &HashMap<String, String>) -> Result<Self> {
        let item_format = config
            .get("item.format")
            .map(|s| ItemFormat::from_str_config(s))
            .transpose()?
            .unwrap_or_default();
        let staging_mode = config
            .get("staging.mode")
            .map(|s| StagingMode::from_str_config(s))
            .transpose()?
            .unwrap_or_default();

        let sigmf = SigmfOptions {
            enabled: parse_or(config, "sigmf.enabled", false)?,
            sample_rate: parse_opt(config, "sigmf.sample_rate")?,
            center_freq: parse_opt(config, "sigmf.center_freq")?,
            author: config.get("sigmf.author").cloned(),
            description: config.get("sigmf.description").cloned(),
            hw: config.get("sigmf.hw").cloned(),
        };

        let cfg = Self {
            auth: AuthConfig::from_config_map(config)?,
            container: required(config, "container")?,
            blob: required(config, "blob")?,
            item_format,
            vlen: parse_or(config, "item.vlen", default_vlen())?,
            block_len: parse_or(config, "block.len", default_block_len())?,
            queue_size: parse_or(config, "queue.size", default_queue_size())?,
            staging_mode,
            max_full_retries: parse_or(
                config,
                "backpressure.max_full_retries",
                default_max_full_retries(),
            )?,
            retry_total: parse_or(config, "retry.total", default_retry_total())?,
            sigmf,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.container.is_empty() {
            return Err(BlobError::Config("container must not be empty".to_string()));
        }
        if self.blob.is_empty() {
            return Err(BlobError::Config("blob must not be empty".to_string()));
        }
        if self.block_len == 0 {
            return Err(BlobError::Config("block.len must be at least 1".to_string()));
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

    /// Name of the blob the samples land in.
    pub fn data_blob(&self) -> String {
        data_blob_name(&self.blob, self.sigmf.enabled)
    }
}

pub struct BlobSink {
    name: String,
    config: BlobSinkConfig,
    item: ItemSpec,
    service: Arc<dyn BlobServiceClient>,
    lifecycle: Lifecycle,
    window: UploadWindow,
    tx: Option<QueueSender<Bytes>>,
    // Inline mode only.
    rx: Option<QueueReceiver<Bytes>>,
    stager: Option<UploadStager>,
    // Background mode only.
    worker: Option<JoinHandle<Result<UploadStager>>>,
    full_streak: u32,
    started_at: Option<DateTime<Utc>>,
    items_consumed: u64,
    committed: Option<BlockIdList>,
}

impl std::fmt::Debug for BlobSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobSink")
            .field("name", &self.name)
            .field("container", &self.config.container)
            .field("blob", &self.config.blob)
            .field("state", &self.lifecycle.state())
            .field("window", &self.window.len())
            .field("items_consumed", &self.items_consumed)
            .finish()
    }
}

impl BlobSink {
    /// Sink against Azure, authenticated from `config.auth`.
    pub fn new(name: impl Into<String>, config: BlobSinkConfig) -> Result<Self> {
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
        config: BlobSinkConfig,
        service: Arc<dyn BlobServiceClient>,
    ) -> Result<Self> {
        config.validate()?;
        let item = config.item_spec()?;
        let window = UploadWindow::new(config.block_len, item.item_size())?;
        Ok(Self {
            name: name.into(),
            config,
            item,
            service,
            lifecycle: Lifecycle::new(),
            window,
            tx: None,
            rx: None,
            stager: None,
            worker: None,
            full_streak: 0,
            started_at: None,
            items_consumed: 0,
            committed: None,
        })
    }

    pub fn from_config_map(name: impl Into<String>, config: &HashMap<String, String>) -> Result<Self> {
        Self::new(name, BlobSinkConfig::from_config_map(config)?)
    }

    pub fn config(&self) -> &BlobSinkConfig {
        &self.config
    }

    pub fn state(&self) -> BlockState {
        self.lifecycle.state()
    }

    pub fn items_consumed(&self) -> u64 {
        self.items_consumed
    }

    /// Block ids of the committed blob, once stopped.
    pub fn committed_block_ids(&self) -> Option<&BlockIdList> {
        self.committed.as_ref()
    }

    /// Items currently held in the window.
    pub fn window_len(&self) -> usize {
        self.window.len()
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

        let blob = self.config.data_blob();
        let client = self.service.get_blob_client(&self.config.container, &blob)?;
        client.validate_container().await?;
        self.lifecycle.transition(BlockState::Validated)?;

        let (tx, rx) = bounded(self.config.queue_size)?;
        let stager = UploadStager::new(client);
        match self.config.staging_mode {
            StagingMode::Inline => {
                self.rx = Some(rx);
                self.stager = Some(stager);
            }
            StagingMode::Background => {
                self.worker = Some(tokio::spawn(stager.run(rx)));
            }
        }
        self.tx = Some(tx);
        self.started_at = Some(Utc::now());
        self.lifecycle.transition(BlockState::Streaming)?;

        tracing::info!(
            block = %self.name,
            container = %self.config.container,
            blob = %blob,
            block_len = self.config.block_len,
            item_size = self.item.item_size(),
            staging = ?self.config.staging_mode,
            "blob sink streaming"
        );
        Ok(())
    }

    async fn work_inner(&mut self, input: &[u8]) -> Result<usize> {
        self.lifecycle.ensure_open()?;
        self.ensure_streaming().await?;
        self.check_worker().await?;

        if self.window.is_full() {
            self.offer_window().await?;
        }

        let consumed = if self.window.is_full() {
            0
        } else {
            self.window.accumulate(input)?
        };
        if consumed > 0 && self.window.is_full() {
            self.offer_window().await?;
        }

        self.drain_inline().await?;
        self.items_consumed += consumed as u64;
        Ok(consumed)
    }

    /// Offer a full window to the queue, falling back to a blocking push
    /// once the refusal streak runs out.
    async fn offer_window(&mut self) -> Result<()> {
        let tx = self
            .tx
            .clone()
            .ok_or_else(|| BlobError::Worker("upload queue is not open".to_string()))?;

        match self.window.enqueue_if_full(&tx)? {
            Enqueue::NotFull => {}
            Enqueue::Enqueued => self.full_streak = 0,
            Enqueue::QueueFull => {
                self.full_streak += 1;
                SINK_QUEUE_FULL_TOTAL
                    .with_label_values(&[self.name.as_str()])
                    .inc();

                if self.full_streak > self.config.max_full_retries {
                    SINK_BLOCKING_HANDOFFS_TOTAL
                        .with_label_values(&[self.name.as_str()])
                        .inc();
                    tracing::debug!(
                        block = %self.name,
                        refusals = self.full_streak,
                        "queue still full, waiting for space"
                    );
                    if let Some(window) = self.window.take_remaining() {
                        self.drain_inline().await?;
                        if let Err(e) = tx.push(window).await {
                            return Err(self.worker_error_or(e.into()).await);
                        }
                    }
                    self.full_streak = 0;
                } else {
                    tracing::debug!(block = %self.name, "queue full, will requeue");
                }
            }
        }
        Ok(())
    }

    async fn drain_inline(&mut self) -> Result<usize> {
        match (self.stager.as_mut(), self.rx.as_mut()) {
            (Some(stager), Some(rx)) => stager.drain_queue_to_remote(rx).await,
            _ => Ok(0),
        }
    }

    /// Surface an error from a background stager that has already exited.
    async fn check_worker(&mut self) -> Result<()> {
        let finished = self.worker.as_ref().is_some_and(|h| h.is_finished());
        if !finished {
            return Ok(());
        }
        match self.worker.take() {
            Some(handle) => match handle.await {
                Ok(Ok(_)) => Err(BlobError::Worker("stager exited early".to_string())),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(BlobError::Worker(e.to_string())),
            },
            None => Ok(()),
        }
    }

    /// The queue closed under us: prefer the worker's own error.
    async fn worker_error_or(&mut self, fallback: BlobError) -> BlobError {
        match self.worker.take() {
            Some(handle) => match handle.await {
                Ok(Err(e)) => e,
                Err(e) => BlobError::Worker(e.to_string()),
                Ok(Ok(_)) => fallback,
            },
            None => fallback,
        }
    }

    async fn finalize(&mut self) -> Result<BlockIdList> {
        self.drain_inline().await?;

        let tx = self
            .tx
            .take()
            .ok_or_else(|| BlobError::Worker("upload queue is not open".to_string()))?;
        if let Some(rest) = self.window.take_remaining() {
            if let Err(e) = tx.push(rest).await {
                drop(tx);
                return Err(self.worker_error_or(e.into()).await);
            }
        }
        drop(tx);

        let stager = match self.worker.take() {
            Some(handle) => handle
                .await
                .map_err(|e| BlobError::Worker(e.to_string()))??,
            None => {
                let mut stager = self
                    .stager
                    .take()
                    .ok_or_else(|| BlobError::Worker("stager missing".to_string()))?;
                if let Some(rx) = self.rx.as_mut() {
                    stager.drain_queue_to_remote(rx).await?;
                }
                self.rx = None;
                stager
            }
        };

        let ids = stager.commit().await?;
        if self.config.sigmf.enabled {
            self.write_sigmf_meta().await?;
        }
        Ok(ids)
    }

    async fn write_sigmf_meta(&self) -> Result<()> {
        let blob = meta_blob_name(&self.config.blob);
        let client = self.service.get_blob_client(&self.config.container, &blob)?;
        let meta = SigmfMeta::new(
            self.item.format(),
            &self.config.sigmf,
            self.started_at.unwrap_or_else(Utc::now),
        );
        client.upload(Bytes::from(meta.to_json_bytes()?)).await?;
        tracing::debug!(block = %self.name, blob = %blob, "wrote SigMF metadata");
        Ok(())
    }
}

#[async_trait]
impl SinkBlock for BlobSink {
    type Error = BlobError;

    async fn start(&mut self) -> Result<()> {
        tracing::info!(
            block = %self.name,
            container = %self.config.container,
            blob = %self.config.blob,
            "blob sink started"
        );
        Ok(())
    }

    async fn work(&mut self, input: &[u8]) -> Result<usize> {
        let result = self.work_inner(input).await;
        if let Err(e) = &result {
            // A split item is the caller's mistake; the stream is still sound.
            if !matches!(e, BlobError::Core(cloudradio_core::Error::PartialItem { .. })) {
                tracing::error!(block = %self.name, error = %e, "blob sink failed");
                self.lifecycle.fail();
            }
        }
        result
    }

    async fn stop(&mut self) -> Result<()> {
        match self.lifecycle.state() {
            BlockState::Closed => return Ok(()),
            BlockState::Failed => {
                return Err(cloudradio_core::Error::InvalidTransition {
                    from: BlockState::Failed,
                    to: BlockState::Closed,
                }
                .into())
            }
            BlockState::Uninitialized => {
                // No items arrived; still validate so an empty blob gets committed.
                if let Err(e) = self.ensure_streaming().await {
                    tracing::error!(block = %self.name, error = %e, "blob sink validation failed");
                    self.lifecycle.fail();
                    return Err(e);
                }
            }
            BlockState::Validated | BlockState::Streaming => {}
        }

        match self.finalize().await {
            Ok(ids) => {
                tracing::info!(
                    block = %self.name,
                    blocks = ids.len(),
                    items = self.items_consumed,
                    "blob sink stopped"
                );
                self.committed = Some(ids);
                self.lifecycle.transition(BlockState::Closed)?;
                Ok(())
            }
            Err(e) => {
                tracing::error!(block = %self.name, error = %e, "blob sink finalize failed");
                self.lifecycle.fail();
                Err(e)
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

    fn sink_config(block_len: usize, queue_size: usize) -> BlobSinkConfig {
        BlobSinkConfig {
            item_format: ItemFormat::Int32,
            block_len,
            queue_size,
            ..BlobSinkConfig::new("radio", "capture.bin")
        }
    }

    fn setup(config: BlobSinkConfig) -> (MemoryBlobService, BlobSink) {
        let service = MemoryBlobService::new();
        service.create_container("radio");
        let sink = BlobSink::with_service("sink", config, Arc::new(service.clone())).unwrap();
        (service, sink)
    }

    #[test]
    fn test_config_from_map_defaults() {
        let map: HashMap<String, String> = [("container", "radio"), ("blob", "capture")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let cfg = BlobSinkConfig::from_config_map(&map).unwrap();
        assert_eq!(cfg.block_len, 500_000);
        assert_eq!(cfg.queue_size, 4);
        assert_eq!(cfg.max_full_retries, 8);
        assert_eq!(cfg.staging_mode, StagingMode::Inline);
        assert_eq!(cfg.item_spec().unwrap().item_size(), 8);
        assert_eq!(cfg.data_blob(), "capture");
    }

    #[test]
    fn test_config_from_map_overrides() {
        let map: HashMap<String, String> = [
            ("container", "radio"),
            ("blob", "capture"),
            ("item.format", "ri16_le"),
            ("item.vlen", "1024"),
            ("block.len", "10"),
            ("staging.mode", "background"),
            ("sigmf.enabled", "true"),
            ("sigmf.sample_rate", "1e6"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let cfg = BlobSinkConfig::from_config_map(&map).unwrap();
        assert_eq!(cfg.item_format, ItemFormat::Int16);
        assert_eq!(cfg.vlen, 1024);
        assert_eq!(cfg.block_len, 10);
        assert_eq!(cfg.staging_mode, StagingMode::Background);
        assert_eq!(cfg.sigmf.sample_rate, Some(1e6));
        assert_eq!(cfg.data_blob(), "capture.sigmf-data");
    }

    #[test]
    fn test_config_requires_destination() {
        let map: HashMap<String, String> = [("container", "radio")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert!(matches!(
            BlobSinkConfig::from_config_map(&map).unwrap_err(),
            BlobError::Config(_)
        ));
        assert!(BlobSinkConfig {
            block_len: 0,
            ..BlobSinkConfig::new("radio", "x")
        }
        .validate()
        .is_err());
    }

    #[tokio::test]
    async fn test_first_work_call_validates() {
        let (service, mut sink) = setup(sink_config(4, 2));
        assert_eq!(sink.state(), BlockState::Uninitialized);
        assert_eq!(sink.work(&items(0..2)).await.unwrap(), 2);
        assert_eq!(sink.state(), BlockState::Streaming);
        assert_eq!(service.stage_requests(), 0);
    }

    #[tokio::test]
    async fn test_missing_container_fails_block() {
        let service = MemoryBlobService::new();
        let mut sink =
            BlobSink::with_service("sink", sink_config(4, 2), Arc::new(service.clone())).unwrap();
        let err = sink.work(&items(0..1)).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(sink.state(), BlockState::Failed);
        assert!(sink.work(&items(0..1)).await.is_err());
        assert!(sink.stop().await.is_err());
    }

    #[tokio::test]
    async fn test_partial_item_does_not_fail_block() {
        let (_service, mut sink) = setup(sink_config(4, 2));
        assert!(sink.work(&[0u8; 6]).await.is_err());
        assert_eq!(sink.state(), BlockState::Streaming);
        assert_eq!(sink.work(&items(0..1)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_full_window_staged_inline() {
        let (service, mut sink) = setup(sink_config(4, 2));
        assert_eq!(sink.work(&items(0..6)).await.unwrap(), 4);
        assert_eq!(service.stage_requests(), 1);
        assert_eq!(sink.window_len(), 0);
        assert_eq!(sink.work(&items(4..6)).await.unwrap(), 2);

        sink.stop().await.unwrap();
        assert_eq!(sink.state(), BlockState::Closed);
        assert_eq!(sink.committed_block_ids().unwrap().len(), 2);
        assert_eq!(service.blob_data("radio", "capture.bin").unwrap(), items(0..6));
    }

    #[tokio::test]
    async fn test_stop_before_work_commits_empty_blob() {
        let service = MemoryBlobService::new();
        service.create_container("radio");
        let mut sink = BlobSink::with_service(
            "sink",
            BlobSinkConfig::new("radio", "empty.bin"),
            Arc::new(service.clone()),
        )
        .unwrap();
        sink.start().await.unwrap();
        sink.stop().await.unwrap();

        assert_eq!(sink.state(), BlockState::Closed);
        assert_eq!(service.commit_requests(), 1);
        assert!(service.blob_data("radio", "empty.bin").unwrap().is_empty());
        assert!(sink.committed_block_ids().unwrap().is_empty());

        sink.stop().await.unwrap();
        assert_eq!(service.commit_requests(), 1);
        assert!(sink.work(&items(0..1)).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_before_work_checks_container() {
        let service = MemoryBlobService::new();
        let mut sink =
            BlobSink::with_service("sink", sink_config(4, 2), Arc::new(service.clone())).unwrap();
        assert!(sink.stop().await.unwrap_err().is_not_found());
        assert_eq!(sink.state(), BlockState::Failed);
        assert_eq!(service.commit_requests(), 0);
    }

    #[test]
    fn test_oversized_block_len_rejected() {
        let map: HashMap<String, String> = [
            ("container", "radio"),
            ("blob", "capture"),
            ("block.len", "4611686018427387904"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let cfg = BlobSinkConfig::from_config_map(&map).unwrap();
        let err = BlobSink::with_service("sink", cfg, Arc::new(MemoryBlobService::new())).unwrap_err();
        assert!(matches!(err, BlobError::Core(cloudradio_core::Error::Config(_))));
    }

    #[tokio::test]
    async fn test_stage_failure_fails_block() {
        let (service, mut sink) = setup(sink_config(2, 1));
        service.fail_stages(true);
        assert!(sink.work(&items(0..2)).await.is_err());
        assert_eq!(sink.state(), BlockState::Failed);
    }

    #[tokio::test]
    async fn test_commit_failure_fails_block() {
        let (service, mut sink) = setup(sink_config(2, 1));
        sink.work(&items(0..3)).await.unwrap();
        sink.work(&items(2..3)).await.unwrap();
        service.fail_commits(true);

        assert!(sink.stop().await.is_err());
        assert_eq!(sink.state(), BlockState::Failed);
        assert!(service.blob_data("radio", "capture.bin").is_none());
    }
}

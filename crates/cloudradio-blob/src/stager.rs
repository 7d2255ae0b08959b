//! Upload Stager
//!
//! The transfer side of the sink: pops full windows off the hand-off queue,
//! stages each one as a block under a fresh id and remembers the ids in
//! staging order for the single commit at shutdown.
//!
//! ## Modes
//!
//! - **Inline**: the sink calls [`UploadStager::drain_queue_to_remote`] from
//!   its own work call; only windows already queued are staged.
//! - **Background**: [`UploadStager::run`] owns the receiver on a spawned
//!   task and waits for windows until the sink drops its sender.
//!
//! [`UploadStager::commit`] consumes the stager, so a block list can only be
//! committed once.

use std::sync::Arc;

use bytes::Bytes;
use cloudradio_core::QueueReceiver;
use cloudradio_observability::metrics::{
    BLOB_BLOCKS_STAGED_TOTAL, BLOB_BYTES_STAGED_TOTAL, BLOB_COMMITS_TOTAL,
};

use crate::client::{BlockBlobClient, BlockId, BlockIdList};
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StagerStats {
    pub blocks: u64,
    pub bytes: u64,
}

#[derive(Debug)]
pub struct UploadStager {
    client: Arc<dyn BlockBlobClient>,
    block_ids: BlockIdList,
    stats: StagerStats,
}

impl UploadStager {
    pub fn new(client: Arc<dyn BlockBlobClient>) -> Self {
        Self {
            client,
            block_ids: BlockIdList::new(),
            stats: StagerStats::default(),
        }
    }

    pub fn block_ids(&self) -> &BlockIdList {
        &self.block_ids
    }

    pub fn stats(&self) -> StagerStats {
        self.stats
    }

    /// Stage one window under a freshly generated id.
    pub async fn stage(&mut self, window: Bytes) -> Result<BlockId> {
        let id = BlockId::generate();
        let size = window.len() as u64;

        self.client.stage_block(&id, window).await?;
        self.block_ids.push(id.clone())?;

        self.stats.blocks += 1;
        self.stats.bytes += size;
        BLOB_BLOCKS_STAGED_TOTAL
            .with_label_values(&[self.client.container()])
            .inc();
        BLOB_BYTES_STAGED_TOTAL
            .with_label_values(&[self.client.container()])
            .inc_by(size);

        Ok(id)
    }

    /// Stage every window currently queued, without waiting for more.
    /// Returns the number of blocks staged.
    pub async fn drain_queue_to_remote(&mut self, queue: &mut QueueReceiver<Bytes>) -> Result<usize> {
        let mut staged = 0;
        while let Some(window) = queue.try_pop() {
            self.stage(window).await?;
            staged += 1;
        }
        Ok(staged)
    }

    /// Stage windows as they arrive until every sender is gone.
    pub async fn run(mut self, mut queue: QueueReceiver<Bytes>) -> Result<Self> {
        tracing::debug!(blob = %self.client.blob(), "background stager started");
        while let Some(window) = queue.pop().await {
            self.stage(window).await?;
        }
        tracing::debug!(
            blob = %self.client.blob(),
            blocks = self.stats.blocks,
            "background stager finished"
        );
        Ok(self)
    }

    /// Commit every staged block, in staging order.
    pub async fn commit(self) -> Result<BlockIdList> {
        let container = self.client.container().to_string();
        match self.client.commit_block_list(self.block_ids.as_slice()).await {
            Ok(()) => {
                BLOB_COMMITS_TOTAL
                    .with_label_values(&[container.as_str(), "success"])
                    .inc();
                tracing::info!(
                    container = %container,
                    blob = %self.client.blob(),
                    blocks = self.block_ids.len(),
                    bytes = self.stats.bytes,
                    "committed block list"
                );
                Ok(self.block_ids)
            }
            Err(e) => {
                BLOB_COMMITS_TOTAL
                    .with_label_values(&[container.as_str(), "failure"])
                    .inc();
                tracing::error!(
                    container = %container,
                    blob = %self.client.blob(),
                    blocks = self.block_ids.len(),
                    error = %e,
                    "block list commit failed"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::BlobServiceClient;
    use crate::memory::MemoryBlobService;
    use cloudradio_core::bounded;

    fn setup() -> (MemoryBlobService, UploadStager) {
        let service = MemoryBlobService::new();
        service.create_container("radio");
        let client = service.get_blob_client("radio", "capture.bin").unwrap();
        (service, UploadStager::new(client))
    }

    #[tokio::test]
    async fn test_drain_stages_in_queue_order() {
        let (service, mut stager) = setup();
        let (tx, mut rx) = bounded(4).unwrap();
        tx.try_push(Bytes::from_static(b"one ")).unwrap();
        tx.try_push(Bytes::from_static(b"two ")).unwrap();
        tx.try_push(Bytes::from_static(b"three")).unwrap();

        assert_eq!(stager.drain_queue_to_remote(&mut rx).await.unwrap(), 3);
        assert_eq!(stager.drain_queue_to_remote(&mut rx).await.unwrap(), 0);
        assert_eq!(stager.stats().blocks, 3);
        assert_eq!(stager.stats().bytes, 13);

        let ids = stager.commit().await.unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(
            service.blob_data("radio", "capture.bin").unwrap(),
            Bytes::from_static(b"one two three")
        );
        assert_eq!(
            service.committed_block_ids("radio", "capture.bin"),
            ids.as_slice().to_vec()
        );
    }

    #[tokio::test]
    async fn test_run_until_sender_dropped() {
        let (service, stager) = setup();
        let (tx, rx) = bounded(1).unwrap();

        let worker = tokio::spawn(stager.run(rx));
        for i in 0..5u8 {
            tx.push(Bytes::from(vec![i; 2])).await.unwrap();
        }
        drop(tx);

        let stager = worker.await.unwrap().unwrap();
        assert_eq!(stager.block_ids().len(), 5);
        stager.commit().await.unwrap();
        assert_eq!(
            service.blob_data("radio", "capture.bin").unwrap(),
            Bytes::from(vec![0, 0, 1, 1, 2, 2, 3, 3, 4, 4])
        );
    }

    #[tokio::test]
    async fn test_stage_failure_propagates() {
        let (service, mut stager) = setup();
        service.fail_stages(true);
        let err = stager.stage(Bytes::from_static(b"x")).await.unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::Transport);
        assert!(stager.block_ids().is_empty());
    }

    #[tokio::test]
    async fn test_commit_failure_propagates() {
        let (service, mut stager) = setup();
        stager.stage(Bytes::from_static(b"x")).await.unwrap();
        service.fail_commits(true);
        assert!(stager.commit().await.is_err());
        assert!(service.blob_data("radio", "capture.bin").is_none());
    }
}

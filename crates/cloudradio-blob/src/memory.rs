//! In-memory block blob service.
//!
//! Models the parts of block blob behaviour the blocks depend on: staged
//! blocks stay invisible until a commit names them, a commit assembles them
//! in list order and drops the rest, and a missing container or blob is a
//! not-found error. Downloads are cut into configurable chunk sizes so
//! reassembly can be exercised with awkward boundaries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;

use crate::client::{BlobProperties, BlobServiceClient, BlockBlobClient, BlockId, ChunkStream};
use crate::error::{BlobError, Result};

const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Default)]
struct Blob {
    committed: Option<Bytes>,
    committed_ids: Vec<BlockId>,
    staged: HashMap<BlockId, Bytes>,
}

#[derive(Debug, Default)]
struct Account {
    containers: HashMap<String, HashMap<String, Blob>>,
    reject_credentials: bool,
    fail_stage: bool,
    fail_commit: bool,
    chunk_sizes: Vec<usize>,
    stage_requests: usize,
    commit_requests: usize,
    download_requests: usize,
}

impl Account {
    fn check_auth(&self) -> Result<()> {
        if self.reject_credentials {
            return Err(BlobError::Authentication(
                "AuthenticationFailed: server failed to authenticate the request".to_string(),
            ));
        }
        Ok(())
    }

    fn container(&mut self, name: &str) -> Result<&mut HashMap<String, Blob>> {
        self.containers
            .get_mut(name)
            .ok_or_else(|| BlobError::NotFound(format!("ContainerNotFound: {}", name)))
    }

    fn committed(&mut self, container: &str, blob: &str) -> Result<Bytes> {
        self.container(container)?
            .get(blob)
            .and_then(|b| b.committed.clone())
            .ok_or_else(|| BlobError::NotFound(format!("BlobNotFound: {}/{}", container, blob)))
    }
}

/// A storage account held in memory. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobService {
    account: Arc<Mutex<Account>>,
}

impl MemoryBlobService {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Account> {
        self.account.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_container(&self, name: &str) {
        self.lock().containers.entry(name.to_string()).or_default();
    }

    /// Store a committed blob directly, creating the container if needed.
    pub fn put_blob(&self, container: &str, blob: &str, data: impl Into<Bytes>) {
        let mut account = self.lock();
        let entry = account
            .containers
            .entry(container.to_string())
            .or_default()
            .entry(blob.to_string())
            .or_default();
        entry.committed = Some(data.into());
    }

    pub fn blob_data(&self, container: &str, blob: &str) -> Option<Bytes> {
        self.lock().committed(container, blob).ok()
    }

    pub fn committed_block_ids(&self, container: &str, blob: &str) -> Vec<BlockId> {
        self.lock()
            .containers
            .get(container)
            .and_then(|c| c.get(blob))
            .map(|b| b.committed_ids.clone())
            .unwrap_or_default()
    }

    /// Blocks staged but not (yet) part of a commit.
    pub fn uncommitted_block_count(&self, container: &str, blob: &str) -> usize {
        self.lock()
            .containers
            .get(container)
            .and_then(|c| c.get(blob))
            .map(|b| b.staged.len())
            .unwrap_or(0)
    }

    pub fn blob_names(&self, container: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .containers
            .get(container)
            .map(|c| {
                c.iter()
                    .filter(|(_, b)| b.committed.is_some())
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Cut downloads into chunks of these sizes, cycling. Zero sizes are ignored.
    pub fn set_chunk_sizes(&self, sizes: Vec<usize>) {
        self.lock().chunk_sizes = sizes.into_iter().filter(|s| *s > 0).collect();
    }

    pub fn reject_credentials(&self, reject: bool) {
        self.lock().reject_credentials = reject;
    }

    pub fn fail_stages(&self, fail: bool) {
        self.lock().fail_stage = fail;
    }

    pub fn fail_commits(&self, fail: bool) {
        self.lock().fail_commit = fail;
    }

    pub fn stage_requests(&self) -> usize {
        self.lock().stage_requests
    }

    pub fn commit_requests(&self) -> usize {
        self.lock().commit_requests
    }

    pub fn download_requests(&self) -> usize {
        self.lock().download_requests
    }
}

impl BlobServiceClient for MemoryBlobService {
    fn get_blob_client(&self, container: &str, blob: &str) -> Result<Arc<dyn BlockBlobClient>> {
        Ok(Arc::new(MemoryBlobClient {
            service: self.clone(),
            container: container.to_string(),
            blob: blob.to_string(),
        }))
    }
}

#[derive(Debug, Clone)]
pub struct MemoryBlobClient {
    service: MemoryBlobService,
    container: String,
    blob: String,
}

#[async_trait]
impl BlockBlobClient for MemoryBlobClient {
    fn container(&self) -> &str {
        &self.container
    }

    fn blob(&self) -> &str {
        &self.blob
    }

    async fn validate_container(&self) -> Result<()> {
        let mut account = self.service.lock();
        account.check_auth()?;
        account.container(&self.container)?;
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        let mut account = self.service.lock();
        account.check_auth()?;
        Ok(account.committed(&self.container, &self.blob).is_ok())
    }

    async fn get_properties(&self) -> Result<BlobProperties> {
        let mut account = self.service.lock();
        account.check_auth()?;
        let data = account.committed(&self.container, &self.blob)?;
        Ok(BlobProperties {
            size: data.len() as u64,
            etag: None,
            last_modified: None,
        })
    }

    async fn stage_block(&self, id: &BlockId, data: Bytes) -> Result<()> {
        let mut account = self.service.lock();
        account.stage_requests += 1;
        account.check_auth()?;
        if account.fail_stage {
            return Err(BlobError::Transport("injected stage failure".to_string()));
        }
        account
            .container(&self.container)?
            .entry(self.blob.clone())
            .or_default()
            .staged
            .insert(id.clone(), data);
        Ok(())
    }

    async fn commit_block_list(&self, ids: &[BlockId]) -> Result<()> {
        let mut account = self.service.lock();
        account.commit_requests += 1;
        account.check_auth()?;
        if account.fail_commit {
            return Err(BlobError::Transport("injected commit failure".to_string()));
        }
        let blob = account
            .container(&self.container)?
            .entry(self.blob.clone())
            .or_default();

        let mut assembled = BytesMut::new();
        for id in ids {
            let block = blob.staged.get(id).ok_or_else(|| {
                BlobError::InvalidBlockList(format!("block {} was never staged", id))
            })?;
            assembled.extend_from_slice(block);
        }

        blob.committed = Some(assembled.freeze());
        blob.committed_ids = ids.to_vec();
        blob.staged.clear();
        Ok(())
    }

    async fn upload(&self, data: Bytes) -> Result<()> {
        let mut account = self.service.lock();
        account.check_auth()?;
        let blob = account
            .container(&self.container)?
            .entry(self.blob.clone())
            .or_default();
        blob.committed = Some(data);
        blob.committed_ids.clear();
        Ok(())
    }

    async fn download_stream(&self) -> Result<ChunkStream> {
        let mut account = self.service.lock();
        account.download_requests += 1;
        account.check_auth()?;
        let mut data = account.committed(&self.container, &self.blob)?;

        let sizes = if account.chunk_sizes.is_empty() {
            vec![DEFAULT_CHUNK_SIZE]
        } else {
            account.chunk_sizes.clone()
        };

        let mut chunks = Vec::new();
        for size in sizes.iter().cycle() {
            if data.is_empty() {
                break;
            }
            let n = (*size).min(data.len());
            chunks.push(Ok(data.split_to(n)));
        }

        Ok(futures::stream::iter(chunks).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_staged_blocks_invisible_until_commit() {
        let service = MemoryBlobService::new();
        service.create_container("radio");
        let client = service.get_blob_client("radio", "capture.bin").unwrap();

        let a = BlockId::generate();
        let b = BlockId::generate();
        client.stage_block(&a, Bytes::from_static(b"aaaa")).await.unwrap();
        client.stage_block(&b, Bytes::from_static(b"bb")).await.unwrap();
        assert!(!client.exists().await.unwrap());
        assert_eq!(service.uncommitted_block_count("radio", "capture.bin"), 2);

        client.commit_block_list(&[b.clone(), a.clone()]).await.unwrap();
        assert_eq!(
            service.blob_data("radio", "capture.bin").unwrap(),
            Bytes::from_static(b"bbaaaa")
        );
        assert_eq!(service.committed_block_ids("radio", "capture.bin"), vec![b, a]);
        assert_eq!(service.uncommitted_block_count("radio", "capture.bin"), 0);
    }

    #[tokio::test]
    async fn test_commit_unknown_block_rejected() {
        let service = MemoryBlobService::new();
        service.create_container("radio");
        let client = service.get_blob_client("radio", "x").unwrap();
        let err = client
            .commit_block_list(&[BlockId::generate()])
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::InvalidBlockList(_)));
    }

    #[tokio::test]
    async fn test_missing_container_and_blob() {
        let service = MemoryBlobService::new();
        let client = service.get_blob_client("nope", "x").unwrap();
        assert!(client.validate_container().await.unwrap_err().is_not_found());

        service.create_container("radio");
        let client = service.get_blob_client("radio", "missing").unwrap();
        assert!(client.get_properties().await.unwrap_err().is_not_found());
        assert!(matches!(client.download_stream().await, Err(e) if e.is_not_found()));
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        let service = MemoryBlobService::new();
        service.create_container("radio");
        service.reject_credentials(true);
        let client = service.get_blob_client("radio", "x").unwrap();
        let err = client.validate_container().await.unwrap_err();
        assert!(matches!(err, BlobError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_download_chunk_sizes_cycle() {
        let service = MemoryBlobService::new();
        service.put_blob("radio", "x", (0u8..20).collect::<Vec<u8>>());
        service.set_chunk_sizes(vec![3, 5, 0]);
        let client = service.get_blob_client("radio", "x").unwrap();

        let chunks: Vec<Bytes> = client
            .download_stream()
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let sizes: Vec<usize> = chunks.iter().map(Bytes::len).collect();
        assert_eq!(sizes, vec![3, 5, 3, 5, 3, 1]);
        assert_eq!(chunks.concat(), (0u8..20).collect::<Vec<u8>>());
        assert_eq!(service.download_requests(), 1);
    }

    #[tokio::test]
    async fn test_upload_replaces_blob() {
        let service = MemoryBlobService::new();
        service.create_container("radio");
        let client = service.get_blob_client("radio", "meta.json").unwrap();
        client.upload(Bytes::from_static(b"{}")).await.unwrap();
        assert_eq!(client.get_properties().await.unwrap().size, 2);
        assert_eq!(service.blob_names("radio"), vec!["meta.json".to_string()]);
    }
}

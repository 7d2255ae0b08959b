//! The block blob seam.
//!
//! Everything the sink and source need from remote storage, as two traits:
//! [`BlobServiceClient`] hands out per-blob clients, [`BlockBlobClient`]
//! stages, commits and downloads one blob. The Azure implementation lives in
//! [`crate::azure`]; [`crate::memory`] backs the tests.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::{BlobError, Result};

/// Download chunks, in blob order.
pub type ChunkStream = BoxStream<'static, Result<Bytes>>;

/// Opaque block identifier.
///
/// Base64 of a v4 UUID string, so every id in a blob has the same encoded
/// length.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockId(String);

impl BlockId {
    pub fn generate() -> Self {
        Self(BASE64_STANDARD.encode(Uuid::new_v4().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BlockId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Ordered, append-only list of staged block ids.
#[derive(Debug, Clone, Default)]
pub struct BlockIdList {
    ids: Vec<BlockId>,
    seen: HashSet<BlockId>,
}

impl BlockIdList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: BlockId) -> Result<()> {
        if !self.seen.insert(id.clone()) {
            return Err(BlobError::InvalidBlockList(format!(
                "block id {} staged twice",
                id
            )));
        }
        self.ids.push(id);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn as_slice(&self) -> &[BlockId] {
        &self.ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlockId> {
        self.ids.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobProperties {
    pub size: u64,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// One block blob.
#[async_trait]
pub trait BlockBlobClient: Send + Sync + std::fmt::Debug {
    fn container(&self) -> &str;

    fn blob(&self) -> &str;

    /// Check the container exists and the credential is accepted.
    async fn validate_container(&self) -> Result<()>;

    async fn exists(&self) -> Result<bool>;

    /// Fails with [`BlobError::NotFound`] when the blob does not exist.
    async fn get_properties(&self) -> Result<BlobProperties>;

    /// Upload `data` as an uncommitted block.
    async fn stage_block(&self, id: &BlockId, data: Bytes) -> Result<()>;

    /// Assemble the staged blocks, in `ids` order, into the visible blob.
    async fn commit_block_list(&self, ids: &[BlockId]) -> Result<()>;

    /// Replace the blob with `data` in one request.
    async fn upload(&self, data: Bytes) -> Result<()>;

    async fn download_stream(&self) -> Result<ChunkStream>;
}

/// Hands out [`BlockBlobClient`]s for one storage account.
pub trait BlobServiceClient: Send + Sync + std::fmt::Debug {
    fn get_blob_client(&self, container: &str, blob: &str) -> Result<Arc<dyn BlockBlobClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_ids_unique_and_same_length() {
        let ids: Vec<BlockId> = (0..64).map(|_| BlockId::generate()).collect();
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 64);
        assert!(ids.iter().all(|id| id.as_str().len() == ids[0].as_str().len()));
    }

    #[test]
    fn test_block_id_is_base64_of_uuid() {
        let id = BlockId::generate();
        let decoded = BASE64_STANDARD.decode(id.as_str()).unwrap();
        let text = String::from_utf8(decoded).unwrap();
        assert!(Uuid::parse_str(&text).is_ok());
    }

    #[test]
    fn test_block_id_list_keeps_order() {
        let mut list = BlockIdList::new();
        for name in ["a", "b", "c"] {
            list.push(BlockId::from(name)).unwrap();
        }
        let order: Vec<&str> = list.iter().map(BlockId::as_str).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_block_id_list_rejects_duplicates() {
        let mut list = BlockIdList::new();
        list.push(BlockId::from("a")).unwrap();
        let err = list.push(BlockId::from("a")).unwrap_err();
        assert!(matches!(err, BlobError::InvalidBlockList(_)));
        assert_eq!(list.len(), 1);
    }
}

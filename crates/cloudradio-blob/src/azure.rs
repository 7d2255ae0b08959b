//! Azure Blob Storage over `object_store`.
//!
//! Block staging maps onto a multipart upload: each `stage_block` becomes the
//! next part (an Azure Put Block), and `commit_block_list` completes the
//! upload (Put Block List). The store assigns its own wire ids, so the commit
//! checks that the ids it is given are exactly the ones staged, in staging
//! order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::azure::{AzureConfigKey, MicrosoftAzureBuilder};
use object_store::path::Path as ObjectPath;
use object_store::{MultipartUpload, ObjectStore, RetryConfig};
use tokio::sync::Mutex as AsyncMutex;

use cloudradio_observability::metrics::{BLOB_ERRORS_TOTAL, BLOB_LATENCY, BLOB_REQUESTS_TOTAL};

use crate::auth::{BlobAuth, DefaultCredentialOptions};
use crate::client::{BlobProperties, BlobServiceClient, BlockBlobClient, BlockId, ChunkStream};
use crate::error::{classify, BlobError, Result};

/// Client-side retry settings handed to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub total: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { total: 3 }
    }
}

/// Build an Azure object store scoped to `container`.
pub fn build_store(
    auth: &BlobAuth,
    container: &str,
    retry: RetryPolicy,
) -> Result<Arc<dyn ObjectStore>> {
    let builder = match auth {
        BlobAuth::ConnectionString(cs) => {
            let mut builder = MicrosoftAzureBuilder::new().with_account(&cs.account_name);
            if cs.use_emulator {
                builder = builder.with_use_emulator(true);
            } else if let Some(endpoint) = cs.custom_endpoint() {
                builder = builder.with_endpoint(endpoint);
            }
            if let Some(key) = &cs.account_key {
                builder = builder.with_access_key(key);
            }
            if let Some(sas) = &cs.sas_token {
                builder = builder.with_config(AzureConfigKey::SasKey, sas);
            }
            builder
        }
        BlobAuth::UrlWithSas(sas) => {
            let mut builder = MicrosoftAzureBuilder::new()
                .with_account(&sas.account_name)
                .with_sas_authorization(sas.query_pairs.clone());
            if sas.use_emulator {
                builder = builder.with_use_emulator(true);
            } else {
                builder = builder.with_endpoint(endpoint_string(&sas.endpoint));
            }
            builder
        }
        BlobAuth::Default { account, options } => {
            let mut builder = default_credential_builder(options)?.with_account(&account.account_name);
            if account.use_emulator {
                builder = builder.with_use_emulator(true);
            } else {
                builder = builder.with_endpoint(endpoint_string(&account.endpoint));
            }
            builder
        }
    };

    let retry_config = RetryConfig {
        max_retries: retry.total,
        ..Default::default()
    };

    let store = builder
        .with_container_name(container)
        .with_retry(retry_config)
        .build()
        .map_err(|e| BlobError::Config(format!("failed to build Azure client: {}", e)))?;

    Ok(Arc::new(store))
}

/// Start a builder from the enabled ambient sources.
///
/// Managed identity is the store's fallback when nothing else yields a token,
/// so it needs no explicit switch.
fn default_credential_builder(options: &DefaultCredentialOptions) -> Result<MicrosoftAzureBuilder> {
    options.validate()?;

    let mut builder = if options.enable_environment {
        MicrosoftAzureBuilder::from_env()
    } else {
        MicrosoftAzureBuilder::new()
    };
    builder = builder.with_use_azure_cli(options.enable_cli);
    if let Some(authority) = &options.authority {
        builder = builder.with_config(AzureConfigKey::AuthorityHost, authority);
    }
    Ok(builder)
}

fn endpoint_string(url: &url::Url) -> String {
    url.as_str().trim_end_matches('/').to_string()
}

fn record_request(operation: &str) -> Instant {
    BLOB_REQUESTS_TOTAL.with_label_values(&[operation]).inc();
    Instant::now()
}

fn record_outcome<T>(operation: &str, start: Instant, result: Result<T>) -> Result<T> {
    match &result {
        Ok(_) => BLOB_LATENCY
            .with_label_values(&[operation])
            .observe(start.elapsed().as_secs_f64()),
        Err(e) => {
            BLOB_ERRORS_TOTAL
                .with_label_values(&[operation, e.class().as_str()])
                .inc();
            tracing::warn!(operation, error = %e, "blob operation failed");
        }
    }
    result
}

/// Per-container stores for one account.
#[derive(Debug)]
pub struct AzureBlobService {
    auth: BlobAuth,
    retry: RetryPolicy,
    stores: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl AzureBlobService {
    pub fn new(auth: BlobAuth, retry: RetryPolicy) -> Self {
        Self {
            auth,
            retry,
            stores: Mutex::new(HashMap::new()),
        }
    }

    pub fn auth(&self) -> &BlobAuth {
        &self.auth
    }

    fn store_for(&self, container: &str) -> Result<Arc<dyn ObjectStore>> {
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(store) = stores.get(container) {
            return Ok(store.clone());
        }
        let store = build_store(&self.auth, container, self.retry)?;
        stores.insert(container.to_string(), store.clone());
        Ok(store)
    }
}

impl BlobServiceClient for AzureBlobService {
    fn get_blob_client(&self, container: &str, blob: &str) -> Result<Arc<dyn BlockBlobClient>> {
        let store = self.store_for(container)?;
        Ok(Arc::new(ObjectStoreBlobClient::new(store, container, blob)))
    }
}

/// Service over one pre-built store, whatever the container name.
#[derive(Debug, Clone)]
pub struct ObjectStoreBlobService {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreBlobService {
    pub fn with_store(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

impl BlobServiceClient for ObjectStoreBlobService {
    fn get_blob_client(&self, container: &str, blob: &str) -> Result<Arc<dyn BlockBlobClient>> {
        Ok(Arc::new(ObjectStoreBlobClient::new(
            self.store.clone(),
            container,
            blob,
        )))
    }
}

struct PendingUpload {
    upload: Box<dyn MultipartUpload>,
    staged: Vec<BlockId>,
}

/// [`BlockBlobClient`] over any `object_store` backend.
pub struct ObjectStoreBlobClient {
    store: Arc<dyn ObjectStore>,
    container: String,
    blob: String,
    path: ObjectPath,
    pending: AsyncMutex<Option<PendingUpload>>,
}

impl std::fmt::Debug for ObjectStoreBlobClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreBlobClient")
            .field("store", &self.store.to_string())
            .field("container", &self.container)
            .field("blob", &self.blob)
            .finish()
    }
}

impl ObjectStoreBlobClient {
    pub fn new(store: Arc<dyn ObjectStore>, container: &str, blob: &str) -> Self {
        Self {
            store,
            container: container.to_string(),
            blob: blob.to_string(),
            path: ObjectPath::from(blob),
            pending: AsyncMutex::new(None),
        }
    }
}

#[async_trait]
impl BlockBlobClient for ObjectStoreBlobClient {
    fn container(&self) -> &str {
        &self.container
    }

    fn blob(&self) -> &str {
        &self.blob
    }

    async fn validate_container(&self) -> Result<()> {
        let start = record_request("list");
        let result = self
            .store
            .list_with_delimiter(None)
            .await
            .map(|_| ())
            .map_err(classify);
        record_outcome("list", start, result)
    }

    async fn exists(&self) -> Result<bool> {
        match self.get_properties().await {
            Ok(_) => Ok(true),
            Err(BlobError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_properties(&self) -> Result<BlobProperties> {
        let start = record_request("head");
        let result = self
            .store
            .head(&self.path)
            .await
            .map(|meta| BlobProperties {
                size: meta.size as u64,
                etag: meta.e_tag,
                last_modified: Some(meta.last_modified),
            })
            .map_err(classify);
        record_outcome("head", start, result)
    }

    async fn stage_block(&self, id: &BlockId, data: Bytes) -> Result<()> {
        let mut pending = self.pending.lock().await;
        if pending.is_none() {
            let start = record_request("create_upload");
            let upload = record_outcome(
                "create_upload",
                start,
                self.store.put_multipart(&self.path).await.map_err(classify),
            )?;
            *pending = Some(PendingUpload {
                upload,
                staged: Vec::new(),
            });
        }
        let Some(state) = pending.as_mut() else {
            return Err(BlobError::Transport("multipart upload not started".to_string()));
        };

        let size = data.len();
        let start = record_request("stage_block");
        let part = state.upload.put_part(data.into());
        record_outcome("stage_block", start, part.await.map_err(classify))?;
        state.staged.push(id.clone());

        tracing::debug!(
            blob = %self.blob,
            block_id = %id,
            size,
            "staged block"
        );
        Ok(())
    }

    async fn commit_block_list(&self, ids: &[BlockId]) -> Result<()> {
        let mut pending = self.pending.lock().await;
        let Some(mut state) = pending.take() else {
            if !ids.is_empty() {
                return Err(BlobError::InvalidBlockList(format!(
                    "{} block ids committed but none staged",
                    ids.len()
                )));
            }
            // An empty block list commits an empty blob.
            let start = record_request("commit");
            let result = self
                .store
                .put(&self.path, Bytes::new().into())
                .await
                .map(|_| ())
                .map_err(classify);
            return record_outcome("commit", start, result);
        };

        if state.staged.as_slice() != ids {
            if let Err(e) = state.upload.abort().await {
                tracing::warn!(blob = %self.blob, error = %e, "failed to abort multipart upload");
            }
            return Err(BlobError::InvalidBlockList(format!(
                "commit lists {} ids but {} blocks were staged in a different order",
                ids.len(),
                state.staged.len()
            )));
        }

        let start = record_request("commit");
        let result = state.upload.complete().await.map(|_| ()).map_err(classify);
        record_outcome("commit", start, result)
    }

    async fn upload(&self, data: Bytes) -> Result<()> {
        let start = record_request("put");
        let result = self
            .store
            .put(&self.path, data.into())
            .await
            .map(|_| ())
            .map_err(classify);
        record_outcome("put", start, result)
    }

    async fn download_stream(&self) -> Result<ChunkStream> {
        let start = record_request("get");
        let result = self.store.get(&self.path).await.map_err(classify);
        let get = record_outcome("get", start, result)?;
        Ok(get.into_stream().map_err(classify).boxed())
    }
}

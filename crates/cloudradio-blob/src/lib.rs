//! Azure Blob Storage blocks.
//!
//! - [`BlobSink`] streams items into a block blob: full windows are staged as
//!   blocks while the flowgraph runs and the block list is committed at stop.
//! - [`BlobSource`] streams a blob's items back out, reassembling download
//!   chunks into whole items and optionally replaying the blob.
//!
//! Both talk to storage through the [`BlobServiceClient`] and
//! [`BlockBlobClient`] traits. [`AzureBlobService`] is the production
//! implementation over `object_store`; [`MemoryBlobService`] mimics Azure
//! semantics in memory for tests and dry runs.
//!
//! ## Example
//!
//! ```ignore
//! use cloudradio_blob::{BlobSink, BlobSinkConfig};
//! use cloudradio_core::SinkBlock;
//!
//! let mut config = BlobSinkConfig::new("recordings", "capture.cf32");
//! config.auth.method = cloudradio_blob::AuthMethod::ConnectionString;
//! config.auth.connection_string = std::env::var("AZURE_STORAGE_CONNECTION_STRING").ok();
//!
//! let mut sink = BlobSink::new("blob_sink", config)?;
//! sink.start().await?;
//! sink.work(&samples).await?;
//! sink.stop().await?;
//! ```

pub mod auth;
pub mod azure;
pub mod client;
pub mod config;
pub mod error;
pub mod memory;
pub mod prefetch;
pub mod sigmf;
pub mod sink;
pub mod source;
pub mod stager;

pub use auth::{AuthMethod, BlobAuth, ConnectionString, DefaultCredentialOptions};
pub use azure::{AzureBlobService, ObjectStoreBlobClient, ObjectStoreBlobService, RetryPolicy};
pub use client::{
    BlobProperties, BlobServiceClient, BlockBlobClient, BlockId, BlockIdList, ChunkStream,
};
pub use config::{AuthConfig, StagingMode};
pub use error::{BlobError, ErrorClass, Result};
pub use memory::MemoryBlobService;
pub use prefetch::Prefetcher;
pub use sigmf::{SigmfMeta, SigmfOptions};
pub use sink::{BlobSink, BlobSinkConfig};
pub use source::{BlobSource, BlobSourceConfig};
pub use stager::UploadStager;

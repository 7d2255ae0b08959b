//! `radioctl upload` / `radioctl download`
//!
//! Both commands drive a blob block the way a flowgraph scheduler would, so
//! a file upload exercises the same windowing and commit path as a live
//! capture.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use cloudradio_blob::{
    AuthConfig, AuthMethod, AzureBlobService, BlobServiceClient, BlobSink, BlobSinkConfig,
    BlobSource, BlobSourceConfig, RetryPolicy, SigmfOptions, StagingMode,
};
use cloudradio_core::{drive_sink, drive_source, ItemFormat, PipelineStats};
use tokio::fs::File;
use tokio::io::{BufReader, BufWriter};

/// Storage account credentials.
#[derive(Debug, Clone, Args)]
pub struct AuthArgs {
    /// connection_string, url_with_sas or default
    #[arg(long, env = "AZURE_STORAGE_AUTH_METHOD", default_value = "default")]
    pub auth_method: String,

    #[arg(long, env = "AZURE_STORAGE_CONNECTION_STRING", hide_env_values = true)]
    pub connection_string: Option<String>,

    /// Account URL; for url_with_sas the SAS token goes in the query
    #[arg(long, env = "AZURE_STORAGE_URL", hide_env_values = true)]
    pub url: Option<String>,

    /// Client retry count
    #[arg(long, default_value = "3")]
    pub retry_total: usize,
}

impl AuthArgs {
    pub fn auth_config(&self) -> Result<AuthConfig> {
        Ok(AuthConfig {
            method: AuthMethod::from_str_config(&self.auth_method)?,
            connection_string: self.connection_string.clone(),
            url: self.url.clone(),
            ..Default::default()
        })
    }

    /// The Azure service these credentials select.
    pub fn service(&self) -> Result<Arc<dyn BlobServiceClient>> {
        let auth = self
            .auth_config()?
            .resolve()
            .context("Failed to resolve storage credentials")?;
        tracing::info!(account = %auth.account_name(), method = %auth.method(), "using storage account");
        Ok(Arc::new(AzureBlobService::new(
            auth,
            RetryPolicy {
                total: self.retry_total,
            },
        )))
    }
}

#[derive(Debug, Clone, Args)]
pub struct UploadArgs {
    /// Local sample file
    pub file: PathBuf,

    #[arg(short, long)]
    pub container: String,

    #[arg(short, long)]
    pub blob: String,

    /// Sample format (complex64, float32, int32, complex_int16, int16, byte)
    #[arg(short, long, default_value = "complex64")]
    pub format: String,

    /// Samples per item
    #[arg(long, default_value = "1")]
    pub vlen: usize,

    /// Items per staged block
    #[arg(long, default_value = "500000")]
    pub block_len: usize,

    #[arg(long, default_value = "4")]
    pub queue_size: usize,

    /// Stage blocks on a background task
    #[arg(long)]
    pub background: bool,

    /// Items handed to the sink per work call
    #[arg(long, default_value = "4096")]
    pub items_per_call: usize,

    /// Write a SigMF recording (<blob>.sigmf-data + <blob>.sigmf-meta)
    #[arg(long)]
    pub sigmf: bool,

    #[arg(long, requires = "sigmf")]
    pub sample_rate: Option<f64>,

    #[arg(long, requires = "sigmf")]
    pub center_freq: Option<f64>,

    #[arg(long, requires = "sigmf")]
    pub description: Option<String>,
}

impl UploadArgs {
    pub fn sink_config(&self) -> Result<BlobSinkConfig> {
        let config = BlobSinkConfig {
            item_format: ItemFormat::from_str_config(&self.format)?,
            vlen: self.vlen,
            block_len: self.block_len,
            queue_size: self.queue_size,
            staging_mode: if self.background {
                StagingMode::Background
            } else {
                StagingMode::Inline
            },
            sigmf: SigmfOptions {
                enabled: self.sigmf,
                sample_rate: self.sample_rate,
                center_freq: self.center_freq,
                description: self.description.clone(),
                ..Default::default()
            },
            ..BlobSinkConfig::new(&self.container, &self.blob)
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Args)]
pub struct DownloadArgs {
    #[arg(short, long)]
    pub container: String,

    #[arg(short, long)]
    pub blob: String,

    /// Destination file
    #[arg(short, long)]
    pub output: PathBuf,

    #[arg(short, long, default_value = "complex64")]
    pub format: String,

    #[arg(long, default_value = "1")]
    pub vlen: usize,

    #[arg(long, default_value = "4")]
    pub queue_size: usize,

    /// Replay the blob until --limit items have been written
    #[arg(long, requires = "limit")]
    pub repeat: bool,

    /// Stop after this many items
    #[arg(short, long)]
    pub limit: Option<u64>,

    #[arg(long, default_value = "4096")]
    pub items_per_call: usize,
}

impl DownloadArgs {
    pub fn source_config(&self) -> Result<BlobSourceConfig> {
        let config = BlobSourceConfig {
            item_format: ItemFormat::from_str_config(&self.format)?,
            vlen: self.vlen,
            queue_size: self.queue_size,
            repeat: self.repeat,
            ..BlobSourceConfig::new(&self.container, &self.blob)
        };
        config.validate()?;
        Ok(config)
    }
}

/// Upload `args.file` through a [`BlobSink`].
pub async fn upload(args: &UploadArgs, service: Arc<dyn BlobServiceClient>) -> Result<PipelineStats> {
    let config = args.sink_config()?;
    let file = File::open(&args.file)
        .await
        .with_context(|| format!("Failed to open {}", args.file.display()))?;

    let mut sink = BlobSink::with_service("radioctl_upload", config, service)?;
    let stats = drive_sink(&mut sink, BufReader::new(file), args.items_per_call)
        .await
        .with_context(|| format!("Upload to {}/{} failed", args.container, args.blob))?;

    let blocks = sink.committed_block_ids().map_or(0, |ids| ids.len());
    tracing::info!(
        file = %args.file.display(),
        container = %args.container,
        blob = %sink.config().data_blob(),
        items = stats.items,
        blocks,
        "upload complete"
    );
    Ok(stats)
}

/// Download a blob into `args.output` through a [`BlobSource`].
pub async fn download(
    args: &DownloadArgs,
    service: Arc<dyn BlobServiceClient>,
) -> Result<PipelineStats> {
    let config = args.source_config()?;
    let mut source = BlobSource::with_service("radioctl_download", config, service)?;

    let file = File::create(&args.output)
        .await
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    let stats = drive_source(
        &mut source,
        BufWriter::new(file),
        args.items_per_call,
        args.limit,
    )
    .await
    .with_context(|| format!("Download of {}/{} failed", args.container, args.blob))?;

    tracing::info!(
        output = %args.output.display(),
        blob_size = source.blob_size(),
        passes = source.passes(),
        items = stats.items,
        "download complete"
    );
    Ok(stats)
}

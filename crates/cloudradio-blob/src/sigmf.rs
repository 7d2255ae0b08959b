//! # SigMF sidecar
//!
//! A SigMF recording is a pair of objects:
//!
//! - **Data** (`<name>.sigmf-data`): the raw samples, written by the sink
//! - **Metadata** (`<name>.sigmf-meta`): JSON describing them
//!
//! The sink uploads the metadata object only after the data commit succeeds.

use chrono::{DateTime, SecondsFormat, Utc};
use cloudradio_core::ItemFormat;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const SIGMF_VERSION: &str = "1.0.0";
pub const DATA_SUFFIX: &str = ".sigmf-data";
pub const META_SUFFIX: &str = ".sigmf-meta";

/// User-supplied sidecar fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SigmfOptions {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub sample_rate: Option<f64>,
    #[serde(default)]
    pub center_freq: Option<f64>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub hw: Option<String>,
}

/// SigMF global metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigmfGlobal {
    #[serde(rename = "core:datatype")]
    pub datatype: String,

    #[serde(rename = "core:sample_rate", skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<f64>,

    #[serde(rename = "core:version")]
    pub version: String,

    #[serde(rename = "core:author", skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(rename = "core:description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "core:hw", skip_serializing_if = "Option::is_none")]
    pub hw: Option<String>,

    #[serde(rename = "core:recorder", skip_serializing_if = "Option::is_none")]
    pub recorder: Option<String>,
}

/// SigMF capture segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigmfCapture {
    #[serde(rename = "core:sample_start")]
    pub sample_start: u64,

    #[serde(rename = "core:frequency", skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,

    #[serde(rename = "core:datetime", skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,
}

/// Complete metadata document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigmfMeta {
    pub global: SigmfGlobal,
    pub captures: Vec<SigmfCapture>,
    pub annotations: Vec<serde_json::Value>,
}

impl SigmfMeta {
    pub fn new(format: ItemFormat, options: &SigmfOptions, started_at: DateTime<Utc>) -> Self {
        Self {
            global: SigmfGlobal {
                datatype: format.sigmf_datatype().to_string(),
                sample_rate: options.sample_rate,
                version: SIGMF_VERSION.to_string(),
                author: options.author.clone(),
                description: options.description.clone(),
                hw: options.hw.clone(),
                recorder: Some(concat!("cloudradio ", env!("CARGO_PKG_VERSION")).to_string()),
            },
            captures: vec![SigmfCapture {
                sample_start: 0,
                frequency: options.center_freq,
                datetime: Some(started_at.to_rfc3339_opts(SecondsFormat::Micros, true)),
            }],
            annotations: Vec::new(),
        }
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

/// Object name for the sample data.
pub fn data_blob_name(blob: &str, sigmf: bool) -> String {
    if sigmf {
        format!("{}{}", blob, DATA_SUFFIX)
    } else {
        blob.to_string()
    }
}

pub fn meta_blob_name(blob: &str) -> String {
    format!("{}{}", blob, META_SUFFIX)
}

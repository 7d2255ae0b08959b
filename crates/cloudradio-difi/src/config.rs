//! Shared configuration pieces for the DIFI blocks.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DifiError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocketType {
    #[default]
    Udp,
    /// The sink connects out; the source listens for one peer at a time.
    Tcp,
}

impl SocketType {
    pub fn from_str_config(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "udp" => Ok(SocketType::Udp),
            "tcp" => Ok(SocketType::Tcp),
            other => Err(DifiError::Config(format!("unknown socket type: '{}'", other))),
        }
    }
}

/// How a sink learns its stream metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkMode {
    /// The sink builds its own context packets from its configuration.
    #[default]
    Standalone,
    /// The sink relays a DIFI source: context and timing come from the
    /// source's stream tags.
    Paired,
}

impl SinkMode {
    pub fn from_str_config(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "standalone" => Ok(SinkMode::Standalone),
            "paired" => Ok(SinkMode::Paired),
            other => Err(DifiError::Config(format!("unknown sink mode: '{}'", other))),
        }
    }
}

/// Resolve `host:port`, taking the first address.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| DifiError::Config(format!("{}:{} resolves to no address", host, port)))
}

pub(crate) fn required(config: &HashMap<String, String>, key: &str) -> Result<String> {
    config
        .get(key)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| DifiError::Config(format!("missing required '{}'", key)))
}

pub(crate) fn parse_or<T>(config: &HashMap<String, String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    config
        .get(key)
        .map(|s| {
            s.trim()
                .parse::<T>()
                .map_err(|e| DifiError::Config(format!("invalid {}: {}", key, e)))
        })
        .transpose()
        .map(|v| v.unwrap_or(default))
}

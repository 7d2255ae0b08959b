//! `radioctl serve`
//!
//! Runs the control plane over an [`AttributeMap`] seeded from `--set`
//! flags. Handy for exercising a deployment's allow-lists without a
//! flowgraph attached.

use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Args;
use cloudradio_api::{create_router, serve_with_shutdown, shutdown_signal, ApiState, AttributeMap, ControlSettings};
use serde_json::Value;

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    #[arg(short, long, env = "RADIOCTL_PORT", default_value = "8000")]
    pub port: u16,

    /// Attributes readable through GET /status
    #[arg(long, value_delimiter = ',')]
    pub read: Vec<String>,

    /// Attributes writable through PUT/PATCH /config
    #[arg(long, value_delimiter = ',')]
    pub write: Vec<String>,

    /// Initial attribute, as name=value; the value is JSON or a plain string
    #[arg(long = "set", value_name = "NAME=VALUE")]
    pub set: Vec<String>,
}

impl ServeArgs {
    pub fn settings(&self) -> ControlSettings {
        ControlSettings {
            read_settings: self.read.clone(),
            write_settings: self.write.clone(),
            call_settings: Vec::new(),
            port: self.port,
        }
    }

    pub fn host(&self) -> Result<AttributeMap> {
        let host = AttributeMap::new();
        for assignment in &self.set {
            let Some((name, raw)) = assignment.split_once('=') else {
                bail!("expected NAME=VALUE, got '{}'", assignment);
            };
            let name = name.trim();
            if name.is_empty() {
                bail!("empty attribute name in '{}'", assignment);
            }
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            host.insert(name, value);
        }
        Ok(host)
    }
}

pub async fn serve(args: &ServeArgs) -> Result<()> {
    cloudradio_observability::init();
    let host = args.host()?;
    let settings = args.settings();
    tracing::info!(
        read = ?settings.read_settings,
        write = ?settings.write_settings,
        attributes = ?host.snapshot().keys().collect::<Vec<_>>(),
        "starting control plane"
    );

    let router = create_router(ApiState::new(Arc::new(host), settings));
    serve_with_shutdown(router, args.port, shutdown_signal()).await?;
    Ok(())
}

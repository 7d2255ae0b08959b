//! CloudRadio control plane
//!
//! A small REST surface for inspecting and adjusting a running flowgraph.
//! Readable and writable attributes are gated by allow-lists in
//! [`ControlSettings`]; the flowgraph itself is any [`Controllable`] host.
//!
//! ## Endpoints
//!
//! - `GET /status`: values of the `read_settings` the host has
//! - `GET /config`: values of the `write_settings` the host has
//! - `PUT /config`, `PATCH /config`: write a JSON object of settings
//! - `PUT /call/:name`: invoke a host callback named in `call_settings`
//! - `GET /metrics`: Prometheus metrics

use std::sync::Arc;

use axum::{
    extract::{MatchedPath, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, put},
    Router,
};
use cloudradio_observability::metrics::CONTROL_REQUESTS_TOTAL;
use serde::{Deserialize, Serialize};

pub mod controllable;
pub mod error;
pub mod handlers;
pub mod server;

pub use controllable::{AttributeMap, Callback, ControlError, Controllable};
pub use error::{ApiError, Result};
pub use server::{serve_with_shutdown, shutdown_signal, ControlServer};

fn default_port() -> u16 {
    8000
}

/// Allow-lists for the control plane.
///
/// An empty `write_settings` disables writes (401), an empty `call_settings`
/// disables callbacks. An empty `read_settings` just means `/status` is `{}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlSettings {
    #[serde(default)]
    pub read_settings: Vec<String>,
    #[serde(default)]
    pub write_settings: Vec<String>,
    #[serde(default)]
    pub call_settings: Vec<String>,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl ControlSettings {
    pub fn new() -> Self {
        Self {
            port: default_port(),
            ..Default::default()
        }
    }

    pub fn read(mut self, names: &[&str]) -> Self {
        self.read_settings = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn write(mut self, names: &[&str]) -> Self {
        self.write_settings = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn calls(mut self, names: &[&str]) -> Self {
        self.call_settings = names.iter().map(|s| s.to_string()).collect();
        self
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub host: Arc<dyn Controllable>,
    pub settings: Arc<ControlSettings>,
}

impl ApiState {
    pub fn new(host: Arc<dyn Controllable>, settings: ControlSettings) -> Self {
        Self {
            host,
            settings: Arc::new(settings),
        }
    }
}

async fn track_requests(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let method = req.method().clone();

    let response = next.run(req).await;
    let status = response.status();
    CONTROL_REQUESTS_TOTAL
        .with_label_values(&[route.as_str(), status.as_str()])
        .inc();
    tracing::debug!(method = %method, route = %route, status = status.as_u16(), "control request");
    response
}

pub fn create_router(state: ApiState) -> Router {
    let control = Router::new()
        .route("/status", get(handlers::get_status))
        .route(
            "/config",
            get(handlers::get_config)
                .put(handlers::update_config)
                .patch(handlers::update_config),
        )
        .route("/call/:name", put(handlers::call))
        .route_layer(middleware::from_fn(track_requests))
        .with_state(state);

    control.merge(cloudradio_observability::exporter::create_metrics_router())
}

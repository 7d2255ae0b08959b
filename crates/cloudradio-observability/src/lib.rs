//! CloudRadio Observability
//!
//! Prometheus metrics for the blob, Event Hub, DIFI and control-plane blocks.
//!
//! # Usage
//!
//! ```no_run
//! use cloudradio_observability::{exporter, metrics};
//!
//! metrics::init();
//! let metrics_router: axum::Router = exporter::create_metrics_router();
//! ```

pub mod exporter;
pub mod metrics;

pub use metrics::{init as init_metrics, REGISTRY};

/// Initialize all observability components
pub fn init() {
    metrics::init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_does_not_panic() {
        init();
    }

    #[test]
    fn test_double_init_is_safe() {
        init();
        init_metrics();
        let _registry = &*REGISTRY;
    }
}

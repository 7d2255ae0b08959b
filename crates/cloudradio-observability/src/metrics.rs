use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::sync::Once;

static INIT: Once = Once::new();

lazy_static! {
    /// Global Prometheus metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Blob Sink Metrics
    // ============================================================================

    /// Blocks staged against a blob
    pub static ref BLOB_BLOCKS_STAGED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cloudradio_blob_blocks_staged_total", "Total blocks staged"),
        &["container"]
    ).expect("metric can be created");

    /// Bytes staged
    pub static ref BLOB_BYTES_STAGED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cloudradio_blob_bytes_staged_total", "Total bytes staged"),
        &["container"]
    ).expect("metric can be created");

    /// Block list commits by outcome
    pub static ref BLOB_COMMITS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cloudradio_blob_commits_total", "Total block list commits"),
        &["container", "status"]
    ).expect("metric can be created");

    /// Work calls that found the upload queue full
    pub static ref SINK_QUEUE_FULL_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cloudradio_sink_queue_full_total", "Work calls that found the upload queue full"),
        &["block"]
    ).expect("metric can be created");

    /// Windows handed off with a waiting push after the re-offer budget ran out
    pub static ref SINK_BLOCKING_HANDOFFS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cloudradio_sink_blocking_handoffs_total", "Blocking window hand-offs"),
        &["block"]
    ).expect("metric can be created");

    // ============================================================================
    // Blob Source Metrics
    // ============================================================================

    /// Download chunks received
    pub static ref BLOB_CHUNKS_DOWNLOADED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cloudradio_blob_chunks_downloaded_total", "Total download chunks received"),
        &["container"]
    ).expect("metric can be created");

    /// Bytes downloaded
    pub static ref BLOB_BYTES_DOWNLOADED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cloudradio_blob_bytes_downloaded_total", "Total bytes downloaded"),
        &["container"]
    ).expect("metric can be created");

    /// Full passes over a blob in repeat mode
    pub static ref SOURCE_PASSES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cloudradio_source_passes_total", "Completed passes over the source blob"),
        &["block"]
    ).expect("metric can be created");

    // ============================================================================
    // Blob Transport Metrics
    // ============================================================================

    /// Remote blob operations issued
    pub static ref BLOB_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cloudradio_blob_requests_total", "Total blob requests"),
        &["operation"]
    ).expect("metric can be created");

    /// Remote blob operation failures by error class
    pub static ref BLOB_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cloudradio_blob_errors_total", "Total blob errors"),
        &["operation", "class"]
    ).expect("metric can be created");

    /// Remote blob operation latency
    pub static ref BLOB_LATENCY: HistogramVec = HistogramVec::new(
        HistogramOpts::new("cloudradio_blob_latency_seconds", "Blob operation latency in seconds")
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["operation"]
    ).expect("metric can be created");

    // ============================================================================
    // Event Hub Metrics
    // ============================================================================

    /// Events sent
    pub static ref EVENTHUB_EVENTS_SENT_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cloudradio_eventhub_events_sent_total", "Total events sent"),
        &["eventhub"]
    ).expect("metric can be created");

    /// Events received and published
    pub static ref EVENTHUB_EVENTS_RECEIVED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cloudradio_eventhub_events_received_total", "Total events received"),
        &["eventhub"]
    ).expect("metric can be created");

    /// Event Hub failures
    pub static ref EVENTHUB_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cloudradio_eventhub_errors_total", "Total Event Hub errors"),
        &["eventhub", "error_type"]
    ).expect("metric can be created");

    // ============================================================================
    // DIFI Metrics
    // ============================================================================

    /// DIFI packets sent, by packet kind (data/context)
    pub static ref DIFI_PACKETS_SENT_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cloudradio_difi_packets_sent_total", "Total DIFI packets sent"),
        &["block", "kind"]
    ).expect("metric can be created");

    /// DIFI packets received, by packet kind
    pub static ref DIFI_PACKETS_RECEIVED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cloudradio_difi_packets_received_total", "Total DIFI packets received"),
        &["block", "kind"]
    ).expect("metric can be created");

    /// Data packets whose sequence number skipped ahead
    pub static ref DIFI_OUT_OF_ORDER_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cloudradio_difi_out_of_order_total", "Data packets received out of order"),
        &["block"]
    ).expect("metric can be created");

    // ============================================================================
    // Control Plane Metrics
    // ============================================================================

    /// Control plane requests by route and status
    pub static ref CONTROL_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cloudradio_control_requests_total", "Total control plane requests"),
        &["route", "status"]
    ).expect("metric can be created");
}

/// Initialize metrics registry
/// Can be called multiple times safely (idempotent)
pub fn init() {
    INIT.call_once(|| {
        // Blob sink
        REGISTRY
            .register(Box::new(BLOB_BLOCKS_STAGED_TOTAL.clone()))
            .expect("blob_blocks_staged_total can be registered");
        REGISTRY
            .register(Box::new(BLOB_BYTES_STAGED_TOTAL.clone()))
            .expect("blob_bytes_staged_total can be registered");
        REGISTRY
            .register(Box::new(BLOB_COMMITS_TOTAL.clone()))
            .expect("blob_commits_total can be registered");
        REGISTRY
            .register(Box::new(SINK_QUEUE_FULL_TOTAL.clone()))
            .expect("sink_queue_full_total can be registered");
        REGISTRY
            .register(Box::new(SINK_BLOCKING_HANDOFFS_TOTAL.clone()))
            .expect("sink_blocking_handoffs_total can be registered");

        // Blob source
        REGISTRY
            .register(Box::new(BLOB_CHUNKS_DOWNLOADED_TOTAL.clone()))
            .expect("blob_chunks_downloaded_total can be registered");
        REGISTRY
            .register(Box::new(BLOB_BYTES_DOWNLOADED_TOTAL.clone()))
            .expect("blob_bytes_downloaded_total can be registered");
        REGISTRY
            .register(Box::new(SOURCE_PASSES_TOTAL.clone()))
            .expect("source_passes_total can be registered");

        // Transport
        REGISTRY
            .register(Box::new(BLOB_REQUESTS_TOTAL.clone()))
            .expect("blob_requests_total can be registered");
        REGISTRY
            .register(Box::new(BLOB_ERRORS_TOTAL.clone()))
            .expect("blob_errors_total can be registered");
        REGISTRY
            .register(Box::new(BLOB_LATENCY.clone()))
            .expect("blob_latency can be registered");

        // Event Hub
        REGISTRY
            .register(Box::new(EVENTHUB_EVENTS_SENT_TOTAL.clone()))
            .expect("eventhub_events_sent_total can be registered");
        REGISTRY
            .register(Box::new(EVENTHUB_EVENTS_RECEIVED_TOTAL.clone()))
            .expect("eventhub_events_received_total can be registered");
        REGISTRY
            .register(Box::new(EVENTHUB_ERRORS_TOTAL.clone()))
            .expect("eventhub_errors_total can be registered");

        // DIFI
        REGISTRY
            .register(Box::new(DIFI_PACKETS_SENT_TOTAL.clone()))
            .expect("difi_packets_sent_total can be registered");
        REGISTRY
            .register(Box::new(DIFI_PACKETS_RECEIVED_TOTAL.clone()))
            .expect("difi_packets_received_total can be registered");
        REGISTRY
            .register(Box::new(DIFI_OUT_OF_ORDER_TOTAL.clone()))
            .expect("difi_out_of_order_total can be registered");

        // Control plane
        REGISTRY
            .register(Box::new(CONTROL_REQUESTS_TOTAL.clone()))
            .expect("control_requests_total can be registered");
    });
}

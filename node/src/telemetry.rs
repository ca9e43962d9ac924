// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize telemetry (logs + metrics)
pub fn init_telemetry() {
    // 1. Initialize Tracing (Logs)
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "fabric_node=debug,experience_fabric=info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Initialize Metrics (Prometheus)
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROM_HANDLE.set(handle).is_err() {
                tracing::warn!("Prometheus handle already set. Telemetry re-initialized?");
            }
        }
        Err(e) => tracing::error!("Failed to install Prometheus recorder: {}", e),
    }

    metrics::describe_counter!("fabric_envelopes_published_total", "Envelopes durably admitted");
    metrics::describe_counter!("fabric_publish_rejected_total", "Publish calls rejected, by reason");
    metrics::describe_histogram!("fabric_publish_duration_seconds", "Time from publish call to durable admission");
    metrics::describe_histogram!("fabric_publish_blocked_seconds", "Time a publish waited for full subscriber channels");
    metrics::describe_counter!("fabric_subscriber_overflow_total", "Live subscribers dropped for exceeding their backlog");
    metrics::describe_counter!("fabric_archive_corruption_total", "Invalid frames found while reading the archive");
    metrics::describe_counter!("fabric_segment_rollovers_total", "Segment files closed and rolled over");
    metrics::describe_gauge!("fabric_latest_sequence", "Sequence of the last admitted envelope");

    // Ensure at least one metric exists on startup
    metrics::gauge!("fabric_node_up", 1.0);
}

/// Get the Prometheus handle to render metrics
pub fn get_metrics() -> String {
    if let Some(handle) = PROM_HANDLE.get() {
        handle.render()
    } else {
        "# metrics not initialized".to_string()
    }
}

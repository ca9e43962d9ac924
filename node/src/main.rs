// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use experience_fabric::Fabric;
use fabric_node::config::NodeConfig;
use fabric_node::server::{build_router, SharedFabric};
use fabric_node::telemetry::init_telemetry;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    init_telemetry();

    let cfg = match NodeConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("Configuration error: {}", e);
            std::process::exit(2);
        }
    };
    tracing::info!(
        "Initializing Fabric Node: bind {}, archive {:?}, retention {}, auth {}",
        cfg.bind_addr,
        cfg.fabric.archive_dir,
        cfg.fabric.retention_count,
        if cfg.auth_token.is_some() { "on" } else { "off" }
    );

    // Recovery (torn-tail truncation, ring warm-up) happens inside open
    let fabric: SharedFabric = match Fabric::open(cfg.fabric.clone()) {
        Ok(fabric) => Arc::new(fabric),
        Err(e) => {
            tracing::error!("Failed to open fabric at {:?}: {}", cfg.fabric.archive_dir, e);
            std::process::exit(1);
        }
    };

    let app = build_router(Arc::clone(&fabric), cfg.auth_token.clone());

    let addr = cfg.bind_addr;
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    tracing::info!("Listening on {}", addr);

    let shutdown_fabric = Arc::clone(&fabric);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown signal received");
            // Ends open subscription streams so connections can drain
            if let Err(e) = shutdown_fabric.shutdown() {
                tracing::error!("Fabric shutdown failed: {}", e);
            }
        })
        .await;

    if let Err(e) = served {
        tracing::error!("Server error: {}", e);
    }
    if let Err(e) = fabric.shutdown() {
        tracing::error!("Final fabric sync failed: {}", e);
    }
}

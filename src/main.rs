//! Node manager - lifecycle management for containerised nodes
//!
//! This is the main entry point for the node manager service.
//! It manages node containers through the Docker API and provides a REST API to drive them.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::HeaderName;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use node_manager::api::create_router;
use node_manager::config::AppConfig;
use node_manager::container::NodeManager;
use node_manager::engine::{BollardBridge, EngineBridge};
use node_manager::logging::init_logging;
use node_manager::paths::PathTranslator;
use node_manager::store::YamlConfigStore;
use node_manager::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging
    init_logging(&config.log_level, &config.log_dir)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting node manager"
    );

    // Initialize metrics system
    node_manager::metrics::init_metrics();
    info!("Prometheus metrics initialized");

    // Connect to the container engine; failures surface per request, not at startup
    let engine = BollardBridge::connect(config.engine_socket.as_deref(), config.engine_timeout())
        .context("Failed to configure container engine client")?;
    match engine.ping().await {
        Ok(version) => info!(engine_version = %version, "Container engine connected"),
        Err(e) => warn!(error = %e, "Container engine not reachable yet"),
    }

    let detected_home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/root"));
    let translator = PathTranslator::new(&config.paths, &detected_home);
    for rule in translator.rules() {
        info!(internal = %rule.prefix, host = %rule.host_root, "Path mapping");
    }

    let store = YamlConfigStore::new(&config.store);
    let manager = NodeManager::new(&config, Arc::new(engine), Arc::new(store), translator);

    // Create shared application state
    let state = Arc::new(AppState {
        config: config.clone(),
        manager,
    });

    // Build the router with all routes and middleware
    let x_request_id = HeaderName::from_static("x-request-id");
    let app = create_router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::new(x_request_id)),
    );

    // Bind to address
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!(%addr, "Listening on");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Start server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Node containers keep running after the manager exits
    info!("Node manager stopped");
    Ok(())
}

/// Handle shutdown signals gracefully
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutting down...");
}

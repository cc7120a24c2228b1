//! Axum API server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vmart_api::{create_router, metrics, ApiConfig, AppState};
use vmart_worker::{FlusherConfig, ProgressFlusher, ProgressStore};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Install rustls crypto provider (required for rustls 0.23+)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("vmart=info".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vmart-api");

    // Load configuration
    let config = ApiConfig::from_env();
    info!("API config: host={}, port={}", config.host, config.port);

    // Create application state
    let state = match AppState::new(config.clone()).await {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create application state: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize metrics
    let metrics_enabled = std::env::var("METRICS_ENABLED")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(true);

    let metrics_handle = if metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics())
    } else {
        None
    };

    // Start the flusher background task
    let flusher_config = FlusherConfig::from_env();
    let shutdown_timeout = flusher_config.shutdown_timeout;
    let store: Arc<dyn ProgressStore> = Arc::clone(&state.progress) as Arc<dyn ProgressStore>;
    let flusher = ProgressFlusher::new(
        flusher_config,
        Arc::clone(&state.queue),
        store,
        Arc::clone(&state.dead_letters),
    );
    let flusher_handle = tokio::spawn(async move {
        if let Err(e) = flusher.run().await {
            error!("Flusher stopped with error: {}", e);
        }
    });

    // Create router
    let queue = Arc::clone(&state.queue);
    let app = create_router(state, metrics_handle);

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("Invalid bind address");

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    // Stop accepting new tasks, then give in-flight flushes a bounded window
    queue.close().await;
    match tokio::time::timeout(shutdown_timeout, flusher_handle).await {
        Ok(_) => info!("Flusher drained"),
        Err(_) => warn!(
            "Flusher did not drain within {:?}, exiting anyway",
            shutdown_timeout
        ),
    }

    info!("Server shutdown complete");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    info!("Received shutdown signal");
}

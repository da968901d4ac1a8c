use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quboflow_api::config::ServerConfig;
use quboflow_api::engine::{DispatcherOptions, JobDispatcher, JobRegistry};
use quboflow_api::router::build_app_router;
use quboflow_api::state::AppState;
use quboflow_events::JobBus;
use quboflow_worker::{JobRunner, WorkerConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quboflow_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    let worker_config = WorkerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");
    tracing::info!(
        concurrency = worker_config.concurrency,
        storage = ?worker_config.storage,
        python = %worker_config.provisioner.python_bin,
        "Loaded worker configuration",
    );

    // --- Job pipeline ---
    let runner = Arc::new(JobRunner::from_config(&worker_config).await);
    let bus = Arc::new(JobBus::default());
    let registry = Arc::new(JobRegistry::new());

    let cancel = CancellationToken::new();
    let (dispatcher, pool) = JobDispatcher::start(
        Arc::clone(&runner),
        Arc::clone(&registry),
        Arc::clone(&bus),
        DispatcherOptions {
            concurrency: worker_config.concurrency,
            queue_capacity: worker_config.queue_capacity,
        },
        cancel.clone(),
    );

    // --- App state ---
    let state = AppState {
        bus,
        registry,
        dispatcher,
        runner,
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, draining workers");
    cancel.cancel();
    let drain = Duration::from_secs(config.shutdown_timeout_secs);
    if tokio::time::timeout(drain, pool.join()).await.is_err() {
        tracing::warn!(
            timeout_secs = config.shutdown_timeout_secs,
            "Workers still busy at shutdown deadline",
        );
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT or SIGTERM to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::services::{
    cancel_task, clear_finished, get_settings, health, load_share, pause_all, resume_all, retry_failed,
    retry_task, start_download, status, update_settings,
};
use super::state::AppState;
use super::ws::feed_socket;
use crate::config::Config;
use crate::engine::DownloadManager;
use crate::humanize::ByteSize;
use crate::observability::Metrics;
use crate::remote::HttpSource;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/load", post(load_share))
        .route("/api/download", post(start_download))
        .route("/api/cancel", post(cancel_task))
        .route("/api/retry", post(retry_task))
        .route("/api/retry-failed", post(retry_failed))
        .route("/api/pause", post(pause_all))
        .route("/api/resume", post(resume_all))
        .route("/api/clear", post(clear_finished))
        .route("/api/status", get(status))
        .route("/api/settings", get(get_settings).patch(update_settings))
        .route("/api/health", get(health))
        .route("/ws", get(feed_socket))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve the API until Ctrl-C or SIGTERM, then cancel every active download.
pub async fn run(config: Config, demo: bool) -> Result<(), AnyError> {
    let remote = HttpSource::new(config.http_config())?;
    let options = config.engine_options();
    info!(
        directory = %options.download_dir.display(),
        max_concurrent = options.max_concurrent,
        max_retry_attempts = options.max_retry_attempts,
        verify = options.verify_by_default,
        write_buffer = %ByteSize(options.write_buffer as u64),
        "download engine configured"
    );

    let manager = DownloadManager::with_metrics(Arc::new(remote), options, Arc::new(Metrics::new()));
    if demo {
        manager.populate_demo();
    }

    let address = config.server.bind_addr;
    let state = AppState::new(config, manager.clone());
    let shutdown = Arc::clone(&state.shutdown);
    let app = router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "fetchtree listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.send_replace(true);
        })
        .await?;

    let cancelled = manager.cancel_all();
    info!(cancelled, "shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

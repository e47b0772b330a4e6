mod config;

use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use chirp_api::AppStateInner;
use chirp_db::Database;

use crate::config::Config;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chirp=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    // Shared state; starts the fan-out workers
    let state = AppStateInner::new(db, &config.gateway, config.jwt_secret.clone());

    let app = chirp_api::router(state.clone())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Chirp server listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Ends every open event stream so in-flight connections can finish.
            shutdown.cancel();
        })
        .await?;

    // Let queued notifications and timeline copies land before exiting.
    match tokio::time::timeout(DRAIN_TIMEOUT, state.fanout.drain()).await {
        Ok(()) => info!("Fan-out drained"),
        Err(_) => warn!(
            "Fan-out did not drain within {:?}; {} job(s) abandoned",
            DRAIN_TIMEOUT,
            state.fanout.stats().pending
        ),
    }

    info!("Chirp server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}

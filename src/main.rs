//! Disappearo - ephemeral two-party chat
//!
//! A Rust backend for time-boxed chat sessions where transcripts are only
//! exported once both participants agree.

mod api;
mod config;
mod db;
mod export;
mod lifecycle;
mod moderation;
mod runtime;

use api::{create_router, AppState};
use config::Config;
use db::Database;
use moderation::Moderator;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "disappearo=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = Config::from_env();

    // Ensure database directory exists
    if let Some(parent) = PathBuf::from(&config.db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path, "Opening database");
    let db = Database::open(&config.db_path)?;

    let moderator = Arc::new(Moderator::from_config(&config.moderation));
    if moderator.has_remote() {
        tracing::info!(
            text_model = %config.moderation.text_model,
            image_model = %config.moderation.image_model,
            "Remote moderation enabled"
        );
    } else {
        tracing::warn!("HUGGINGFACE_API_TOKEN not set, moderating with the local word list only");
    }

    let state = AppState::new(db, moderator, config.app_name.clone(), config.session_ttl);

    let shutdown = CancellationToken::new();
    let sweeper = lifecycle::spawn_expiry_sweeper(
        state.runtime.clone(),
        config.sweep_interval,
        shutdown.clone(),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new().gzip(true).br(true);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(compression);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("{} server listening on {}", config.app_name, addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    let _ = sweeper.await;
    Ok(())
}

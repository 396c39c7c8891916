use std::sync::Arc;

use axum::{Router, routing::get};
use chrono::Duration;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;
use woori::auth::TokenAuthenticator;
use woori::collab::InMemoryNeighborhood;
use woori::config::Config;
use woori::{AppState, db, ws};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let db_pool = db::connect(&config.database_url).await?;

    let state = AppState {
        db_pool,
        registry: ws::ConnectionRegistry::new(),
        auth: Arc::new(TokenAuthenticator::new(Duration::minutes(
            config.token_ttl_minutes,
        ))),
        hood: Arc::new(InMemoryNeighborhood::new()),
    };

    let app = Router::new()
        .route("/ws", get(ws::handler::chat_ws))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
        .layer(CorsLayer::permissive());

    tracing::info!(addr = %config.bind_addr, "listening");
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

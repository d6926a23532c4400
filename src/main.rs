use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use edu_portal_api::{config, is_production, router, AppState};

/// How often expired in-process entries and stale session indexes are swept.
const JANITOR_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, REDIS_URL, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,tower_http=info".into()))
        .init();

    let config = config::config().clone();
    info!("Starting Educational Portal API in {:?} mode", config.environment);
    if is_production!() && config.security.jwt_secret.is_empty() {
        anyhow::bail!("JWT_SECRET must be set in production");
    }

    let port = config.server.port;
    let state = AppState::build(config).await?;

    let report = state.cache.warmup(None).await;
    if !report.failed.is_empty() {
        warn!(failed = ?report.failed, "some cache warmup tasks failed");
    }

    tokio::spawn(janitor(state.clone()));

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    info!("Educational Portal API listening on http://{}", bind_addr);
    axum::serve(listener, router(state)).await.context("server error")?;
    Ok(())
}

async fn janitor(state: AppState) {
    let mut ticker = tokio::time::interval(JANITOR_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let purged = state.purge_expired().await;
        match state.sessions.cleanup_expired().await {
            Ok(removed) => info!(purged, removed, "janitor pass complete"),
            Err(e) => warn!(error = %e, "session cleanup failed"),
        }
    }
}

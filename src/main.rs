use std::sync::Arc;

use anyhow::Context;
use safarichat::{AppState, app, config::Config, db, hub::Hub};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("safarichat=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;

    let db_pool = db::connect(&config.database_url).await?;
    let state = AppState {
        db_pool,
        hub: Arc::new(Hub::new(config.outbox_capacity)),
    };

    let app = app(state, &config.allowed_origins);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "safarichat listening");

    axum::serve(listener, app).await?;
    Ok(())
}

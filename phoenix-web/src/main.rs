//! Phoenix dashboard server
//!
//! Usage:
//!   phoenix-web [--verbose]
//!
//! Listens on `PHOENIX_HOST:PHOENIX_PORT` (default 127.0.0.1:8501).

use anyhow::Context;
use phoenix_crew::PhoenixConfig;
use phoenix_web::{router, AppState};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let verbose = std::env::args().skip(1).any(|a| a == "-v" || a == "--verbose");
    let default = if verbose {
        "phoenix=debug,tower_http=debug"
    } else {
        "phoenix=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("PHOENIX_LOG")
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = PhoenixConfig::from_env()?;
    let addr = config.bind_addr();
    if !config.api_key_configured() {
        tracing::warn!(
            "{} is not set; the dashboard starts with fixing disabled",
            config.provider.api_key_var()
        );
    }

    let state = AppState::from_config(config)?;
    let app = router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("Phoenix dashboard listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}

// src/main.rs
mod codec;
mod commands;
mod config;
mod http;
mod logging;
mod state;
mod sync;
#[cfg(test)]
mod testutil;

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // -------- logging ----------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("ground_console=info".parse().unwrap())
                .add_directive("shared_formats=info".parse().unwrap())
                .add_directive("tokio=warn".parse().unwrap()),
        )
        .compact()
        .init();

    // -------- config ----------
    let cfg = config::Cli::parse_and_build_config()?;
    info!(?cfg, "ground console starting");

    // -------- session state ----------
    let state = state::StateHandle::new();

    // -------- codec gateway ----------
    let codec: Arc<dyn codec::PacketCodec> = Arc::new(codec::CodecGateway::from_config(&cfg));

    // -------- convergence driver ----------
    let driver = sync::spawn_driver(state.clone(), codec.clone());

    // -------- http surface ----------
    let http = tokio::spawn(http::serve(cfg.clone(), state.clone(), codec.clone()));

    info!("console running. Press Ctrl+C to stop…");

    // -------- graceful shutdown ----------
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(?e, "failed to install Ctrl+C handler");
    }
    info!("shutdown signal received; exiting.");
    http.abort();
    driver.abort();
    Ok(())
}

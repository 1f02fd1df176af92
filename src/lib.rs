pub mod core;
pub mod dashboard;
pub mod fetcher;
pub mod providers;
pub mod server;

pub use crate::core::cache;
pub use crate::core::config;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};

pub enum AppCommand {
    Serve { bind: Option<String> },
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("pricedash starting...");

    let config = match config_path {
        Some(path) => config::AppConfig::load_from_path(path)?,
        None => config::AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    match command {
        AppCommand::Serve { bind } => {
            let addr = bind.unwrap_or_else(|| config.server.bind.clone());
            let state = Arc::new(server::AppState::from_config(&config)?);
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Failed to bind {addr}"))?;
            server::serve(listener, state).await
        }
    }
}

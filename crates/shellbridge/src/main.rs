//! # shellbridge
//!
//! Model Context Protocol server that lets AI agents run commands in the
//! user's live tmux shell and read back their output.
//!
//! ## Architecture
//!
//! This is the top layer - the MCP server binary that ties together:
//! - shellbridge-core: Core types and configuration
//! - shellbridge-control: tmux control mode channel
//! - shellbridge-session: Command dispatch and output capture

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use rmcp::{transport::stdio, ServiceExt};
use shellbridge::ShellBridgeServer;
use shellbridge_core::ServerConfig;
use shellbridge_session::sweep_stale_scripts;

fn config_path() -> anyhow::Result<Option<PathBuf>> {
    let mut args = std::env::args().skip(1);
    let mut path = None;
    while let Some(arg) = args.next() {
        if let Some(value) = arg.strip_prefix("--config=") {
            path = Some(PathBuf::from(value));
        } else if arg == "--config" {
            let value = args.next().context("--config requires a path")?;
            path = Some(PathBuf::from(value));
        } else {
            bail!("Unknown argument '{arg}' (usage: shellbridge [--config <path>])");
        }
    }
    Ok(path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match config_path()? {
        Some(path) => ServerConfig::from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ServerConfig::default(),
    };

    // stdout carries the MCP stream, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.server.log_level)),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!(
        "shellbridge v{} starting (tmux: {})",
        env!("CARGO_PKG_VERSION"),
        config.connection.tmux_binary
    );

    let script_dir = config.dispatch.script_dir();
    match sweep_stale_scripts(
        &script_dir,
        &config.dispatch.script_prefix,
        Duration::from_secs(config.dispatch.stale_script_age_secs),
    ) {
        Ok(removed) => tracing::debug!("Stale script sweep removed {} files", removed),
        Err(e) => tracing::warn!("Could not sweep {}: {}", script_dir.display(), e),
    }

    let server = ShellBridgeServer::new(&config);

    let service = server.clone().serve(stdio()).await.map_err(|e| {
        tracing::error!("Error starting server: {}", e);
        e
    })?;

    tracing::info!("shellbridge running on stdio");

    service.waiting().await?;

    server.shutdown().await;
    tracing::info!("shellbridge shutting down");

    Ok(())
}

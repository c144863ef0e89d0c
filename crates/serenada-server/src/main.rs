//! Serenada signaling server binary

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use serenada_server::config::ServerConfig;
use serenada_server::http::{router, AppState};

#[derive(Parser)]
#[command(name = "serenada-server")]
#[command(about = "Serenada signaling server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the signaling server
    Serve {
        /// Bind address
        #[arg(short, long, default_value = "0.0.0.0:8443", env = "BIND_ADDR")]
        addr: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { addr } => serve(addr).await,
    }
}

async fn serve(addr: SocketAddr) -> anyhow::Result<()> {
    let state = AppState::new(ServerConfig::from_env());

    tokio::spawn(Arc::clone(&state.hub).run_sse_reaper());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "signaling server listening");

    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    // In-memory state is disposable by design; clients reconnect and
    // rejoin with their reconnect tokens after a restart.
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

//! HTTP gateway entrypoint.

use anyhow::{Context, Result};
use clap::Parser;
use pxtools::{api, config, logging, service::GatewayService};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(name = "pxtools", about = "LLM and mail gateway")]
struct Cli {
    /// Port to listen on; overrides SERVER_PORT.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    config::init_config();
    logging::init_tracing();

    let config = config::get_config();
    let service = GatewayService::new(config).context("failed to build gateway service")?;
    let app = api::create_router(Arc::new(service), config);

    let port = cli.port.unwrap_or(config.server_port);
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);

    axum::serve(listener, app)
        .await
        .context("HTTP server terminated unexpectedly")?;
    Ok(())
}

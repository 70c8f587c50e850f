//! `syscontext-server` binary entry point.

use std::sync::Arc;

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use syscontext_server::cli::Cli;
use syscontext_server::logging::init_logging;
use syscontext_server::{build_router, StaticTokenAuthenticator};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format)?;

    if let Some(addr) = cli.metrics_addr {
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        info!(%addr, "prometheus exporter listening");
    }

    let config = cli.to_config()?;
    let authenticator = StaticTokenAuthenticator::from_identities(&config.identities);
    if authenticator.is_empty() {
        warn!("no identities configured, every request is anonymous");
    } else {
        info!(identities = authenticator.len(), "identity table loaded");
    }

    let addr = format!("{}:{}", config.host, config.port);
    let router = build_router(config, Arc::new(authenticator));

    let listener = TcpListener::bind(&addr).await?;
    info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received, draining");
}

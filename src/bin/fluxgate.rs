//! fluxgate proxy binary
//!
//! Serves the InfluxDB 1.x HTTP API in front of a fixed set of shard nodes.

use fluxgate::api;
use fluxgate::cluster::Proxy;
use fluxgate::config::ProxyConfig;
use fluxgate::telemetry::Telemetry;
use fluxgate::Error;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

/// Sharding and query-federation proxy
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, short, env = "FLUXGATE_CONFIG")]
    config: Option<String>,

    /// Shard node address; repeat for each node. Replaces configured upstreams.
    #[arg(long = "upstream")]
    upstreams: Vec<String>,

    /// HTTP listen address
    #[arg(long)]
    http_addr: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let _telemetry = Telemetry::init_for_component("fluxgate", &args.log_level)?;

    info!("Starting fluxgate");

    let mut config = match &args.config {
        Some(path) => ProxyConfig::load(path)?,
        None => {
            let mut config = ProxyConfig::default();
            config.apply_env();
            config
        }
    };
    let upstreams = args.upstreams.join(",");
    config.apply_overrides(Some(&upstreams), args.http_addr.as_deref());
    config.validate()?;

    let proxy = Proxy::from_config(&config)?;
    let router = api::build_http_router(proxy);

    let listener = TcpListener::bind(&config.httpd.addr).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    info!(
        http_addr = %config.httpd.addr,
        upstreams = config.upstreams.addrs.len(),
        query_timeout_secs = config.query.timeout_secs,
        "Proxy ready"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx))
        .await
        .map_err(|e| Error::Internal(format!("HTTP server error: {e}")))?;

    info!("Proxy shutting down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    if *shutdown.borrow() {
        return;
    }
    let _ = shutdown.changed().await;
}

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ipcount::analytics::GeoIpService;
use ipcount::api;
use ipcount::config::Config;
use ipcount::fingerprint::Fingerprinter;
use ipcount::service::VisitorService;
use ipcount::storage::SqliteLedger;
use ipcount::BUCKET;

#[derive(Parser)]
#[command(name = "ipcount")]
#[command(about = "Counts distinct visitors active within a rolling window", long_about = None)]
struct Cli {
    /// Path to config.ini
    config: PathBuf,
    /// Path to the visitor ledger (created if missing)
    database: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config)?;
    let threshold = config.threshold()?;
    info!(
        "Loaded configuration (active window: {} minutes)",
        threshold.window().num_minutes()
    );

    // Open the ledger
    let ledger = SqliteLedger::open(&cli.database, BUCKET)
        .await
        .with_context(|| format!("Failed to open ledger at {}", cli.database.display()))?;
    info!("Ledger opened: {}", cli.database.display());

    let mut service = VisitorService::new(
        Box::new(ledger),
        Fingerprinter::new(&config.secret)?,
        threshold,
    );

    match config.geoip.database_path.as_deref() {
        Some(path) => {
            let geoip = GeoIpService::new(path)?;
            service = service.with_country_lookup(Box::new(geoip));
            info!("🌍 GeoIP country lookup enabled: {}", path);
        }
        None => {
            info!("GeoIP country lookup disabled - all visitors count as 'Unknown'");
        }
    }

    let service = Arc::new(service);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper =
        service.spawn_sweeper(Duration::from_secs(config.sweep.interval_secs), shutdown_rx);
    if sweeper.is_some() {
        info!(
            "Background sweep every {} seconds",
            config.sweep.interval_secs
        );
    }

    let router = api::create_api_router(Arc::clone(&service));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("🚀 Server listening on http://{}", addr);
    info!("   - record a visit: http://{}/add?ip=<address>", addr);
    info!("   - active visitors: http://{}/count", addr);
    info!("   - per country: http://{}/countries", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = sweeper {
        if let Err(e) = handle.await {
            error!("Background sweeper panicked: {}", e);
        }
    }

    service.close().await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining requests...");
}

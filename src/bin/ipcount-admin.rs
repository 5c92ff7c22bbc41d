use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use ipcount::config::Config;
use ipcount::fingerprint::Fingerprinter;
use ipcount::service::VisitorService;
use ipcount::storage::SqliteLedger;
use ipcount::BUCKET;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ipcount-admin")]
#[command(about = "ipcount ledger inspection CLI", long_about = None)]
struct Cli {
    /// Path to config.ini (same file the server uses)
    config: PathBuf,
    /// Path to the visitor ledger
    database: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Count active visitors (evicts stale ones, like the server does)
    Count,
    /// Count active visitors per country (evicts stale ones)
    Countries,
    /// Show the stored record for an address
    Lookup {
        /// Visitor address, exactly as reported to /add
        address: String,
    },
    /// Print the fingerprint the server stores for an address
    Fingerprint {
        /// Visitor address, exactly as reported to /add
        address: String,
    },
}

fn format_timestamp(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| format!("{} (out of range)", ts))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let fingerprinter = Fingerprinter::new(&config.secret)?;

    if let Commands::Fingerprint { address } = &cli.command {
        println!("{}", fingerprinter.fingerprint(address));
        return Ok(());
    }

    let ledger = SqliteLedger::open(&cli.database, BUCKET).await?;
    let service = VisitorService::new(Box::new(ledger), fingerprinter, config.threshold()?);

    match cli.command {
        Commands::Count => {
            println!("{}", service.count_active().await?);
        }
        Commands::Countries => {
            let histogram = service.count_by_country().await?;
            println!("{:<12} {}", "Country", "Visitors");
            println!("{}", "-".repeat(24));
            for (country, count) in histogram {
                println!("{:<12} {}", country, count);
            }
            println!("\n{} records stored after sweep", service.stored().await?);
        }
        Commands::Lookup { address } => match service.lookup(&address).await? {
            Some(record) => {
                let now = Utc::now().timestamp();
                let state = if service.threshold().is_active(record.last_visit, now) {
                    "active"
                } else {
                    "stale (evicted on next count)"
                };
                println!("✓ {} ({})", service.fingerprint(&address), state);
                println!("  last visit: {}", format_timestamp(record.last_visit));
                println!(
                    "  country:    {}",
                    record.country.as_ref().map_or("unknown", |c| c.as_str())
                );
            }
            None => {
                println!("⚠ No record for '{}'", address);
            }
        },
        Commands::Fingerprint { .. } => {}
    }

    service.close().await;
    Ok(())
}

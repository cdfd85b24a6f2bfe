//! Tally accounting service binary
//!
//! Runs the ledger consumer until the process is terminated.

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tally_accounting::{Accounting, AccountingConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Tally accounting v{}", tally_common::VERSION);

    let config = AccountingConfig::load()?;
    info!(
        nats_url = %config.nats_url,
        subject = %config.fee_request_subject,
        ledger = if config.redis_url.is_some() { "redis" } else { "memory" },
        "Loaded configuration"
    );

    let accounting = Accounting::new(config).await?;
    let registry = prometheus::Registry::new();
    accounting.metrics().register(&registry)?;

    let supervisor = accounting.supervisor();

    tokio::select! {
        _ = supervisor.run() => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutting down...");
        }
    }

    Ok(())
}

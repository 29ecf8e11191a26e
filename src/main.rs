use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tribot::app::App;
use tribot::config::Config;

#[derive(Debug, Parser)]
#[command(name = "tribot", about = "Real-time triangular arbitrage engine for NDAX")]
struct Cli {
    /// Log sized orders instead of submitting them.
    #[arg(long)]
    dry_run: bool,
    /// Emit trade legs one at a time instead of all at once.
    #[arg(long)]
    sequential: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::from_env()?;
    config.dry_run |= cli.dry_run;
    config.sequential_emission |= cli.sequential;

    info!(
        legs = ?config.legs,
        depth = config.depth,
        cash = config.cash_available,
        min_trade_value = config.min_trade_value,
        dry_run = config.dry_run,
        "starting tribot"
    );

    App::new(config).run().await
}

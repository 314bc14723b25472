mod cli;
mod telemetry;

use clap::Parser;
use tracing::error;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    if let Err(err) = telemetry::init() {
        eprintln!("⚠️  {err:#}");
    }

    let cli = Cli::parse();
    if let Err(err) = cli::run(cli).await {
        error!("{err:#}");
        eprintln!("❌ {err:#}");
        std::process::exit(1);
    }
}

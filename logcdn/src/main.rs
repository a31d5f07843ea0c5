mod server;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use logcdn_core::{
    bootstrap::{init_database, init_services, load_config, run_migrations},
    logging,
};

use server::LogCdnServer;

/// CDN log item storage and streaming server
#[derive(Debug, Parser)]
#[command(name = "logcdn", version, about)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "LOGCDN_CONFIG_PATH")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load and validate configuration
    let config = load_config(cli.config.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("logcdn server starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Registry database (skipped for the in-memory store)
    let pool = if config.database.is_memory() {
        None
    } else {
        let pool = init_database(&config.database).await?;
        run_migrations(&pool).await?;
        Some(pool)
    };

    // 4. Register storage units and wire services
    let services = init_services(pool, &config).await?;

    // 5. Run until a shutdown signal arrives
    LogCdnServer::new(config, services).start().await
}

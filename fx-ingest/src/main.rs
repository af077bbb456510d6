use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use fx_ingest::config::AppConfig;
use fx_ingest::logging;
use fx_ingest::services::AppContext;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "FX_INGEST_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables before clap reads FX_INGEST_CONFIG
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = AppConfig::load(args.config.as_deref())?;

    let (logging_config, _log_guard) =
        logging::init_logging(&config.logging.log_dir, config.logging.filter.as_deref())?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting fx-ingest");

    let ctx = Arc::new(AppContext::from_config(config).await?);
    logging_config.start_retention_cleanup(&ctx.scheduler)?;
    ctx.start()?;

    let scheduler = ctx.scheduler.clone();
    let mut runner = tokio::spawn(async move { scheduler.run().await });

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
        }
        result = &mut runner => {
            error!(?result, "Scheduler exited unexpectedly");
        }
    }

    let report = ctx.shutdown().await;
    if !runner.is_finished() {
        runner.await??;
    }

    info!(
        graceful = report.graceful,
        forced = report.forced,
        "fx-ingest stopped"
    );
    Ok(())
}

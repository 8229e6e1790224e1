//! Loader - ingests measurement dump files into the analytics store, one file after another

use anyhow::Result;
use clap::Parser;
use probe_ingest::config::{Args, Config};
use probe_ingest::ingestion::driver::IngestionDriver;
use probe_ingest::ingestion::write::PgStore;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();

    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    info!(
        "Configuration loaded (store {}:{}/{}, batch size {})",
        config.host, config.port, config.database, config.batch_size
    );

    let store = match PgStore::connect(config.connect_options(), config.connect_timeout()).await {
        Ok(store) => store,
        Err(e) => {
            error!("✗ {}", e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = run(&store, &config, &args.files).await;
    store.close().await;

    match outcome {
        Ok(()) => {
            info!("✓ All files processed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("✗ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::from_env()?;
    config.apply_args(args);
    Ok(config)
}

/// Probe once, then ingest files in order, stopping at the first failure
async fn run(store: &PgStore, config: &Config, files: &[PathBuf]) -> Result<()> {
    let mut driver = IngestionDriver::new(store, config.batch_size);
    driver.probe().await?;

    for path in files {
        match driver.ingest_file(path).await {
            Ok(stats) => info!("✓ Successfully processed {}: {}", path.display(), stats),
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("Failed to process {}", path.display())));
            }
        }
    }

    Ok(())
}

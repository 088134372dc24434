use std::env;
use std::sync::Arc;

use anyhow::Result;
use roll_inspector::config::InspectionConfig;
use roll_inspector::errors::error_logging;
use roll_inspector::observability;
use roll_inspector::{InspectionError, RollProcessor};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Rolls named on the command line, or `ROLL_NAME` when none are given.
fn requested_rolls() -> Result<Vec<String>> {
    let args: Vec<String> = env::args().skip(1).collect();
    if !args.is_empty() {
        return Ok(args);
    }

    let roll = env::var("ROLL_NAME").map_err(|_| {
        anyhow::anyhow!("No roll given. Pass roll folder names as arguments or set ROLL_NAME.")
    })?;
    if roll.trim().is_empty() {
        return Err(anyhow::anyhow!("ROLL_NAME cannot be empty"));
    }
    Ok(vec![roll.trim().to_string()])
}

/// Load and validate configuration at startup
fn load_configuration() -> Result<InspectionConfig> {
    let config = InspectionConfig::from_env().map_err(|e| {
        error_logging::log_config_error(&e, "environment", "load");
        anyhow::anyhow!("Configuration loading failed: {}", e)
    })?;

    config.validate().map_err(|e| {
        error_logging::log_config_error(&e, "inspection", "validate");
        anyhow::anyhow!("Configuration validation failed: {}. Please check your configuration values.", e)
    })?;

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file first
    dotenvy::dotenv().ok();

    let config = load_configuration()?;
    observability::init_tracing_with_config(&config.observability)?;
    info!("{}", config.summary());

    let rolls = requested_rolls()?;
    let processor = Arc::new(RollProcessor::new(config)?);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing the images in flight");
                cancel.cancel();
            }
        });
    }

    let mut failed_rolls = 0;
    for roll in rolls {
        let roll_dir = processor.config().roll_dir(&roll);
        if !roll_dir.is_dir() {
            error!(roll = %roll, path = %roll_dir.display(), "Roll folder not found");
            failed_rolls += 1;
            continue;
        }

        let annotation_path = processor.config().annotation_path(&roll_dir);
        let result = Arc::clone(&processor)
            .process_roll_concurrent(roll_dir, annotation_path, cancel.clone())
            .await;

        match result {
            Ok(report) => {
                println!("{}", report.summary());
                if !report.failed.is_empty() {
                    failed_rolls += 1;
                }
            }
            Err(InspectionError::Cancelled) => {
                warn!(roll = %roll, "Stopped before the roll was complete");
                break;
            }
            Err(e) => {
                error!(roll = %roll, error = %e, fatal = e.is_fatal_to_roll(), "Roll processing failed");
                failed_rolls += 1;
            }
        }
    }

    if failed_rolls > 0 {
        return Err(anyhow::anyhow!("{} roll(s) finished with errors", failed_rolls));
    }
    Ok(())
}

//! Observability setup for the inspection engine.
//!
//! This module provides:
//! - Structured logging with configurable levels and formats
//! - Span helpers carrying roll and image context
//! - Metric recording through the `metrics` facade
//!
//! No metrics exporter is installed here; an embedding application installs a
//! recorder if it wants the counters.

use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::prelude::*;

use crate::classification::Classification;
use crate::config::ObservabilityConfig;

/// Initialize structured logging with tracing and configuration
pub fn init_tracing_with_config(config: &ObservabilityConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("roll_inspector={}", config.log_level).parse()?)
        .add_directive(format!("defect_inspection={}", config.log_level).parse()?);

    // Pretty for development, JSON otherwise
    if config.is_development() || config.log_format == "pretty" {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?;
    }

    tracing::info!(
        environment = %config.environment,
        log_level = %config.log_level,
        log_format = %config.log_format,
        "Tracing initialized with structured logging"
    );
    Ok(())
}

/// Create a span for a roll run
pub fn roll_span(roll: &str) -> tracing::Span {
    tracing::info_span!("roll", roll = roll, component = "roll_processor")
}

/// Create a span for a single image of a roll
pub fn image_span(roll: &str, image: &str) -> tracing::Span {
    tracing::info_span!(
        "image",
        roll = roll,
        image = image,
        component = "roll_processor"
    )
}

/// Record a finished image
pub fn record_image_metrics(success: bool, duration: Duration, defect_count: usize) {
    metrics::counter!("inspection_images_total", "result" => if success { "success" } else { "failure" })
        .increment(1);
    metrics::histogram!("inspection_image_duration_seconds").record(duration.as_secs_f64());
    if success {
        metrics::histogram!("inspection_defects_per_image").record(defect_count as f64);
    }
}

/// Record an image skipped before processing
pub fn record_skipped_image(reason: &str) {
    let reason = reason.to_string();
    metrics::counter!("inspection_images_skipped_total", "reason" => reason).increment(1);
}

/// Record one classified defect
pub fn record_defect(classification: Classification, area_mm2: f64) {
    let class = classification.to_string();
    metrics::counter!("inspection_defects_total", "classification" => class).increment(1);
    metrics::histogram!("inspection_defect_area_mm2").record(area_mm2);
}

/// Record a completed roll
pub fn record_roll_metrics(processed: usize, failed: usize, duration: Duration) {
    metrics::counter!("inspection_rolls_total").increment(1);
    metrics::gauge!("inspection_last_roll_processed_images").set(processed as f64);
    metrics::gauge!("inspection_last_roll_failed_images").set(failed as f64);
    metrics::histogram!("inspection_roll_duration_seconds").record(duration.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_and_metrics_without_subscriber() {
        // With no subscriber or recorder installed these are no-ops
        let span = roll_span("rollo1");
        let _guard = span.enter();
        let _image = image_span("rollo1", "img.png").entered();

        record_image_metrics(true, Duration::from_millis(5), 2);
        record_image_metrics(false, Duration::from_millis(5), 0);
        record_skipped_image("missing");
        record_defect(Classification::Nok, 1.8);
        record_roll_metrics(3, 1, Duration::from_secs(1));
    }
}

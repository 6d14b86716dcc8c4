mod bootstrap;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use calista_core::settings::Settings;
use calista_data::sink::JsonlSink;
use calista_runtime::orchestrator::{CycleOutcome, IngestConfig, IngestOrchestrator};
use calista_runtime::portal::PortalClient;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::parse();

    bootstrap::setup_logging(&settings.log_level, settings.log_file.as_ref())?;
    settings.validate()?;
    if settings.data_dir.is_none() {
        bootstrap::ensure_directories()?;
    }

    tracing::info!("Calista Ingest v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Backfill from {}, update interval {} h, trailing window {} d",
        settings.offset_date,
        settings.update_interval_hours,
        settings.window_days
    );

    let fetcher = Arc::new(PortalClient::new(
        settings.email.clone(),
        settings.password.clone(),
    )?);
    let sink = Arc::new(JsonlSink::new(settings.statistics_dir())?);

    let config = IngestConfig {
        offset_date: settings.offset_date,
        window_days: settings.window_days,
        update_interval: Duration::from_secs(settings.update_interval_hours * 3600),
    };
    let orchestrator = IngestOrchestrator::new(fetcher, sink, config);

    if settings.once {
        tracing::info!("Running a single ingestion cycle...");
        let summary = orchestrator.run_cycle().await?;
        tracing::info!(
            devices = summary.devices,
            new_readings = summary.new_readings,
            imported_points = summary.imported_points,
            "Cycle finished"
        );
        return Ok(());
    }

    tracing::info!("Starting scheduled ingestion...");
    let (mut rx, handle) = orchestrator.start();

    loop {
        tokio::select! {
            outcome = rx.recv() => {
                match outcome {
                    Some(outcome) => {
                        log_outcome(&outcome);
                        if outcome.fatal {
                            handle.abort();
                            anyhow::bail!(
                                "authentication failed; update credentials and restart"
                            );
                        }
                    }
                    // The ingestion loop ended on its own.
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received; shutting down ingestion task");
                handle.abort();
                break;
            }
        }
    }

    Ok(())
}

/// Log one cycle outcome at the appropriate level.
fn log_outcome(outcome: &CycleOutcome) {
    if let Some(summary) = &outcome.summary {
        tracing::info!(
            devices = summary.devices,
            new_devices = summary.new_devices,
            new_readings = summary.new_readings,
            removed_devices = summary.removed_devices,
            imported_points = summary.imported_points,
            skipped_points = summary.skipped_points,
            "Ingestion cycle complete"
        );
    }
    if let Some(error) = &outcome.error {
        tracing::warn!(error = %error, fatal = outcome.fatal, "Ingestion cycle failed");
    }
}

//! Pipeline binary for cellstream.
//!
//! Wires the CSV feed, coordinate transform, S2 indexer, and cell store
//! together and runs the two-stage pipeline until the feed's pass policy is
//! exhausted or the process receives Ctrl-C.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `cellstream-config.yaml` (defaults if absent)
//! 2. Initialize structured logging (tracing)
//! 3. Build the transform, indexer, and feature builder
//! 4. Install the Ctrl-C handler on the stop signal
//! 5. Open the configured store
//! 6. Run the pipeline
//! 7. Log the result and close the store

mod error;

use std::path::Path;
use std::sync::Arc;

use cellstream_core::{
    CellAggregator, CsvFileFeed, FeatureBuilder, PipelineConfig, PipelineSummary, StopSignal,
    StoreBackend, run_pipeline,
};
use cellstream_db::{CellStore, DragonflyStore, MemoryStore};
use cellstream_spatial::{SpatialIndexer, transform_for};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

/// Config file looked up relative to the working directory.
const CONFIG_PATH: &str = "cellstream-config.yaml";

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if configuration, store setup, or the pipeline fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let (config, from_file) = load_config()?;

    // 2. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .init();

    info!("cellstream-engine starting");
    if !from_file {
        info!(path = CONFIG_PATH, "Config file not found, using defaults");
    }
    info!(
        feed = %config.feed.path.display(),
        srid = %config.feed.srid(),
        feature_id = config.feed.feature_id,
        passes = config.feed.passes,
        min_level = config.covering.min_level,
        max_level = config.covering.max_level,
        write_pacing_ms = config.aggregator.write_pacing_ms,
        handoff_capacity = config.pipeline.handoff_capacity,
        store = ?config.store.backend,
        "Configuration loaded"
    );

    // 3. Build the ingestion side.
    let builder = FeatureBuilder::new(
        config.feed.feature_id(),
        transform_for(config.feed.srid()).map_err(EngineError::from)?,
        SpatialIndexer::new(config.covering).map_err(EngineError::from)?,
    );
    let feed = CsvFileFeed::new(config.feed.path.clone());

    // 4. Ctrl-C requests a clean stop.
    let stop = Arc::new(StopSignal::new());
    {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received, stopping after in-flight writes");
                    stop.request_stop();
                }
                Err(e) => warn!(error = %e, "failed to listen for Ctrl-C"),
            }
        });
    }

    // 5-6. Open the store and run.
    let summary = match config.store.backend {
        StoreBackend::Memory => {
            run_with_store(&config, MemoryStore::new(), feed, builder, stop).await?
        }
        StoreBackend::Dragonfly => {
            info!(url = config.store.dragonfly_url, "Connecting to Dragonfly");
            let store = Arc::new(
                DragonflyStore::connect(&config.store.dragonfly_url)
                    .await
                    .map_err(EngineError::from)?,
            );
            let summary =
                run_with_store(&config, Arc::clone(&store), feed, builder, stop).await?;
            if let Err(e) = store.quit().await {
                warn!(error = %e, "Dragonfly connection did not close cleanly");
            }
            summary
        }
    };

    // 7. Log results.
    info!(
        passes = summary.passes,
        features_processed = summary.features_processed,
        tokens_written = summary.tokens_written,
        failed_features = summary.failed_features,
        decode_failures = summary.decode_failures,
        stopped = summary.stopped,
        "cellstream-engine shutdown complete"
    );

    Ok(())
}

/// Run the pipeline against an already opened store.
async fn run_with_store<S: CellStore>(
    config: &PipelineConfig,
    store: S,
    feed: CsvFileFeed,
    builder: FeatureBuilder,
    stop: Arc<StopSignal>,
) -> Result<PipelineSummary, EngineError> {
    let mut aggregator = CellAggregator::new(store, config.aggregator_options());
    let summary = run_pipeline(
        feed,
        builder,
        &mut aggregator,
        config.producer_options(),
        config.handoff_policy(),
        stop,
    )
    .await?;
    Ok(summary)
}

/// Load the pipeline configuration from `cellstream-config.yaml`.
///
/// Returns the config and whether it came from the file. Environment
/// overrides apply in both cases.
fn load_config() -> Result<(PipelineConfig, bool), EngineError> {
    let config_path = Path::new(CONFIG_PATH);
    if config_path.exists() {
        Ok((PipelineConfig::from_file(config_path)?, true))
    } else {
        Ok((PipelineConfig::parse("")?, false))
    }
}

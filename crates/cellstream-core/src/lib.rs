//! Ingestion, handoff, and cell aggregation for the cellstream pipeline.
//!
//! This crate owns the two stages that move readings from a feed into
//! per-cell collections in a store:
//!
//! 1. **Ingest**: read `x,y,z` records, convert them to degrees, compute the
//!    S2 cells that cover them, and emit one [`FeatureRecord`] per reading.
//! 2. **Aggregate**: for each cell of each record, read the stored
//!    collection, upsert the entry by feature id, and replace the value.
//!
//! The stages are joined by a rendezvous [`handoff`] so ingestion can never
//! outpace the paced writes.
//!
//! # Modules
//!
//! - [`aggregator`] -- [`CellAggregator`] read-merge-write loop and milestones.
//! - [`config`] -- Configuration loading from `cellstream-config.yaml`.
//! - [`control`] -- [`StopSignal`] shared with whoever controls the run.
//! - [`feed`] -- [`FeedSource`] trait, CSV and in-memory feeds.
//! - [`handoff`] -- Rendezvous or bounded producer/consumer connection.
//! - [`ingest`] -- [`FeatureBuilder`] and the producer loop.
//! - [`pipeline`] -- [`run_pipeline`] wiring both stages together.
//!
//! [`FeatureRecord`]: cellstream_types::FeatureRecord
//! [`CellAggregator`]: aggregator::CellAggregator
//! [`StopSignal`]: control::StopSignal
//! [`FeedSource`]: feed::FeedSource
//! [`FeatureBuilder`]: ingest::FeatureBuilder
//! [`run_pipeline`]: pipeline::run_pipeline

pub mod aggregator;
pub mod config;
pub mod control;
pub mod feed;
pub mod handoff;
pub mod ingest;
pub mod pipeline;

pub use aggregator::{
    AggregateError, AggregatorOptions, AggregatorStats, CellAggregator, FeatureOutcome,
    LogProgress, ProgressObserver,
};
pub use config::{ConfigError, PipelineConfig, StoreBackend};
pub use control::StopSignal;
pub use feed::{CsvFileFeed, CyclePolicy, FeedError, FeedSource, MemoryFeed};
pub use handoff::{HandoffClosed, HandoffPolicy, HandoffReceiver, HandoffSender};
pub use ingest::{FeatureBuilder, IngestError, ProducerOptions, ProducerSummary, run_producer};
pub use pipeline::{PipelineError, PipelineSummary, run_consumer, run_pipeline};

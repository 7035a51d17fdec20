//! Error types for the engine binary.
//!
//! [`EngineError`] is the top-level error type that wraps all possible
//! failure modes during engine startup and the pipeline run.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: cellstream_core::ConfigError,
    },

    /// The indexer or transform could not be built.
    #[error("spatial error: {source}")]
    Spatial {
        /// The underlying spatial error.
        #[from]
        source: cellstream_spatial::SpatialError,
    },

    /// The store could not be opened or closed.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: cellstream_db::StoreError,
    },

    /// The pipeline ended abnormally.
    #[error("pipeline error: {source}")]
    Pipeline {
        /// The underlying pipeline error.
        #[from]
        source: cellstream_core::PipelineError,
    },
}

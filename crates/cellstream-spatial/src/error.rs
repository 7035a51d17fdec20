//! Error types for the `cellstream-spatial` crate.
//!
//! All fallible operations in this crate return [`SpatialError`] through the
//! [`Result`] type alias.

/// Errors raised while transforming coordinates or computing coverings.
#[derive(Debug, thiserror::Error)]
pub enum SpatialError {
    /// A coordinate lies outside the valid domain of its reference system.
    #[error("cannot convert ({x}, {y}) from {srid}: {reason}")]
    Conversion {
        /// Source easting.
        x: f64,
        /// Source northing.
        y: f64,
        /// Source reference system, formatted.
        srid: String,
        /// Why the coordinate was rejected.
        reason: &'static str,
    },

    /// The covering could not be computed for the given geometry.
    #[error("index computation failed: {0}")]
    IndexComputation(String),

    /// Invalid covering or transform configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for spatial operations.
pub type Result<T> = std::result::Result<T, SpatialError>;

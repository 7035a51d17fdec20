//! Coordinate transforms and S2 cell coverings for the cellstream pipeline.
//!
//! Readings arrive in a projected reference system; this crate turns them
//! into geographic degrees and then into the tokens of the S2 cells that
//! cover them. Those tokens are the key space of the cell store.
//!
//! # Modules
//!
//! - [`config`] -- Level band and cell cap for coverings.
//! - [`covering`] -- [`SpatialIndexer`], point and region coverings.
//! - [`transform`] -- [`CoordinateTransform`] implementations.
//! - [`error`] -- Error types for conversion and covering.

pub mod config;
pub mod covering;
pub mod error;
pub mod transform;

// Re-export primary types at crate root.
pub use config::CoveringConfig;
pub use covering::SpatialIndexer;
pub use error::{Result, SpatialError};
pub use transform::{CoordinateTransform, Geographic, WebMercator, transform_for};

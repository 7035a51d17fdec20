//! Shared type definitions for the cellstream pipeline.
//!
//! This crate is the single source of truth for the data that flows from
//! the feed, through the spatial indexer, into per-cell collections in the
//! store.
//!
//! # Modules
//!
//! - [`ids`] -- Newtypes for feature ids, cell tokens, and spatial references
//! - [`geometry`] -- Geometry payloads, degree coordinates, raw readings
//! - [`feature`] -- Feature records and their stored entry form
//! - [`collection`] -- Per-cell collections with upsert-by-id merging

pub mod collection;
pub mod feature;
pub mod geometry;
pub mod ids;

// Re-export all public types at crate root for convenience.
pub use collection::{CellCollection, Payload};
pub use feature::{EntryMetadata, FeatureEntry, FeatureRecord};
pub use geometry::{BBox, Geometry, GeometryType, LngLat, PointReading, Position};
pub use ids::{CellToken, FeatureId, Srid};

//! Feature records and their stored form.
//!
//! A [`FeatureRecord`] is built once per feed reading by the ingestion
//! stage and never mutated afterwards. The aggregation stage turns it into
//! a [`FeatureEntry`] for every cell it was assigned to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geometry::{BBox, Geometry, GeometryType};
use crate::ids::{CellToken, FeatureId, Srid};

/// A converted, indexed feature travelling from ingestion to aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// Feature identity used for upsert-by-id.
    pub id: FeatureId,
    /// Geometry type of [`Self::geometry`].
    pub geometry_type: GeometryType,
    /// Reference system of [`Self::geometry`].
    pub srid: Srid,
    /// Geometry in the source reference system.
    pub geometry: Geometry,
    /// Bounding box of the geometry in degrees.
    pub bbox: BBox,
    /// Cells the feature was assigned to, in covering order.
    pub tokens: Vec<CellToken>,
    /// When the reading was converted.
    pub observed_at: DateTime<Utc>,
}

impl FeatureRecord {
    /// Build the entry stored in each cell collection for this record.
    pub fn to_entry(&self) -> FeatureEntry {
        FeatureEntry {
            id: self.id.clone(),
            geometry_type: self.geometry_type,
            srid: self.srid,
            geometry: self.geometry.clone(),
            metadata: EntryMetadata {
                tokens: self.tokens.clone(),
                bbox: self.bbox,
                observed_at: self.observed_at,
            },
        }
    }
}

/// Metadata derived during ingestion and stored next to the geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Every cell the feature covers, including the one it is stored under.
    pub tokens: Vec<CellToken>,
    /// Bounding box in degrees.
    pub bbox: BBox,
    /// When the reading was converted.
    pub observed_at: DateTime<Utc>,
}

/// One feature as stored inside a [`CellCollection`](crate::CellCollection).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEntry {
    /// Feature identity; unique within a collection.
    pub id: FeatureId,
    /// Geometry type.
    pub geometry_type: GeometryType,
    /// Reference system of the geometry.
    pub srid: Srid,
    /// Geometry in the source reference system.
    pub geometry: Geometry,
    /// Derived metadata.
    pub metadata: EntryMetadata,
}

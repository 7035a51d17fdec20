//! S2 cell coverings.
//!
//! A point is covered by exactly one cell: the cell at `max_level` that
//! contains it. Multi-position geometries are covered through the S2 region
//! coverer over their degree bounding rectangle, bounded by the configured
//! level band and cell cap. Both paths are pure functions of their inputs.

use cellstream_types::{BBox, CellToken, LngLat};
use s2::cellid::CellID;
use s2::latlng::LatLng;
use s2::rect::Rect;
use s2::region::RegionCoverer;

use crate::config::CoveringConfig;
use crate::error::{Result, SpatialError};

/// Computes cell tokens for geometries in degrees.
#[derive(Debug, Clone, Copy)]
pub struct SpatialIndexer {
    config: CoveringConfig,
}

impl SpatialIndexer {
    /// Create an indexer after validating its configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::Config`] if the configuration is invalid.
    pub fn new(config: CoveringConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The covering configuration in use.
    pub const fn config(&self) -> &CoveringConfig {
        &self.config
    }

    /// Cover a single point: one token at `max_level`.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::IndexComputation`] if the coordinate is not a
    /// valid geographic position.
    pub fn cover_point(&self, point: LngLat) -> Result<Vec<CellToken>> {
        let cell = leaf_cell(point)?.parent(u64::from(self.config.max_level));
        Ok(vec![CellToken::new(cell.to_token())])
    }

    /// Cover a geometry given as its positions in degrees.
    ///
    /// Returns tokens sorted by cell id with duplicates removed.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::IndexComputation`] if there are no positions,
    /// any position is invalid, or the coverer yields no cells.
    pub fn cover(&self, positions: &[LngLat]) -> Result<Vec<CellToken>> {
        match positions {
            [] => Err(SpatialError::IndexComputation(
                "geometry has no positions".to_owned(),
            )),
            [single] => self.cover_point(*single),
            many => self.cover_region(many),
        }
    }

    fn cover_region(&self, positions: &[LngLat]) -> Result<Vec<CellToken>> {
        for p in positions {
            leaf_cell(*p)?;
        }
        let bbox = BBox::from_points(positions).ok_or_else(|| {
            SpatialError::IndexComputation("geometry has no positions".to_owned())
        })?;

        let rect = Rect::from_degrees(bbox.min_lat, bbox.min_lng, bbox.max_lat, bbox.max_lng);
        let coverer = RegionCoverer {
            min_level: self.config.min_level,
            max_level: self.config.max_level,
            level_mod: 1,
            max_cells: self.config.max_cells,
        };

        let mut cells: Vec<CellID> = coverer.covering(&rect).0;
        if cells.is_empty() {
            return Err(SpatialError::IndexComputation(format!(
                "empty covering for bbox {bbox:?}"
            )));
        }
        cells.sort();
        cells.dedup();
        tracing::trace!(cells = cells.len(), "computed region covering");
        Ok(cells
            .iter()
            .map(|c| CellToken::new(c.to_token()))
            .collect())
    }
}

fn leaf_cell(point: LngLat) -> Result<CellID> {
    if !point.is_valid() {
        return Err(SpatialError::IndexComputation(format!(
            "invalid position lng={} lat={}",
            point.lng, point.lat
        )));
    }
    let ll = LatLng::from_degrees(point.lat, point.lng);
    Ok(CellID::from(&ll))
}

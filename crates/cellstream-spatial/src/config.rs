//! S2 covering configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpatialError};

/// Finest level of the S2 hierarchy.
pub const MAX_S2_LEVEL: u8 = 30;

/// Controls the granularity and cell count of S2 coverings.
///
/// The default band pins both ends at level 10 (cells roughly 10 km across),
/// so every point lands in exactly one cell of a single fixed size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoveringConfig {
    /// Minimum S2 cell level (0-30). Lower = coarser cells.
    #[serde(default = "default_level")]
    pub min_level: u8,

    /// Maximum S2 cell level (0-30). Higher = finer cells.
    #[serde(default = "default_level")]
    pub max_level: u8,

    /// Maximum number of cells in a covering.
    #[serde(default = "default_max_cells")]
    pub max_cells: usize,
}

impl Default for CoveringConfig {
    fn default() -> Self {
        Self {
            min_level: default_level(),
            max_level: default_level(),
            max_cells: default_max_cells(),
        }
    }
}

impl CoveringConfig {
    /// Check the level band and cell cap.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::Config`] if the band is inverted, exceeds
    /// level 30, or the cell cap is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_level > MAX_S2_LEVEL {
            return Err(SpatialError::Config(format!(
                "max_level {} exceeds {MAX_S2_LEVEL}",
                self.max_level
            )));
        }
        if self.min_level > self.max_level {
            return Err(SpatialError::Config(format!(
                "min_level {} is above max_level {}",
                self.min_level, self.max_level
            )));
        }
        if self.max_cells == 0 {
            return Err(SpatialError::Config("max_cells must be at least 1".to_owned()));
        }
        Ok(())
    }
}

const fn default_level() -> u8 {
    10
}

const fn default_max_cells() -> usize {
    10
}

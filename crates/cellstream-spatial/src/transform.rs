//! Projection of feed coordinates into geographic degrees.
//!
//! The S2 indexer works on the sphere, so every reading has to be expressed
//! as longitude/latitude before it can be covered. Implementations reject
//! coordinates outside their reference system's domain instead of passing
//! through values that would land in the wrong cell.

use cellstream_types::{LngLat, Srid};

use crate::error::{Result, SpatialError};

/// Radius of the Web Mercator sphere, metres.
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Half the width of the Web Mercator plane, metres (`pi * R`).
pub const MERCATOR_EXTENT_M: f64 = 20_037_508.342_789_244;

/// Maps `(x, y)` in a fixed source reference system to degrees.
pub trait CoordinateTransform: Send + Sync {
    /// The reference system this transform reads.
    fn source_srid(&self) -> Srid;

    /// Convert one coordinate pair.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::Conversion`] if the pair is outside the
    /// source system's valid domain.
    fn to_degrees(&self, x: f64, y: f64) -> Result<LngLat>;
}

/// Spherical Web Mercator (EPSG:3857) to WGS84 degrees.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebMercator;

impl CoordinateTransform for WebMercator {
    fn source_srid(&self) -> Srid {
        Srid::WEB_MERCATOR
    }

    fn to_degrees(&self, x: f64, y: f64) -> Result<LngLat> {
        let reject = |reason| SpatialError::Conversion {
            x,
            y,
            srid: Srid::WEB_MERCATOR.to_string(),
            reason,
        };
        if !x.is_finite() || !y.is_finite() {
            return Err(reject("coordinate is not finite"));
        }
        if x.abs() > MERCATOR_EXTENT_M || y.abs() > MERCATOR_EXTENT_M {
            return Err(reject("coordinate is outside the projection extent"));
        }

        let lng = (x / EARTH_RADIUS_M).to_degrees();
        let lat = 2.0f64
            .mul_add((y / EARTH_RADIUS_M).exp().atan(), -std::f64::consts::FRAC_PI_2)
            .to_degrees();
        Ok(LngLat::new(lng, lat))
    }
}

/// WGS84 (EPSG:4326) passthrough with range validation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Geographic;

impl CoordinateTransform for Geographic {
    fn source_srid(&self) -> Srid {
        Srid::WGS84
    }

    fn to_degrees(&self, x: f64, y: f64) -> Result<LngLat> {
        let p = LngLat::new(x, y);
        if p.is_valid() {
            Ok(p)
        } else {
            Err(SpatialError::Conversion {
                x,
                y,
                srid: Srid::WGS84.to_string(),
                reason: "longitude or latitude out of range",
            })
        }
    }
}

/// Select the transform for a source reference system.
///
/// # Errors
///
/// Returns [`SpatialError::Config`] for reference systems without a
/// built-in transform.
pub fn transform_for(srid: Srid) -> Result<Box<dyn CoordinateTransform>> {
    match srid {
        Srid::WEB_MERCATOR => Ok(Box::new(WebMercator)),
        Srid::WGS84 => Ok(Box::new(Geographic)),
        other => Err(SpatialError::Config(format!(
            "no coordinate transform for {other}"
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn origin_maps_to_null_island() {
        let p = WebMercator.to_degrees(0.0, 0.0).unwrap();
        assert!(close(p.lng, 0.0));
        assert!(close(p.lat, 0.0));
    }

    #[test]
    fn extent_maps_to_antimeridian_and_mercator_limit() {
        let p = WebMercator
            .to_degrees(MERCATOR_EXTENT_M, MERCATOR_EXTENT_M)
            .unwrap();
        assert!(close(p.lng, 180.0));
        assert!((p.lat - 85.051_128_779_806_59).abs() < 1e-7);
    }

    #[test]
    fn ten_degrees_east() {
        let p = WebMercator.to_degrees(1_113_194.907_932_735_7, 0.0).unwrap();
        assert!((p.lng - 10.0).abs() < 1e-9);
        assert!(close(p.lat, 0.0));
    }

    #[test]
    fn southern_hemisphere_is_negative() {
        let p = WebMercator.to_degrees(-500_000.0, -500_000.0).unwrap();
        assert!(p.lng < 0.0);
        assert!(p.lat < 0.0);
    }

    #[test]
    fn rejects_out_of_domain() {
        assert!(matches!(
            WebMercator.to_degrees(MERCATOR_EXTENT_M * 2.0, 0.0),
            Err(SpatialError::Conversion { .. })
        ));
        assert!(WebMercator.to_degrees(f64::NAN, 0.0).is_err());
        assert!(WebMercator.to_degrees(0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn geographic_passthrough_validates() {
        let p = Geographic.to_degrees(-73.98, 40.75).unwrap();
        assert!(close(p.lng, -73.98));
        assert!(Geographic.to_degrees(0.0, 91.0).is_err());
    }

    #[test]
    fn transform_lookup_by_srid() {
        assert_eq!(
            transform_for(Srid::WEB_MERCATOR).unwrap().source_srid(),
            Srid::WEB_MERCATOR
        );
        assert_eq!(transform_for(Srid::WGS84).unwrap().source_srid(), Srid::WGS84);
        assert!(transform_for(Srid(27700)).is_err());
    }
}

//! Geometry payloads, geographic coordinates, and raw feed readings.
//!
//! [`Geometry`] serializes in `GeoJSON` shape (`{"type": "Point",
//! "coordinates": [x, y, z]}`) and always carries coordinates in the
//! feature's source reference system. Geographic degrees only appear in
//! [`LngLat`] and [`BBox`], which are derived values.

use geo::BoundingRect;
use geo_types::{MultiPoint, Point, Rect};
use serde::{Deserialize, Serialize};

/// One `[x, y, z]` position in the source reference system.
pub type Position = [f64; 3];

/// Geometry type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryType {
    /// A single position.
    Point,
    /// An unordered set of positions.
    MultiPoint,
    /// An ordered path of positions.
    LineString,
}

/// Geometry payload of a feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    /// A single position.
    Point(Position),
    /// An unordered set of positions.
    MultiPoint(Vec<Position>),
    /// An ordered path of positions.
    LineString(Vec<Position>),
}

impl Geometry {
    /// Classify this geometry.
    pub const fn geometry_type(&self) -> GeometryType {
        match self {
            Self::Point(_) => GeometryType::Point,
            Self::MultiPoint(_) => GeometryType::MultiPoint,
            Self::LineString(_) => GeometryType::LineString,
        }
    }

    /// All positions of the geometry, in order.
    pub fn positions(&self) -> &[Position] {
        match self {
            Self::Point(p) => std::slice::from_ref(p),
            Self::MultiPoint(ps) | Self::LineString(ps) => ps,
        }
    }
}

/// A geographic coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LngLat {
    /// Longitude, degrees east.
    pub lng: f64,
    /// Latitude, degrees north.
    pub lat: f64,
}

impl LngLat {
    /// Create a coordinate from longitude and latitude in degrees.
    pub const fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    /// Whether both components are finite and inside the valid degree range.
    pub fn is_valid(&self) -> bool {
        self.lng.is_finite()
            && self.lat.is_finite()
            && (-180.0..=180.0).contains(&self.lng)
            && (-90.0..=90.0).contains(&self.lat)
    }
}

/// Axis-aligned bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    /// Western edge.
    pub min_lng: f64,
    /// Southern edge.
    pub min_lat: f64,
    /// Eastern edge.
    pub max_lng: f64,
    /// Northern edge.
    pub max_lat: f64,
}

impl BBox {
    /// The smallest box containing every coordinate, or `None` if empty.
    pub fn from_points(points: &[LngLat]) -> Option<Self> {
        let multi: MultiPoint<f64> = points.iter().map(|p| Point::new(p.lng, p.lat)).collect();
        multi.bounding_rect().map(Self::from)
    }
}

impl From<Rect<f64>> for BBox {
    fn from(rect: Rect<f64>) -> Self {
        Self {
            min_lng: rect.min().x,
            min_lat: rect.min().y,
            max_lng: rect.max().x,
            max_lat: rect.max().y,
        }
    }
}

/// Raw `(x, y, z)` triple read from the feed, in the feed's reference system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointReading {
    /// Easting (or longitude for geographic feeds).
    pub x: f64,
    /// Northing (or latitude for geographic feeds).
    pub y: f64,
    /// Elevation.
    pub z: f64,
}

impl PointReading {
    /// Create a reading.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Wrap the reading as a point geometry.
    pub const fn to_geometry(self) -> Geometry {
        Geometry::Point([self.x, self.y, self.z])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn point_serializes_as_geojson() {
        let geom = PointReading::new(1.0, 2.0, 3.0).to_geometry();
        let json = serde_json::to_value(&geom).unwrap();
        assert_eq!(json["type"], "Point");
        assert_eq!(json["coordinates"], serde_json::json!([1.0, 2.0, 3.0]));
    }

    #[test]
    fn positions_cover_every_variant() {
        let point = Geometry::Point([0.0, 0.0, 0.0]);
        assert_eq!(point.positions().len(), 1);
        assert_eq!(point.geometry_type(), GeometryType::Point);

        let line = Geometry::LineString(vec![[0.0, 0.0, 0.0], [1.0, 1.0, 0.0]]);
        assert_eq!(line.positions().len(), 2);
        assert_eq!(line.geometry_type(), GeometryType::LineString);
    }

    #[test]
    fn bbox_from_points() {
        let bbox = BBox::from_points(&[
            LngLat::new(10.0, -5.0),
            LngLat::new(-3.0, 7.5),
            LngLat::new(4.0, 0.0),
        ])
        .unwrap();
        assert_eq!(bbox.min_lng, -3.0);
        assert_eq!(bbox.max_lng, 10.0);
        assert_eq!(bbox.min_lat, -5.0);
        assert_eq!(bbox.max_lat, 7.5);
        assert!(BBox::from_points(&[]).is_none());
    }

    #[test]
    fn single_point_bbox_is_degenerate() {
        let bbox = BBox::from_points(&[LngLat::new(2.35, 48.85)]).unwrap();
        assert_eq!(bbox.min_lng, bbox.max_lng);
        assert_eq!(bbox.min_lat, 48.85);
    }

    #[test]
    fn lnglat_validity() {
        assert!(LngLat::new(180.0, -90.0).is_valid());
        assert!(!LngLat::new(180.5, 0.0).is_valid());
        assert!(!LngLat::new(0.0, f64::NAN).is_valid());
    }
}

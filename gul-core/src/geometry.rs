// gul-core/src/geometry.rs
// ============================================================================
// Module: GUL Geometry Model
// Description: Points, fence shapes, and geometric predicates.
// Purpose: Provide the exact containment tests and index bounds that gate
//          flight decisions.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! A fence shape is exactly one of polygon, circle, or axis-aligned bounding
//! box. Containment uses even-odd ray casting on the (lon, lat) plane for
//! polygons, Haversine great-circle distance for circles, and inclusive
//! interval tests for boxes. Bounds are over-approximations meant only for
//! spatial index insertion; the exact predicate always runs after an index
//! lookup.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Mean Earth radius in meters, used by the Haversine distance.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;
/// Approximate meters per degree of latitude.
const METERS_PER_LAT_DEGREE: f64 = 111_000.0;
/// Radians per degree.
const RAD_PER_DEG: f64 = std::f64::consts::PI / 180.0;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when constructing or decoding geometry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    /// Latitude or longitude outside the valid degree range.
    #[error("coordinate out of range: lat={lat}, lon={lon}")]
    InvalidCoordinate {
        /// Offending latitude in degrees.
        lat: f64,
        /// Offending longitude in degrees.
        lon: f64,
    },
    /// The shape violates its structural invariant.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
}

// ============================================================================
// SECTION: Point
// ============================================================================

/// A single WGS84 coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Latitude in degrees, -90 to 90.
    pub lat: f64,
    /// Longitude in degrees, -180 to 180.
    pub lon: f64,
}

impl Point {
    /// Creates a point, validating the coordinate ranges.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::InvalidCoordinate`] outside [-90, 90] /
    /// [-180, 180].
    pub fn new(lat: f64, lon: f64) -> Result<Self, GeometryError> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(GeometryError::InvalidCoordinate { lat, lon });
        }
        Ok(Self { lat, lon })
    }
}

// ============================================================================
// SECTION: Bounding Box
// ============================================================================

/// An axis-aligned rectangle, inclusive on all sides.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Minimum latitude in degrees.
    pub min_lat: f64,
    /// Minimum longitude in degrees.
    pub min_lon: f64,
    /// Maximum latitude in degrees.
    pub max_lat: f64,
    /// Maximum longitude in degrees.
    pub max_lon: f64,
}

impl BoundingBox {
    /// Returns whether the box contains the point (boundary inclusive).
    #[must_use]
    pub fn contains(&self, p: Point) -> bool {
        p.lat >= self.min_lat && p.lat <= self.max_lat && p.lon >= self.min_lon && p.lon <= self.max_lon
    }

    /// Returns whether the box intersects another box.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
            && self.min_lon <= other.max_lon
            && self.max_lon >= other.min_lon
    }

    /// Validates the min/max ordering invariant.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::InvalidGeometry`] when min exceeds max.
    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.min_lat > self.max_lat || self.min_lon > self.max_lon {
            return Err(GeometryError::InvalidGeometry(
                "bounding box min exceeds max".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Geometry
// ============================================================================

/// The spatial shape of a fence: exactly one of the three variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Geometry {
    /// Ordered vertex ring; the last vertex implicitly connects to the first.
    Polygon {
        /// Polygon vertices in ring order.
        vertices: Vec<Point>,
    },
    /// Great-circle disc around a center point.
    Circle {
        /// Circle center.
        center: Point,
        /// Radius in meters.
        radius_m: f64,
    },
    /// Axis-aligned rectangle.
    Bbox(BoundingBox),
}

impl Geometry {
    /// Returns whether the shape contains the point.
    ///
    /// Polygons with fewer than three vertices contain nothing.
    #[must_use]
    pub fn contains(&self, p: Point) -> bool {
        match self {
            Self::Polygon { vertices } => point_in_polygon(p, vertices),
            Self::Circle { center, radius_m } => haversine_distance_m(p, *center) <= *radius_m,
            Self::Bbox(bbox) => bbox.contains(p),
        }
    }

    /// Returns the bounding box used for spatial index insertion.
    ///
    /// Circle bounds are an over-approximation; exact tests run after the
    /// index lookup.
    #[must_use]
    pub fn bounds(&self) -> BoundingBox {
        match self {
            Self::Polygon { vertices } => bounds_from_points(vertices),
            Self::Circle { center, radius_m } => circle_bounds(*center, *radius_m),
            Self::Bbox(bbox) => *bbox,
        }
    }

    /// Validates the structural invariants of the shape.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError`] on out-of-range vertices, non-positive
    /// radius, too few polygon vertices, or inverted box bounds.
    pub fn validate(&self) -> Result<(), GeometryError> {
        match self {
            Self::Polygon { vertices } => {
                if vertices.len() < 3 {
                    return Err(GeometryError::InvalidGeometry(
                        "polygon requires at least 3 vertices".to_string(),
                    ));
                }
                for v in vertices {
                    Point::new(v.lat, v.lon)?;
                }
                Ok(())
            }
            Self::Circle { center, radius_m } => {
                Point::new(center.lat, center.lon)?;
                if !radius_m.is_finite() || *radius_m <= 0.0 {
                    return Err(GeometryError::InvalidGeometry(
                        "circle radius must be positive".to_string(),
                    ));
                }
                Ok(())
            }
            Self::Bbox(bbox) => {
                Point::new(bbox.min_lat, bbox.min_lon)?;
                Point::new(bbox.max_lat, bbox.max_lon)?;
                bbox.validate()
            }
        }
    }
}

// ============================================================================
// SECTION: Predicates
// ============================================================================

/// Even-odd ray casting on the (lon, lat) plane.
///
/// An edge (vi, vj) contributes a crossing iff the vertices straddle the
/// query longitude with strict upper-endpoint inclusion and the edge's
/// latitude at the query longitude exceeds the query latitude.
fn point_in_polygon(p: Point, polygon: &[Point]) -> bool {
    if polygon.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let vi = polygon[i];
        let vj = polygon[j];
        if (vi.lon > p.lon) != (vj.lon > p.lon)
            && p.lat < (vj.lat - vi.lat) * (p.lon - vi.lon) / (vj.lon - vi.lon) + vi.lat
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Haversine great-circle distance between two points in meters.
#[must_use]
pub fn haversine_distance_m(a: Point, b: Point) -> f64 {
    let lat1 = a.lat * RAD_PER_DEG;
    let lat2 = b.lat * RAD_PER_DEG;
    let d_lat = (b.lat - a.lat) * RAD_PER_DEG;
    let d_lon = (b.lon - a.lon) * RAD_PER_DEG;

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// Minimal bounding box of a vertex set.
fn bounds_from_points(points: &[Point]) -> BoundingBox {
    let Some(first) = points.first() else {
        return BoundingBox {
            min_lat: 0.0,
            min_lon: 0.0,
            max_lat: 0.0,
            max_lon: 0.0,
        };
    };
    let mut bbox = BoundingBox {
        min_lat: first.lat,
        min_lon: first.lon,
        max_lat: first.lat,
        max_lon: first.lon,
    };
    for p in &points[1..] {
        bbox.min_lat = bbox.min_lat.min(p.lat);
        bbox.max_lat = bbox.max_lat.max(p.lat);
        bbox.min_lon = bbox.min_lon.min(p.lon);
        bbox.max_lon = bbox.max_lon.max(p.lon);
    }
    bbox
}

/// Over-approximate bounding box of a circle.
///
/// Latitude delta is radius over meters-per-degree; longitude delta widens
/// by 1/cos(lat) with a small-angle expansion of cosine.
fn circle_bounds(center: Point, radius_m: f64) -> BoundingBox {
    let lat_delta = radius_m / METERS_PER_LAT_DEGREE;
    let lon_delta = lat_delta / cos_degrees(center.lat);
    BoundingBox {
        min_lat: center.lat - lat_delta,
        min_lon: center.lon - lon_delta,
        max_lat: center.lat + lat_delta,
        max_lon: center.lon + lon_delta,
    }
}

/// Small-angle series expansion of cos for an argument in degrees.
fn cos_degrees(deg: f64) -> f64 {
    let rad = deg * RAD_PER_DEG;
    let x = rad * rad;
    1.0 - x / 2.0 + x * x / 24.0
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Geometry {
        Geometry::Polygon {
            vertices: vec![
                Point { lat: 0.0, lon: 0.0 },
                Point { lat: 0.0, lon: 10.0 },
                Point { lat: 10.0, lon: 10.0 },
                Point { lat: 10.0, lon: 0.0 },
            ],
        }
    }

    #[test]
    fn point_range_validation() {
        assert!(Point::new(39.9, 116.4).is_ok());
        assert!(matches!(Point::new(90.1, 0.0), Err(GeometryError::InvalidCoordinate { .. })));
        assert!(matches!(Point::new(0.0, -180.5), Err(GeometryError::InvalidCoordinate { .. })));
        assert!(Point::new(-90.0, 180.0).is_ok());
    }

    #[test]
    fn polygon_containment() {
        let shape = square();
        assert!(shape.contains(Point { lat: 5.0, lon: 5.0 }));
        assert!(!shape.contains(Point { lat: 15.0, lon: 5.0 }));
        assert!(!shape.contains(Point { lat: 5.0, lon: -1.0 }));
    }

    #[test]
    fn triangle_is_smallest_valid_polygon() {
        let triangle = Geometry::Polygon {
            vertices: vec![
                Point { lat: 0.0, lon: 0.0 },
                Point { lat: 0.0, lon: 4.0 },
                Point { lat: 4.0, lon: 2.0 },
            ],
        };
        triangle.validate().expect("triangle validates");
        assert!(triangle.contains(Point { lat: 1.0, lon: 2.0 }));
        assert!(!triangle.contains(Point { lat: 3.9, lon: 0.1 }));
    }

    #[test]
    fn degenerate_polygon_contains_nothing() {
        let line = Geometry::Polygon {
            vertices: vec![Point { lat: 0.0, lon: 0.0 }, Point { lat: 1.0, lon: 1.0 }],
        };
        assert!(!line.contains(Point { lat: 0.5, lon: 0.5 }));
        assert!(line.validate().is_err());
    }

    #[test]
    fn point_on_vertical_edge_uses_canonical_tie_break() {
        // The left edge (lon = 0) counts its upper endpoint's crossing only,
        // so a query on the edge itself lands inside.
        let shape = square();
        assert!(shape.contains(Point { lat: 5.0, lon: 0.0 }));
        assert!(!shape.contains(Point { lat: 5.0, lon: 10.0 }));
    }

    #[test]
    fn circle_containment_is_great_circle() {
        let shape = Geometry::Circle {
            center: Point { lat: 39.9, lon: 116.4 },
            radius_m: 1_000.0,
        };
        // Center is trivially inside.
        assert!(shape.contains(Point { lat: 39.9, lon: 116.4 }));
        // ~900 m north of center.
        assert!(shape.contains(Point { lat: 39.9081, lon: 116.4 }));
        // ~2.2 km north of center.
        assert!(!shape.contains(Point { lat: 39.92, lon: 116.4 }));
    }

    #[test]
    fn haversine_known_distance() {
        // One degree of latitude at the equator is roughly 111.2 km.
        let d = haversine_distance_m(Point { lat: 0.0, lon: 0.0 }, Point { lat: 1.0, lon: 0.0 });
        assert!((d - 111_195.0).abs() < 100.0, "distance {d}");
    }

    #[test]
    fn bbox_containment_is_inclusive() {
        let bbox = BoundingBox {
            min_lat: 0.0,
            min_lon: 0.0,
            max_lat: 5.0,
            max_lon: 5.0,
        };
        assert!(bbox.contains(Point { lat: 0.0, lon: 0.0 }));
        assert!(bbox.contains(Point { lat: 5.0, lon: 5.0 }));
        assert!(!bbox.contains(Point { lat: 5.0001, lon: 5.0 }));
    }

    #[test]
    fn circle_bounds_cover_the_disc() {
        let center = Point { lat: 45.0, lon: 10.0 };
        let shape = Geometry::Circle {
            center,
            radius_m: 5_000.0,
        };
        let bounds = shape.bounds();
        assert!(bounds.contains(center));
        // Cardinal extremes of the disc stay within the index bounds.
        let lat_delta = 5_000.0 / 111_000.0;
        assert!(bounds.contains(Point { lat: 45.0 + lat_delta, lon: 10.0 }));
        // At 45 degrees the longitude span must widen beyond the latitude span.
        assert!(bounds.max_lon - center.lon > lat_delta);
    }

    #[test]
    fn inverted_bbox_rejected() {
        let bad = Geometry::Bbox(BoundingBox {
            min_lat: 10.0,
            min_lon: 0.0,
            max_lat: 0.0,
            max_lon: 5.0,
        });
        assert!(matches!(bad.validate(), Err(GeometryError::InvalidGeometry(_))));
    }

    #[test]
    fn geometry_serde_is_tagged_one_of() {
        let shape = square();
        let json = serde_json::to_value(&shape).expect("encode");
        assert!(json.get("polygon").is_some());
        let back: Geometry = serde_json::from_value(json).expect("decode");
        assert_eq!(shape, back);
    }
}

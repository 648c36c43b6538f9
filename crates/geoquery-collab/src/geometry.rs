//! Geometry primitives exchanged with collaborators.
//!
//! Coordinates are WGS84 degrees stored as `(lat, lon)`. Conversion into
//! [`geo`] types swaps them into `x = lon, y = lat` so the `geo` algorithms
//! (area, bounding rectangle) can be applied.

use geo::{Area, BoundingRect, Coord, LineString, Polygon, Rect};
use serde::{Deserialize, Serialize};

/// Kilometres per degree of latitude (mean).
pub const KM_PER_DEG_LAT: f64 = 110.574;

/// Kilometres per degree of longitude at the equator.
pub const KM_PER_DEG_LON_EQUATOR: f64 = 111.320;

/// A single WGS84 position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }

    pub fn to_coord(self) -> Coord<f64> {
        Coord {
            x: self.lon,
            y: self.lat,
        }
    }

    pub fn from_coord(c: Coord<f64>) -> Self {
        Self { lat: c.y, lon: c.x }
    }
}

/// A polygon with an outer ring and optional holes.
///
/// Rings may be given open or closed; [`to_geo`](Self::to_geo) closes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPolygon {
    pub outer_ring: Vec<GeoPoint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub holes: Vec<Vec<GeoPoint>>,
}

impl GeoPolygon {
    pub fn new(outer_ring: Vec<GeoPoint>) -> Self {
        Self {
            outer_ring,
            holes: Vec::new(),
        }
    }

    pub fn with_holes(outer_ring: Vec<GeoPoint>, holes: Vec<Vec<GeoPoint>>) -> Self {
        Self { outer_ring, holes }
    }

    /// Axis-aligned rectangle spanning the two corners.
    pub fn rectangle(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self::new(vec![
            GeoPoint::new(south, west),
            GeoPoint::new(south, east),
            GeoPoint::new(north, east),
            GeoPoint::new(north, west),
        ])
    }

    pub fn to_geo(&self) -> Polygon<f64> {
        Polygon::new(
            ring_to_linestring(&self.outer_ring),
            self.holes.iter().map(|h| ring_to_linestring(h)).collect(),
        )
    }

    pub fn from_geo(polygon: &Polygon<f64>) -> Self {
        Self {
            outer_ring: linestring_to_ring(polygon.exterior()),
            holes: polygon.interiors().iter().map(linestring_to_ring).collect(),
        }
    }

    /// Bounding rectangle in `geo` coordinates (`x = lon`, `y = lat`).
    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        self.to_geo().bounding_rect()
    }

    /// Planar area in square degrees (holes subtracted).
    pub fn area_deg2(&self) -> f64 {
        self.to_geo().unsigned_area()
    }

    /// Area in km² using an equirectangular projection anchored at the
    /// bounding box's centre latitude.
    pub fn planar_area_km2(&self) -> f64 {
        match self.bounding_rect() {
            Some(rect) => self.area_deg2() * km2_per_deg2(rect.center().y),
            None => 0.0,
        }
    }

    /// Number of distinct vertices on the outer ring.
    pub fn distinct_vertices(&self) -> usize {
        let mut ring = self.outer_ring.clone();
        if ring.len() > 1 && ring.first() == ring.last() {
            ring.pop();
        }
        ring.dedup();
        ring.len()
    }

    pub fn is_finite(&self) -> bool {
        self.outer_ring.iter().all(GeoPoint::is_finite)
            && self.holes.iter().flatten().all(GeoPoint::is_finite)
    }
}

/// A resolved geometry: a point or a polygon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Geometry {
    Point(GeoPoint),
    Polygon(GeoPolygon),
}

impl Geometry {
    pub fn as_polygon(&self) -> Option<&GeoPolygon> {
        match self {
            Geometry::Polygon(p) => Some(p),
            Geometry::Point(_) => None,
        }
    }

    /// A representative point: the point itself or the polygon's bbox centre.
    pub fn anchor(&self) -> Option<GeoPoint> {
        match self {
            Geometry::Point(p) => Some(*p),
            Geometry::Polygon(p) => p.bounding_rect().map(|r| GeoPoint::from_coord(r.center())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "point",
            Geometry::Polygon(_) => "polygon",
        }
    }
}

/// km² represented by one square degree at latitude `lat0`.
pub fn km2_per_deg2(lat0: f64) -> f64 {
    KM_PER_DEG_LON_EQUATOR * lat0.to_radians().cos().abs() * KM_PER_DEG_LAT
}

fn ring_to_linestring(ring: &[GeoPoint]) -> LineString<f64> {
    // `Polygon::new` closes open rings.
    LineString::from(ring.iter().map(|p| p.to_coord()).collect::<Vec<_>>())
}

fn linestring_to_ring(ls: &LineString<f64>) -> Vec<GeoPoint> {
    let mut ring: Vec<GeoPoint> = ls.coords().map(|c| GeoPoint::from_coord(*c)).collect();
    if ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
    }
    ring
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rectangle_area_at_equator() {
        let square = GeoPolygon::rectangle(0.0, 0.0, 1.0, 1.0);
        let expected = KM_PER_DEG_LON_EQUATOR * (0.5f64).to_radians().cos() * KM_PER_DEG_LAT;
        assert!((square.planar_area_km2() - expected).abs() < 1e-6);
    }

    #[test]
    fn holes_are_subtracted() {
        let outer = GeoPolygon::rectangle(0.0, 0.0, 2.0, 2.0);
        let hole = GeoPolygon::rectangle(0.5, 0.5, 1.5, 1.5).outer_ring;
        let holed = GeoPolygon::with_holes(outer.outer_ring.clone(), vec![hole]);
        assert!((outer.area_deg2() - 4.0).abs() < 1e-12);
        assert!((holed.area_deg2() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn geo_round_trip_keeps_open_rings() {
        let poly = GeoPolygon::rectangle(10.0, 20.0, 11.0, 21.0);
        let back = GeoPolygon::from_geo(&poly.to_geo());
        assert_eq!(back, poly);
        assert_eq!(back.distinct_vertices(), 4);
    }

    #[test]
    fn geometry_serializes_with_type_tag() {
        let g = Geometry::Point(GeoPoint::new(-1.29, 36.82));
        let json = serde_json::to_value(&g).unwrap();
        assert_eq!(json["type"], "point");
        assert_eq!(json["lat"], -1.29);
    }

    #[test]
    fn anchor_of_polygon_is_bbox_centre() {
        let g = Geometry::Polygon(GeoPolygon::rectangle(0.0, 10.0, 2.0, 14.0));
        let a = g.anchor().unwrap();
        assert_eq!(a, GeoPoint::new(1.0, 12.0));
    }
}

//! Resolved places and their tiles.

use std::fmt;

use geoquery_collab::{AnalysisTarget, GeoPolygon, Geometry};
use serde::{Deserialize, Serialize};

/// Position of a Region within one request (0-based, resolution order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionId(pub usize);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A validated place mention from the extraction model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedLocation {
    pub matched_name: String,
    pub place_type: String,
    /// Always within `[0, 1]`.
    pub confidence: f64,
}

/// Whether the geometry is the place's real boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegionSource {
    ResolvedExact,
    FallbackApproximate,
}

/// One area-bounded fragment of a Region's polygon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    pub parent: RegionId,
    /// Row-major position among the parent's tiles.
    pub index: usize,
    pub row: usize,
    pub col: usize,
    pub polygon: GeoPolygon,
    pub area_km2: f64,
    pub estimated_pixels: u64,
}

/// A resolved geographic area for one extracted location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: RegionId,
    pub name: String,
    pub place_type: String,
    pub confidence: f64,
    pub geometry: Geometry,
    pub source: RegionSource,
    pub area_km2: f64,
    /// Empty when the region fits the pixel budget as a whole.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tiles: Vec<Tile>,
}

impl Region {
    pub fn is_tiled(&self) -> bool {
        !self.tiles.is_empty()
    }

    /// The whole, untiled region as a backend target.
    pub fn target(&self) -> AnalysisTarget {
        AnalysisTarget {
            label: self.name.clone(),
            geometry: self.geometry.clone(),
            area_km2: self.area_km2,
        }
    }

    /// One tile of this region as a backend target, labelled `name#index`.
    pub fn tile_target(&self, tile: &Tile) -> AnalysisTarget {
        AnalysisTarget {
            label: format!("{}#{}", self.name, tile.index),
            geometry: Geometry::Polygon(tile.polygon.clone()),
            area_km2: tile.area_km2,
        }
    }
}

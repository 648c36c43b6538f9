//! Splits oversized polygons into pixel-budgeted tiles.
//!
//! Tiling is a pure, deterministic function of the polygon and the budget:
//!
//! 1. Areas are measured in an equirectangular projection anchored at the
//!    bounding box's centre latitude, so the parent and every tile share one
//!    area scale and tile areas sum to the parent area.
//! 2. The bounding box is cut into the smallest uniform `rows x cols` grid
//!    whose cells fit the budget (ties: squarest cell, then fewer rows).
//! 3. Each cell is clipped against the outer ring and holes; near-empty
//!    pieces are dropped.
//!
//! Tiles are emitted row-major starting at the north-west cell.

use geo::{Area, Coord, LineString, Polygon, Rect};
use geoquery_collab::geometry::{km2_per_deg2, KM_PER_DEG_LAT, KM_PER_DEG_LON_EQUATOR};
use geoquery_collab::{GeoPoint, GeoPolygon};

use crate::config::TilingConfig;
use crate::domain::{RegionId, Tile, TilingError};

/// Pixel budget for one backend call.
#[derive(Debug, Clone, PartialEq)]
pub struct TileBudget {
    pub max_pixels: u64,
    pub scale_m: f64,
    pub min_tile_fraction: f64,
    pub max_tiles: usize,
}

impl TileBudget {
    /// Area in km² covered by `max_pixels` at `scale_m`.
    pub fn max_area_km2(&self) -> f64 {
        self.max_pixels as f64 * self.scale_m * self.scale_m / 1_000_000.0
    }

    pub fn pixels(&self, area_km2: f64) -> f64 {
        area_km2 * 1_000_000.0 / (self.scale_m * self.scale_m)
    }
}

impl From<&TilingConfig> for TileBudget {
    fn from(config: &TilingConfig) -> Self {
        Self {
            max_pixels: config.max_pixels,
            scale_m: config.scale_m,
            min_tile_fraction: config.min_tile_fraction,
            max_tiles: config.max_tiles,
        }
    }
}

/// Area of `polygon` in km², measured the same way tile areas are.
pub fn polygon_area_km2(polygon: &GeoPolygon) -> f64 {
    polygon.planar_area_km2()
}

/// Partition `polygon` into tiles that each fit `budget`.
pub fn tile(
    parent: RegionId,
    polygon: &GeoPolygon,
    budget: &TileBudget,
) -> Result<Vec<Tile>, TilingError> {
    if budget.max_pixels == 0 {
        return Err(TilingError::InvalidBudget("max_pixels is zero".into()));
    }
    if !(budget.scale_m.is_finite() && budget.scale_m > 0.0) {
        return Err(TilingError::InvalidBudget(format!(
            "scale {} is not positive",
            budget.scale_m
        )));
    }
    if !polygon.is_finite() {
        return Err(TilingError::InvalidPolygon("non-finite coordinate".into()));
    }
    if polygon.distinct_vertices() < 3 {
        return Err(TilingError::InvalidPolygon(
            "outer ring needs at least 3 distinct vertices".into(),
        ));
    }

    let bbox = polygon
        .bounding_rect()
        .ok_or_else(|| TilingError::InvalidPolygon("empty outer ring".into()))?;
    let lat0 = bbox.center().y;
    let km2_per_deg2 = km2_per_deg2(lat0);
    let parent_area = polygon.area_deg2() * km2_per_deg2;
    if !(parent_area > 0.0) {
        return Err(TilingError::InvalidPolygon("polygon has zero area".into()));
    }

    let budget_area = budget.max_area_km2();
    if parent_area <= budget_area {
        return Ok(vec![Tile {
            parent,
            index: 0,
            row: 0,
            col: 0,
            polygon: polygon.clone(),
            area_km2: parent_area,
            estimated_pixels: budget.pixels(parent_area).round() as u64,
        }]);
    }

    let bbox_area = bbox.width() * bbox.height() * km2_per_deg2;
    let required = (bbox_area / budget_area).ceil() as u64;
    if required > budget.max_tiles as u64 {
        return Err(TilingError::TooManyTiles {
            required,
            max: budget.max_tiles,
        });
    }
    let width_km = bbox.width() * KM_PER_DEG_LON_EQUATOR * lat0.to_radians().cos().abs();
    let height_km = bbox.height() * KM_PER_DEG_LAT;
    let aspect = width_km / height_km;
    let (rows, cols) = choose_grid(required as usize, aspect);

    let outer = open_ring(&polygon.outer_ring);
    let holes: Vec<Vec<Coord<f64>>> = polygon.holes.iter().map(|h| open_ring(h)).collect();
    let min_area = parent_area * budget.min_tile_fraction;
    let dx = bbox.width() / cols as f64;
    let dy = bbox.height() / rows as f64;

    let mut tiles = Vec::new();
    for row in 0..rows {
        let north = if row == 0 {
            bbox.max().y
        } else {
            bbox.max().y - row as f64 * dy
        };
        let south = if row + 1 == rows {
            bbox.min().y
        } else {
            bbox.max().y - (row + 1) as f64 * dy
        };
        for col in 0..cols {
            let west = if col == 0 {
                bbox.min().x
            } else {
                bbox.min().x + col as f64 * dx
            };
            let east = if col + 1 == cols {
                bbox.max().x
            } else {
                bbox.min().x + (col + 1) as f64 * dx
            };
            let cell = Rect::new(Coord { x: west, y: south }, Coord { x: east, y: north });

            let clipped_outer = clip_ring(&outer, &cell);
            if clipped_outer.len() < 3 {
                continue;
            }
            let clipped_holes: Vec<Vec<Coord<f64>>> = holes
                .iter()
                .map(|h| clip_ring(h, &cell))
                .filter(|h| h.len() >= 3)
                .collect();

            let piece = Polygon::new(
                LineString::from(clipped_outer),
                clipped_holes.into_iter().map(LineString::from).collect(),
            );
            let area_km2 = piece.unsigned_area() * km2_per_deg2;
            if area_km2 <= min_area || area_km2 <= 0.0 {
                continue;
            }

            tiles.push(Tile {
                parent,
                index: tiles.len(),
                row,
                col,
                polygon: GeoPolygon::from_geo(&piece),
                area_km2,
                estimated_pixels: budget.pixels(area_km2).round() as u64,
            });
        }
    }

    Ok(tiles)
}

/// Smallest `rows * cols >= required`, preferring square cells.
///
/// `aspect` is the bounding box's width / height in projected km.
fn choose_grid(required: usize, aspect: f64) -> (usize, usize) {
    let required = required.max(1);
    let mut best = (1, required);
    let mut best_key = (required, f64::INFINITY);
    for rows in 1..=required {
        let cols = required.div_ceil(rows);
        let product = rows * cols;
        // Cell aspect = (width / cols) / (height / rows)
        let skew = (aspect * rows as f64 / cols as f64).ln().abs();
        let key = (product, skew);
        if key.0 < best_key.0 || (key.0 == best_key.0 && key.1 < best_key.1 - 1e-12) {
            best = (rows, cols);
            best_key = key;
        }
    }
    best
}

fn open_ring(ring: &[GeoPoint]) -> Vec<Coord<f64>> {
    let mut coords: Vec<Coord<f64>> = ring.iter().map(|p| p.to_coord()).collect();
    if coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }
    coords
}

#[derive(Clone, Copy)]
enum Edge {
    West(f64),
    East(f64),
    South(f64),
    North(f64),
}

impl Edge {
    fn inside(self, p: Coord<f64>) -> bool {
        match self {
            Edge::West(x) => p.x >= x,
            Edge::East(x) => p.x <= x,
            Edge::South(y) => p.y >= y,
            Edge::North(y) => p.y <= y,
        }
    }

    fn intersect(self, a: Coord<f64>, b: Coord<f64>) -> Coord<f64> {
        match self {
            Edge::West(x) | Edge::East(x) => {
                let t = (x - a.x) / (b.x - a.x);
                Coord {
                    x,
                    y: a.y + t * (b.y - a.y),
                }
            }
            Edge::South(y) | Edge::North(y) => {
                let t = (y - a.y) / (b.y - a.y);
                Coord {
                    x: a.x + t * (b.x - a.x),
                    y,
                }
            }
        }
    }
}

/// Sutherland–Hodgman clip of an open ring against an axis-aligned cell.
///
/// Concave input may yield zero-width bridges along the cell border; they
/// contribute no area.
fn clip_ring(ring: &[Coord<f64>], cell: &Rect<f64>) -> Vec<Coord<f64>> {
    let edges = [
        Edge::West(cell.min().x),
        Edge::East(cell.max().x),
        Edge::South(cell.min().y),
        Edge::North(cell.max().y),
    ];
    let mut output = ring.to_vec();
    for edge in edges {
        let input = std::mem::take(&mut output);
        let Some(&last) = input.last() else {
            break;
        };
        let mut prev = last;
        for &cur in &input {
            match (edge.inside(prev), edge.inside(cur)) {
                (true, true) => output.push(cur),
                (true, false) => output.push(edge.intersect(prev, cur)),
                (false, true) => {
                    output.push(edge.intersect(prev, cur));
                    output.push(cur);
                }
                (false, false) => {}
            }
            prev = cur;
        }
    }
    output.dedup();
    if output.len() > 1 && output.first() == output.last() {
        output.pop();
    }
    output
}

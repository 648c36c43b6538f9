//! Shared fixtures for the geoquery-core integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use geoquery_collab::fakes::{
    KeywordExtractionModel, ScriptedComputeBackend, ScriptedFallback, TableGeocoder,
};
use geoquery_collab::geometry::{KM_PER_DEG_LAT, KM_PER_DEG_LON_EQUATOR};
use geoquery_collab::{Capability, GeoPolygon, GeocodeHit, Geometry, Precision, RawLocation};
use geoquery_core::{BackendRegistry, PipelineConfig, PipelineController};

pub const KENYA_AREA_KM2: f64 = 50_000.0;

/// A box centred on the equator, two degrees tall, covering 50_000 km².
pub fn kenya_polygon() -> GeoPolygon {
    let width = KENYA_AREA_KM2 / (2.0 * KM_PER_DEG_LON_EQUATOR * KM_PER_DEG_LAT);
    GeoPolygon::rectangle(-1.0, 36.0, 1.0, 36.0 + width)
}

pub fn kenya_hit() -> GeocodeHit {
    GeocodeHit {
        geometry: Geometry::Polygon(kenya_polygon()),
        precision: Precision::Exact,
        area_km2: None,
    }
}

/// A budget of 6_500 km² per call, which cuts the Kenya box into 8 tiles.
pub fn eight_tile_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.tiling.max_pixels = 650_000;
    config.tiling.scale_m = 100.0;
    config
}

pub fn kenya_extraction() -> KeywordExtractionModel {
    KeywordExtractionModel::new().with_location("kenya", RawLocation::new("Kenya", "country", 0.95))
}

pub fn kenya_geocoder() -> TableGeocoder {
    TableGeocoder::new().with_place("Kenya", kenya_hit())
}

pub fn tile_label(index: usize) -> String {
    format!("Kenya#{index}")
}

pub struct Harness {
    pub extraction: Arc<KeywordExtractionModel>,
    pub geocoder: Arc<TableGeocoder>,
    pub vegetation: Arc<ScriptedComputeBackend>,
    pub fallback: Arc<ScriptedFallback>,
    pub controller: PipelineController,
}

pub fn harness(
    config: PipelineConfig,
    extraction: KeywordExtractionModel,
    geocoder: TableGeocoder,
    vegetation: ScriptedComputeBackend,
) -> Harness {
    let extraction = Arc::new(extraction);
    let geocoder = Arc::new(geocoder);
    let vegetation = Arc::new(vegetation);
    let fallback = Arc::new(ScriptedFallback::new(
        "Reports describe dense but declining forest cover.",
        &["https://example.org/kenya-forests"],
    ));
    let registry = BackendRegistry::new()
        .with_primary(Capability::Vegetation, vegetation.clone())
        .with_fallback(fallback.clone());
    let controller =
        PipelineController::new(config, extraction.clone(), geocoder.clone(), registry).unwrap();
    Harness {
        extraction,
        geocoder,
        vegetation,
        fallback,
        controller,
    }
}

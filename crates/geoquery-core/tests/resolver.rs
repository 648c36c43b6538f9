//! Location resolution against the fake extraction model and geocoder.

mod common;

use std::sync::Arc;
use std::time::Duration;

use geoquery_collab::fakes::{KeywordExtractionModel, TableGeocoder};
use geoquery_collab::{CollaboratorError, GeoPoint, GeoPolygon, GeocodeHit, Geometry, Precision, RawLocation};
use geoquery_core::{
    EvidenceLog, LocationConfig, LocationResolver, PipelineConfig, Query, RegionId, RegionSource,
    TilingConfig,
};
use tokio::time::Instant;

use common::*;

fn resolver(
    extraction: KeywordExtractionModel,
    geocoder: TableGeocoder,
    location: LocationConfig,
    tiling: &TilingConfig,
) -> LocationResolver {
    LocationResolver::new(Arc::new(extraction), Arc::new(geocoder), location, tiling)
}

fn deadline() -> Instant {
    Instant::now() + Duration::from_secs(60)
}

fn point(lat: f64, lon: f64) -> GeocodeHit {
    GeocodeHit {
        geometry: Geometry::Point(GeoPoint::new(lat, lon)),
        precision: Precision::Approximate,
        area_km2: None,
    }
}

#[tokio::test]
async fn duplicates_are_collapsed_and_order_is_kept() {
    let extraction = KeywordExtractionModel::new()
        .with_location("lagos", RawLocation::new("Lagos", "city", 0.8))
        .with_location("nairobi", RawLocation::new("Nairobi", "city", 0.9))
        .with_location("LAGOS", RawLocation::new("LAGOS", "city", 0.7));
    let geocoder = TableGeocoder::new()
        .with_place("Lagos", point(6.5, 3.4))
        .with_place("Nairobi", point(-1.29, 36.82));
    let r = resolver(extraction, geocoder, LocationConfig::default(), &TilingConfig::default());
    let evidence = EvidenceLog::new();

    let regions = r
        .resolve(&Query::new("Lagos or Nairobi"), &evidence, deadline())
        .await
        .unwrap();

    let names: Vec<&str> = regions.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["Lagos", "Nairobi"]);
    assert_eq!(regions[1].id, RegionId(1));
    assert!(regions.iter().all(|r| r.source == RegionSource::FallbackApproximate));
    assert!(evidence.contains("location:resolved:Lagos"));
    assert!(evidence.contains("location:resolved:Nairobi"));
}

#[tokio::test]
async fn location_cap_limits_geocoding() {
    let extraction = KeywordExtractionModel::new()
        .with_location("a", RawLocation::new("Accra", "city", 0.9))
        .with_location("b", RawLocation::new("Bamako", "city", 0.9))
        .with_location("c", RawLocation::new("Cairo", "city", 0.9));
    let geocoder = TableGeocoder::new()
        .with_place("Accra", point(5.6, -0.2))
        .with_place("Bamako", point(12.6, -8.0))
        .with_place("Cairo", point(30.0, 31.2));
    let geocoder = Arc::new(geocoder);
    let r = LocationResolver::new(
        Arc::new(extraction),
        geocoder.clone(),
        LocationConfig {
            max_locations: 2,
            ..LocationConfig::default()
        },
        &TilingConfig::default(),
    );

    let regions = r
        .resolve(&Query::new("abc"), &EvidenceLog::new(), deadline())
        .await
        .unwrap();

    assert_eq!(regions.len(), 2);
    assert_eq!(geocoder.lookups().len(), 2);
}

#[tokio::test]
async fn geocode_failures_skip_only_that_location() {
    let extraction = KeywordExtractionModel::new()
        .with_location("atlantis", RawLocation::new("Atlantis", "city", 0.9))
        .with_location("kenya", RawLocation::new("Kenya", "country", 0.9))
        .with_location("gotham", RawLocation::new("Gotham", "city", 0.9));
    let geocoder = kenya_geocoder().with_failure("Gotham", CollaboratorError::Transport("reset".into()));
    let r = resolver(extraction, geocoder, LocationConfig::default(), &TilingConfig::default());
    let evidence = EvidenceLog::new();

    let regions = r
        .resolve(&Query::new("atlantis kenya gotham"), &evidence, deadline())
        .await
        .unwrap();

    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].id, RegionId(0));
    assert!(evidence.contains("location:geocode-failed:Atlantis"));
    assert!(evidence.contains("location:geocode-failed:Gotham"));
    assert!(!evidence.contains("location:none-found"));
}

#[tokio::test]
async fn malformed_extraction_output_yields_no_regions() {
    let extraction = KeywordExtractionModel::new().with_location(
        "kenya",
        RawLocation {
            matched_name: None,
            place_type: Some("country".into()),
            confidence: Some(0.9),
        },
    );
    let r = resolver(extraction, kenya_geocoder(), LocationConfig::default(), &TilingConfig::default());
    let evidence = EvidenceLog::new();

    let regions = r
        .resolve(&Query::new("kenya"), &evidence, deadline())
        .await
        .unwrap();

    assert!(regions.is_empty());
    assert!(evidence.contains("location:extraction-failed"));
    assert!(evidence.contains("location:none-found"));
}

#[tokio::test]
async fn oversized_polygons_are_tiled() {
    let tiling = eight_tile_config().tiling;
    let r = resolver(kenya_extraction(), kenya_geocoder(), LocationConfig::default(), &tiling);
    let evidence = EvidenceLog::new();

    let regions = r
        .resolve(&Query::new("Kenya"), &evidence, deadline())
        .await
        .unwrap();

    let kenya = &regions[0];
    assert!(kenya.is_tiled());
    assert_eq!(kenya.tiles.len(), 8);
    assert!(kenya.tiles.iter().all(|t| t.estimated_pixels <= tiling.max_pixels));
    assert!((kenya.area_km2 - KENYA_AREA_KM2).abs() < KENYA_AREA_KM2 * 1e-9);
    let union: f64 = kenya.tiles.iter().map(|t| t.area_km2).sum();
    assert!((union - kenya.area_km2).abs() < kenya.area_km2 * 1e-6);
    assert!(evidence.contains("tiler:budget-exceeded:Kenya"));

    // Budget exceeded is recorded before the region is reported resolved.
    let lines: Vec<String> = evidence.snapshot().iter().map(|e| e.to_string()).collect();
    let exceeded = lines.iter().position(|l| l == "tiler:budget-exceeded:Kenya");
    let resolved = lines.iter().position(|l| l == "location:resolved:Kenya");
    assert!(exceeded < resolved);
}

#[tokio::test]
async fn tiling_failure_leaves_region_untiled() {
    let mut config = PipelineConfig::default();
    config.tiling.max_pixels = 1_000;
    config.tiling.max_tiles = 4;
    let r = resolver(kenya_extraction(), kenya_geocoder(), LocationConfig::default(), &config.tiling);
    let evidence = EvidenceLog::new();

    let regions = r
        .resolve(&Query::new("Kenya"), &evidence, deadline())
        .await
        .unwrap();

    assert_eq!(regions.len(), 1);
    assert!(!regions[0].is_tiled());
    assert!(evidence.contains("tiler:failed:Kenya"));
}

#[tokio::test]
async fn polygon_area_ignores_the_reported_figure() {
    let understated = GeocodeHit {
        area_km2: Some(10.0),
        ..kenya_hit()
    };
    let geocoder = TableGeocoder::new().with_place("Kenya", understated);
    let tiling = eight_tile_config().tiling;
    let r = resolver(kenya_extraction(), geocoder, LocationConfig::default(), &tiling);

    let regions = r
        .resolve(&Query::new("Kenya"), &EvidenceLog::new(), deadline())
        .await
        .unwrap();

    let kenya = &regions[0];
    assert_eq!(kenya.source, RegionSource::ResolvedExact);
    assert!((kenya.area_km2 - KENYA_AREA_KM2).abs() < KENYA_AREA_KM2 * 1e-9);
    assert_eq!(kenya.tiles.len(), 8);
}

#[tokio::test]
async fn overstated_area_does_not_tile_a_small_polygon() {
    let small = GeoPolygon::rectangle(-0.01, 36.0, 0.01, 36.02);
    let geocoder = TableGeocoder::new().with_place(
        "Kenya",
        GeocodeHit {
            geometry: Geometry::Polygon(small.clone()),
            precision: Precision::Exact,
            area_km2: Some(KENYA_AREA_KM2),
        },
    );
    let tiling = eight_tile_config().tiling;
    let r = resolver(kenya_extraction(), geocoder, LocationConfig::default(), &tiling);
    let evidence = EvidenceLog::new();

    let regions = r
        .resolve(&Query::new("Kenya"), &evidence, deadline())
        .await
        .unwrap();

    let region = &regions[0];
    assert!((region.area_km2 - small.planar_area_km2()).abs() < 1e-9);
    assert!(region.area_km2 < 10.0);
    assert!(!region.is_tiled());
    assert!(!evidence.contains("tiler:budget-exceeded:Kenya"));
}

#[tokio::test]
async fn point_regions_keep_the_reported_area() {
    let extraction = KeywordExtractionModel::new()
        .with_location("lagos", RawLocation::new("Lagos", "city", 0.8))
        .with_location("accra", RawLocation::new("Accra", "city", 0.8));
    let geocoder = TableGeocoder::new()
        .with_place(
            "Lagos",
            GeocodeHit {
                area_km2: Some(1171.0),
                ..point(6.5, 3.4)
            },
        )
        .with_place(
            "Accra",
            GeocodeHit {
                area_km2: Some(f64::NAN),
                ..point(5.6, -0.2)
            },
        );
    let r = resolver(extraction, geocoder, LocationConfig::default(), &TilingConfig::default());

    let regions = r
        .resolve(&Query::new("lagos accra"), &EvidenceLog::new(), deadline())
        .await
        .unwrap();

    assert_eq!(regions[0].area_km2, 1171.0);
    assert_eq!(regions[1].area_km2, 0.0);
    assert!(regions.iter().all(|r| !r.is_tiled()));
}

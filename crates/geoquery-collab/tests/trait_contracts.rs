//! Trait contract tests for the collaborator fakes.
//!
//! These tests pin down the behaviour the pipeline relies on: not-found vs
//! error from the geocoder, scripted failures and call bookkeeping in the
//! compute backend, and fixture worlds assembled from JSON.

use std::time::Duration;

use geoquery_collab::fakes::*;
use geoquery_collab::*;

fn target(label: &str) -> AnalysisTarget {
    AnalysisTarget {
        label: label.to_string(),
        geometry: Geometry::Polygon(GeoPolygon::rectangle(0.0, 0.0, 1.0, 1.0)),
        area_km2: 12_000.0,
    }
}

// ===========================================================================
// ExtractionModel
// ===========================================================================

#[tokio::test]
async fn extraction_matches_needles_case_insensitively() {
    let model = KeywordExtractionModel::new()
        .with_location("nairobi", RawLocation::new("Nairobi", "city", 0.9))
        .with_location("lake victoria", RawLocation::new("Lake Victoria", "lake", 0.8));

    let found = model
        .extract("How green is NAIROBI compared to Lake Victoria?")
        .await
        .unwrap();

    assert_eq!(found.len(), 2);
    assert_eq!(found[0].matched_name.as_deref(), Some("Nairobi"));
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn extraction_failure_is_returned() {
    let model = KeywordExtractionModel::failing(CollaboratorError::Unavailable("gpu".into()));
    let err = model.extract("anything").await.unwrap_err();
    assert!(err.is_structural());
}

// ===========================================================================
// Geocoder
// ===========================================================================

#[tokio::test]
async fn geocoder_distinguishes_not_found_from_error() {
    let geocoder = TableGeocoder::new()
        .with_place(
            "Nairobi",
            GeocodeHit {
                geometry: Geometry::Point(GeoPoint::new(-1.29, 36.82)),
                precision: Precision::Approximate,
                area_km2: None,
            },
        )
        .with_failure("Atlantis", CollaboratorError::Transport("reset".into()));

    assert!(geocoder.resolve("nairobi", "city").await.unwrap().is_some());
    assert!(geocoder.resolve("Gotham", "city").await.unwrap().is_none());
    assert!(geocoder.resolve("Atlantis", "city").await.is_err());
    assert_eq!(geocoder.lookups(), vec!["nairobi", "Gotham", "Atlantis"]);
}

// ===========================================================================
// ComputeBackend
// ===========================================================================

#[tokio::test]
async fn compute_returns_label_overrides_over_defaults() {
    let backend = ScriptedComputeBackend::new("veg")
        .with_metric("mean_ndvi", MetricValue::Continuous(0.4))
        .with_label_metric("r#1", "mean_ndvi", MetricValue::Continuous(0.8));

    let params = TaskParameters::new();
    let a = backend
        .analyze(&target("r#0"), Capability::Vegetation, &params)
        .await
        .unwrap();
    let b = backend
        .analyze(&target("r#1"), Capability::Vegetation, &params)
        .await
        .unwrap();

    assert_eq!(a.statistics["mean_ndvi"], MetricValue::Continuous(0.4));
    assert_eq!(b.statistics["mean_ndvi"], MetricValue::Continuous(0.8));
    assert_eq!(backend.call_count(), 2);
}

#[tokio::test]
async fn transient_failure_clears_after_budget() {
    let backend = ScriptedComputeBackend::new("veg").with_transient_failure(
        "t",
        1,
        CollaboratorError::RateLimited { retry_after_ms: None },
    );
    let params = TaskParameters::new();

    assert!(backend
        .analyze(&target("t"), Capability::Vegetation, &params)
        .await
        .is_err());
    assert!(backend
        .analyze(&target("t"), Capability::Vegetation, &params)
        .await
        .is_ok());
    let calls = backend.calls();
    assert!(!calls[0].ok);
    assert!(calls[1].ok);
}

#[tokio::test(start_paused = true)]
async fn compute_tracks_peak_concurrency() {
    let backend = std::sync::Arc::new(
        ScriptedComputeBackend::new("veg").with_delay(Duration::from_millis(50)),
    );
    let params = TaskParameters::new();

    let futs = (0..3).map(|i| {
        let backend = backend.clone();
        let params = params.clone();
        async move {
            backend
                .analyze(&target(&format!("t{i}")), Capability::Vegetation, &params)
                .await
        }
    });
    let results = futures_join(futs).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(backend.peak_in_flight(), 3);
}

async fn futures_join<F, T>(futs: impl Iterator<Item = F>) -> Vec<T>
where
    F: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let handles: Vec<_> = futs.map(tokio::spawn).collect();
    let mut out = Vec::new();
    for h in handles {
        out.push(h.await.unwrap());
    }
    out
}

// ===========================================================================
// FallbackBackend
// ===========================================================================

#[tokio::test]
async fn fallback_records_every_call() {
    let fallback = ScriptedFallback::new("Dense canopy reported.", &["https://example.org/a"]);
    let summary = fallback
        .search_summarize(&target("Nairobi"), Capability::Vegetation)
        .await
        .unwrap();

    assert_eq!(summary.sources.len(), 1);
    assert_eq!(fallback.call_count(), 1);
    assert_eq!(fallback.calls()[0].target.label, "Nairobi");
}

// ===========================================================================
// FixtureWorld
// ===========================================================================

#[tokio::test]
async fn fixture_world_builds_all_fakes() {
    let world = FixtureWorld::from_json_str(
        r#"{
            "locations": [
                {"needle": "nairobi", "matched_name": "Nairobi", "place_type": "city", "confidence": 0.9}
            ],
            "places": {
                "Nairobi": {
                    "geometry": {"type": "polygon", "outer_ring": [
                        {"lat": -1.4, "lon": 36.7}, {"lat": -1.4, "lon": 37.0},
                        {"lat": -1.2, "lon": 37.0}, {"lat": -1.2, "lon": 36.7}
                    ]},
                    "precision": "exact",
                    "area_km2": 696.0
                }
            },
            "compute": {
                "vegetation": {"statistics": {"mean_ndvi": 0.41}, "fail_labels": {"Nairobi#2": {"kind": "timeout"}}}
            },
            "fallback": {"narrative": "Reports describe mixed cover.", "sources": ["https://example.org"]}
        }"#,
    )
    .unwrap();

    let fakes = world.build();
    let locs = fakes.extraction.extract("Is Nairobi green?").await.unwrap();
    assert_eq!(locs.len(), 1);
    assert!(fakes.geocoder.resolve("Nairobi", "city").await.unwrap().is_some());

    let veg = &fakes.compute[&Capability::Vegetation];
    assert_eq!(veg.name(), "vegetation-engine");
    let params = TaskParameters::new();
    assert!(veg
        .analyze(&target("Nairobi#2"), Capability::Vegetation, &params)
        .await
        .is_err());
    assert!(fakes.fallback.is_some());
}

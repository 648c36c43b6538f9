//! Free text -> place mentions -> Regions.
//!
//! The resolver calls the extraction model once, validates and filters its
//! output, then geocodes every retained mention concurrently. Oversized
//! polygons are handed to the [`tiler`](crate::tiler). Every collaborator
//! failure here degrades to fewer Regions; only the run deadline can stop
//! resolution.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use geoquery_collab::{
    ExtractionModel, GeocodeHit, Geocoder, Geometry, Precision, RawLocation,
};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, instrument, warn};

use crate::config::{LocationConfig, TilingConfig};
use crate::domain::{
    EvidenceLog, ExtractedLocation, Query, Region, RegionId, RegionSource, ResolveError,
};
use crate::tiler::{self, TileBudget};

const STAGE: &str = "location";
const TILER_STAGE: &str = "tiler";

/// The deadline elapsed while resolving locations.
pub use tokio::time::error::Elapsed;

pub struct LocationResolver {
    extractor: Arc<dyn ExtractionModel>,
    geocoder: Arc<dyn Geocoder>,
    location: LocationConfig,
    budget: TileBudget,
}

impl LocationResolver {
    pub fn new(
        extractor: Arc<dyn ExtractionModel>,
        geocoder: Arc<dyn Geocoder>,
        location: LocationConfig,
        tiling: &TilingConfig,
    ) -> Self {
        Self {
            extractor,
            geocoder,
            location,
            budget: TileBudget::from(tiling),
        }
    }

    /// Resolve `query` into Regions, bounded by `deadline`.
    #[instrument(skip_all, fields(request_id = %query.request_id()))]
    pub async fn resolve(
        &self,
        query: &Query,
        evidence: &EvidenceLog,
        deadline: Instant,
    ) -> Result<Vec<Region>, Elapsed> {
        timeout_at(deadline, self.resolve_inner(query, evidence)).await
    }

    async fn resolve_inner(&self, query: &Query, evidence: &EvidenceLog) -> Vec<Region> {
        if query.is_blank() {
            evidence.record(STAGE, "none-found");
            return Vec::new();
        }

        let extracted = match self.extract(query.text()).await {
            Ok(locations) => locations,
            Err(err) => {
                warn!(error = %err, "location extraction failed");
                evidence.record(STAGE, "extraction-failed");
                evidence.record(STAGE, "none-found");
                return Vec::new();
            }
        };

        let retained = self.retain(extracted, evidence);
        let hits = join_all(retained.iter().map(|loc| self.geocode(loc))).await;

        let mut regions = Vec::with_capacity(retained.len());
        for (location, hit) in retained.into_iter().zip(hits) {
            match hit {
                Ok(hit) => {
                    let region = self.build_region(RegionId(regions.len()), location, hit, evidence);
                    evidence.record(STAGE, format!("resolved:{}", region.name));
                    regions.push(region);
                }
                Err(err) => {
                    debug!(error = %err, "dropping location");
                    evidence.record(STAGE, format!("geocode-failed:{}", location.matched_name));
                }
            }
        }

        if regions.is_empty() {
            evidence.record(STAGE, "none-found");
        }
        regions
    }

    async fn extract(&self, text: &str) -> Result<Vec<ExtractedLocation>, ResolveError> {
        let raw = self
            .extractor
            .extract(text)
            .await
            .map_err(|e| ResolveError::extraction_from(&e))?;
        raw.into_iter().map(validate_raw).collect()
    }

    /// Threshold, dedupe (first wins), then cap, preserving extraction order.
    fn retain(
        &self,
        extracted: Vec<ExtractedLocation>,
        evidence: &EvidenceLog,
    ) -> Vec<ExtractedLocation> {
        let mut seen = HashSet::new();
        let mut kept = Vec::new();
        for location in extracted {
            if location.confidence < self.location.confidence_threshold {
                evidence.record(STAGE, format!("below-threshold:{}", location.matched_name));
                continue;
            }
            if !seen.insert(location.matched_name.to_lowercase()) {
                continue;
            }
            if kept.len() == self.location.max_locations {
                debug!(name = %location.matched_name, "location cap reached");
                continue;
            }
            kept.push(location);
        }
        kept
    }

    async fn geocode(&self, location: &ExtractedLocation) -> Result<GeocodeHit, ResolveError> {
        let miss = |reason: String| ResolveError::GeocodeMiss {
            name: location.matched_name.clone(),
            reason,
        };
        match self
            .geocoder
            .resolve(&location.matched_name, &location.place_type)
            .await
        {
            Ok(Some(hit)) => Ok(hit),
            Ok(None) => Err(miss("not found".into())),
            Err(err) => Err(miss(err.to_string())),
        }
    }

    fn build_region(
        &self,
        id: RegionId,
        location: ExtractedLocation,
        hit: GeocodeHit,
        evidence: &EvidenceLog,
    ) -> Region {
        let source = match (&hit.geometry, hit.precision) {
            (Geometry::Polygon(_), Precision::Exact) => RegionSource::ResolvedExact,
            _ => RegionSource::FallbackApproximate,
        };
        // Polygons are measured the way the tiler measures them, so the
        // tiling decision, pixel estimates and tile union all agree. A point
        // has only the geocoder's figure.
        let area_km2 = match &hit.geometry {
            Geometry::Polygon(polygon) => tiler::polygon_area_km2(polygon),
            Geometry::Point(_) => hit
                .area_km2
                .filter(|a| a.is_finite() && *a >= 0.0)
                .unwrap_or(0.0),
        };

        let mut tiles = Vec::new();
        if let Geometry::Polygon(polygon) = &hit.geometry {
            if self.budget.pixels(area_km2) > self.budget.max_pixels as f64 {
                evidence.record(TILER_STAGE, format!("budget-exceeded:{}", location.matched_name));
                match tiler::tile(id, polygon, &self.budget) {
                    Ok(t) => tiles = t,
                    Err(err) => {
                        warn!(name = %location.matched_name, error = %err, "tiling failed");
                        evidence.record(TILER_STAGE, format!("failed:{}", location.matched_name));
                    }
                }
            }
        }

        Region {
            id,
            name: location.matched_name,
            place_type: location.place_type,
            confidence: location.confidence,
            geometry: hit.geometry,
            source,
            area_km2,
            tiles,
        }
    }
}

/// A raw entry without a usable name or with an out-of-range confidence
/// makes the whole extraction output malformed.
fn validate_raw(raw: RawLocation) -> Result<ExtractedLocation, ResolveError> {
    let name = raw
        .matched_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ResolveError::Extraction("entry without matched_name".into()))?;
    // Models that do not score their output are taken at face value.
    let confidence = raw.confidence.unwrap_or(1.0);
    if !(confidence.is_finite() && (0.0..=1.0).contains(&confidence)) {
        return Err(ResolveError::Extraction(format!(
            "confidence {confidence} for {name} is outside [0, 1]"
        )));
    }
    let place_type = raw
        .place_type
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    Ok(ExtractedLocation {
        matched_name: name,
        place_type,
        confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_entries_are_validated() {
        let ok = validate_raw(RawLocation::new(" Nairobi ", "city", 0.9)).unwrap();
        assert_eq!(ok.matched_name, "Nairobi");

        let unnamed = RawLocation {
            matched_name: Some("  ".into()),
            ..RawLocation::default()
        };
        assert!(validate_raw(unnamed).is_err());

        assert!(validate_raw(RawLocation::new("Nairobi", "city", 1.5)).is_err());
        assert!(validate_raw(RawLocation::new("Nairobi", "city", f64::NAN)).is_err());

        let unscored = RawLocation {
            matched_name: Some("Lagos".into()),
            ..RawLocation::default()
        };
        let loc = validate_raw(unscored).unwrap();
        assert_eq!(loc.confidence, 1.0);
        assert_eq!(loc.place_type, "unknown");
    }
}

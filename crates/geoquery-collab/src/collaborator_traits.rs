//! Collaborator trait definitions for geoquery
//!
//! These traits define the boundary between the orchestration core and the
//! services it consumes:
//! - `ExtractionModel`: place mentions from free text
//! - `Geocoder`: geometry lookup for one place mention
//! - `ComputeBackend`: statistics for a region or tile, one per capability
//! - `FallbackBackend`: narrative-only summary from text search
//!
//! All traits are async and transport-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CapabilityParseError, CollaboratorError};
use crate::geometry::Geometry;

/// Result type for collaborator calls
pub type CollabResult<T> = std::result::Result<T, CollaboratorError>;

/// Free-form task parameters (`year`, `scale_m`, ...), ordered for hashing.
pub type TaskParameters = BTreeMap<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// Category of geospatial analysis.
///
/// Declaration order is the tie-break priority: earlier variants win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Vegetation,
    LandCover,
    Water,
    Temperature,
    Generic,
}

impl Capability {
    /// All capabilities in priority order.
    pub const ALL: [Capability; 5] = [
        Capability::Vegetation,
        Capability::LandCover,
        Capability::Water,
        Capability::Temperature,
        Capability::Generic,
    ];

    /// Position in the priority order (0 = highest).
    pub fn priority(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Vegetation => "vegetation",
            Capability::LandCover => "land-cover",
            Capability::Water => "water",
            Capability::Temperature => "temperature",
            Capability::Generic => "generic",
        }
    }

    /// Stage name used in evidence entries, e.g. `land_cover_backend`.
    pub fn backend_stage(self) -> String {
        format!("{}_backend", self.as_str().replace('-', "_"))
    }

    /// Human-readable label for narratives.
    pub fn label(self) -> &'static str {
        match self {
            Capability::Vegetation => "Vegetation",
            Capability::LandCover => "Land cover",
            Capability::Water => "Surface water",
            Capability::Temperature => "Land surface temperature",
            Capability::Generic => "General",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = CapabilityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        Capability::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| CapabilityParseError {
                name: s.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// ExtractionModel
// ---------------------------------------------------------------------------

/// One place mention as returned by the extraction model, before validation.
///
/// Every field is optional on the wire; the resolver decides whether the
/// payload is well formed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawLocation {
    #[serde(default)]
    pub matched_name: Option<String>,
    #[serde(default)]
    pub place_type: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl RawLocation {
    pub fn new(name: &str, place_type: &str, confidence: f64) -> Self {
        Self {
            matched_name: Some(name.to_string()),
            place_type: Some(place_type.to_string()),
            confidence: Some(confidence),
        }
    }
}

/// Natural-language location extraction.
#[async_trait]
pub trait ExtractionModel: Send + Sync {
    /// Extract candidate place mentions from `text`.
    async fn extract(&self, text: &str) -> CollabResult<Vec<RawLocation>>;
}

// ---------------------------------------------------------------------------
// Geocoder
// ---------------------------------------------------------------------------

/// How closely the returned geometry matches the named place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    /// Administrative boundary polygon
    Exact,
    /// Bounding circle/box or centroid only
    Approximate,
}

/// A successful geocoding lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeHit {
    pub geometry: Geometry,
    pub precision: Precision,
    /// Geodesic area reported by the service, if known.
    #[serde(default)]
    pub area_km2: Option<f64>,
}

/// Place name -> geometry lookup.
///
/// `Ok(None)` means the service answered but knows no such place.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn resolve(&self, name: &str, place_type: &str) -> CollabResult<Option<GeocodeHit>>;
}

// ---------------------------------------------------------------------------
// ComputeBackend
// ---------------------------------------------------------------------------

/// The area a compute or fallback call is about: a whole region or one tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisTarget {
    /// Stable label, e.g. `Nairobi` or `Nairobi#3` for tile 3.
    pub label: String,
    pub geometry: Geometry,
    pub area_km2: f64,
}

/// A single statistic reported by a compute backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    /// Mean index value, temperature, fraction...
    Continuous(f64),
    /// Class name -> percentage of pixels
    Categorical(BTreeMap<String, f64>),
}

impl MetricValue {
    pub fn as_continuous(&self) -> Option<f64> {
        match self {
            MetricValue::Continuous(v) => Some(*v),
            MetricValue::Categorical(_) => None,
        }
    }

    pub fn as_categorical(&self) -> Option<&BTreeMap<String, f64>> {
        match self {
            MetricValue::Categorical(classes) => Some(classes),
            MetricValue::Continuous(_) => None,
        }
    }
}

/// Statistics for one region or tile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputeOutput {
    pub statistics: BTreeMap<String, MetricValue>,
    /// Number of valid pixels the statistics were computed over.
    #[serde(default)]
    pub pixel_count: Option<u64>,
    #[serde(default)]
    pub processing_time_ms: u64,
}

/// Geospatial compute engine for one or more capabilities.
///
/// Calls must be idempotent: the dispatcher may repeat a call for the same
/// tile after a retryable error.
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Short backend identifier for evidence and results.
    fn name(&self) -> &str;

    async fn analyze(
        &self,
        target: &AnalysisTarget,
        capability: Capability,
        parameters: &TaskParameters,
    ) -> CollabResult<ComputeOutput>;
}

// ---------------------------------------------------------------------------
// FallbackBackend
// ---------------------------------------------------------------------------

/// Narrative-only answer produced from text search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FallbackSummary {
    pub narrative: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// Degraded text-search substitute used when compute fails.
#[async_trait]
pub trait FallbackBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn search_summarize(
        &self,
        target: &AnalysisTarget,
        capability: Capability,
    ) -> CollabResult<FallbackSummary>;
}

//! In-memory fakes for the collaborator traits
//!
//! Provides `KeywordExtractionModel`, `TableGeocoder`,
//! `ScriptedComputeBackend` and `ScriptedFallback`, which satisfy the trait
//! contracts deterministically and record how they were called. A
//! [`FixtureWorld`] deserialised from JSON wires all four together.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::collaborator_traits::*;
use crate::error::CollaboratorError;

// ---------------------------------------------------------------------------
// KeywordExtractionModel
// ---------------------------------------------------------------------------

/// Extraction model that reports a location whenever its needle occurs in
/// the text (case-insensitive). Results keep registration order.
#[derive(Debug, Default)]
pub struct KeywordExtractionModel {
    entries: Vec<(String, RawLocation)>,
    failure: Option<CollaboratorError>,
    calls: AtomicUsize,
}

impl KeywordExtractionModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `location` when `needle` appears in the query.
    pub fn with_location(mut self, needle: &str, location: RawLocation) -> Self {
        self.entries.push((needle.to_lowercase(), location));
        self
    }

    /// Fail every call with `err`.
    pub fn failing(err: CollaboratorError) -> Self {
        Self {
            failure: Some(err),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExtractionModel for KeywordExtractionModel {
    async fn extract(&self, text: &str) -> CollabResult<Vec<RawLocation>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        let haystack = text.to_lowercase();
        Ok(self
            .entries
            .iter()
            .filter(|(needle, _)| haystack.contains(needle.as_str()))
            .map(|(_, loc)| loc.clone())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// TableGeocoder
// ---------------------------------------------------------------------------

/// Geocoder backed by a `HashMap<lowercase name, GeocodeHit>`.
///
/// Unknown names resolve to `Ok(None)`; names registered with
/// [`with_failure`](Self::with_failure) return that error.
#[derive(Debug, Default)]
pub struct TableGeocoder {
    places: HashMap<String, GeocodeHit>,
    failures: HashMap<String, CollaboratorError>,
    lookups: Mutex<Vec<String>>,
}

impl TableGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_place(mut self, name: &str, hit: GeocodeHit) -> Self {
        self.places.insert(name.to_lowercase(), hit);
        self
    }

    pub fn with_failure(mut self, name: &str, err: CollaboratorError) -> Self {
        self.failures.insert(name.to_lowercase(), err);
        self
    }

    /// Names looked up so far, in call order.
    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl Geocoder for TableGeocoder {
    async fn resolve(&self, name: &str, _place_type: &str) -> CollabResult<Option<GeocodeHit>> {
        self.lookups.lock().unwrap().push(name.to_string());
        let key = name.to_lowercase();
        if let Some(err) = self.failures.get(&key) {
            return Err(err.clone());
        }
        Ok(self.places.get(&key).cloned())
    }
}

// ---------------------------------------------------------------------------
// ScriptedComputeBackend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ScriptedFailure {
    /// `None` fails forever, `Some(n)` fails the next `n` calls.
    remaining: Option<usize>,
    error: CollaboratorError,
}

/// One recorded `analyze` call.
#[derive(Debug, Clone)]
pub struct ComputeCall {
    pub label: String,
    pub capability: Capability,
    pub started_at: Instant,
    pub finished_at: Instant,
    pub ok: bool,
}

/// Compute backend with scripted statistics, failures and latency.
///
/// Statistics default to the backend-wide map; per-label overrides win.
/// Tracks the peak number of concurrent calls so admission limits can be
/// asserted in tests.
#[derive(Debug)]
pub struct ScriptedComputeBackend {
    name: String,
    statistics: BTreeMap<String, MetricValue>,
    per_label: HashMap<String, BTreeMap<String, MetricValue>>,
    pixel_count: Option<u64>,
    failures: Mutex<HashMap<String, ScriptedFailure>>,
    fail_all: Option<CollaboratorError>,
    delay: Duration,
    per_label_delay: HashMap<String, Duration>,
    calls: Mutex<Vec<ComputeCall>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedComputeBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            statistics: BTreeMap::new(),
            per_label: HashMap::new(),
            pixel_count: None,
            failures: Mutex::new(HashMap::new()),
            fail_all: None,
            delay: Duration::ZERO,
            per_label_delay: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_metric(mut self, name: &str, value: MetricValue) -> Self {
        self.statistics.insert(name.to_string(), value);
        self
    }

    pub fn with_label_metric(mut self, label: &str, name: &str, value: MetricValue) -> Self {
        self.per_label
            .entry(label.to_string())
            .or_default()
            .insert(name.to_string(), value);
        self
    }

    pub fn with_pixel_count(mut self, pixels: u64) -> Self {
        self.pixel_count = Some(pixels);
        self
    }

    /// Fail every call for `label`.
    pub fn with_failure(self, label: &str, error: CollaboratorError) -> Self {
        self.failures.lock().unwrap().insert(
            label.to_string(),
            ScriptedFailure {
                remaining: None,
                error,
            },
        );
        self
    }

    /// Fail the first `times` calls for `label`, then succeed.
    pub fn with_transient_failure(self, label: &str, times: usize, error: CollaboratorError) -> Self {
        self.failures.lock().unwrap().insert(
            label.to_string(),
            ScriptedFailure {
                remaining: Some(times),
                error,
            },
        );
        self
    }

    /// Fail every call regardless of label.
    pub fn failing_all(mut self, error: CollaboratorError) -> Self {
        self.fail_all = Some(error);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_label_delay(mut self, label: &str, delay: Duration) -> Self {
        self.per_label_delay.insert(label.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<ComputeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn scripted_error(&self, label: &str) -> Option<CollaboratorError> {
        if let Some(err) = &self.fail_all {
            return Some(err.clone());
        }
        let mut failures = self.failures.lock().unwrap();
        let failure = failures.get_mut(label)?;
        match failure.remaining.as_mut() {
            None => Some(failure.error.clone()),
            Some(0) => None,
            Some(n) => {
                *n -= 1;
                Some(failure.error.clone())
            }
        }
    }
}

#[async_trait]
impl ComputeBackend for ScriptedComputeBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(
        &self,
        target: &AnalysisTarget,
        capability: Capability,
        _parameters: &TaskParameters,
    ) -> CollabResult<ComputeOutput> {
        let started_at = Instant::now();
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self
            .per_label_delay
            .get(&target.label)
            .copied()
            .unwrap_or(self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = match self.scripted_error(&target.label) {
            Some(err) => Err(err),
            None => {
                let mut statistics = self.statistics.clone();
                if let Some(overrides) = self.per_label.get(&target.label) {
                    statistics.extend(overrides.clone());
                }
                Ok(ComputeOutput {
                    statistics,
                    pixel_count: self.pixel_count,
                    processing_time_ms: delay.as_millis() as u64,
                })
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(ComputeCall {
            label: target.label.clone(),
            capability,
            started_at,
            finished_at: Instant::now(),
            ok: result.is_ok(),
        });
        result
    }
}

// ---------------------------------------------------------------------------
// ScriptedFallback
// ---------------------------------------------------------------------------

/// One recorded `search_summarize` call.
#[derive(Debug, Clone)]
pub struct FallbackCall {
    pub target: AnalysisTarget,
    pub capability: Capability,
    pub at: Instant,
}

/// Fallback backend returning a canned summary (or a canned error).
#[derive(Debug)]
pub struct ScriptedFallback {
    name: String,
    response: CollabResult<FallbackSummary>,
    calls: Mutex<Vec<FallbackCall>>,
}

impl ScriptedFallback {
    /// Answer every call with `narrative` and `sources`, named `web-search`.
    pub fn new(narrative: &str, sources: &[&str]) -> Self {
        Self {
            name: "web-search".to_string(),
            response: Ok(FallbackSummary {
                narrative: narrative.to_string(),
                sources: sources.iter().map(|s| s.to_string()).collect(),
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: CollaboratorError) -> Self {
        Self {
            name: "web-search".to_string(),
            response: Err(error),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn calls(&self) -> Vec<FallbackCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl FallbackBackend for ScriptedFallback {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search_summarize(
        &self,
        target: &AnalysisTarget,
        capability: Capability,
    ) -> CollabResult<FallbackSummary> {
        self.calls.lock().unwrap().push(FallbackCall {
            target: target.clone(),
            capability,
            at: Instant::now(),
        });
        self.response.clone()
    }
}

// ---------------------------------------------------------------------------
// FixtureWorld
// ---------------------------------------------------------------------------

/// A location the fixture extraction model reports when `needle` occurs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureLocation {
    pub needle: String,
    #[serde(flatten)]
    pub location: RawLocation,
}

/// Scripted behaviour of one compute backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureBackend {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub statistics: BTreeMap<String, MetricValue>,
    #[serde(default)]
    pub pixel_count: Option<u64>,
    /// Target label -> error returned for it
    #[serde(default)]
    pub fail_labels: BTreeMap<String, CollaboratorError>,
    #[serde(default)]
    pub fail_all: Option<CollaboratorError>,
    #[serde(default)]
    pub delay_ms: u64,
}

/// Canned fallback behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FixtureFallback {
    Summary(FallbackSummary),
    Failure { error: CollaboratorError },
}

/// A complete scripted world: extraction, geocoding, compute and fallback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureWorld {
    #[serde(default)]
    pub locations: Vec<FixtureLocation>,
    #[serde(default)]
    pub places: BTreeMap<String, GeocodeHit>,
    #[serde(default)]
    pub compute: BTreeMap<Capability, FixtureBackend>,
    #[serde(default)]
    pub fallback: Option<FixtureFallback>,
}

/// Fakes assembled from a [`FixtureWorld`].
#[derive(Clone)]
pub struct FixtureCollaborators {
    pub extraction: Arc<KeywordExtractionModel>,
    pub geocoder: Arc<TableGeocoder>,
    pub compute: BTreeMap<Capability, Arc<ScriptedComputeBackend>>,
    pub fallback: Option<Arc<ScriptedFallback>>,
}

impl FixtureWorld {
    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn build(&self) -> FixtureCollaborators {
        let extraction = self
            .locations
            .iter()
            .fold(KeywordExtractionModel::new(), |model, loc| {
                model.with_location(&loc.needle, loc.location.clone())
            });

        let geocoder = self
            .places
            .iter()
            .fold(TableGeocoder::new(), |geo, (name, hit)| {
                geo.with_place(name, hit.clone())
            });

        let compute = self
            .compute
            .iter()
            .map(|(capability, script)| {
                let name = script
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("{capability}-engine"));
                let mut backend = ScriptedComputeBackend::new(&name)
                    .with_delay(Duration::from_millis(script.delay_ms));
                for (metric, value) in &script.statistics {
                    backend = backend.with_metric(metric, value.clone());
                }
                if let Some(pixels) = script.pixel_count {
                    backend = backend.with_pixel_count(pixels);
                }
                for (label, err) in &script.fail_labels {
                    backend = backend.with_failure(label, err.clone());
                }
                if let Some(err) = &script.fail_all {
                    backend = backend.failing_all(err.clone());
                }
                (*capability, Arc::new(backend))
            })
            .collect();

        let fallback = self.fallback.as_ref().map(|fb| {
            Arc::new(match fb {
                FixtureFallback::Summary(summary) => {
                    let sources: Vec<&str> = summary.sources.iter().map(String::as_str).collect();
                    ScriptedFallback::new(&summary.narrative, &sources)
                }
                FixtureFallback::Failure { error } => ScriptedFallback::failing(error.clone()),
            })
        });

        FixtureCollaborators {
            extraction: Arc::new(extraction),
            geocoder: Arc::new(geocoder),
            compute,
            fallback,
        }
    }
}

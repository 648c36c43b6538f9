//! Analysis tasks, plans and task results.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use geoquery_collab::{Capability, MetricValue, TaskParameters};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::region::{Region, RegionId};

/// Position of a task within its plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub usize);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// One capability request against one Region. Immutable once planned.
#[derive(Debug, Clone)]
pub struct AnalysisTask {
    pub id: TaskId,
    pub capability: Capability,
    pub region: Arc<Region>,
    pub parameters: TaskParameters,
}

/// Ordered tasks for one query.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub tasks: Vec<AnalysisTask>,
}

#[derive(Serialize)]
struct DigestEntry<'a> {
    capability: Capability,
    region: RegionId,
    name: &'a str,
    tiles: Vec<(usize, usize, u64)>,
    parameters: &'a TaskParameters,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// SHA-256 over capabilities, regions, tile partitions and parameters.
    ///
    /// Two plans built from the same query against deterministic
    /// collaborators have equal digests.
    pub fn digest(&self) -> String {
        let entries: Vec<DigestEntry<'_>> = self
            .tasks
            .iter()
            .map(|t| DigestEntry {
                capability: t.capability,
                region: t.region.id,
                name: &t.region.name,
                tiles: t
                    .region
                    .tiles
                    .iter()
                    .map(|tile| (tile.row, tile.col, tile.area_km2.to_bits()))
                    .collect(),
                parameters: &t.parameters,
            })
            .collect();
        // Serialising plain structs, ordered maps and integers cannot fail.
        let bytes = serde_json::to_vec(&entries).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        hex::encode(hasher.finalize())
    }
}

/// Terminal outcome of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    Partial,
    Failed,
}

/// Which backend produced the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendUsed {
    Primary,
    Fallback,
    None,
}

/// Per-task dispatch state machine.
///
/// ```text
/// Pending -> DispatchedPrimary -> {Aggregating, FailedPrimary}
/// FailedPrimary -> DispatchedFallback -> {Succeeded, FailedFallback}
/// Aggregating | FailedPrimary | Succeeded | FailedFallback -> Terminal
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchState {
    Pending,
    DispatchedPrimary,
    Aggregating,
    FailedPrimary,
    DispatchedFallback,
    Succeeded,
    FailedFallback,
    Terminal,
}

impl DispatchState {
    pub fn can_transition_to(self, next: DispatchState) -> bool {
        use DispatchState::*;
        matches!(
            (self, next),
            (Pending, DispatchedPrimary)
                | (Pending, FailedPrimary)
                | (DispatchedPrimary, Aggregating)
                | (DispatchedPrimary, FailedPrimary)
                | (FailedPrimary, DispatchedFallback)
                | (FailedPrimary, Terminal)
                | (DispatchedFallback, Succeeded)
                | (DispatchedFallback, FailedFallback)
                | (Aggregating, Terminal)
                | (Succeeded, Terminal)
                | (FailedFallback, Terminal)
        )
    }
}

/// The result of dispatching one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub capability: Capability,
    pub region_id: RegionId,
    pub region_name: String,
    pub status: TaskStatus,
    pub statistics: BTreeMap<String, MetricValue>,
    pub backend_used: BackendUsed,
    pub backend_name: Option<String>,
    pub tiles_total: usize,
    pub tiles_succeeded: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub trail: Vec<DispatchState>,
    pub duration_ms: u64,
}

impl TaskResult {
    /// `tiles_succeeded / tiles_total`, when statistics were attached.
    pub fn completeness(&self) -> Option<f64> {
        self.statistics
            .get(COMPLETENESS_METRIC)
            .and_then(MetricValue::as_continuous)
    }
}

/// Metric attached to partial results.
pub const COMPLETENESS_METRIC: &str = "completeness";

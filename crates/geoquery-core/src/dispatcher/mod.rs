//! Backend dispatch: one AnalysisTask in, one TaskResult out.
//!
//! A task runs against the primary compute backend for its capability,
//! one call per tile (or one call for an untiled region). Tile calls are
//! spawned onto a [`JoinSet`] and admitted through a [`Semaphore`]; each has
//! its own timeout capped by the run deadline, and a failing tile never
//! cancels its siblings. Dropping the dispatch future aborts every tile
//! still in flight.
//!
//! When no tile succeeds, or any tile reports a structural error (missing
//! credentials, service unavailable), the task falls back, exactly once, to
//! the text-search backend with the whole untiled region. An untiled polygon
//! over the pixel budget never reaches the primary backend.

pub mod aggregate;
pub mod registry;

use std::sync::Arc;

use geoquery_collab::{
    AnalysisTarget, Capability, ComputeBackend, ComputeOutput, MetricValue, TaskParameters,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, instrument, warn};

use crate::config::DispatchConfig;
use crate::domain::{
    AnalysisTask, BackendError, BackendUsed, DispatchState, EvidenceLog, TaskResult, TaskStatus,
    COMPLETENESS_METRIC,
};
use crate::metrics::METRICS;
use crate::tiler::TileBudget;

pub use aggregate::{aggregate, TileSample};
pub use registry::BackendRegistry;

/// Visited dispatch states; only legal transitions are appended.
#[derive(Debug)]
struct StateTrail {
    states: Vec<DispatchState>,
}

impl StateTrail {
    fn new() -> Self {
        Self {
            states: vec![DispatchState::Pending],
        }
    }

    fn current(&self) -> DispatchState {
        self.states
            .last()
            .copied()
            .unwrap_or(DispatchState::Pending)
    }

    fn advance(&mut self, next: DispatchState) {
        debug_assert!(
            self.current().can_transition_to(next),
            "illegal dispatch transition {:?} -> {:?}",
            self.current(),
            next
        );
        self.states.push(next);
    }

    fn finish(mut self) -> Vec<DispatchState> {
        self.advance(DispatchState::Terminal);
        self.states
    }
}

/// One unit of primary work: a tile or a whole untiled region.
#[derive(Debug, Clone)]
struct TileJob {
    index: usize,
    target: AnalysisTarget,
    estimated_pixels: u64,
}

type TileOutcome = Result<ComputeOutput, BackendError>;

pub struct BackendDispatcher {
    registry: Arc<BackendRegistry>,
    config: DispatchConfig,
    budget: Option<TileBudget>,
}

impl BackendDispatcher {
    pub fn new(registry: Arc<BackendRegistry>, config: DispatchConfig) -> Self {
        Self {
            registry,
            config,
            budget: None,
        }
    }

    /// Refuse primary calls for untiled polygons over `budget`.
    pub fn with_budget(mut self, budget: TileBudget) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Run `task` to TERMINAL. Never fails: every error ends up in the result.
    #[instrument(
        skip_all,
        fields(task_id = %task.id, capability = %task.capability, region = %task.region.name)
    )]
    pub async fn dispatch(
        &self,
        task: &AnalysisTask,
        evidence: &EvidenceLog,
        deadline: Instant,
    ) -> TaskResult {
        let started = Instant::now();
        let stage = task.capability.backend_stage();
        let mut trail = StateTrail::new();
        let jobs = tile_jobs(task);
        let tiles_total = jobs.len();

        let Some(backend) = self.registry.primary(task.capability).cloned() else {
            trail.advance(DispatchState::FailedPrimary);
            let err = BackendError::Unavailable(format!(
                "no backend registered for {}",
                task.capability
            ));
            return self
                .fallback(task, err, None, tiles_total, trail, evidence, deadline, started)
                .await;
        };

        if let Some(err) = self.oversized(task) {
            trail.advance(DispatchState::FailedPrimary);
            return self
                .fallback(
                    task,
                    err,
                    Some(backend.name().to_string()),
                    tiles_total,
                    trail,
                    evidence,
                    deadline,
                    started,
                )
                .await;
        }

        trail.advance(DispatchState::DispatchedPrimary);
        let outcomes = self
            .run_tiles(Arc::clone(&backend), task, &jobs, deadline)
            .await;

        let mut samples = Vec::new();
        let mut first_error: Option<BackendError> = None;
        let mut failed = 0usize;
        for (job, outcome) in jobs.iter().zip(&outcomes) {
            match outcome {
                Ok(output) => samples.push(TileSample {
                    area_km2: job.target.area_km2,
                    pixels: output.pixel_count.unwrap_or(job.estimated_pixels),
                    statistics: &output.statistics,
                }),
                Err(err) => {
                    failed += 1;
                    METRICS.inc_tiles_failed();
                    debug!(tile = job.index, error = %err, "tile failed");
                    evidence.record(stage.as_str(), format!("tile-failed:{}", job.index));
                    first_error.get_or_insert_with(|| err.clone());
                }
            }
        }

        // Structural errors mean the primary cannot serve this task at all,
        // whatever the other tiles returned.
        let structural = outcomes.iter().find_map(|o| match o {
            Err(err @ BackendError::Unavailable(_)) => Some(err.clone()),
            _ => None,
        });
        let succeeded = samples.len();
        if succeeded == 0 || structural.is_some() {
            trail.advance(DispatchState::FailedPrimary);
            let err = match (structural, first_error) {
                (Some(err), _) => err,
                (None, Some(err)) => BackendError::Failed(format!(
                    "all {tiles_total} tile(s) failed, first error: {err}"
                )),
                (None, None) => BackendError::Failed("no tiles to dispatch".into()),
            };
            return self
                .fallback(
                    task,
                    err,
                    Some(backend.name().to_string()),
                    tiles_total,
                    trail,
                    evidence,
                    deadline,
                    started,
                )
                .await;
        }

        trail.advance(DispatchState::Aggregating);
        let mut statistics = aggregate(&samples);
        let status = if failed > 0 {
            statistics.insert(
                COMPLETENESS_METRIC.to_string(),
                MetricValue::Continuous(succeeded as f64 / tiles_total as f64),
            );
            evidence.record(stage.as_str(), "partial");
            TaskStatus::Partial
        } else {
            evidence.record(stage.as_str(), "success");
            TaskStatus::Success
        };

        TaskResult {
            task_id: task.id,
            capability: task.capability,
            region_id: task.region.id,
            region_name: task.region.name.clone(),
            status,
            statistics,
            backend_used: BackendUsed::Primary,
            backend_name: Some(backend.name().to_string()),
            tiles_total,
            tiles_succeeded: succeeded,
            narrative: None,
            sources: Vec::new(),
            error: first_error
                .filter(|_| failed > 0)
                .map(|e| format!("{failed} of {tiles_total} tile(s) failed: {e}")),
            trail: trail.finish(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// An untiled polygon whose pixel estimate exceeds the budget.
    fn oversized(&self, task: &AnalysisTask) -> Option<BackendError> {
        let budget = self.budget.as_ref()?;
        let region = &task.region;
        if region.is_tiled() || region.geometry.as_polygon().is_none() {
            return None;
        }
        let pixels = budget.pixels(region.area_km2);
        (pixels > budget.max_pixels as f64).then(|| {
            BackendError::Failed(format!(
                "{} is untiled and needs {pixels:.0} pixels, budget {}",
                region.name, budget.max_pixels
            ))
        })
    }

    /// Spawn every tile call and collect outcomes in tile order.
    async fn run_tiles(
        &self,
        backend: Arc<dyn ComputeBackend>,
        task: &AnalysisTask,
        jobs: &[TileJob],
        deadline: Instant,
    ) -> Vec<TileOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.tile_concurrency.max(1)));
        let parameters = Arc::new(task.parameters.clone());
        let mut join_set = JoinSet::new();

        for (slot, job) in jobs.iter().cloned().enumerate() {
            let backend = Arc::clone(&backend);
            let semaphore = Arc::clone(&semaphore);
            let parameters = Arc::clone(&parameters);
            let config = self.config.clone();
            let capability = task.capability;
            join_set.spawn(async move {
                let outcome = match timeout_at(deadline, semaphore.acquire_owned()).await {
                    Ok(Ok(_permit)) => {
                        call_tile(backend.as_ref(), &job.target, capability, &parameters, &config, deadline)
                            .await
                    }
                    Ok(Err(_closed)) => Err(BackendError::Failed("tile admission closed".into())),
                    Err(_elapsed) => Err(BackendError::Failed(
                        "deadline passed while waiting for a tile slot".into(),
                    )),
                };
                (slot, outcome)
            });
        }

        let mut outcomes: Vec<Option<TileOutcome>> = vec![None; jobs.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((slot, outcome)) => outcomes[slot] = Some(outcome),
                Err(e) => warn!(error = %e, "tile worker did not complete"),
            }
        }

        outcomes
            .into_iter()
            .map(|o| o.unwrap_or_else(|| Err(BackendError::Failed("tile worker aborted".into()))))
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    async fn fallback(
        &self,
        task: &AnalysisTask,
        primary_error: BackendError,
        primary_name: Option<String>,
        tiles_total: usize,
        mut trail: StateTrail,
        evidence: &EvidenceLog,
        deadline: Instant,
        started: Instant,
    ) -> TaskResult {
        let stage = task.capability.backend_stage();
        let mut result = TaskResult {
            task_id: task.id,
            capability: task.capability,
            region_id: task.region.id,
            region_name: task.region.name.clone(),
            status: TaskStatus::Failed,
            statistics: Default::default(),
            backend_used: BackendUsed::None,
            backend_name: primary_name,
            tiles_total,
            tiles_succeeded: 0,
            narrative: None,
            sources: Vec::new(),
            error: None,
            trail: Vec::new(),
            duration_ms: 0,
        };

        let outcome = match self.registry.fallback() {
            None => Err(BackendError::FallbackExhausted(format!(
                "no fallback configured; primary: {primary_error}"
            ))),
            Some(_) if Instant::now() >= deadline => Err(BackendError::FallbackExhausted(format!(
                "deadline passed before fallback; primary: {primary_error}"
            ))),
            Some(fallback) => {
                trail.advance(DispatchState::DispatchedFallback);
                METRICS.inc_fallbacks();
                result.backend_name = Some(fallback.name().to_string());
                let timeout = self.config.fallback_timeout();
                let fallback_deadline = deadline.min(Instant::now() + timeout);
                match timeout_at(
                    fallback_deadline,
                    fallback.search_summarize(&task.region.target(), task.capability),
                )
                .await
                {
                    Ok(Ok(summary)) => Ok(summary),
                    Ok(Err(err)) => Err(BackendError::FallbackExhausted(format!(
                        "primary: {primary_error}; fallback: {err}"
                    ))),
                    Err(_elapsed) => Err(BackendError::FallbackExhausted(format!(
                        "primary: {primary_error}; fallback: {}",
                        BackendError::Timeout(timeout)
                    ))),
                }
            }
        };

        match outcome {
            Ok(summary) => {
                trail.advance(DispatchState::Succeeded);
                evidence.record(stage.as_str(), "fallback-used");
                result.status = TaskStatus::Success;
                result.backend_used = BackendUsed::Fallback;
                result.narrative = Some(summary.narrative);
                result.sources = summary.sources;
            }
            Err(err) => {
                if trail.current() == DispatchState::DispatchedFallback {
                    trail.advance(DispatchState::FailedFallback);
                }
                warn!(error = %err, "task failed");
                evidence.record(stage.as_str(), "failed");
                METRICS.inc_tasks_failed();
                result.error = Some(err.to_string());
            }
        }

        result.trail = trail.finish();
        result.duration_ms = started.elapsed().as_millis() as u64;
        result
    }
}

fn tile_jobs(task: &AnalysisTask) -> Vec<TileJob> {
    let region = &task.region;
    if region.is_tiled() {
        region
            .tiles
            .iter()
            .map(|tile| TileJob {
                index: tile.index,
                target: region.tile_target(tile),
                estimated_pixels: tile.estimated_pixels,
            })
            .collect()
    } else {
        vec![TileJob {
            index: 0,
            target: region.target(),
            estimated_pixels: 0,
        }]
    }
}

/// One tile: retry retryable errors until the tile's own timeout expires.
async fn call_tile(
    backend: &dyn ComputeBackend,
    target: &AnalysisTarget,
    capability: Capability,
    parameters: &TaskParameters,
    config: &DispatchConfig,
    deadline: Instant,
) -> TileOutcome {
    let timeout = config.tile_timeout();
    let started = Instant::now();
    let tile_deadline = deadline.min(started + timeout);
    let attempts = async {
        let mut attempt = 1;
        loop {
            METRICS.inc_tiles_dispatched();
            match backend.analyze(target, capability, parameters).await {
                Ok(output) => return Ok(output),
                Err(err) if err.is_retryable() && attempt < config.max_tile_attempts => {
                    debug!(label = %target.label, attempt, error = %err, "retrying tile");
                    sleep(config.retry_backoff()).await;
                    attempt += 1;
                }
                Err(err) => return Err(BackendError::from(err)),
            }
        }
    };
    match timeout_at(tile_deadline, attempts).await {
        Ok(outcome) => outcome,
        Err(_elapsed) => Err(BackendError::Timeout(started.elapsed())),
    }
}

//! The pipeline controller: Resolver -> Planner -> Dispatcher -> Response.
//!
//! Each run owns a fresh [`PipelineState`]; nothing is shared between
//! requests except the immutable collaborators and configuration.
//!
//! Stage transitions only move forward and are recorded as
//! `pipeline:<STAGE>` evidence before the next stage starts:
//!
//! ```text
//! INIT -> LOCATIONS_RESOLVED -> PLANNED -> EXECUTING -> AGGREGATED
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use geoquery_collab::{ExtractionModel, Geocoder};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{ConfigError, PipelineConfig};
use crate::dispatcher::{BackendDispatcher, BackendRegistry};
use crate::domain::{
    EvidenceEntry, EvidenceLog, PipelineError, Plan, Query, Region, Result, TaskResult,
    TaskStatus,
};
use crate::metrics::METRICS;
use crate::narrative;
use crate::obs;
use crate::planner::Planner;
use crate::resolver::LocationResolver;
use crate::tiler::TileBudget;

/// Controller stage; only ever advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStage {
    Init,
    LocationsResolved,
    Planned,
    Executing,
    Aggregated,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Init => "INIT",
            PipelineStage::LocationsResolved => "LOCATIONS_RESOLVED",
            PipelineStage::Planned => "PLANNED",
            PipelineStage::Executing => "EXECUTING",
            PipelineStage::Aggregated => "AGGREGATED",
        }
    }
}

/// Per-run options supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Whole-run budget; defaults to the configured `deadline_ms`.
    pub deadline: Option<Duration>,
    /// Flipping the value to `true` cancels the run.
    pub cancel: Option<watch::Receiver<bool>>,
    /// Capability names from an upstream intent classifier.
    pub intent_signals: Vec<String>,
}

impl RunOptions {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_intent_signals(mut self, signals: Vec<String>) -> Self {
        self.intent_signals = signals;
        self
    }
}

/// Everything one run knows. Owned by exactly one controller run.
#[derive(Debug)]
pub struct PipelineState {
    query: Query,
    stage: PipelineStage,
    regions: Vec<Arc<Region>>,
    plan: Plan,
    results: Vec<TaskResult>,
    evidence: EvidenceLog,
}

impl PipelineState {
    fn new(query: Query) -> Self {
        let state = Self {
            query,
            stage: PipelineStage::Init,
            regions: Vec::new(),
            plan: Plan::default(),
            results: Vec::new(),
            evidence: EvidenceLog::new(),
        };
        state.evidence.record("pipeline", PipelineStage::Init.as_str());
        obs::emit_stage(&state.query.request_id(), PipelineStage::Init.as_str());
        state
    }

    fn advance(&mut self, next: PipelineStage) {
        debug_assert!(next > self.stage, "stage {:?} -> {:?}", self.stage, next);
        self.stage = next;
        self.evidence.record("pipeline", next.as_str());
        obs::emit_stage(&self.query.request_id(), next.as_str());
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    pub fn regions(&self) -> &[Arc<Region>] {
        &self.regions
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn evidence(&self) -> &EvidenceLog {
        &self.evidence
    }

    fn into_response(self) -> Response {
        let regions: Vec<Region> = self.regions.iter().map(|r| Region::clone(r)).collect();
        Response {
            request_id: self.query.request_id(),
            query: self.query.text().to_string(),
            analysis: narrative::render(&regions, &self.results),
            plan_digest: self.plan.digest(),
            regions,
            task_results: self.results,
            evidence: self.evidence.snapshot(),
        }
    }
}

/// The answer to one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub request_id: Uuid,
    pub query: String,
    pub analysis: String,
    pub regions: Vec<Region>,
    pub task_results: Vec<TaskResult>,
    pub evidence: Vec<EvidenceEntry>,
    pub plan_digest: String,
}

impl Response {
    /// Evidence rendered as `stage:outcome` strings.
    pub fn evidence_lines(&self) -> Vec<String> {
        self.evidence.iter().map(ToString::to_string).collect()
    }
}

pub struct PipelineController {
    config: PipelineConfig,
    resolver: LocationResolver,
    planner: Planner,
    dispatcher: BackendDispatcher,
}

impl PipelineController {
    /// Build a controller; the configuration is validated once here.
    pub fn new(
        config: PipelineConfig,
        extractor: Arc<dyn ExtractionModel>,
        geocoder: Arc<dyn Geocoder>,
        registry: BackendRegistry,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            resolver: LocationResolver::new(
                extractor,
                geocoder,
                config.location.clone(),
                &config.tiling,
            ),
            planner: Planner::new(config.planner.clone(), &config.tiling),
            dispatcher: BackendDispatcher::new(Arc::new(registry), config.dispatch.clone())
                .with_budget(TileBudget::from(&config.tiling)),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run `text` with default options.
    pub async fn run(&self, text: &str) -> Result<Response> {
        self.run_with(Query::new(text), RunOptions::default()).await
    }

    pub async fn run_with(&self, query: Query, options: RunOptions) -> Result<Response> {
        let request_id = query.request_id();
        let cancel = options.cancel.clone();
        let run = self
            .execute(query, options)
            .instrument(obs::request_span(&request_id));

        let result = match cancel {
            Some(rx) => {
                tokio::select! {
                    biased;
                    _ = cancelled(rx) => Err(PipelineError::Cancelled),
                    result = run => result,
                }
            }
            None => run.await,
        };

        if let Err(err) = &result {
            obs::emit_pipeline_aborted(&request_id, err);
        }
        result
    }

    /// Validate, resolve and plan without dispatching anything.
    pub async fn plan(&self, query: Query, options: &RunOptions) -> Result<PipelineState> {
        let budget = options.deadline.unwrap_or_else(|| self.config.deadline());
        self.prepare(query, &options.intent_signals, Instant::now() + budget, budget)
            .await
    }

    async fn execute(&self, query: Query, options: RunOptions) -> Result<Response> {
        let started = Instant::now();
        let budget = options.deadline.unwrap_or_else(|| self.config.deadline());
        let deadline = started + budget;
        METRICS.inc_queries();
        obs::emit_pipeline_started(&query.request_id(), query.text().chars().count());

        let mut state = self
            .prepare(query, &options.intent_signals, deadline, budget)
            .await?;
        if Instant::now() >= deadline {
            return Err(PipelineError::DeadlineExceeded(budget));
        }

        state.advance(PipelineStage::Executing);
        let concurrency = self.config.dispatch.task_concurrency.max(1);
        let results: Vec<TaskResult> = stream::iter(state.plan.tasks.iter())
            .map(|task| self.dispatcher.dispatch(task, &state.evidence, deadline))
            .buffered(concurrency)
            .collect()
            .await;
        for result in &results {
            obs::emit_task_finished(result);
        }
        state.results = results;
        state.advance(PipelineStage::Aggregated);

        let failed = state
            .results
            .iter()
            .filter(|r| r.status == TaskStatus::Failed)
            .count();
        obs::emit_pipeline_finished(
            &state.query.request_id(),
            started.elapsed().as_millis() as u64,
            state.regions.len(),
            state.results.len(),
            failed,
        );
        Ok(state.into_response())
    }

    async fn prepare(
        &self,
        query: Query,
        signals: &[String],
        deadline: Instant,
        budget: Duration,
    ) -> Result<PipelineState> {
        query.validate(self.config.max_query_chars)?;
        let mut state = PipelineState::new(query);

        let regions = self
            .resolver
            .resolve(&state.query, &state.evidence, deadline)
            .await
            .map_err(|_| PipelineError::DeadlineExceeded(budget))?;
        state.regions = regions.into_iter().map(Arc::new).collect();
        state.advance(PipelineStage::LocationsResolved);

        state.plan = self
            .planner
            .plan(&state.query, &state.regions, signals, &state.evidence);
        state.advance(PipelineStage::Planned);
        Ok(state)
    }
}

/// Resolves once the flag reads `true`; never if the sender goes away first.
async fn cancelled(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}

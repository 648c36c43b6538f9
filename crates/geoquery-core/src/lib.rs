//! geoquery core library
//!
//! Orchestrates natural-language geospatial queries: location resolution
//! (with tiling of oversized regions), task planning, backend dispatch with
//! fallback, and aggregation into a [`Response`].

pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod metrics;
pub mod narrative;
pub mod obs;
pub mod pipeline;
pub mod planner;
pub mod resolver;
pub mod telemetry;
pub mod tiler;

pub use config::{
    ConfigError, DispatchConfig, LocationConfig, PipelineConfig, PlannerConfig, TilingConfig,
};

pub use domain::{
    AnalysisTask, BackendError, BackendUsed, DispatchState, EvidenceEntry, EvidenceLog,
    ExtractedLocation, PipelineError, Plan, Query, Region, RegionId, RegionSource, ResolveError,
    Result, TaskId, TaskResult, TaskStatus, Tile, TilingError, COMPLETENESS_METRIC,
};

pub use dispatcher::{BackendDispatcher, BackendRegistry};
pub use pipeline::{PipelineController, PipelineStage, PipelineState, Response, RunOptions};
pub use planner::Planner;
pub use resolver::LocationResolver;
pub use tiler::{tile, TileBudget};

pub use metrics::METRICS;

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

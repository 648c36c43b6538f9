//! Domain models for geoquery.
//!
//! Canonical definitions for the pipeline entities:
//! - `Query`: immutable input text plus request id
//! - `Region` / `Tile`: resolved geometry and its budget-bounded fragments
//! - `AnalysisTask` / `Plan`: capability requests per region
//! - `TaskResult`: aggregated statistics or fallback narrative
//! - `EvidenceLog`: append-only audit trail of one run

pub mod error;
pub mod evidence;
pub mod query;
pub mod region;
pub mod task;

// Re-export main types and errors
pub use error::{BackendError, PipelineError, ResolveError, Result, TilingError};
pub use evidence::{EvidenceEntry, EvidenceLog};
pub use query::Query;
pub use region::{ExtractedLocation, Region, RegionId, RegionSource, Tile};
pub use task::{
    AnalysisTask, BackendUsed, DispatchState, Plan, TaskId, TaskResult, TaskStatus,
    COMPLETENESS_METRIC,
};

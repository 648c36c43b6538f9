//! Structured lifecycle events for pipeline runs.
//!
//! - [`request_span`]: the span a run is instrumented with, tagged with its
//!   `request_id`
//! - `emit_*`: one function per lifecycle event, so field names stay stable
//!   for log queries

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{TaskResult, TaskStatus};

/// The `geoquery.request` span for one run.
pub fn request_span(request_id: &Uuid) -> tracing::Span {
    tracing::info_span!("geoquery.request", request_id = %request_id)
}

pub fn emit_pipeline_started(request_id: &Uuid, query_chars: usize) {
    info!(event = "pipeline.started", request_id = %request_id, query_chars);
}

/// The controller moved to a new stage.
pub fn emit_stage(request_id: &Uuid, stage: &str) {
    info!(event = "pipeline.stage", request_id = %request_id, stage = %stage);
}

/// One task reached TERMINAL.
pub fn emit_task_finished(result: &TaskResult) {
    let status = match result.status {
        TaskStatus::Success => "success",
        TaskStatus::Partial => "partial",
        TaskStatus::Failed => "failed",
    };
    if result.status == TaskStatus::Failed {
        warn!(
            event = "task.finished",
            task_id = %result.task_id,
            capability = %result.capability,
            region = %result.region_name,
            status,
            error = result.error.as_deref().unwrap_or(""),
            duration_ms = result.duration_ms,
        );
    } else {
        info!(
            event = "task.finished",
            task_id = %result.task_id,
            capability = %result.capability,
            region = %result.region_name,
            status,
            tiles_total = result.tiles_total,
            tiles_succeeded = result.tiles_succeeded,
            duration_ms = result.duration_ms,
        );
    }
}

pub fn emit_pipeline_finished(
    request_id: &Uuid,
    duration_ms: u64,
    regions: usize,
    tasks: usize,
    failed_tasks: usize,
) {
    info!(
        event = "pipeline.finished",
        request_id = %request_id,
        duration_ms,
        regions,
        tasks,
        failed_tasks,
    );
}

/// The run ended with an error surfaced to the caller.
pub fn emit_pipeline_aborted(request_id: &Uuid, error: &dyn std::fmt::Display) {
    warn!(event = "pipeline.aborted", request_id = %request_id, error = %error);
}

pub fn emit_evidence_appended(stage: &str, outcome: &str, seq: u64) {
    debug!(event = "evidence.appended", stage = %stage, outcome = %outcome, seq);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_span_carries_the_id() {
        let id = Uuid::new_v4();
        let span = request_span(&id);
        let _entered = span.enter();
        emit_stage(&id, "INIT");
    }
}

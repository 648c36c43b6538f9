//! Error taxonomy for the orchestration pipeline.
//!
//! Only [`PipelineError`] ever reaches a caller of the controller. Every
//! other error in this module is recovered at the stage that produced it
//! and survives only as evidence or as the `error` text of a task result.

use std::time::Duration;

use geoquery_collab::CollaboratorError;

/// Errors surfaced to the caller of a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("malformed query: {0}")]
    MalformedQuery(String),

    #[error("deadline of {0:?} exceeded before any analysis could start")]
    DeadlineExceeded(Duration),

    #[error("pipeline run cancelled")]
    Cancelled,
}

/// Location resolution failures; all of them degrade to fewer Regions.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("location extraction failed: {0}")]
    Extraction(String),

    #[error("geocoding missed {name}: {reason}")]
    GeocodeMiss { name: String, reason: String },
}

impl ResolveError {
    pub fn extraction_from(err: &CollaboratorError) -> Self {
        ResolveError::Extraction(err.to_string())
    }
}

/// Geometry could not be tiled.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TilingError {
    #[error("invalid polygon: {0}")]
    InvalidPolygon(String),

    #[error("invalid pixel budget: {0}")]
    InvalidBudget(String),

    #[error("grid of {required} tiles exceeds the cap of {max}")]
    TooManyTiles { required: u64, max: usize },
}

/// Backend dispatch failures for one task or tile.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend call failed: {0}")]
    Failed(String),

    #[error("fallback exhausted: {0}")]
    FallbackExhausted(String),
}

impl From<CollaboratorError> for BackendError {
    fn from(err: CollaboratorError) -> Self {
        if err.is_structural() {
            BackendError::Unavailable(err.to_string())
        } else {
            BackendError::Failed(err.to_string())
        }
    }
}

/// Result type for pipeline runs.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_collaborator_errors_map_to_unavailable() {
        let err: BackendError = CollaboratorError::Unauthorized("missing key".into()).into();
        assert!(matches!(err, BackendError::Unavailable(_)));
        assert!(err.to_string().contains("missing key"));

        let err: BackendError = CollaboratorError::Compute("quota".into()).into();
        assert!(matches!(err, BackendError::Failed(_)));
    }

    #[test]
    fn pipeline_error_display() {
        let err = PipelineError::MalformedQuery("contains NUL".into());
        assert!(err.to_string().contains("malformed query"));
        let err = PipelineError::DeadlineExceeded(Duration::from_secs(2));
        assert!(err.to_string().contains("2s"));
    }

    #[test]
    fn tiling_error_display() {
        let err = TilingError::TooManyTiles {
            required: 9000,
            max: 4096,
        };
        assert_eq!(err.to_string(), "grid of 9000 tiles exceeds the cap of 4096");
    }
}

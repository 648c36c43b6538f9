//! The immutable pipeline input.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::error::PipelineError;

/// A natural-language question plus its request identifier.
///
/// The text is fixed at construction; there is no way to mutate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    request_id: Uuid,
    text: String,
}

impl Query {
    /// Create a query with a fresh request id.
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), text)
    }

    pub fn with_id(request_id: Uuid, text: impl Into<String>) -> Self {
        Self {
            request_id,
            text: text.into(),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Reject text the pipeline cannot process.
    ///
    /// Blank text is accepted: it simply resolves to no location.
    pub fn validate(&self, max_chars: usize) -> Result<(), PipelineError> {
        let chars = self.text.chars().count();
        if chars > max_chars {
            return Err(PipelineError::MalformedQuery(format!(
                "{chars} characters exceeds the limit of {max_chars}"
            )));
        }
        if let Some(c) = self
            .text
            .chars()
            .find(|c| c.is_control() && !c.is_whitespace())
        {
            return Err(PipelineError::MalformedQuery(format!(
                "contains control character U+{:04X}",
                c as u32
            )));
        }
        Ok(())
    }
}

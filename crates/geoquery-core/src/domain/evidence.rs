//! Append-only evidence log for one pipeline run.
//!
//! Concurrent tile workers append through a single mutex; the lock is held
//! only for the push, never across an await. Sequence numbers are dense and
//! follow append order.

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::obs;

/// One recorded pipeline event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceEntry {
    pub seq: u64,
    pub stage: String,
    pub outcome: String,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for EvidenceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.stage, self.outcome)
    }
}

/// Ordered, append-only record of stage outcomes.
#[derive(Debug, Default)]
pub struct EvidenceLog {
    entries: Mutex<Vec<EvidenceEntry>>,
}

impl EvidenceLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `stage:outcome` and return its sequence number.
    pub fn record(&self, stage: impl Into<String>, outcome: impl Into<String>) -> u64 {
        let stage = stage.into();
        let outcome = outcome.into();
        let seq = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let seq = entries.len() as u64;
            entries.push(EvidenceEntry {
                seq,
                stage: stage.clone(),
                outcome: outcome.clone(),
                timestamp: Utc::now(),
            });
            seq
        };
        obs::emit_evidence_appended(&stage, &outcome, seq);
        seq
    }

    /// Copy of all entries in append order.
    pub fn snapshot(&self) -> Vec<EvidenceEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any entry renders exactly as `stage:outcome`.
    pub fn contains(&self, rendered: &str) -> bool {
        self.snapshot().iter().any(|e| e.to_string() == rendered)
    }
}

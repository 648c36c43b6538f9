//! Capability -> backend lookup table, built once at startup.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use geoquery_collab::{Capability, ComputeBackend, FallbackBackend};

#[derive(Default, Clone)]
pub struct BackendRegistry {
    primaries: BTreeMap<Capability, Arc<dyn ComputeBackend>>,
    fallback: Option<Arc<dyn FallbackBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the primary backend for `capability`, replacing any earlier one.
    pub fn with_primary(mut self, capability: Capability, backend: Arc<dyn ComputeBackend>) -> Self {
        self.primaries.insert(capability, backend);
        self
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn FallbackBackend>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn primary(&self, capability: Capability) -> Option<&Arc<dyn ComputeBackend>> {
        self.primaries.get(&capability)
    }

    pub fn fallback(&self) -> Option<&Arc<dyn FallbackBackend>> {
        self.fallback.as_ref()
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let primaries: BTreeMap<&str, &str> = self
            .primaries
            .iter()
            .map(|(c, b)| (c.as_str(), b.name()))
            .collect();
        f.debug_struct("BackendRegistry")
            .field("primaries", &primaries)
            .field("fallback", &self.fallback.as_ref().map(|f| f.name()))
            .finish()
    }
}

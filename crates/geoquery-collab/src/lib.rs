//! geoquery-collab: collaborator contracts for the geoquery pipeline
//!
//! The orchestration core never talks to a transport directly. Everything it
//! consumes from the outside world goes through the async traits defined
//! here:
//!
//! - `ExtractionModel`: free text -> candidate place mentions
//! - `Geocoder`: place name -> geometry
//! - `ComputeBackend`: per-capability geospatial statistics
//! - `FallbackBackend`: text-search narrative used when compute fails
//!
//! Geometry primitives shared by both sides of the boundary live in
//! [`geometry`]. In-memory fakes for every trait are provided in [`fakes`].

pub mod collaborator_traits;
mod error;
pub mod fakes;
pub mod geometry;

pub use collaborator_traits::{
    AnalysisTarget, Capability, CollabResult, ComputeBackend, ComputeOutput, ExtractionModel,
    FallbackBackend, FallbackSummary, GeocodeHit, Geocoder, MetricValue, Precision, RawLocation,
    TaskParameters,
};
pub use error::{CapabilityParseError, CollaboratorError};
pub use geometry::{GeoPoint, GeoPolygon, Geometry};

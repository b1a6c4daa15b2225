//! Federated anomaly detection for cross-domain authentication.
//!
//! - [`features`]: usage records and feature extraction
//! - [`model`]: Mahalanobis-distance anomaly model
//! - [`hierarchy`]: local -> edge -> global parameter aggregation
//!
//! Models exchange parameter snapshots only, never raw records.

pub mod features;
pub mod hierarchy;
pub mod linalg;
pub mod model;

pub use features::{location_coordinate, UsageRecord, FEATURE_COUNT, FEATURE_NAMES};
pub use hierarchy::{
    aggregate_up, distribute_down, AggregationError, HierarchicalAggregator, LocalModelKey,
};
pub use model::{AnomalyModel, ModelError, ModelParameters};

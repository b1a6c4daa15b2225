//! Three-tier federated aggregation: local -> edge -> global.
//!
//! Local models are keyed by (edge node, relation), where the relation is a
//! charging station or the edge node itself. Parameters only move between
//! tiers as [`ModelParameters`] snapshots; raw usage records never leave the
//! local model they were trained on.

use crate::features::UsageRecord;
use crate::model::{AnomalyModel, ModelError, ModelParameters};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};
use voltmesh_core::AnomalyConfig;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AggregationError {
    #[error("No trained child models to aggregate")]
    NoTrainedChildren,

    #[error("Child models disagree on dimension: {expected} vs {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Edge model not found: {0}")]
    UnknownEdge(String),

    #[error("Global model not initialized")]
    GlobalNotInitialized,

    #[error(transparent)]
    Model(#[from] ModelError),
}

pub type Result<T> = std::result::Result<T, AggregationError>;

/// Elementwise mean of the trained children.
///
/// Threshold is the mean of child thresholds, version the maximum, and
/// `updated_at` the latest child timestamp, so identical inputs always give
/// identical output.
pub fn aggregate_up(children: &[ModelParameters]) -> Result<ModelParameters> {
    let trained: Vec<&ModelParameters> = children.iter().filter(|p| p.trained).collect();
    let Some(first) = trained.first() else {
        return Err(AggregationError::NoTrainedChildren);
    };

    let dim = first.mean_vector.len();
    for child in &trained {
        for actual in [
            child.mean_vector.len(),
            child.std_vector.len(),
            child.covariance.len(),
        ] {
            if actual != dim {
                return Err(AggregationError::DimensionMismatch {
                    expected: dim,
                    actual,
                });
            }
        }
        if let Some(row) = child.covariance.iter().find(|row| row.len() != dim) {
            return Err(AggregationError::DimensionMismatch {
                expected: dim,
                actual: row.len(),
            });
        }
    }

    let n = trained.len() as f64;
    let mut mean_vector = vec![0.0; dim];
    let mut std_vector = vec![0.0; dim];
    let mut covariance = vec![vec![0.0; dim]; dim];
    let mut threshold = 0.0;

    for child in &trained {
        for i in 0..dim {
            mean_vector[i] += child.mean_vector[i] / n;
            std_vector[i] += child.std_vector[i] / n;
            for j in 0..dim {
                covariance[i][j] += child.covariance[i][j] / n;
            }
        }
        threshold += child.threshold / n;
    }

    Ok(ModelParameters {
        trained: true,
        version: trained.iter().map(|p| p.version).max().unwrap_or(0),
        updated_at: trained.iter().map(|p| p.updated_at).max().unwrap_or(0),
        mean_vector,
        covariance,
        std_vector,
        threshold,
    })
}

/// Copy `parent` into every target. Returns how many targets accepted it;
/// an untrained parent updates nothing.
pub fn distribute_down<'a>(
    parent: &ModelParameters,
    targets: impl IntoIterator<Item = &'a mut AnomalyModel>,
) -> usize {
    if !parent.trained {
        return 0;
    }
    targets
        .into_iter()
        .filter_map(|model| model.set_parameters(parent.clone()).ok())
        .count()
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalModelKey {
    pub edge_id: String,
    /// Charging station id, or the edge node id for EN-wide data
    pub relation_id: String,
}

impl LocalModelKey {
    pub fn new(edge_id: &str, relation_id: &str) -> Self {
        Self {
            edge_id: edge_id.to_string(),
            relation_id: relation_id.to_string(),
        }
    }
}

/// Registry of models across the three tiers.
#[derive(Debug)]
pub struct HierarchicalAggregator {
    config: AnomalyConfig,
    global: Option<AnomalyModel>,
    edges: BTreeMap<String, AnomalyModel>,
    locals: BTreeMap<LocalModelKey, AnomalyModel>,
}

impl HierarchicalAggregator {
    pub fn new(config: AnomalyConfig) -> Self {
        Self {
            config,
            global: None,
            edges: BTreeMap::new(),
            locals: BTreeMap::new(),
        }
    }

    /// Create the global model if missing.
    pub fn initialize_global(&mut self) -> &mut AnomalyModel {
        let config = &self.config;
        self.global
            .get_or_insert_with(|| AnomalyModel::new("global_model", config))
    }

    /// Create the edge model for `edge_id` if missing.
    pub fn initialize_edge(&mut self, edge_id: &str) -> &mut AnomalyModel {
        let config = &self.config;
        self.edges
            .entry(edge_id.to_string())
            .or_insert_with(|| AnomalyModel::new(format!("edge_model_{}", edge_id), config))
    }

    pub fn initialize_local(&mut self, edge_id: &str, relation_id: &str) -> &mut AnomalyModel {
        let config = &self.config;
        self.locals
            .entry(LocalModelKey::new(edge_id, relation_id))
            .or_insert_with(|| {
                AnomalyModel::new(format!("local_model_{}_{}", edge_id, relation_id), config)
            })
    }

    pub fn global(&self) -> Option<&AnomalyModel> {
        self.global.as_ref()
    }

    pub fn edge(&self, edge_id: &str) -> Option<&AnomalyModel> {
        self.edges.get(edge_id)
    }

    pub fn local(&self, edge_id: &str, relation_id: &str) -> Option<&AnomalyModel> {
        self.locals.get(&LocalModelKey::new(edge_id, relation_id))
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn local_count(&self) -> usize {
        self.locals.len()
    }

    pub fn edge_ids(&self) -> Vec<String> {
        self.edges.keys().cloned().collect()
    }

    /// Train (creating if needed) the local model for the pair.
    ///
    /// Returns the model's new version.
    pub fn train_local(
        &mut self,
        edge_id: &str,
        relation_id: &str,
        records: &[UsageRecord],
    ) -> Result<u64> {
        let model = self.initialize_local(edge_id, relation_id);
        model.train(records)?;
        Ok(model.version())
    }

    /// Aggregate an edge node's local models into its edge model.
    ///
    /// `relation_ids` narrows the children; `None` takes every local model
    /// under the edge. On failure the edge model is unchanged.
    pub fn aggregate_local_models(
        &mut self,
        edge_id: &str,
        relation_ids: Option<&[String]>,
    ) -> Result<ModelParameters> {
        if !self.edges.contains_key(edge_id) {
            return Err(AggregationError::UnknownEdge(edge_id.to_string()));
        }

        let children: Vec<ModelParameters> = self
            .locals
            .iter()
            .filter(|(key, _)| key.edge_id == edge_id)
            .filter(|(key, _)| relation_ids.map_or(true, |ids| ids.contains(&key.relation_id)))
            .map(|(_, model)| model.get_parameters())
            .collect();

        let aggregated = aggregate_up(&children)?;
        if let Some(edge) = self.edges.get_mut(edge_id) {
            edge.set_parameters(aggregated.clone())?;
        }
        debug!(edge_id, children = children.len(), "Local models aggregated");
        Ok(aggregated)
    }

    /// Parameter snapshots of the selected edge models (all when `None`).
    pub fn edge_parameters(&self, edge_ids: Option<&[String]>) -> Vec<ModelParameters> {
        self.edges
            .iter()
            .filter(|(id, _)| edge_ids.map_or(true, |ids| ids.contains(*id)))
            .map(|(_, model)| model.get_parameters())
            .collect()
    }

    /// Install aggregated parameters into the global model.
    pub fn apply_global(&mut self, params: ModelParameters) -> Result<()> {
        let global = self
            .global
            .as_mut()
            .ok_or(AggregationError::GlobalNotInitialized)?;
        global.set_parameters(params)?;
        Ok(())
    }

    /// Aggregate edge models into the global model in one step.
    pub fn aggregate_edge_models(
        &mut self,
        edge_ids: Option<&[String]>,
    ) -> Result<ModelParameters> {
        if self.global.is_none() {
            return Err(AggregationError::GlobalNotInitialized);
        }
        let aggregated = aggregate_up(&self.edge_parameters(edge_ids))?;
        self.apply_global(aggregated.clone())?;
        info!(version = aggregated.version, "Global model updated");
        Ok(aggregated)
    }

    /// Push the global parameters down to the selected edge models.
    pub fn distribute_global_model(&mut self, edge_ids: Option<&[String]>) -> usize {
        let Some(params) = self.global.as_ref().map(AnomalyModel::get_parameters) else {
            return 0;
        };
        let targets = self
            .edges
            .iter_mut()
            .filter(|(id, _)| edge_ids.map_or(true, |ids| ids.contains(*id)))
            .map(|(_, model)| model);
        distribute_down(&params, targets)
    }
}

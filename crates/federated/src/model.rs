//! Mahalanobis-distance anomaly model.
//!
//! Training fits the mean vector and regularized sample covariance of the
//! feature vectors, and sets the threshold to the chi-square quantile at the
//! configured confidence with one degree of freedom per feature. A record's
//! score is its Mahalanobis distance divided by that threshold, clamped to
//! [0, 1]. An untrained model scores every record 1.0.

use crate::features::{UsageRecord, FEATURE_COUNT};
use crate::linalg::{self, Matrix};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use voltmesh_core::{current_timestamp_ms, AnomalyConfig, Timestamp};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("Cannot train on an empty record set")]
    EmptyTrainingSet,

    #[error("Parameters are not trained")]
    NotTrained,

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Covariance matrix is singular")]
    SingularCovariance,
}

pub type Result<T> = std::result::Result<T, ModelError>;

/// Serializable snapshot of a model, used for transport between tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    pub trained: bool,
    pub version: u64,
    pub updated_at: Timestamp,
    pub mean_vector: Vec<f64>,
    pub covariance: Matrix,
    pub std_vector: Vec<f64>,
    pub threshold: f64,
}

impl ModelParameters {
    pub fn untrained() -> Self {
        Self {
            trained: false,
            version: 0,
            updated_at: 0,
            mean_vector: Vec::new(),
            covariance: Vec::new(),
            std_vector: Vec::new(),
            threshold: 0.0,
        }
    }

    /// Check shapes against the feature dimension.
    pub fn validate(&self) -> Result<()> {
        if !self.trained {
            return Err(ModelError::NotTrained);
        }
        let dim = FEATURE_COUNT;
        for actual in [self.mean_vector.len(), self.std_vector.len(), self.covariance.len()] {
            if actual != dim {
                return Err(ModelError::DimensionMismatch {
                    expected: dim,
                    actual,
                });
            }
        }
        if let Some(row) = self.covariance.iter().find(|row| row.len() != dim) {
            return Err(ModelError::DimensionMismatch {
                expected: dim,
                actual: row.len(),
            });
        }
        Ok(())
    }

    /// BLAKE3 over the canonical JSON encoding.
    pub fn model_hash(&self) -> String {
        // Plain data with no maps; serialization cannot fail
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }
}

#[derive(Debug, Clone)]
pub struct AnomalyModel {
    model_id: String,
    params: ModelParameters,
    inverse_covariance: Option<Matrix>,
    confidence: f64,
    regularization: f64,
}

impl AnomalyModel {
    pub fn new(model_id: impl Into<String>, config: &AnomalyConfig) -> Self {
        Self {
            model_id: model_id.into(),
            params: ModelParameters::untrained(),
            inverse_covariance: None,
            confidence: config.confidence,
            regularization: config.regularization,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn is_trained(&self) -> bool {
        self.params.trained && self.inverse_covariance.is_some()
    }

    pub fn version(&self) -> u64 {
        self.params.version
    }

    pub fn threshold(&self) -> f64 {
        self.params.threshold
    }

    /// Fit the model to `records` and bump the version.
    pub fn train(&mut self, records: &[UsageRecord]) -> Result<()> {
        if records.is_empty() {
            return Err(ModelError::EmptyTrainingSet);
        }

        let rows: Vec<Vec<f64>> = records.iter().map(|r| r.features().to_vec()).collect();
        let mean_vector = linalg::column_means(&rows);
        let mut covariance = linalg::sample_covariance(&rows, &mean_vector);
        linalg::add_to_diagonal(&mut covariance, self.regularization);
        let std_vector = linalg::population_std(&rows, &mean_vector)
            .into_iter()
            .map(|s| if s < 1e-6 { 1.0 } else { s })
            .collect();

        let inverse = linalg::invert(&covariance).ok_or(ModelError::SingularCovariance)?;

        self.params = ModelParameters {
            trained: true,
            version: self.params.version + 1,
            updated_at: current_timestamp_ms(),
            mean_vector,
            covariance,
            std_vector,
            threshold: linalg::chi_square_quantile(self.confidence, FEATURE_COUNT),
        };
        self.inverse_covariance = Some(inverse);

        debug!(
            model_id = %self.model_id,
            version = self.params.version,
            records = records.len(),
            "Anomaly model trained"
        );
        Ok(())
    }

    /// Score of a single record in [0, 1].
    pub fn score(&self, record: &UsageRecord) -> f64 {
        let Some(inverse) = self.inverse_covariance.as_ref().filter(|_| self.params.trained)
        else {
            return 1.0;
        };
        if self.params.threshold <= 0.0 {
            return 1.0;
        }

        let diff: Vec<f64> = record
            .features()
            .iter()
            .zip(&self.params.mean_vector)
            .map(|(x, m)| x - m)
            .collect();
        let distance = linalg::mahalanobis(&diff, inverse);
        let score = distance / self.params.threshold;
        if score.is_nan() {
            return 1.0;
        }
        score.clamp(0.0, 1.0)
    }

    pub fn predict(&self, records: &[UsageRecord]) -> Vec<f64> {
        records.iter().map(|r| self.score(r)).collect()
    }

    pub fn get_parameters(&self) -> ModelParameters {
        self.params.clone()
    }

    /// Replace the parameters. Untrained or malformed parameters are
    /// rejected and leave the model unchanged.
    pub fn set_parameters(&mut self, params: ModelParameters) -> Result<()> {
        params.validate()?;
        let inverse = linalg::invert(&params.covariance).ok_or(ModelError::SingularCovariance)?;
        self.params = params;
        self.inverse_covariance = Some(inverse);
        Ok(())
    }

    pub fn model_hash(&self) -> String {
        self.params.model_hash()
    }
}

//! Voting ensemble methods

use crate::error::{FlowError, Result};
use crate::training::{Classifier, TrainedModel};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Soft-voting classifier over fitted members
///
/// Members with probability output contribute their class probabilities;
/// members without contribute a one-hot vote for their predicted class.
/// The ensemble probability is the weighted mean.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftVotingEnsemble {
    /// Member names, in the order given
    names: Vec<String>,
    members: Vec<TrainedModel>,
    /// Normalized weights
    weights: Vec<f64>,
    n_classes: usize,
}

impl SoftVotingEnsemble {
    /// Equal-weight ensemble of fitted members
    pub fn new(members: Vec<(String, TrainedModel)>) -> Result<Self> {
        let n = members.len();
        Self::with_weights(members, vec![1.0; n])
    }

    pub fn with_weights(members: Vec<(String, TrainedModel)>, weights: Vec<f64>) -> Result<Self> {
        if members.is_empty() {
            return Err(FlowError::TrainingError("No models provided".to_string()));
        }
        if weights.len() != members.len() {
            return Err(FlowError::ShapeError {
                expected: format!("{} weights", members.len()),
                actual: format!("{} weights", weights.len()),
            });
        }
        let n_classes = members[0].1.n_classes();
        if members.iter().any(|(_, m)| m.n_classes() != n_classes) {
            return Err(FlowError::TrainingError("members disagree on the number of classes".to_string()));
        }

        // Normalize weights
        let weight_sum: f64 = weights.iter().sum();
        if !(weight_sum > 0.0) {
            return Err(FlowError::InvalidParameter {
                name: "weights".to_string(),
                value: format!("{:?}", weights),
                reason: "must sum to a positive value".to_string(),
            });
        }
        let weights = weights.iter().map(|w| w / weight_sum).collect();

        let (names, members) = members.into_iter().unzip();
        Ok(Self { names, members, weights, n_classes })
    }

    pub fn member_names(&self) -> &[String] {
        &self.names
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
}

impl Classifier for SoftVotingEnsemble {
    /// Refits every member on the same data
    fn fit(&mut self, x: &Array2<f64>, y: &[usize], n_classes: usize, sample_weight: Option<&[f64]>) -> Result<()> {
        for member in self.members.iter_mut() {
            member.fit(x, y, n_classes, sample_weight)?;
        }
        self.n_classes = n_classes;
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Option<Array2<f64>>> {
        let mut combined = Array2::<f64>::zeros((x.nrows(), self.n_classes));
        for (member, &weight) in self.members.iter().zip(&self.weights) {
            match member.predict_proba(x)? {
                Some(proba) => combined.scaled_add(weight, &proba),
                None => {
                    for (i, class) in member.predict(x)?.into_iter().enumerate() {
                        combined[[i, class]] += weight;
                    }
                }
            }
        }
        Ok(Some(combined))
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }
}

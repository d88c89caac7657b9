//! Classifier contract and the serializable model enum

use super::gradient_boosting::GradientBoostingClassifier;
use super::knn::KNNClassifier;
use super::linear_models::LogisticRegression;
use super::neural_network::MLPClassifier;
use super::random_forest::RandomForest;
use super::svm::SVMClassifier;
use super::xgboost::XGBoostClassifier;
use crate::ensemble::SoftVotingEnsemble;
use crate::error::{FlowError, Result};
use crate::utils::stats::argmax;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// A multiclass classifier over dense `f64` features and class indices
pub trait Classifier {
    /// Fit on `x` with labels in `0..n_classes`. Learners that do not support
    /// weighting ignore `sample_weight`.
    fn fit(&mut self, x: &Array2<f64>, y: &[usize], n_classes: usize, sample_weight: Option<&[f64]>) -> Result<()>;

    /// Per-class probabilities, `None` when the learner has no probability output
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Option<Array2<f64>>>;

    /// Predicted class indices
    fn predict(&self, x: &Array2<f64>) -> Result<Vec<usize>> {
        match self.predict_proba(x)? {
            Some(proba) => Ok(proba.outer_iter().map(|row| argmax(row.iter().copied())).collect()),
            None => Err(FlowError::InferenceError("learner exposes neither labels nor probabilities".to_string())),
        }
    }

    /// Normalized impurity-based importances, when the learner has them
    fn feature_importances(&self) -> Option<Vec<f64>> {
        None
    }

    fn n_classes(&self) -> usize;
}

/// Every fitted model the pipeline can persist
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrainedModel {
    /// Random forest or extra trees
    Forest(RandomForest),
    GradientBoosting(GradientBoostingClassifier),
    XGBoost(XGBoostClassifier),
    Logistic(LogisticRegression),
    Knn(KNNClassifier),
    Mlp(MLPClassifier),
    Svm(SVMClassifier),
    Ensemble(SoftVotingEnsemble),
}

impl TrainedModel {
    fn inner(&self) -> &dyn Classifier {
        match self {
            TrainedModel::Forest(m) => m,
            TrainedModel::GradientBoosting(m) => m,
            TrainedModel::XGBoost(m) => m,
            TrainedModel::Logistic(m) => m,
            TrainedModel::Knn(m) => m,
            TrainedModel::Mlp(m) => m,
            TrainedModel::Svm(m) => m,
            TrainedModel::Ensemble(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Classifier {
        match self {
            TrainedModel::Forest(m) => m,
            TrainedModel::GradientBoosting(m) => m,
            TrainedModel::XGBoost(m) => m,
            TrainedModel::Logistic(m) => m,
            TrainedModel::Knn(m) => m,
            TrainedModel::Mlp(m) => m,
            TrainedModel::Svm(m) => m,
            TrainedModel::Ensemble(m) => m,
        }
    }

    /// Short model family name
    pub fn kind(&self) -> &'static str {
        match self {
            TrainedModel::Forest(m) if m.is_extra_trees() => "extra_trees",
            TrainedModel::Forest(_) => "random_forest",
            TrainedModel::GradientBoosting(_) => "gradient_boosting",
            TrainedModel::XGBoost(_) => "xgboost",
            TrainedModel::Logistic(_) => "logistic_regression",
            TrainedModel::Knn(_) => "knn",
            TrainedModel::Mlp(_) => "neural_network",
            TrainedModel::Svm(_) => "svm",
            TrainedModel::Ensemble(_) => "ensemble",
        }
    }
}

impl Classifier for TrainedModel {
    fn fit(&mut self, x: &Array2<f64>, y: &[usize], n_classes: usize, sample_weight: Option<&[f64]>) -> Result<()> {
        self.inner_mut().fit(x, y, n_classes, sample_weight)
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Option<Array2<f64>>> {
        self.inner().predict_proba(x)
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Vec<usize>> {
        self.inner().predict(x)
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        self.inner().feature_importances()
    }

    fn n_classes(&self) -> usize {
        self.inner().n_classes()
    }
}

//! Candidate learner registry
//!
//! Each learner knows its search space and how to build an unfitted model
//! from one parameter combination. Size-based inclusion is a filter over the
//! registry, applied in catalogue order.

use super::decision_tree::{Criterion, Splitter};
use super::gradient_boosting::{GradientBoostingClassifier, GradientBoostingConfig};
use super::knn::{KNNClassifier, KNNConfig, WeightScheme};
use super::linear_models::LogisticRegression;
use super::models::TrainedModel;
use super::neural_network::{LearningRateSchedule, MLPClassifier, MLPConfig};
use super::random_forest::{ForestParams, MaxFeatures, RandomForest};
use super::search::{ParamGrid, ParamSet, ParamValue};
use super::svm::{Gamma, KernelType, SVMClassifier, SVMConfig, MAX_KERNEL_MATRIX_SAMPLES};
use super::xgboost::{XGBoostClassifier, XGBoostConfig};
use crate::error::{FlowError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Training-set size thresholds for conditional learners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeLimits {
    /// Neural network only above this many training rows
    pub nn_min_samples: usize,
    /// SVM only up to this many training rows
    pub svm_max_samples: usize,
    /// KNN only up to this many training rows
    pub knn_max_samples: usize,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            nn_min_samples: 10_000,
            svm_max_samples: MAX_KERNEL_MATRIX_SAMPLES,
            knn_max_samples: 50_000,
        }
    }
}

/// Catalogue entries, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearnerKind {
    RandomForest,
    #[serde(rename = "xgboost")]
    XGBoost,
    GradientBoosting,
    ExtraTrees,
    LogisticRegression,
    Knn,
    NeuralNetwork,
    Svm,
}

impl LearnerKind {
    pub const ALL: [LearnerKind; 8] = [
        LearnerKind::RandomForest,
        LearnerKind::XGBoost,
        LearnerKind::GradientBoosting,
        LearnerKind::ExtraTrees,
        LearnerKind::LogisticRegression,
        LearnerKind::Knn,
        LearnerKind::NeuralNetwork,
        LearnerKind::Svm,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LearnerKind::RandomForest => "random_forest",
            LearnerKind::XGBoost => "xgboost",
            LearnerKind::GradientBoosting => "gradient_boosting",
            LearnerKind::ExtraTrees => "extra_trees",
            LearnerKind::LogisticRegression => "logistic_regression",
            LearnerKind::Knn => "knn",
            LearnerKind::NeuralNetwork => "neural_network",
            LearnerKind::Svm => "svm",
        }
    }

    /// Short CLI alias
    pub fn alias(&self) -> &'static str {
        match self {
            LearnerKind::RandomForest => "rf",
            LearnerKind::XGBoost => "xgb",
            LearnerKind::GradientBoosting => "gb",
            LearnerKind::ExtraTrees => "et",
            LearnerKind::LogisticRegression => "lr",
            LearnerKind::Knn => "knn",
            LearnerKind::NeuralNetwork => "nn",
            LearnerKind::Svm => "svm",
        }
    }

    pub fn learner(&self) -> Box<dyn CandidateLearner> {
        match self {
            LearnerKind::RandomForest => Box::new(RandomForestLearner),
            LearnerKind::XGBoost => Box::new(XGBoostLearner),
            LearnerKind::GradientBoosting => Box::new(GradientBoostingLearner),
            LearnerKind::ExtraTrees => Box::new(ExtraTreesLearner),
            LearnerKind::LogisticRegression => Box::new(LogisticRegressionLearner),
            LearnerKind::Knn => Box::new(KnnLearner),
            LearnerKind::NeuralNetwork => Box::new(NeuralNetworkLearner),
            LearnerKind::Svm => Box::new(SvmLearner),
        }
    }
}

impl fmt::Display for LearnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LearnerKind {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        LearnerKind::ALL
            .iter()
            .copied()
            .find(|k| k.name() == wanted || k.alias() == wanted)
            .ok_or_else(|| FlowError::ConfigError(format!("unknown learner '{}'", s)))
    }
}

/// A searchable learner family
pub trait CandidateLearner: Send + Sync {
    fn kind(&self) -> LearnerKind;

    fn search_space(&self) -> ParamGrid;

    /// Unfitted model for one combination
    fn build(&self, params: &ParamSet, seed: u64) -> Result<TrainedModel>;

    /// Whether class weights are passed as sample weights
    fn supports_weights(&self) -> bool;

    /// Whether the learner runs for `n_train` training rows
    fn eligible(&self, _n_train: usize, _limits: &SizeLimits) -> bool {
        true
    }
}

/// The catalogue filtered by an optional allow-list and by training size,
/// in catalogue order
pub fn registry(allowed: Option<&[LearnerKind]>, n_train: usize, limits: &SizeLimits) -> Vec<Box<dyn CandidateLearner>> {
    LearnerKind::ALL
        .iter()
        .filter(|k| allowed.map_or(true, |list| list.contains(k)))
        .map(LearnerKind::learner)
        .filter(|l| l.eligible(n_train, limits))
        .collect()
}

fn max_features_from(params: &ParamSet) -> Result<MaxFeatures> {
    match params.str_or("max_features", "sqrt")? {
        "sqrt" => Ok(MaxFeatures::Sqrt),
        "log2" => Ok(MaxFeatures::Log2),
        "all" => Ok(MaxFeatures::All),
        other => Err(FlowError::InvalidParameter {
            name: "max_features".to_string(),
            value: other.to_string(),
            reason: "expected sqrt, log2 or all".to_string(),
        }),
    }
}

fn forest_params(params: &ParamSet, base: ForestParams, seed: u64) -> Result<ForestParams> {
    Ok(ForestParams {
        n_estimators: params.usize_or("n_estimators", base.n_estimators)?,
        max_depth: params.optional_usize("max_depth")?,
        min_samples_split: params.usize_or("min_samples_split", base.min_samples_split)?,
        min_samples_leaf: params.usize_or("min_samples_leaf", base.min_samples_leaf)?,
        max_features: max_features_from(params)?,
        bootstrap: params.bool_or("bootstrap", base.bootstrap)?,
        criterion: Criterion::Gini,
        splitter: base.splitter,
        seed,
    })
}

pub struct RandomForestLearner;

impl CandidateLearner for RandomForestLearner {
    fn kind(&self) -> LearnerKind {
        LearnerKind::RandomForest
    }

    fn search_space(&self) -> ParamGrid {
        ParamGrid::new()
            .param("n_estimators", vec![200i64, 300, 500])
            .param("max_depth", vec![ParamValue::Int(15), ParamValue::Int(20), ParamValue::Int(25), ParamValue::Unset])
            .param("min_samples_split", vec![2i64, 5, 10])
            .param("min_samples_leaf", vec![1i64, 2, 4])
            .param("max_features", vec!["sqrt", "log2", "all"])
            .param("bootstrap", vec![true, false])
    }

    fn build(&self, params: &ParamSet, seed: u64) -> Result<TrainedModel> {
        Ok(TrainedModel::Forest(RandomForest::new(forest_params(params, ForestParams::default(), seed)?)))
    }

    fn supports_weights(&self) -> bool {
        true
    }
}

pub struct ExtraTreesLearner;

impl CandidateLearner for ExtraTreesLearner {
    fn kind(&self) -> LearnerKind {
        LearnerKind::ExtraTrees
    }

    fn search_space(&self) -> ParamGrid {
        ParamGrid::new()
            .param("n_estimators", vec![200i64, 300])
            .param("max_depth", vec![ParamValue::Int(15), ParamValue::Int(20), ParamValue::Unset])
            .param("min_samples_split", vec![2i64, 5])
            .param("min_samples_leaf", vec![1i64, 2])
    }

    fn build(&self, params: &ParamSet, seed: u64) -> Result<TrainedModel> {
        let base = ForestParams::extra_trees();
        debug_assert_eq!(base.splitter, Splitter::Random);
        Ok(TrainedModel::Forest(RandomForest::new(forest_params(params, base, seed)?)))
    }

    fn supports_weights(&self) -> bool {
        true
    }
}

pub struct XGBoostLearner;

impl CandidateLearner for XGBoostLearner {
    fn kind(&self) -> LearnerKind {
        LearnerKind::XGBoost
    }

    fn search_space(&self) -> ParamGrid {
        ParamGrid::new()
            .param("n_estimators", vec![200i64, 300])
            .param("max_depth", vec![6i64, 8, 10])
            .param("learning_rate", vec![0.01, 0.1, 0.2])
            .param("subsample", vec![0.8, 0.9, 1.0])
            .param("colsample_bytree", vec![0.8, 0.9, 1.0])
    }

    fn build(&self, params: &ParamSet, seed: u64) -> Result<TrainedModel> {
        let base = XGBoostConfig::default();
        Ok(TrainedModel::XGBoost(XGBoostClassifier::new(XGBoostConfig {
            n_estimators: params.usize_or("n_estimators", base.n_estimators)?,
            max_depth: params.usize_or("max_depth", base.max_depth)?,
            learning_rate: params.f64_or("learning_rate", base.learning_rate)?,
            subsample: params.f64_or("subsample", base.subsample)?,
            colsample_bytree: params.f64_or("colsample_bytree", base.colsample_bytree)?,
            random_state: seed,
            ..base
        })))
    }

    fn supports_weights(&self) -> bool {
        false
    }
}

pub struct GradientBoostingLearner;

impl CandidateLearner for GradientBoostingLearner {
    fn kind(&self) -> LearnerKind {
        LearnerKind::GradientBoosting
    }

    fn search_space(&self) -> ParamGrid {
        ParamGrid::new()
            .param("n_estimators", vec![200i64, 300])
            .param("max_depth", vec![5i64, 7, 9])
            .param("learning_rate", vec![0.01, 0.1, 0.2])
            .param("subsample", vec![0.8, 0.9, 1.0])
    }

    fn build(&self, params: &ParamSet, seed: u64) -> Result<TrainedModel> {
        let base = GradientBoostingConfig::default();
        Ok(TrainedModel::GradientBoosting(GradientBoostingClassifier::new(GradientBoostingConfig {
            n_estimators: params.usize_or("n_estimators", base.n_estimators)?,
            max_depth: params.usize_or("max_depth", base.max_depth)?,
            learning_rate: params.f64_or("learning_rate", base.learning_rate)?,
            subsample: params.f64_or("subsample", base.subsample)?,
            random_state: seed,
            ..base
        })))
    }

    fn supports_weights(&self) -> bool {
        false
    }
}

pub struct LogisticRegressionLearner;

impl CandidateLearner for LogisticRegressionLearner {
    fn kind(&self) -> LearnerKind {
        LearnerKind::LogisticRegression
    }

    fn search_space(&self) -> ParamGrid {
        ParamGrid::new().param("C", vec![0.01, 0.1, 1.0, 10.0])
    }

    fn build(&self, params: &ParamSet, _seed: u64) -> Result<TrainedModel> {
        Ok(TrainedModel::Logistic(LogisticRegression::new().with_c(params.f64_or("C", 1.0)?)))
    }

    fn supports_weights(&self) -> bool {
        true
    }
}

pub struct KnnLearner;

impl CandidateLearner for KnnLearner {
    fn kind(&self) -> LearnerKind {
        LearnerKind::Knn
    }

    fn search_space(&self) -> ParamGrid {
        ParamGrid::new()
            .param("n_neighbors", vec![3i64, 5, 7, 11])
            .param("weights", vec!["uniform", "distance"])
    }

    fn build(&self, params: &ParamSet, _seed: u64) -> Result<TrainedModel> {
        let weights = match params.str_or("weights", "uniform")? {
            "uniform" => WeightScheme::Uniform,
            "distance" => WeightScheme::Distance,
            other => {
                return Err(FlowError::InvalidParameter {
                    name: "weights".to_string(),
                    value: other.to_string(),
                    reason: "expected uniform or distance".to_string(),
                })
            }
        };
        Ok(TrainedModel::Knn(KNNClassifier::new(KNNConfig {
            n_neighbors: params.usize_or("n_neighbors", 5)?,
            weights,
            ..Default::default()
        })))
    }

    fn supports_weights(&self) -> bool {
        false
    }

    fn eligible(&self, n_train: usize, limits: &SizeLimits) -> bool {
        n_train <= limits.knn_max_samples
    }
}

pub struct NeuralNetworkLearner;

impl CandidateLearner for NeuralNetworkLearner {
    fn kind(&self) -> LearnerKind {
        LearnerKind::NeuralNetwork
    }

    fn search_space(&self) -> ParamGrid {
        ParamGrid::new()
            .param(
                "hidden_layers",
                vec![
                    ParamValue::Layers(vec![100]),
                    ParamValue::Layers(vec![200]),
                    ParamValue::Layers(vec![100, 50]),
                    ParamValue::Layers(vec![200, 100]),
                ],
            )
            .param("alpha", vec![1e-4, 1e-3, 1e-2])
            .param("learning_rate", vec!["constant", "adaptive"])
    }

    fn build(&self, params: &ParamSet, seed: u64) -> Result<TrainedModel> {
        let schedule = match params.str_or("learning_rate", "constant")? {
            "constant" => LearningRateSchedule::Constant,
            "adaptive" => LearningRateSchedule::Adaptive,
            other => {
                return Err(FlowError::InvalidParameter {
                    name: "learning_rate".to_string(),
                    value: other.to_string(),
                    reason: "expected constant or adaptive".to_string(),
                })
            }
        };
        let base = MLPConfig::default();
        Ok(TrainedModel::Mlp(MLPClassifier::new(MLPConfig {
            hidden_layers: params.layers("hidden_layers")?,
            alpha: params.f64_or("alpha", base.alpha)?,
            learning_rate: schedule,
            random_state: seed,
            ..base
        })))
    }

    fn supports_weights(&self) -> bool {
        false
    }

    fn eligible(&self, n_train: usize, limits: &SizeLimits) -> bool {
        n_train > limits.nn_min_samples
    }
}

pub struct SvmLearner;

impl CandidateLearner for SvmLearner {
    fn kind(&self) -> LearnerKind {
        LearnerKind::Svm
    }

    fn search_space(&self) -> ParamGrid {
        ParamGrid::new()
            .param("C", vec![0.1, 1.0, 10.0, 100.0])
            .param("kernel", vec!["rbf", "linear", "poly"])
            .param(
                "gamma",
                vec![ParamValue::from("scale"), ParamValue::from("auto"), ParamValue::Float(0.001), ParamValue::Float(0.01)],
            )
    }

    fn build(&self, params: &ParamSet, seed: u64) -> Result<TrainedModel> {
        let kernel = match params.str_or("kernel", "rbf")? {
            "rbf" => KernelType::Rbf,
            "linear" => KernelType::Linear,
            "poly" => KernelType::Poly,
            other => {
                return Err(FlowError::InvalidParameter {
                    name: "kernel".to_string(),
                    value: other.to_string(),
                    reason: "expected rbf, linear or poly".to_string(),
                })
            }
        };
        let gamma = match params.get("gamma") {
            None => Gamma::Scale,
            Some(ParamValue::Str(s)) if s == "scale" => Gamma::Scale,
            Some(ParamValue::Str(s)) if s == "auto" => Gamma::Auto,
            Some(ParamValue::Float(g)) => Gamma::Value(*g),
            Some(other) => {
                return Err(FlowError::InvalidParameter {
                    name: "gamma".to_string(),
                    value: other.to_string(),
                    reason: "expected scale, auto or a number".to_string(),
                })
            }
        };
        Ok(TrainedModel::Svm(SVMClassifier::new(SVMConfig {
            c: params.f64_or("C", 1.0)?,
            kernel,
            gamma,
            random_state: seed,
            ..Default::default()
        })))
    }

    fn supports_weights(&self) -> bool {
        true
    }

    fn eligible(&self, n_train: usize, limits: &SizeLimits) -> bool {
        n_train <= limits.svm_max_samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(learners: &[Box<dyn CandidateLearner>]) -> Vec<LearnerKind> {
        learners.iter().map(|l| l.kind()).collect()
    }

    #[test]
    fn test_small_dataset_excludes_neural_network() {
        let learners = registry(None, 5_000, &SizeLimits::default());
        assert_eq!(
            kinds(&learners),
            vec![
                LearnerKind::RandomForest,
                LearnerKind::XGBoost,
                LearnerKind::GradientBoosting,
                LearnerKind::ExtraTrees,
                LearnerKind::LogisticRegression,
                LearnerKind::Knn,
                LearnerKind::Svm,
            ]
        );
    }

    #[test]
    fn test_svm_limit_matches_kernel_guard() {
        let limits = SizeLimits::default();
        assert!(SvmLearner.eligible(MAX_KERNEL_MATRIX_SAMPLES, &limits));
        assert!(!SvmLearner.eligible(MAX_KERNEL_MATRIX_SAMPLES + 1, &limits));
        let got = kinds(&registry(None, 20_000, &limits));
        assert!(!got.contains(&LearnerKind::Svm));
        assert!(got.contains(&LearnerKind::Knn));
    }

    #[test]
    fn test_xgboost_build_uses_column_sampling() {
        let params = XGBoostLearner.search_space().combinations().remove(0);
        match XGBoostLearner.build(&params, 7).unwrap() {
            TrainedModel::XGBoost(m) => {
                assert_eq!(m.config().colsample_bytree, 0.8);
                assert_eq!(m.config().random_state, 7);
            }
            other => panic!("unexpected model {}", other.kind()),
        }
        assert!(!XGBoostLearner.supports_weights());
    }

    #[test]
    fn test_large_dataset_drops_knn_and_svm() {
        let learners = registry(None, 60_000, &SizeLimits::default());
        let got = kinds(&learners);
        assert!(got.contains(&LearnerKind::NeuralNetwork));
        assert!(!got.contains(&LearnerKind::Knn));
        assert!(!got.contains(&LearnerKind::Svm));
    }

    #[test]
    fn test_allow_list_keeps_catalogue_order() {
        let allowed = [LearnerKind::LogisticRegression, LearnerKind::RandomForest];
        let learners = registry(Some(&allowed), 100, &SizeLimits::default());
        assert_eq!(kinds(&learners), vec![LearnerKind::RandomForest, LearnerKind::LogisticRegression]);
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("rf".parse::<LearnerKind>().unwrap(), LearnerKind::RandomForest);
        assert_eq!("neural_network".parse::<LearnerKind>().unwrap(), LearnerKind::NeuralNetwork);
        assert_eq!("xgb".parse::<LearnerKind>().unwrap(), LearnerKind::XGBoost);
        assert_eq!("XGBoost".parse::<LearnerKind>().unwrap(), LearnerKind::XGBoost);
        assert!("lightgbm".parse::<LearnerKind>().is_err());
    }

    #[test]
    fn test_grid_sizes() {
        assert_eq!(RandomForestLearner.search_space().len(), 3 * 4 * 3 * 3 * 3 * 2);
        assert_eq!(XGBoostLearner.search_space().len(), 2 * 3 * 3 * 3 * 3);
        assert_eq!(SvmLearner.search_space().len(), 48);
        assert_eq!(NeuralNetworkLearner.search_space().len(), 24);
    }

    #[test]
    fn test_every_combination_builds() {
        for kind in LearnerKind::ALL {
            let learner = kind.learner();
            for params in learner.search_space().combinations() {
                learner.build(&params, 42).unwrap();
            }
        }
    }

    #[test]
    fn test_extra_trees_build() {
        let params = ExtraTreesLearner.search_space().combinations().remove(0);
        match ExtraTreesLearner.build(&params, 1).unwrap() {
            TrainedModel::Forest(f) => assert!(f.is_extra_trees()),
            other => panic!("unexpected model {}", other.kind()),
        }
    }
}

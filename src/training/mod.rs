//! Model training module
//!
//! Provides the learner catalogue and the search around it:
//! - Decision trees, Random Forests and Extra Trees
//! - Multiclass gradient boosting and XGBoost-style boosting
//! - Multinomial logistic regression
//! - K-Nearest Neighbors
//! - Neural networks (MLP)
//! - Support Vector Machines
//! - Stratified cross-validation, grid/random search and model selection

mod engine;
mod models;
pub mod catalogue;
pub mod cross_validation;
pub mod decision_tree;
pub mod gradient_boosting;
pub mod knn;
pub mod linear_models;
pub mod metrics;
pub mod neural_network;
pub mod random_forest;
pub mod search;
pub mod svm;
pub mod xgboost;

pub use catalogue::{registry, CandidateLearner, LearnerKind, SizeLimits};
pub use cross_validation::{CVResults, CVSplit, StratifiedKFold};
pub use decision_tree::{Criterion, DecisionTree, Splitter, TreeNode, TreeParams};
pub use engine::{
    class_weights, sample_weights, CandidateOutcome, CandidateResult, EngineConfig, ModelSearch, SearchReport,
    ENSEMBLE_NAME, MIN_ENSEMBLE_SIZE,
};
pub use gradient_boosting::{GradientBoostingClassifier, GradientBoostingConfig};
pub use knn::{DistanceMetric, KNNClassifier, KNNConfig, WeightScheme};
pub use linear_models::LogisticRegression;
pub use metrics::{ClassReport, ModelMetrics};
pub use models::{Classifier, TrainedModel};
pub use neural_network::{LearningRateSchedule, MLPClassifier, MLPConfig};
pub use random_forest::{ForestParams, MaxFeatures, RandomForest};
pub use search::{HyperparameterSearch, ParamGrid, ParamSet, ParamValue, SearchOutcome, SearchStrategy};
pub use svm::{Gamma, KernelType, SVMClassifier, SVMConfig};
pub use xgboost::{XGBoostClassifier, XGBoostConfig};

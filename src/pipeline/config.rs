//! Pipeline configuration

use crate::error::{FlowError, Result};
use crate::ingest::IngestOptions;
use crate::preprocessing::{ScalerType, SelectionStrategy};
use crate::schema::Strictness;
use crate::training::{EngineConfig, LearnerKind, SearchStrategy, SizeLimits, MIN_ENSEMBLE_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory of CSV sources
    pub data_dir: Option<PathBuf>,
    /// Per-file row cap before balanced sampling
    pub max_samples_per_file: usize,
    pub target_column: String,
    pub scaler: ScalerType,
    pub selection: SelectionStrategy,
    /// Columns kept by top-K selection
    pub k_features: usize,
    pub seed: u64,
    /// Held-out fraction, in (0, 1)
    pub test_size: f64,
    pub cv_folds: usize,
    pub search: SearchStrategy,
    /// Worker threads for the search; 0 uses every core
    pub n_jobs: usize,
    /// Restrict the learner catalogue; `None` runs all of it
    pub learners: Option<Vec<LearnerKind>>,
    pub nn_min_samples: usize,
    pub svm_max_samples: usize,
    pub knn_max_samples: usize,
    pub ensemble_top_k: usize,
    /// Importances shown in the report
    pub importance_top_n: usize,
    pub schema_strictness: Strictness,
    pub label_strictness: Strictness,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let limits = SizeLimits::default();
        Self {
            data_dir: None,
            max_samples_per_file: 75_000,
            target_column: "label".to_string(),
            scaler: ScalerType::Robust,
            selection: SelectionStrategy::MutualInfo,
            k_features: 50,
            seed: 42,
            test_size: 0.2,
            cv_folds: 5,
            search: SearchStrategy::default(),
            n_jobs: 0,
            learners: None,
            nn_min_samples: limits.nn_min_samples,
            svm_max_samples: limits.svm_max_samples,
            knn_max_samples: limits.knn_max_samples,
            ensemble_top_k: MIN_ENSEMBLE_SIZE,
            importance_top_n: 15,
            schema_strictness: Strictness::Warn,
            label_strictness: Strictness::Warn,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a TOML file. Missing keys take their defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| FlowError::ConfigError(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn with_max_samples_per_file(mut self, cap: usize) -> Self {
        self.max_samples_per_file = cap;
        self
    }

    pub fn with_target_column(mut self, target: impl Into<String>) -> Self {
        self.target_column = target.into();
        self
    }

    pub fn with_scaler(mut self, scaler: ScalerType) -> Self {
        self.scaler = scaler;
        self
    }

    pub fn with_selection(mut self, selection: SelectionStrategy, k: usize) -> Self {
        self.selection = selection;
        self.k_features = k;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_test_size(mut self, test_size: f64) -> Self {
        self.test_size = test_size;
        self
    }

    pub fn with_cv_folds(mut self, folds: usize) -> Self {
        self.cv_folds = folds;
        self
    }

    pub fn with_search(mut self, search: SearchStrategy) -> Self {
        self.search = search;
        self
    }

    pub fn with_n_jobs(mut self, n_jobs: usize) -> Self {
        self.n_jobs = n_jobs;
        self
    }

    pub fn with_learners(mut self, learners: Vec<LearnerKind>) -> Self {
        self.learners = Some(learners);
        self
    }

    pub fn with_ensemble_top_k(mut self, k: usize) -> Self {
        self.ensemble_top_k = k;
        self
    }

    pub fn with_importance_top_n(mut self, n: usize) -> Self {
        self.importance_top_n = n;
        self
    }

    pub fn with_schema_strictness(mut self, strictness: Strictness) -> Self {
        self.schema_strictness = strictness;
        self
    }

    pub fn with_label_strictness(mut self, strictness: Strictness) -> Self {
        self.label_strictness = strictness;
        self
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if !(self.test_size > 0.0 && self.test_size < 1.0) {
            return Err(invalid("test_size", self.test_size, "must lie strictly between 0 and 1"));
        }
        if self.cv_folds < 2 {
            return Err(invalid("cv_folds", self.cv_folds, "at least 2 folds are required"));
        }
        if self.k_features == 0 && self.selection != SelectionStrategy::None {
            return Err(invalid("k_features", self.k_features, "top-K selection needs K of at least 1"));
        }
        if self.ensemble_top_k < MIN_ENSEMBLE_SIZE {
            return Err(invalid(
                "ensemble_top_k",
                self.ensemble_top_k,
                &format!("at least {} members are required", MIN_ENSEMBLE_SIZE),
            ));
        }
        if self.max_samples_per_file == 0 {
            return Err(invalid("max_samples_per_file", self.max_samples_per_file, "must be positive"));
        }
        if let SearchStrategy::Random { n_iter: 0 } = self.search {
            return Err(invalid("n_iter", 0, "random search needs at least one iteration"));
        }
        if self.target_column.trim().is_empty() {
            return Err(FlowError::ConfigError("target_column must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            target_column: self.target_column.clone(),
            max_samples_per_file: self.max_samples_per_file,
            seed: self.seed,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            search: self.search,
            cv_folds: self.cv_folds,
            seed: self.seed,
            n_jobs: self.n_jobs,
            learners: self.learners.clone(),
            limits: SizeLimits {
                nn_min_samples: self.nn_min_samples,
                svm_max_samples: self.svm_max_samples,
                knn_max_samples: self.knn_max_samples,
            },
            ensemble_top_k: self.ensemble_top_k,
        }
    }
}

fn invalid(name: &str, value: impl ToString, reason: &str) -> FlowError {
    FlowError::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

//! Model search and ensemble selection
//!
//! Runs every eligible catalogue learner through cross-validated search,
//! evaluates each refit winner on the held-out split, optionally builds a
//! soft-voting ensemble of the strongest candidates and picks the best.

use super::catalogue::{registry, CandidateLearner, LearnerKind, SizeLimits};
use super::metrics::ModelMetrics;
use super::models::{Classifier, TrainedModel};
use super::search::{HyperparameterSearch, ParamSet, SearchStrategy};
use crate::ensemble::SoftVotingEnsemble;
use crate::error::{FlowError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Smallest ensemble that is ever built
pub const MIN_ENSEMBLE_SIZE: usize = 3;

/// Name under which the ensemble is reported
pub const ENSEMBLE_NAME: &str = "ensemble";

/// Search engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub search: SearchStrategy,
    pub cv_folds: usize,
    pub seed: u64,
    /// Worker threads; 0 means all cores
    pub n_jobs: usize,
    /// Restrict the catalogue; `None` runs every learner
    pub learners: Option<Vec<LearnerKind>>,
    pub limits: SizeLimits,
    pub ensemble_top_k: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            search: SearchStrategy::default(),
            cv_folds: 5,
            seed: 42,
            n_jobs: 0,
            learners: None,
            limits: SizeLimits::default(),
            ensemble_top_k: MIN_ENSEMBLE_SIZE,
        }
    }
}

/// One learner's refit best estimator and its held-out evaluation
#[derive(Debug, Clone)]
pub struct CandidateResult {
    pub name: String,
    pub best_params: ParamSet,
    /// Mean cross-validated weighted F1 of the best combination
    pub cv_score: f64,
    pub metrics: ModelMetrics,
    pub fit_secs: f64,
    pub model: TrainedModel,
}

/// Per-learner outcome, in evaluation order
#[derive(Debug, Clone)]
pub enum CandidateOutcome {
    Succeeded(CandidateResult),
    Failed { learner: String, reason: String },
}

impl CandidateOutcome {
    pub fn name(&self) -> &str {
        match self {
            CandidateOutcome::Succeeded(r) => &r.name,
            CandidateOutcome::Failed { learner, .. } => learner,
        }
    }

    pub fn result(&self) -> Option<&CandidateResult> {
        match self {
            CandidateOutcome::Succeeded(r) => Some(r),
            CandidateOutcome::Failed { .. } => None,
        }
    }
}

/// Everything the search produced
#[derive(Debug, Clone)]
pub struct SearchReport {
    pub outcomes: Vec<CandidateOutcome>,
    pub ensemble: Option<CandidateResult>,
    /// Name of the selected model: a learner name or [`ENSEMBLE_NAME`]
    pub selected: String,
}

impl SearchReport {
    /// The selected candidate
    pub fn best(&self) -> Option<&CandidateResult> {
        if self.selected == ENSEMBLE_NAME {
            return self.ensemble.as_ref();
        }
        self.outcomes.iter().filter_map(CandidateOutcome::result).find(|r| r.name == self.selected)
    }

    pub fn into_best(self) -> Option<CandidateResult> {
        let selected = self.selected;
        if selected == ENSEMBLE_NAME {
            return self.ensemble;
        }
        self.outcomes.into_iter().find_map(|o| match o {
            CandidateOutcome::Succeeded(r) if r.name == selected => Some(r),
            _ => None,
        })
    }
}

/// `n / (n_classes * count_c)` per class; absent classes get weight 0
pub fn class_weights(y: &[usize], n_classes: usize) -> Vec<f64> {
    let mut counts = vec![0usize; n_classes];
    for &c in y {
        counts[c] += 1;
    }
    let n = y.len() as f64;
    counts
        .iter()
        .map(|&c| if c > 0 { n / (n_classes as f64 * c as f64) } else { 0.0 })
        .collect()
}

/// Per-sample weights from class weights
pub fn sample_weights(y: &[usize], n_classes: usize) -> Vec<f64> {
    let weights = class_weights(y, n_classes);
    y.iter().map(|&c| weights[c]).collect()
}

/// Model search over the learner catalogue
#[derive(Debug, Clone)]
pub struct ModelSearch {
    config: EngineConfig,
}

impl ModelSearch {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Learners that will run for `n_train` training rows
    pub fn planned_learners(&self, n_train: usize) -> Vec<LearnerKind> {
        registry(self.config.learners.as_deref(), n_train, &self.config.limits)
            .iter()
            .map(|l| l.kind())
            .collect()
    }

    /// Search every eligible learner and select the best model. Learner
    /// failures are recorded and skipped; the call fails only when nothing
    /// succeeded.
    pub fn run(
        &self,
        x_train: &Array2<f64>,
        y_train: &[usize],
        x_test: &Array2<f64>,
        y_test: &[usize],
        n_classes: usize,
    ) -> Result<SearchReport> {
        let learners = registry(self.config.learners.as_deref(), x_train.nrows(), &self.config.limits);
        let weights = sample_weights(y_train, n_classes);
        info!(
            learners = learners.len(),
            train_rows = x_train.nrows(),
            test_rows = x_test.nrows(),
            "starting model search"
        );

        let mut outcomes = Vec::with_capacity(learners.len());
        for learner in &learners {
            let name = learner.kind().name().to_string();
            match self.run_candidate(learner.as_ref(), x_train, y_train, x_test, y_test, n_classes, &weights) {
                Ok(result) => {
                    info!(
                        learner = %name,
                        cv_f1 = result.cv_score,
                        accuracy = result.metrics.accuracy,
                        f1 = result.metrics.weighted_f1,
                        secs = result.fit_secs,
                        "candidate evaluated"
                    );
                    outcomes.push(CandidateOutcome::Succeeded(result));
                }
                Err(e) => {
                    let failure = FlowError::CandidateFailed { learner: name.clone(), reason: e.to_string() };
                    warn!(error = %failure, "candidate excluded");
                    outcomes.push(CandidateOutcome::Failed { learner: name, reason: e.to_string() });
                }
            }
        }

        // Provisional best: highest held-out F1, earliest wins ties
        let mut best: Option<&CandidateResult> = None;
        for result in outcomes.iter().filter_map(CandidateOutcome::result) {
            if best.map_or(true, |b| result.metrics.weighted_f1 > b.metrics.weighted_f1) {
                best = Some(result);
            }
        }
        let best = best.ok_or(FlowError::NoCandidateSucceeded)?;
        let mut selected = best.name.clone();
        let best_f1 = best.metrics.weighted_f1;

        let ensemble = self.build_ensemble(&outcomes, x_test, y_test, n_classes).unwrap_or_else(|e| {
            warn!(error = %e, "ensemble skipped");
            None
        });
        if let Some(ens) = &ensemble {
            if ens.metrics.weighted_f1 > best_f1 {
                selected = ENSEMBLE_NAME.to_string();
            }
        }
        info!(selected = %selected, "model selected");

        Ok(SearchReport { outcomes, ensemble, selected })
    }

    #[allow(clippy::too_many_arguments)]
    fn run_candidate(
        &self,
        learner: &dyn CandidateLearner,
        x_train: &Array2<f64>,
        y_train: &[usize],
        x_test: &Array2<f64>,
        y_test: &[usize],
        n_classes: usize,
        weights: &[f64],
    ) -> Result<CandidateResult> {
        let start = Instant::now();
        let search = HyperparameterSearch::new(self.config.search)
            .with_cv_folds(self.config.cv_folds)
            .with_seed(self.config.seed)
            .with_n_jobs(self.config.n_jobs);
        let sample_weight = learner.supports_weights().then_some(weights);
        let seed = self.config.seed;

        let outcome = search.run(&learner.search_space(), x_train, y_train, n_classes, sample_weight, |params| {
            learner.build(params, seed)
        })?;
        debug!(learner = %learner.kind(), params = %outcome.best_params, evaluated = outcome.n_evaluated, "search finished");

        let predictions = outcome.best_model.predict(x_test)?;
        let metrics = ModelMetrics::compute_classification(y_test, &predictions, n_classes);

        Ok(CandidateResult {
            name: learner.kind().name().to_string(),
            best_params: outcome.best_params,
            cv_score: outcome.best_score.mean_score,
            metrics,
            fit_secs: start.elapsed().as_secs_f64(),
            model: outcome.best_model,
        })
    }

    /// Soft-voting ensemble of the top-K succeeded candidates by held-out F1
    fn build_ensemble(
        &self,
        outcomes: &[CandidateOutcome],
        x_test: &Array2<f64>,
        y_test: &[usize],
        n_classes: usize,
    ) -> Result<Option<CandidateResult>> {
        let top_k = self.config.ensemble_top_k.max(MIN_ENSEMBLE_SIZE);
        let mut ranked: Vec<&CandidateResult> = outcomes.iter().filter_map(CandidateOutcome::result).collect();
        if ranked.len() < MIN_ENSEMBLE_SIZE {
            return Ok(None);
        }
        // Stable: equal scores keep evaluation order
        ranked.sort_by(|a, b| b.metrics.weighted_f1.total_cmp(&a.metrics.weighted_f1));
        ranked.truncate(top_k);

        let start = Instant::now();
        let members: Vec<(String, TrainedModel)> = ranked.iter().map(|r| (r.name.clone(), r.model.clone())).collect();
        let names: Vec<String> = members.iter().map(|(n, _)| n.clone()).collect();
        let ensemble = SoftVotingEnsemble::new(members)?;

        let predictions = ensemble.predict(x_test)?;
        let metrics = ModelMetrics::compute_classification(y_test, &predictions, n_classes);
        info!(members = ?names, f1 = metrics.weighted_f1, "ensemble evaluated");

        let best_params = names.iter().fold(ParamSet::new(), |set, name| set.with("member", name.as_str()));
        Ok(Some(CandidateResult {
            name: ENSEMBLE_NAME.to_string(),
            best_params,
            cv_score: f64::NAN,
            metrics,
            fit_secs: start.elapsed().as_secs_f64(),
            model: TrainedModel::Ensemble(ensemble),
        }))
    }
}

//! Hyperparameter search over a discrete grid
//!
//! Every (combination, fold) fit runs on a bounded rayon pool. Combinations
//! are scored by the mean weighted F1 over stratified folds; the best one is
//! refit on the full training split.

use super::cross_validation::{CVResults, StratifiedKFold};
use super::metrics::weighted_f1;
use super::models::{Classifier, TrainedModel};
use crate::error::{FlowError, Result};
use ndarray::{Array2, Axis};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// A single hyperparameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    /// Hidden layer sizes
    Layers(Vec<usize>),
    /// Unbounded / library default (e.g. `max_depth = None`)
    Unset,
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Str(v) => write!(f, "{}", v),
            ParamValue::Layers(v) => write!(f, "{:?}", v),
            ParamValue::Unset => write!(f, "none"),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

/// One concrete combination, in grid parameter order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSet {
    values: Vec<(String, ParamValue)>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.values.push((name.to_string(), value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn require(&self, name: &str) -> Result<&ParamValue> {
        self.get(name).ok_or_else(|| FlowError::InvalidParameter {
            name: name.to_string(),
            value: "<missing>".to_string(),
            reason: "parameter not present in combination".to_string(),
        })
    }

    fn mismatch(name: &str, value: &ParamValue, expected: &str) -> FlowError {
        FlowError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: format!("expected {}", expected),
        }
    }

    /// `default` when the parameter is absent
    pub fn usize_or(&self, name: &str, default: usize) -> Result<usize> {
        match self.get(name) {
            None => Ok(default),
            Some(ParamValue::Int(v)) if *v >= 0 => Ok(*v as usize),
            Some(other) => Err(Self::mismatch(name, other, "a non-negative integer")),
        }
    }

    /// `Unset` maps to `None`
    pub fn optional_usize(&self, name: &str) -> Result<Option<usize>> {
        match self.get(name) {
            None | Some(ParamValue::Unset) => Ok(None),
            Some(ParamValue::Int(v)) if *v >= 0 => Ok(Some(*v as usize)),
            Some(other) => Err(Self::mismatch(name, other, "a non-negative integer or none")),
        }
    }

    pub fn f64_or(&self, name: &str, default: f64) -> Result<f64> {
        match self.get(name) {
            None => Ok(default),
            Some(ParamValue::Float(v)) => Ok(*v),
            Some(ParamValue::Int(v)) => Ok(*v as f64),
            Some(other) => Err(Self::mismatch(name, other, "a number")),
        }
    }

    pub fn bool_or(&self, name: &str, default: bool) -> Result<bool> {
        match self.get(name) {
            None => Ok(default),
            Some(ParamValue::Bool(v)) => Ok(*v),
            Some(other) => Err(Self::mismatch(name, other, "a boolean")),
        }
    }

    pub fn str_or<'a>(&'a self, name: &str, default: &'a str) -> Result<&'a str> {
        match self.get(name) {
            None => Ok(default),
            Some(ParamValue::Str(v)) => Ok(v),
            Some(other) => Err(Self::mismatch(name, other, "a string")),
        }
    }

    pub fn layers(&self, name: &str) -> Result<Vec<usize>> {
        match self.require(name)? {
            ParamValue::Layers(v) => Ok(v.clone()),
            other => Err(Self::mismatch(name, other, "a list of layer sizes")),
        }
    }
}

impl fmt::Display for ParamSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.values.iter().map(|(n, v)| format!("{}={}", n, v)).collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// Discrete search space
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamGrid {
    params: Vec<(String, Vec<ParamValue>)>,
}

impl ParamGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param<V: Into<ParamValue>>(mut self, name: &str, values: Vec<V>) -> Self {
        self.params.push((name.to_string(), values.into_iter().map(Into::into).collect()));
        self
    }

    /// Number of combinations
    pub fn len(&self) -> usize {
        self.params.iter().map(|(_, v)| v.len()).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every combination; the last parameter varies fastest
    pub fn combinations(&self) -> Vec<ParamSet> {
        let mut out = vec![ParamSet::new()];
        for (name, values) in &self.params {
            out = out
                .into_iter()
                .flat_map(|set| {
                    values.iter().map(move |v| {
                        let mut next = set.clone();
                        next.values.push((name.clone(), v.clone()));
                        next
                    })
                })
                .collect();
        }
        out
    }
}

/// How combinations are chosen from the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// Exhaustive
    Grid,
    /// `n_iter` combinations sampled without replacement
    Random { n_iter: usize },
}

impl Default for SearchStrategy {
    fn default() -> Self {
        SearchStrategy::Random { n_iter: 10 }
    }
}

impl SearchStrategy {
    /// Combinations to evaluate, kept in grid order
    pub fn candidates(&self, grid: &ParamGrid, seed: u64) -> Vec<ParamSet> {
        let all = grid.combinations();
        match *self {
            SearchStrategy::Grid => all,
            SearchStrategy::Random { n_iter } if n_iter >= all.len() => all,
            SearchStrategy::Random { n_iter } => {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                let mut picked = rand::seq::index::sample(&mut rng, all.len(), n_iter).into_vec();
                picked.sort_unstable();
                picked.into_iter().map(|i| all[i].clone()).collect()
            }
        }
    }
}

/// Result of a search: the refit best estimator and its scores
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub best_params: ParamSet,
    pub best_score: CVResults,
    pub best_model: TrainedModel,
    /// Combinations that produced a score
    pub n_evaluated: usize,
}

/// Cross-validated hyperparameter search
#[derive(Debug, Clone, Copy)]
pub struct HyperparameterSearch {
    strategy: SearchStrategy,
    cv_folds: usize,
    seed: u64,
    n_jobs: usize,
}

impl HyperparameterSearch {
    pub fn new(strategy: SearchStrategy) -> Self {
        Self {
            strategy,
            cv_folds: 5,
            seed: 42,
            n_jobs: 0,
        }
    }

    pub fn with_cv_folds(mut self, folds: usize) -> Self {
        self.cv_folds = folds;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Worker threads; 0 means all cores
    pub fn with_n_jobs(mut self, n_jobs: usize) -> Self {
        self.n_jobs = n_jobs;
        self
    }

    /// Search `grid` with models from `build`, then refit the winner on all
    /// rows. Combinations whose fits fail on any fold are dropped; ties go to
    /// the earlier combination.
    pub fn run<F>(
        &self,
        grid: &ParamGrid,
        x: &Array2<f64>,
        y: &[usize],
        n_classes: usize,
        sample_weight: Option<&[f64]>,
        build: F,
    ) -> Result<SearchOutcome>
    where
        F: Fn(&ParamSet) -> Result<TrainedModel> + Sync,
    {
        let candidates = self.strategy.candidates(grid, self.seed);
        if candidates.is_empty() {
            return Err(FlowError::TrainingError("empty search space".to_string()));
        }
        let splits = StratifiedKFold::new(self.cv_folds).with_random_state(self.seed).split(y, n_classes)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.n_jobs)
            .build()
            .map_err(|e| FlowError::TrainingError(format!("Thread pool error: {}", e)))?;

        let tasks: Vec<(usize, usize)> = (0..candidates.len())
            .flat_map(|c| (0..splits.len()).map(move |s| (c, s)))
            .collect();

        let fold_scores: Vec<Result<f64>> = pool.install(|| {
            tasks
                .par_iter()
                .map(|&(c, s)| {
                    let split = &splits[s];
                    let x_train = x.select(Axis(0), &split.train_indices);
                    let y_train: Vec<usize> = split.train_indices.iter().map(|&i| y[i]).collect();
                    let w_train: Option<Vec<f64>> =
                        sample_weight.map(|w| split.train_indices.iter().map(|&i| w[i]).collect());

                    let mut model = build(&candidates[c])?;
                    model.fit(&x_train, &y_train, n_classes, w_train.as_deref())?;

                    let x_test = x.select(Axis(0), &split.test_indices);
                    let y_test: Vec<usize> = split.test_indices.iter().map(|&i| y[i]).collect();
                    let predictions = model.predict(&x_test)?;
                    Ok(weighted_f1(&y_test, &predictions, n_classes))
                })
                .collect()
        });

        let mut best: Option<(usize, CVResults)> = None;
        let mut n_evaluated = 0;
        for (c, chunk) in fold_scores.chunks(splits.len()).enumerate() {
            match chunk.iter().map(|r| r.as_ref().ok().copied()).collect::<Option<Vec<f64>>>() {
                Some(scores) => {
                    n_evaluated += 1;
                    let result = CVResults::from_scores(scores);
                    debug!(params = %candidates[c], score = result.mean_score, "combination scored");
                    if best.as_ref().map_or(true, |(_, b)| result.mean_score > b.mean_score) {
                        best = Some((c, result));
                    }
                }
                None => {
                    if let Some(Err(e)) = chunk.iter().find(|r| r.is_err()) {
                        debug!(params = %candidates[c], error = %e, "combination failed");
                    }
                }
            }
        }

        let (best_idx, best_score) = match best {
            Some(found) => found,
            None => {
                let reason = fold_scores
                    .into_iter()
                    .find_map(|r| r.err())
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no combination could be scored".to_string());
                return Err(FlowError::TrainingError(reason));
            }
        };

        let best_params = candidates[best_idx].clone();
        let mut best_model = build(&best_params)?;
        pool.install(|| best_model.fit(x, y, n_classes, sample_weight))?;

        Ok(SearchOutcome {
            best_params,
            best_score,
            best_model,
            n_evaluated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::knn::KNNClassifier;

    fn grid() -> ParamGrid {
        ParamGrid::new()
            .param("n_neighbors", vec![1i64, 3])
            .param("weights", vec!["uniform", "distance"])
    }

    #[test]
    fn test_grid_combinations_in_order() {
        let combos = grid().combinations();
        assert_eq!(combos.len(), 4);
        assert_eq!(combos[0].to_string(), "{n_neighbors=1, weights=uniform}");
        assert_eq!(combos[1].to_string(), "{n_neighbors=1, weights=distance}");
        assert_eq!(combos[3].to_string(), "{n_neighbors=3, weights=distance}");
    }

    #[test]
    fn test_random_strategy_samples_without_replacement() {
        let big = ParamGrid::new().param("a", (0..20i64).collect()).param("b", vec![true, false]);
        let picked = SearchStrategy::Random { n_iter: 10 }.candidates(&big, 42);
        assert_eq!(picked.len(), 10);
        let mut seen: Vec<String> = picked.iter().map(|p| p.to_string()).collect();
        seen.dedup();
        assert_eq!(seen.len(), 10);
        assert_eq!(picked, SearchStrategy::Random { n_iter: 10 }.candidates(&big, 42));

        // Small grids are searched exhaustively
        assert_eq!(SearchStrategy::Random { n_iter: 10 }.candidates(&grid(), 1).len(), 4);
    }

    #[test]
    fn test_param_accessors() {
        let set = ParamSet::new().with("depth", ParamValue::Unset).with("c", 0.1).with("n", 5i64);
        assert_eq!(set.optional_usize("depth").unwrap(), None);
        assert_eq!(set.usize_or("n", 1).unwrap(), 5);
        assert_eq!(set.f64_or("c", 1.0).unwrap(), 0.1);
        assert_eq!(set.usize_or("missing", 7).unwrap(), 7);
        assert!(set.bool_or("n", true).is_err());
    }

    #[test]
    fn test_search_picks_and_refits() {
        let x = Array2::from_shape_fn((30, 1), |(i, _)| (i % 15) as f64 + if i < 15 { 0.0 } else { 20.0 });
        let y: Vec<usize> = (0..30).map(|i| usize::from(i >= 15)).collect();

        let search = HyperparameterSearch::new(SearchStrategy::Grid).with_n_jobs(2);
        let outcome = search
            .run(&grid(), &x, &y, 2, None, |params| {
                let k = params.usize_or("n_neighbors", 5)?;
                Ok(TrainedModel::Knn(KNNClassifier::with_k(k)))
            })
            .unwrap();

        assert_eq!(outcome.n_evaluated, 4);
        assert_eq!(outcome.best_score.mean_score, 1.0);
        // Perfect scores everywhere: the first combination wins
        assert_eq!(outcome.best_params, grid().combinations()[0]);
        assert_eq!(outcome.best_model.predict(&x).unwrap(), y);
    }

    #[test]
    fn test_search_fails_when_every_combination_fails() {
        let x = Array2::from_shape_fn((10, 1), |(i, _)| i as f64);
        let y: Vec<usize> = (0..10).map(|i| i % 2).collect();
        let search = HyperparameterSearch::new(SearchStrategy::Grid);
        let result = search.run(&grid(), &x, &y, 2, None, |_| Err(FlowError::TrainingError("boom".to_string())));
        assert!(result.is_err());
    }
}

//! Random Forest and Extra Trees
//!
//! Both are bagged ensembles of [`DecisionTree`]s and differ only in the
//! splitter and the bootstrap default. Trees are grown in parallel, each with
//! its own seed `seed + tree_index`, so results do not depend on scheduling.

use super::decision_tree::{check_width, Criterion, DecisionTree, Splitter, TreeParams};
use super::models::Classifier;
use crate::error::{FlowError, Result};
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Strategy for max features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    /// Square root of n_features
    #[default]
    Sqrt,
    /// Log2 of n_features
    Log2,
    /// All features
    All,
}

impl MaxFeatures {
    pub fn resolve(&self, n_features: usize) -> usize {
        let n = n_features as f64;
        let k = match self {
            MaxFeatures::Sqrt => n.sqrt().floor() as usize,
            MaxFeatures::Log2 => n.log2().floor() as usize,
            MaxFeatures::All => n_features,
        };
        k.clamp(1, n_features.max(1))
    }
}

/// Forest hyperparameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    pub criterion: Criterion,
    pub splitter: Splitter,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Sqrt,
            bootstrap: true,
            criterion: Criterion::Gini,
            splitter: Splitter::Best,
            seed: 42,
        }
    }
}

impl ForestParams {
    /// Extremely randomized trees: random thresholds, no bootstrap
    pub fn extra_trees() -> Self {
        Self { splitter: Splitter::Random, bootstrap: false, ..Self::default() }
    }
}

/// Random Forest model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    trees: Vec<DecisionTree>,
    n_classes: usize,
    n_features: usize,
    feature_importances: Vec<f64>,
}

impl Default for RandomForest {
    fn default() -> Self {
        Self::new(ForestParams::default())
    }
}

impl RandomForest {
    pub fn new(params: ForestParams) -> Self {
        Self {
            params,
            trees: Vec::new(),
            n_classes: 0,
            n_features: 0,
            feature_importances: Vec::new(),
        }
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn is_extra_trees(&self) -> bool {
        self.params.splitter == Splitter::Random
    }

    /// Get number of trees
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Classifier for RandomForest {
    fn fit(&mut self, x: &Array2<f64>, y: &[usize], n_classes: usize, sample_weight: Option<&[f64]>) -> Result<()> {
        let n_samples = x.nrows();
        let n_features = x.ncols();
        if n_samples != y.len() {
            return Err(FlowError::ShapeError {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }
        if self.params.n_estimators == 0 {
            return Err(FlowError::InvalidParameter {
                name: "n_estimators".to_string(),
                value: "0".to_string(),
                reason: "a forest needs at least one tree".to_string(),
            });
        }

        let base_weights: Vec<f64> = sample_weight.map(<[f64]>::to_vec).unwrap_or_else(|| vec![1.0; n_samples]);
        let params = self.params;
        let max_features = params.max_features.resolve(n_features);

        // Build trees in parallel
        let trees: Vec<DecisionTree> = (0..params.n_estimators)
            .into_par_iter()
            .map(|tree_idx| -> Result<DecisionTree> {
                let seed = params.seed.wrapping_add(tree_idx as u64);
                let mut rng = ChaCha8Rng::seed_from_u64(seed);

                // Bootstrap multiplicities fold into the sample weights
                let mut weights = base_weights.clone();
                if params.bootstrap {
                    let mut counts = vec![0u32; n_samples];
                    for _ in 0..n_samples {
                        counts[rng.gen_range(0..n_samples)] += 1;
                    }
                    for (w, &c) in weights.iter_mut().zip(&counts) {
                        *w *= c as f64;
                    }
                }
                let rows: Vec<usize> = (0..n_samples).filter(|&i| weights[i] > 0.0).collect();

                let mut tree = DecisionTree::new(TreeParams {
                    max_depth: params.max_depth,
                    min_samples_split: params.min_samples_split,
                    min_samples_leaf: params.min_samples_leaf,
                    max_features: Some(max_features),
                    criterion: params.criterion,
                    splitter: params.splitter,
                    seed: rng.gen(),
                });
                tree.fit_rows(x, y, n_classes, &weights, rows)?;
                Ok(tree)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut importances = vec![0.0; n_features];
        for tree in &trees {
            if let Some(imp) = tree.feature_importances() {
                for (acc, v) in importances.iter_mut().zip(imp) {
                    *acc += v;
                }
            }
        }
        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }

        self.trees = trees;
        self.n_classes = n_classes;
        self.n_features = n_features;
        self.feature_importances = importances;
        Ok(())
    }

    /// Mean of the per-tree leaf distributions
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Option<Array2<f64>>> {
        if self.trees.is_empty() {
            return Err(FlowError::ModelNotFitted);
        }
        check_width(x, self.n_features)?;

        let n_trees = self.trees.len() as f64;
        let rows: Vec<Vec<f64>> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let sample = x.row(i).to_vec();
                let mut acc = vec![0.0; self.n_classes];
                for tree in &self.trees {
                    if let Some(dist) = tree.leaf_distribution(&sample) {
                        for (a, p) in acc.iter_mut().zip(dist) {
                            *a += p;
                        }
                    }
                }
                acc.iter_mut().for_each(|a| *a /= n_trees);
                acc
            })
            .collect();

        let mut out = Array2::zeros((x.nrows(), self.n_classes));
        for (i, row) in rows.into_iter().enumerate() {
            for (j, p) in row.into_iter().enumerate() {
                out[[i, j]] = p;
            }
        }
        Ok(Some(out))
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        (!self.trees.is_empty()).then(|| self.feature_importances.clone())
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn blobs() -> (Array2<f64>, Vec<usize>) {
        let x = array![
            [0.0, 0.0],
            [0.1, 0.1],
            [0.2, 0.2],
            [1.0, 1.0],
            [1.1, 1.1],
            [1.2, 1.2],
            [2.0, 0.0],
            [2.1, 0.1],
            [2.2, 0.2],
        ];
        (x, vec![0, 0, 0, 1, 1, 1, 2, 2, 2])
    }

    #[test]
    fn test_classifier() {
        let (x, y) = blobs();
        let mut rf = RandomForest::new(ForestParams { n_estimators: 10, ..Default::default() });
        rf.fit(&x, &y, 3, None).unwrap();

        let predictions = rf.predict(&x).unwrap();
        let correct = predictions.iter().zip(&y).filter(|(p, a)| p == a).count();
        assert!(correct as f64 / y.len() as f64 >= 0.8);
    }

    #[test]
    fn test_predict_proba_rows_sum_to_one() {
        let (x, y) = blobs();
        let mut rf = RandomForest::new(ForestParams { n_estimators: 10, ..Default::default() });
        rf.fit(&x, &y, 3, None).unwrap();

        let proba = rf.predict_proba(&x).unwrap().unwrap();
        assert_eq!(proba.dim(), (9, 3));
        for row in proba.outer_iter() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_same_seed_same_forest() {
        let (x, y) = blobs();
        let params = ForestParams { n_estimators: 8, seed: 7, ..Default::default() };
        let mut a = RandomForest::new(params);
        let mut b = RandomForest::new(params);
        a.fit(&x, &y, 3, None).unwrap();
        b.fit(&x, &y, 3, None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_extra_trees() {
        let (x, y) = blobs();
        let mut et = RandomForest::new(ForestParams { n_estimators: 10, ..ForestParams::extra_trees() });
        et.fit(&x, &y, 3, None).unwrap();
        assert!(et.is_extra_trees());
        assert_eq!(et.predict(&x).unwrap(), y);
    }

    #[test]
    fn test_feature_importances() {
        let x = array![[1.0, 0.0], [2.0, 0.0], [3.0, 0.0], [4.0, 0.0]];
        let y = vec![0, 0, 1, 1];
        let mut rf = RandomForest::new(ForestParams { n_estimators: 10, ..Default::default() });
        rf.fit(&x, &y, 2, None).unwrap();
        let importances = rf.feature_importances().unwrap();
        assert_eq!(importances.len(), 2);
        assert!(importances[0] >= importances[1]);
    }

    #[test]
    fn test_max_features_resolution() {
        assert_eq!(MaxFeatures::Sqrt.resolve(50), 7);
        assert_eq!(MaxFeatures::Log2.resolve(50), 5);
        assert_eq!(MaxFeatures::All.resolve(50), 50);
        assert_eq!(MaxFeatures::Log2.resolve(1), 1);
    }
}

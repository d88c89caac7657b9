//! Gradient Boosting implementation
//!
//! Multinomial-deviance boosting: every round fits one regression tree per
//! class to the softmax residuals and sets leaf values with a single Newton
//! step. Row subsampling uses a seeded Xoshiro generator.

use super::decision_tree::check_width;
use super::models::Classifier;
use crate::error::{FlowError, Result};
use ndarray::{Array1, Array2, Axis};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Gradient Boosting configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostingConfig {
    /// Number of boosting rounds
    pub n_estimators: usize,
    /// Learning rate (shrinkage)
    pub learning_rate: f64,
    /// Maximum tree depth
    pub max_depth: usize,
    /// Minimum samples per leaf
    pub min_samples_leaf: usize,
    /// Subsample ratio for each round
    pub subsample: f64,
    /// Random seed
    pub random_state: u64,
}

impl Default for GradientBoostingConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_leaf: 1,
            subsample: 1.0,
            random_state: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum RegNode {
    Leaf { value: f64 },
    Split { feature: usize, threshold: f64, left: usize, right: usize },
}

/// Least-squares regression tree on residuals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RegressionTree {
    nodes: Vec<RegNode>,
}

impl RegressionTree {
    /// Grow on `rows`, then set each leaf to `leaf_value(rows in leaf)`
    fn fit<F>(
        x: &Array2<f64>,
        residuals: &[f64],
        rows: Vec<usize>,
        max_depth: usize,
        min_samples_leaf: usize,
        importances: &mut [f64],
        leaf_value: F,
    ) -> Self
    where
        F: Fn(&[usize]) -> f64,
    {
        let mut nodes = vec![RegNode::Leaf { value: 0.0 }];
        let mut stack = vec![(0usize, rows, 0usize)];

        while let Some((node, rows, depth)) = stack.pop() {
            let split = if depth < max_depth && rows.len() >= 2 * min_samples_leaf.max(1) {
                best_split(x, residuals, &rows, min_samples_leaf)
            } else {
                None
            };

            match split {
                Some((feature, threshold, gain)) => {
                    importances[feature] += gain;
                    let (l, r): (Vec<usize>, Vec<usize>) = rows.iter().partition(|&&i| x[[i, feature]] <= threshold);
                    let left = nodes.len();
                    nodes.push(RegNode::Leaf { value: 0.0 });
                    let right = nodes.len();
                    nodes.push(RegNode::Leaf { value: 0.0 });
                    nodes[node] = RegNode::Split { feature, threshold, left, right };
                    stack.push((right, r, depth + 1));
                    stack.push((left, l, depth + 1));
                }
                None => nodes[node] = RegNode::Leaf { value: leaf_value(&rows) },
            }
        }
        Self { nodes }
    }

    fn predict_row(&self, sample: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                RegNode::Leaf { value } => return *value,
                RegNode::Split { feature, threshold, left, right } => {
                    idx = if sample[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

// Best least-squares split over all features: (feature, threshold, SSE reduction)
fn best_split(x: &Array2<f64>, r: &[f64], rows: &[usize], min_leaf: usize) -> Option<(usize, f64, f64)> {
    let n = rows.len() as f64;
    let total: f64 = rows.iter().map(|&i| r[i]).sum();
    let parent_score = total * total / n;
    let min_leaf = min_leaf.max(1);

    (0..x.ncols())
        .into_par_iter()
        .filter_map(|feature| {
            let mut order = rows.to_vec();
            order.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));
            let mut left_sum = 0.0;
            let mut best: Option<(f64, f64)> = None;
            for pos in 0..order.len() - 1 {
                left_sum += r[order[pos]];
                let n_left = pos + 1;
                let n_right = order.len() - n_left;
                if n_left < min_leaf || n_right < min_leaf {
                    continue;
                }
                let here = x[[order[pos], feature]];
                let next = x[[order[pos + 1], feature]];
                if here == next {
                    continue;
                }
                let right_sum = total - left_sum;
                let score = left_sum * left_sum / n_left as f64 + right_sum * right_sum / n_right as f64;
                let gain = score - parent_score;
                if gain > 1e-12 && best.map_or(true, |(_, g)| gain > g) {
                    best = Some((here + (next - here) / 2.0, gain));
                }
            }
            best.map(|(threshold, gain)| (feature, threshold, gain))
        })
        .collect::<Vec<_>>()
        .into_iter()
        // lowest feature index wins ties
        .fold(None, |acc: Option<(usize, f64, f64)>, cand| match acc {
            Some(a) if a.2 > cand.2 || (a.2 == cand.2 && a.0 < cand.0) => Some(a),
            _ => Some(cand),
        })
}

/// Multiclass gradient boosting classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostingClassifier {
    config: GradientBoostingConfig,
    /// `trees[round][class]`
    trees: Vec<Vec<RegressionTree>>,
    initial_scores: Vec<f64>,
    n_classes: usize,
    n_features: usize,
    feature_importances: Vec<f64>,
}

impl GradientBoostingClassifier {
    pub fn new(config: GradientBoostingConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            initial_scores: Vec::new(),
            n_classes: 0,
            n_features: 0,
            feature_importances: Vec::new(),
        }
    }

    pub fn config(&self) -> &GradientBoostingConfig {
        &self.config
    }

    fn subsample_indices(&self, n: usize, rng: &mut Xoshiro256PlusPlus) -> Vec<usize> {
        let sample_size = (((n as f64) * self.config.subsample).ceil() as usize).clamp(1, n);
        let mut indices: Vec<usize> = (0..n).collect();
        if sample_size < n {
            indices.shuffle(rng);
            indices.truncate(sample_size);
            indices.sort_unstable();
        }
        indices
    }

    fn raw_scores(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut scores = Array2::zeros((x.nrows(), self.n_classes));
        for (i, row) in x.outer_iter().enumerate() {
            let sample = row.to_vec();
            for k in 0..self.n_classes {
                let mut s = self.initial_scores[k];
                for round in &self.trees {
                    s += self.config.learning_rate * round[k].predict_row(&sample);
                }
                scores[[i, k]] = s;
            }
        }
        scores
    }
}

fn softmax_rows(scores: &mut Array2<f64>) {
    for mut row in scores.axis_iter_mut(Axis(0)) {
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
}

impl Classifier for GradientBoostingClassifier {
    /// Sample weights are not used by this learner
    fn fit(&mut self, x: &Array2<f64>, y: &[usize], n_classes: usize, _sample_weight: Option<&[f64]>) -> Result<()> {
        let n_samples = x.nrows();
        let n_features = x.ncols();
        if n_samples != y.len() || n_samples == 0 {
            return Err(FlowError::ShapeError {
                expected: format!("{} labels", n_samples),
                actual: format!("{} labels", y.len()),
            });
        }
        if !(self.config.subsample > 0.0 && self.config.subsample <= 1.0) {
            return Err(FlowError::InvalidParameter {
                name: "subsample".to_string(),
                value: self.config.subsample.to_string(),
                reason: "must be in (0, 1]".to_string(),
            });
        }

        // Log class priors
        let mut counts = vec![0.0; n_classes];
        for &c in y {
            counts[c] += 1.0;
        }
        let initial: Vec<f64> = counts.iter().map(|&c| (c / n_samples as f64).max(1e-12).ln()).collect();

        let mut scores = Array2::from_shape_fn((n_samples, n_classes), |(_, k)| initial[k]);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.random_state);
        let mut importances = vec![0.0; n_features];
        let mut rounds = Vec::with_capacity(self.config.n_estimators);
        let factor = (n_classes as f64 - 1.0) / n_classes as f64;

        for _ in 0..self.config.n_estimators {
            let mut proba = scores.clone();
            softmax_rows(&mut proba);
            let rows = self.subsample_indices(n_samples, &mut rng);

            let fitted: Vec<(RegressionTree, Vec<f64>)> = (0..n_classes)
                .into_par_iter()
                .map(|k| {
                    let residuals: Vec<f64> = (0..n_samples)
                        .map(|i| (if y[i] == k { 1.0 } else { 0.0 }) - proba[[i, k]])
                        .collect();
                    let mut imp = vec![0.0; n_features];
                    let tree = RegressionTree::fit(
                        x,
                        &residuals,
                        rows.clone(),
                        self.config.max_depth,
                        self.config.min_samples_leaf,
                        &mut imp,
                        |leaf| {
                            let num: f64 = leaf.iter().map(|&i| residuals[i]).sum();
                            let den: f64 = leaf.iter().map(|&i| residuals[i].abs() * (1.0 - residuals[i].abs())).sum();
                            if den.abs() < 1e-150 { 0.0 } else { factor * num / den }
                        },
                    );
                    (tree, imp)
                })
                .collect();

            let mut round = Vec::with_capacity(n_classes);
            for (k, (tree, imp)) in fitted.into_iter().enumerate() {
                for (acc, v) in importances.iter_mut().zip(imp) {
                    *acc += v;
                }
                for (i, row) in x.outer_iter().enumerate() {
                    scores[[i, k]] += self.config.learning_rate * tree.predict_row(&row.to_vec());
                }
                round.push(tree);
            }
            rounds.push(round);
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }

        self.trees = rounds;
        self.initial_scores = initial;
        self.n_classes = n_classes;
        self.n_features = n_features;
        self.feature_importances = importances;
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Option<Array2<f64>>> {
        if self.initial_scores.is_empty() {
            return Err(FlowError::ModelNotFitted);
        }
        check_width(x, self.n_features)?;
        let mut scores = self.raw_scores(x);
        softmax_rows(&mut scores);
        Ok(Some(scores))
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        (!self.initial_scores.is_empty()).then(|| self.feature_importances.clone())
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }
}

/// Training deviance of a probability matrix, used by tests and diagnostics
pub fn log_loss(proba: &Array2<f64>, y: &[usize]) -> f64 {
    let losses: Array1<f64> = y
        .iter()
        .enumerate()
        .map(|(i, &c)| -proba[[i, c]].max(1e-15).ln())
        .collect();
    losses.mean().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_classification_data() -> (Array2<f64>, Vec<usize>) {
        let x = Array2::from_shape_vec((90, 2), (0..180).map(|i| (i % 90) as f64 * 0.1).collect()).unwrap();
        let y = x
            .rows()
            .into_iter()
            .map(|row| {
                let s = row[0] + row[1];
                if s < 3.0 { 0 } else if s < 6.0 { 1 } else { 2 }
            })
            .collect();
        (x, y)
    }

    #[test]
    fn test_gradient_boosting_classifier() {
        let (x, y) = create_classification_data();
        let config = GradientBoostingConfig { n_estimators: 20, max_depth: 3, ..Default::default() };

        let mut model = GradientBoostingClassifier::new(config);
        model.fit(&x, &y, 3, None).unwrap();

        let predictions = model.predict(&x).unwrap();
        let correct = y.iter().zip(&predictions).filter(|(a, b)| a == b).count();
        let accuracy = correct as f64 / y.len() as f64;
        assert!(accuracy > 0.9, "Accuracy ({}) should be above 90%", accuracy);
    }

    #[test]
    fn test_loss_decreases_with_rounds() {
        let (x, y) = create_classification_data();
        let mut short = GradientBoostingClassifier::new(GradientBoostingConfig { n_estimators: 2, ..Default::default() });
        let mut long = GradientBoostingClassifier::new(GradientBoostingConfig { n_estimators: 20, ..Default::default() });
        short.fit(&x, &y, 3, None).unwrap();
        long.fit(&x, &y, 3, None).unwrap();
        let a = log_loss(&short.predict_proba(&x).unwrap().unwrap(), &y);
        let b = log_loss(&long.predict_proba(&x).unwrap().unwrap(), &y);
        assert!(b < a);
    }

    #[test]
    fn test_subsample_is_seeded() {
        let (x, y) = create_classification_data();
        let config = GradientBoostingConfig { n_estimators: 5, subsample: 0.8, ..Default::default() };
        let mut a = GradientBoostingClassifier::new(config);
        let mut b = GradientBoostingClassifier::new(config);
        a.fit(&x, &y, 3, None).unwrap();
        b.fit(&x, &y, 3, None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_feature_importances() {
        let (x, y) = create_classification_data();
        let mut model = GradientBoostingClassifier::new(GradientBoostingConfig { n_estimators: 10, ..Default::default() });
        model.fit(&x, &y, 3, None).unwrap();

        let importances = model.feature_importances().unwrap();
        assert_eq!(importances.len(), 2);
        let sum: f64 = importances.iter().sum();
        assert!((sum - 1.0).abs() < 0.01, "Sum of importances ({}) should be ~1", sum);
    }
}

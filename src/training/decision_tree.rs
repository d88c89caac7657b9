//! Weighted CART classification tree
//!
//! Nodes live in a flat arena and are grown with an explicit stack, so deep
//! unpruned trees never recurse during fit, predict or serialization.

use super::models::Classifier;
use crate::error::{FlowError, Result};
use ndarray::Array2;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Decision tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    /// Leaf node with the weighted class distribution of its samples
    Leaf { distribution: Vec<f64> },
    /// Internal node; `left` and `right` index into the node arena
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Impurity criterion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Criterion {
    /// Gini impurity
    #[default]
    Gini,
    /// Entropy
    Entropy,
}

impl Criterion {
    fn impurity(&self, counts: &[f64], total: f64) -> f64 {
        if total <= 0.0 {
            return 0.0;
        }
        match self {
            Criterion::Gini => 1.0 - counts.iter().map(|&c| (c / total).powi(2)).sum::<f64>(),
            Criterion::Entropy => -counts
                .iter()
                .filter(|&&c| c > 0.0)
                .map(|&c| {
                    let p = c / total;
                    p * p.ln()
                })
                .sum::<f64>(),
        }
    }
}

/// How split thresholds are chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Splitter {
    /// Best threshold over every distinct value
    #[default]
    Best,
    /// One uniformly drawn threshold per candidate feature (extremely randomized trees)
    Random,
}

/// Growth parameters of a tree
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Candidate features per split; `None` means all
    pub max_features: Option<usize>,
    pub criterion: Criterion,
    pub splitter: Splitter,
    pub seed: u64,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            criterion: Criterion::Gini,
            splitter: Splitter::Best,
            seed: 42,
        }
    }
}

/// Decision tree classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    params: TreeParams,
    nodes: Vec<TreeNode>,
    n_classes: usize,
    n_features: usize,
    feature_importances: Vec<f64>,
}

impl Default for DecisionTree {
    fn default() -> Self {
        Self::new(TreeParams::default())
    }
}

struct Pending {
    node: usize,
    rows: Vec<usize>,
    depth: usize,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl DecisionTree {
    pub fn new(params: TreeParams) -> Self {
        Self {
            params,
            nodes: Vec::new(),
            n_classes: 0,
            n_features: 0,
            feature_importances: Vec::new(),
        }
    }

    /// Set maximum depth
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.params.max_depth = Some(depth);
        self
    }

    /// Set criterion
    pub fn with_criterion(mut self, criterion: Criterion) -> Self {
        self.params.criterion = criterion;
        self
    }

    pub fn params(&self) -> &TreeParams {
        &self.params
    }

    /// Fit on the rows listed in `rows`, each weighted by `weights[row]`.
    ///
    /// Forests pass bootstrap multiplicities folded into the weights.
    pub fn fit_rows(
        &mut self,
        x: &Array2<f64>,
        y: &[usize],
        n_classes: usize,
        weights: &[f64],
        rows: Vec<usize>,
    ) -> Result<&mut Self> {
        if x.nrows() != y.len() || weights.len() != y.len() {
            return Err(FlowError::ShapeError {
                expected: format!("{} labels and weights", x.nrows()),
                actual: format!("{} labels, {} weights", y.len(), weights.len()),
            });
        }
        if rows.is_empty() {
            return Err(FlowError::TrainingError("cannot grow a tree from zero rows".to_string()));
        }
        if let Some(&bad) = y.iter().find(|&&c| c >= n_classes) {
            return Err(FlowError::TrainingError(format!("class index {} out of range", bad)));
        }

        let n_features = x.ncols();
        let mut rng = ChaCha8Rng::seed_from_u64(self.params.seed);
        let max_features = self.params.max_features.unwrap_or(n_features).clamp(1, n_features.max(1));
        let mut nodes: Vec<TreeNode> = vec![TreeNode::Leaf { distribution: Vec::new() }];
        let mut importances = vec![0.0; n_features];
        let mut features: Vec<usize> = (0..n_features).collect();

        let mut stack = vec![Pending { node: 0, rows, depth: 0 }];
        while let Some(Pending { node, rows, depth }) = stack.pop() {
            let counts = class_weights(y, weights, &rows, n_classes);
            let total: f64 = counts.iter().sum();
            let impurity = self.params.criterion.impurity(&counts, total);

            let stop = rows.len() < self.params.min_samples_split
                || rows.len() < 2 * self.params.min_samples_leaf
                || self.params.max_depth.is_some_and(|d| depth >= d)
                || impurity <= 1e-12;

            let split = if stop {
                None
            } else {
                features.shuffle(&mut rng);
                self.find_split(x, y, weights, &rows, &counts, impurity, &features, max_features, &mut rng)
            };

            match split {
                Some(best) => {
                    let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
                        rows.iter().partition(|&&i| x[[i, best.feature]] <= best.threshold);
                    importances[best.feature] += total * best.gain.max(0.0);

                    let left = nodes.len();
                    nodes.push(TreeNode::Leaf { distribution: Vec::new() });
                    let right = nodes.len();
                    nodes.push(TreeNode::Leaf { distribution: Vec::new() });
                    nodes[node] = TreeNode::Split { feature: best.feature, threshold: best.threshold, left, right };

                    stack.push(Pending { node: right, rows: right_rows, depth: depth + 1 });
                    stack.push(Pending { node: left, rows: left_rows, depth: depth + 1 });
                }
                None => {
                    let distribution = if total > 0.0 {
                        counts.iter().map(|&c| c / total).collect()
                    } else {
                        vec![1.0 / n_classes as f64; n_classes]
                    };
                    nodes[node] = TreeNode::Leaf { distribution };
                }
            }
        }

        let sum: f64 = importances.iter().sum();
        if sum > 0.0 {
            importances.iter_mut().for_each(|v| *v /= sum);
        }

        self.nodes = nodes;
        self.n_classes = n_classes;
        self.n_features = n_features;
        self.feature_importances = importances;
        Ok(self)
    }

    #[allow(clippy::too_many_arguments)]
    fn find_split(
        &self,
        x: &Array2<f64>,
        y: &[usize],
        weights: &[f64],
        rows: &[usize],
        parent_counts: &[f64],
        parent_impurity: f64,
        features: &[usize],
        max_features: usize,
        rng: &mut ChaCha8Rng,
    ) -> Option<SplitCandidate> {
        let total: f64 = parent_counts.iter().sum();
        let mut best: Option<SplitCandidate> = None;
        let mut visited = 0usize;

        // Constant features do not count towards max_features
        for &feature in features {
            if visited >= max_features && best.is_some() {
                break;
            }
            visited += 1;

            let candidate = match self.params.splitter {
                Splitter::Best => self.best_threshold(x, y, weights, rows, feature, parent_counts),
                Splitter::Random => {
                    self.random_threshold(x, y, weights, rows, feature, parent_counts.len(), rng)
                }
            };
            if let Some((threshold, child_impurity)) = candidate {
                let gain = parent_impurity - child_impurity / total;
                if best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(SplitCandidate { feature, threshold, gain });
                }
            }
        }
        best
    }

    // Weighted child impurity sum of the best threshold on `feature`
    fn best_threshold(
        &self,
        x: &Array2<f64>,
        y: &[usize],
        weights: &[f64],
        rows: &[usize],
        feature: usize,
        parent_counts: &[f64],
    ) -> Option<(f64, f64)> {
        let mut order: Vec<usize> = rows.to_vec();
        order.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));
        if x[[order[0], feature]] == x[[order[order.len() - 1], feature]] {
            return None;
        }

        let min_leaf = self.params.min_samples_leaf;
        let mut left = vec![0.0; parent_counts.len()];
        let mut right = parent_counts.to_vec();
        let mut left_w = 0.0;
        let mut right_w: f64 = parent_counts.iter().sum();
        let mut best: Option<(f64, f64)> = None;

        for pos in 0..order.len() - 1 {
            let row = order[pos];
            let w = weights[row];
            left[y[row]] += w;
            right[y[row]] -= w;
            left_w += w;
            right_w -= w;

            let n_left = pos + 1;
            if n_left < min_leaf || order.len() - n_left < min_leaf {
                continue;
            }
            let here = x[[row, feature]];
            let next = x[[order[pos + 1], feature]];
            if here == next {
                continue;
            }

            let child = left_w * self.params.criterion.impurity(&left, left_w)
                + right_w.max(0.0) * self.params.criterion.impurity(&right, right_w.max(0.0));
            if best.map_or(true, |(_, b)| child < b) {
                let mut threshold = here + (next - here) / 2.0;
                if threshold >= next {
                    threshold = here;
                }
                best = Some((threshold, child));
            }
        }
        best
    }

    #[allow(clippy::too_many_arguments)]
    fn random_threshold(
        &self,
        x: &Array2<f64>,
        y: &[usize],
        weights: &[f64],
        rows: &[usize],
        feature: usize,
        n_classes: usize,
        rng: &mut ChaCha8Rng,
    ) -> Option<(f64, f64)> {
        let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
            let v = x[[i, feature]];
            (lo.min(v), hi.max(v))
        });
        if !(hi > lo) {
            return None;
        }
        let threshold = rng.gen_range(lo..hi);

        let mut left = vec![0.0; n_classes];
        let mut right = vec![0.0; n_classes];
        let mut n_left = 0usize;
        for &i in rows {
            if x[[i, feature]] <= threshold {
                left[y[i]] += weights[i];
                n_left += 1;
            } else {
                right[y[i]] += weights[i];
            }
        }
        let min_leaf = self.params.min_samples_leaf;
        if n_left < min_leaf || rows.len() - n_left < min_leaf {
            return None;
        }
        let lw: f64 = left.iter().sum();
        let rw: f64 = right.iter().sum();
        let child = lw * self.params.criterion.impurity(&left, lw) + rw * self.params.criterion.impurity(&right, rw);
        Some((threshold, child))
    }

    /// Class distribution of the leaf reached by one sample
    pub fn leaf_distribution(&self, sample: &[f64]) -> Option<&[f64]> {
        let mut idx = 0;
        loop {
            match self.nodes.get(idx)? {
                TreeNode::Leaf { distribution } => return Some(distribution),
                TreeNode::Split { feature, threshold, left, right } => {
                    idx = if sample[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    /// Get tree depth
    pub fn depth(&self) -> usize {
        if self.nodes.is_empty() {
            return 0;
        }
        let mut max_depth = 0;
        let mut stack = vec![(0usize, 1usize)];
        while let Some((idx, d)) = stack.pop() {
            max_depth = max_depth.max(d);
            if let TreeNode::Split { left, right, .. } = &self.nodes[idx] {
                stack.push((*left, d + 1));
                stack.push((*right, d + 1));
            }
        }
        max_depth
    }

    /// Get number of leaves
    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| matches!(n, TreeNode::Leaf { .. })).count()
    }

    pub fn is_fitted(&self) -> bool {
        !self.nodes.is_empty()
    }
}

fn class_weights(y: &[usize], weights: &[f64], rows: &[usize], n_classes: usize) -> Vec<f64> {
    let mut counts = vec![0.0; n_classes];
    for &i in rows {
        counts[y[i]] += weights[i];
    }
    counts
}

impl Classifier for DecisionTree {
    fn fit(&mut self, x: &Array2<f64>, y: &[usize], n_classes: usize, sample_weight: Option<&[f64]>) -> Result<()> {
        let weights = sample_weight.map(<[f64]>::to_vec).unwrap_or_else(|| vec![1.0; y.len()]);
        let rows = (0..y.len()).filter(|&i| weights[i] > 0.0).collect();
        self.fit_rows(x, y, n_classes, &weights, rows)?;
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Option<Array2<f64>>> {
        if !self.is_fitted() {
            return Err(FlowError::ModelNotFitted);
        }
        check_width(x, self.n_features)?;
        let mut out = Array2::zeros((x.nrows(), self.n_classes));
        for (i, row) in x.outer_iter().enumerate() {
            let sample = row.to_vec();
            if let Some(dist) = self.leaf_distribution(&sample) {
                for (c, &p) in dist.iter().enumerate() {
                    out[[i, c]] = p;
                }
            }
        }
        Ok(Some(out))
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        self.is_fitted().then(|| self.feature_importances.clone())
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }
}

/// Fail when `x` does not have the fitted column count
pub(crate) fn check_width(x: &Array2<f64>, n_features: usize) -> Result<()> {
    if x.ncols() != n_features {
        return Err(FlowError::ShapeError {
            expected: format!("{} features", n_features),
            actual: format!("{} features", x.ncols()),
        });
    }
    Ok(())
}

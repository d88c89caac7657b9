//! K-Nearest Neighbors implementation
//!
//! Brute-force neighbor search with a bounded max-heap per query row,
//! parallelized over query rows.

use super::decision_tree::check_width;
use super::models::Classifier;
use crate::error::{FlowError, Result};
use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Distance metric for KNN
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// Euclidean distance (L2)
    #[default]
    Euclidean,
    /// Manhattan distance (L1)
    Manhattan,
}

/// Weighting scheme for neighbors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightScheme {
    /// All neighbors have equal weight
    #[default]
    Uniform,
    /// Closer neighbors have more weight (inverse distance)
    Distance,
}

/// KNN configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KNNConfig {
    /// Number of neighbors
    pub n_neighbors: usize,
    /// Distance metric
    pub metric: DistanceMetric,
    /// Weighting scheme
    pub weights: WeightScheme,
}

impl Default for KNNConfig {
    fn default() -> Self {
        Self {
            n_neighbors: 5,
            metric: DistanceMetric::Euclidean,
            weights: WeightScheme::Uniform,
        }
    }
}

/// K-Nearest Neighbors Classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KNNClassifier {
    config: KNNConfig,
    x_train: Option<Array2<f64>>,
    y_train: Vec<usize>,
    n_classes: usize,
}

impl KNNClassifier {
    pub fn new(config: KNNConfig) -> Self {
        Self {
            config,
            x_train: None,
            y_train: Vec::new(),
            n_classes: 0,
        }
    }

    /// Create with default config and specified k
    pub fn with_k(k: usize) -> Self {
        Self::new(KNNConfig {
            n_neighbors: k,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &KNNConfig {
        &self.config
    }
}

impl Classifier for KNNClassifier {
    /// Stores the training data; sample weights are not used
    fn fit(&mut self, x: &Array2<f64>, y: &[usize], n_classes: usize, _sample_weight: Option<&[f64]>) -> Result<()> {
        if x.nrows() != y.len() {
            return Err(FlowError::ShapeError {
                expected: format!("y length = {}", x.nrows()),
                actual: format!("y length = {}", y.len()),
            });
        }
        if self.config.n_neighbors == 0 {
            return Err(FlowError::InvalidParameter {
                name: "n_neighbors".to_string(),
                value: "0".to_string(),
                reason: "at least one neighbor is required".to_string(),
            });
        }
        self.x_train = Some(x.clone());
        self.y_train = y.to_vec();
        self.n_classes = n_classes;
        Ok(())
    }

    /// Neighbor vote shares (parallelized over query rows)
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Option<Array2<f64>>> {
        let x_train = self.x_train.as_ref().ok_or(FlowError::ModelNotFitted)?;
        check_width(x, x_train.ncols())?;
        let k = self.config.n_neighbors.min(x_train.nrows());
        let n_classes = self.n_classes;

        let probs: Vec<Vec<f64>> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let neighbors = find_k_nearest(x.row(i), x_train, k, self.config.metric);
                class_probs_from(&neighbors, &self.y_train, n_classes, self.config.weights)
            })
            .collect();

        let mut out = Array2::zeros((x.nrows(), n_classes));
        for (i, row) in probs.into_iter().enumerate() {
            for (j, p) in row.into_iter().enumerate() {
                out[[i, j]] = p;
            }
        }
        Ok(Some(out))
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }
}

/// Max-heap entry keeping the k smallest (distance, training row) pairs
#[derive(PartialEq)]
struct Neighbor(f64, usize);

impl Eq for Neighbor {}
impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0).then(self.1.cmp(&other.1))
    }
}

/// Find k nearest neighbors using a max-heap, O(n log k); ties keep the
/// earlier training row
fn find_k_nearest(point: ArrayView1<f64>, x_train: &Array2<f64>, k: usize, metric: DistanceMetric) -> Vec<(f64, usize)> {
    let mut heap = BinaryHeap::with_capacity(k + 1);

    for (i, row) in x_train.outer_iter().enumerate() {
        let dist = compute_distance(point, row, metric);
        if heap.len() < k {
            heap.push(Neighbor(dist, i));
        } else if let Some(top) = heap.peek() {
            if dist < top.0 {
                heap.pop();
                heap.push(Neighbor(dist, i));
            }
        }
    }

    heap.into_iter().map(|n| (n.0, n.1)).collect()
}

fn compute_distance(a: ArrayView1<f64>, b: ArrayView1<f64>, metric: DistanceMetric) -> f64 {
    match metric {
        DistanceMetric::Euclidean => a
            .iter()
            .zip(b.iter())
            .map(|(ai, bi)| {
                let d = ai - bi;
                d * d
            })
            .sum::<f64>()
            .sqrt(),
        DistanceMetric::Manhattan => a.iter().zip(b.iter()).map(|(ai, bi)| (ai - bi).abs()).sum(),
    }
}

/// Vote shares per class. Under distance weighting, exact matches take the
/// whole vote.
fn class_probs_from(neighbors: &[(f64, usize)], y_train: &[usize], n_classes: usize, weights: WeightScheme) -> Vec<f64> {
    let mut counts = vec![0.0; n_classes];
    let exact = weights == WeightScheme::Distance && neighbors.iter().any(|&(d, _)| d == 0.0);
    for &(dist, row) in neighbors {
        let weight = match weights {
            WeightScheme::Uniform => 1.0,
            WeightScheme::Distance if exact => {
                if dist == 0.0 { 1.0 } else { 0.0 }
            }
            WeightScheme::Distance => 1.0 / dist,
        };
        counts[y_train[row]] += weight;
    }
    let total: f64 = counts.iter().sum();
    if total > 0.0 {
        counts.iter_mut().for_each(|c| *c /= total);
    }
    counts
}

//! Cross-validation implementations

use crate::error::{FlowError, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// A single train/test split
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CVSplit {
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
    pub fold_idx: usize,
}

/// Stratified K-Fold splitter: every fold keeps roughly the overall class
/// proportions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StratifiedKFold {
    n_splits: usize,
    shuffle: bool,
    random_state: u64,
}

impl StratifiedKFold {
    pub fn new(n_splits: usize) -> Self {
        Self {
            n_splits,
            shuffle: true,
            random_state: 42,
        }
    }

    /// Set random state for reproducibility
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn n_splits(&self) -> usize {
        self.n_splits
    }

    /// Generate train/test splits over class indices `y`
    ///
    /// Members of each class are dealt round-robin across folds, continuing
    /// from where the previous class stopped, so fold sizes differ by at most
    /// one. Index lists come back sorted.
    pub fn split(&self, y: &[usize], n_classes: usize) -> Result<Vec<CVSplit>> {
        let n_samples = y.len();
        if self.n_splits < 2 {
            return Err(FlowError::InvalidParameter {
                name: "cv_folds".to_string(),
                value: self.n_splits.to_string(),
                reason: "at least 2 folds are required".to_string(),
            });
        }
        if self.n_splits > n_samples {
            return Err(FlowError::TrainingError(format!(
                "cannot split {} samples into {} folds",
                n_samples, self.n_splits
            )));
        }

        // Group samples by class
        let mut class_indices: Vec<Vec<usize>> = vec![Vec::new(); n_classes];
        for (idx, &class) in y.iter().enumerate() {
            if class >= n_classes {
                return Err(FlowError::TrainingError(format!("class index {} out of range", class)));
            }
            class_indices[class].push(idx);
        }

        if self.shuffle {
            let mut rng = ChaCha8Rng::seed_from_u64(self.random_state);
            for indices in class_indices.iter_mut() {
                indices.shuffle(&mut rng);
            }
        }

        let mut folds: Vec<Vec<usize>> = vec![Vec::new(); self.n_splits];
        let mut offset = 0;
        for indices in &class_indices {
            for (i, &idx) in indices.iter().enumerate() {
                folds[(offset + i) % self.n_splits].push(idx);
            }
            offset += indices.len();
        }
        for fold in folds.iter_mut() {
            fold.sort_unstable();
        }

        let splits = (0..self.n_splits)
            .map(|fold_idx| {
                let mut train_indices: Vec<usize> = folds
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != fold_idx)
                    .flat_map(|(_, f)| f.iter().copied())
                    .collect();
                train_indices.sort_unstable();
                CVSplit {
                    train_indices,
                    test_indices: folds[fold_idx].clone(),
                    fold_idx,
                }
            })
            .collect();
        Ok(splits)
    }
}

/// Cross-validation results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CVResults {
    /// Scores for each fold
    pub scores: Vec<f64>,
    /// Mean score across folds
    pub mean_score: f64,
    /// Standard deviation of scores
    pub std_score: f64,
    /// Number of folds
    pub n_folds: usize,
}

impl CVResults {
    /// Create CV results from fold scores
    pub fn from_scores(scores: Vec<f64>) -> Self {
        let n_folds = scores.len();
        let mean_score = scores.iter().sum::<f64>() / n_folds.max(1) as f64;
        let variance = scores.iter().map(|s| (s - mean_score).powi(2)).sum::<f64>() / n_folds.max(1) as f64;

        Self {
            scores,
            mean_score,
            std_score: variance.sqrt(),
            n_folds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stratified_k_fold() {
        let y = vec![0, 0, 0, 0, 0, 1, 1, 1, 1, 1];
        let splits = StratifiedKFold::new(5).with_shuffle(false).split(&y, 2).unwrap();

        assert_eq!(splits.len(), 5);
        // Each fold should have 1 sample from each class
        for split in &splits {
            assert_eq!(split.test_indices.len(), 2);
            let classes: Vec<usize> = split.test_indices.iter().map(|&i| y[i]).collect();
            assert!(classes.contains(&0) && classes.contains(&1));
        }
    }

    #[test]
    fn test_every_index_tested_once() {
        let y: Vec<usize> = (0..23).map(|i| i % 3).collect();
        let splits = StratifiedKFold::new(5).with_random_state(9).split(&y, 3).unwrap();

        let mut all_test: Vec<usize> = splits.iter().flat_map(|s| s.test_indices.clone()).collect();
        all_test.sort();
        assert_eq!(all_test, (0..23).collect::<Vec<_>>());
        for split in &splits {
            assert_eq!(split.train_indices.len() + split.test_indices.len(), 23);
            assert!(!split.test_indices.is_empty());
        }
    }

    #[test]
    fn test_seeded_shuffle_is_reproducible() {
        let y: Vec<usize> = (0..40).map(|i| i % 2).collect();
        let a = StratifiedKFold::new(5).with_random_state(3).split(&y, 2).unwrap();
        let b = StratifiedKFold::new(5).with_random_state(3).split(&y, 2).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_too_many_folds() {
        assert!(StratifiedKFold::new(5).split(&[0, 1, 0], 2).is_err());
        assert!(StratifiedKFold::new(1).split(&[0, 1, 0], 2).is_err());
    }

    #[test]
    fn test_cv_results() {
        let results = CVResults::from_scores(vec![0.8, 1.0]);
        assert!((results.mean_score - 0.9).abs() < 1e-12);
        assert!((results.std_score - 0.1).abs() < 1e-12);
    }
}

//! Classification metrics over class indices

use serde::{Deserialize, Serialize};

/// Precision, recall, F1 and support for one class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassReport {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Metrics for model evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub accuracy: f64,
    /// Support-weighted mean of the per-class F1 scores
    pub weighted_f1: f64,
    /// `confusion_matrix[true][predicted]`
    pub confusion_matrix: Vec<Vec<usize>>,
    pub per_class: Vec<ClassReport>,
    /// Number of evaluated samples
    pub n_samples: usize,
}

impl ModelMetrics {
    /// Compute classification metrics. Classes without predictions score a
    /// precision of zero.
    pub fn compute_classification(y_true: &[usize], y_pred: &[usize], n_classes: usize) -> Self {
        let confusion_matrix = confusion_matrix(y_true, y_pred, n_classes);
        let n_samples = y_true.len();

        let correct: usize = (0..n_classes).map(|c| confusion_matrix[c][c]).sum();
        let accuracy = if n_samples > 0 { correct as f64 / n_samples as f64 } else { 0.0 };

        let per_class: Vec<ClassReport> = (0..n_classes)
            .map(|c| {
                let tp = confusion_matrix[c][c];
                let support: usize = confusion_matrix[c].iter().sum();
                let predicted: usize = confusion_matrix.iter().map(|row| row[c]).sum();
                let precision = if predicted > 0 { tp as f64 / predicted as f64 } else { 0.0 };
                let recall = if support > 0 { tp as f64 / support as f64 } else { 0.0 };
                let f1 = if precision + recall > 0.0 { 2.0 * precision * recall / (precision + recall) } else { 0.0 };
                ClassReport { precision, recall, f1, support }
            })
            .collect();

        let weighted_f1 = if n_samples > 0 {
            per_class.iter().map(|r| r.f1 * r.support as f64).sum::<f64>() / n_samples as f64
        } else {
            0.0
        };

        Self {
            accuracy,
            weighted_f1,
            confusion_matrix,
            per_class,
            n_samples,
        }
    }
}

pub fn confusion_matrix(y_true: &[usize], y_pred: &[usize], n_classes: usize) -> Vec<Vec<usize>> {
    let mut matrix = vec![vec![0; n_classes]; n_classes];
    for (&t, &p) in y_true.iter().zip(y_pred) {
        if t < n_classes && p < n_classes {
            matrix[t][p] += 1;
        }
    }
    matrix
}

/// Weighted F1 alone, used as the cross-validation score
pub fn weighted_f1(y_true: &[usize], y_pred: &[usize], n_classes: usize) -> f64 {
    ModelMetrics::compute_classification(y_true, y_pred, n_classes).weighted_f1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_predictions() {
        let y = vec![0, 1, 2, 1];
        let m = ModelMetrics::compute_classification(&y, &y, 3);
        assert_eq!(m.accuracy, 1.0);
        assert_eq!(m.weighted_f1, 1.0);
        assert_eq!(m.confusion_matrix, vec![vec![1, 0, 0], vec![0, 2, 0], vec![0, 0, 1]]);
    }

    #[test]
    fn test_weighted_f1_by_support() {
        // class 0: tp 2, fn 1; class 1: tp 1, fp 1
        let y_true = vec![0, 0, 0, 1];
        let y_pred = vec![0, 0, 1, 1];
        let m = ModelMetrics::compute_classification(&y_true, &y_pred, 2);

        assert!((m.per_class[0].precision - 1.0).abs() < 1e-12);
        assert!((m.per_class[0].recall - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.per_class[1].precision - 0.5).abs() < 1e-12);
        let f1_0 = 0.8;
        let f1_1 = 2.0 / 3.0;
        assert!((m.weighted_f1 - (3.0 * f1_0 + f1_1) / 4.0).abs() < 1e-12);
        assert_eq!(m.accuracy, 0.75);
    }

    #[test]
    fn test_absent_class_scores_zero() {
        let m = ModelMetrics::compute_classification(&[0, 0], &[0, 0], 3);
        assert_eq!(m.per_class[2].support, 0);
        assert_eq!(m.per_class[2].f1, 0.0);
        assert_eq!(m.weighted_f1, 1.0);
    }
}

//! Support Vector Machine classifier
//!
//! Binary machines are trained with simplified SMO (Sequential Minimal
//! Optimization) over a precomputed kernel matrix; more than two classes use
//! one-vs-rest. Sample weights scale the per-sample box constraint `C`.

use super::decision_tree::check_width;
use super::models::Classifier;
use crate::error::{FlowError, Result};
use crate::utils::stats::{argmax, mean_variance};
use ndarray::{Array1, Array2, ArrayView1};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Maximum number of samples for eager kernel matrix computation.
/// Beyond this, training will return an error to prevent OOM.
pub const MAX_KERNEL_MATRIX_SAMPLES: usize = 10_000;

/// Kernel coefficient for RBF and polynomial kernels
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gamma {
    /// `1 / (n_features * var(X))`
    #[default]
    Scale,
    /// `1 / n_features`
    Auto,
    Value(f64),
}

impl Gamma {
    fn resolve(&self, x: &Array2<f64>) -> f64 {
        let n_features = x.ncols().max(1) as f64;
        match self {
            Gamma::Scale => {
                let values: Vec<f64> = x.iter().copied().collect();
                let (_, var) = mean_variance(&values);
                if var > 0.0 { 1.0 / (n_features * var) } else { 1.0 }
            }
            Gamma::Auto => 1.0 / n_features,
            Gamma::Value(g) => *g,
        }
    }
}

/// Kernel function type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelType {
    /// K(x, y) = x · y
    Linear,
    /// K(x, y) = exp(-γ ||x - y||²)
    #[default]
    Rbf,
    /// K(x, y) = (γ x · y)³
    Poly,
}

/// SVM configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SVMConfig {
    /// Regularization parameter (C)
    pub c: f64,
    /// Kernel function
    pub kernel: KernelType,
    pub gamma: Gamma,
    /// Tolerance for stopping criterion
    pub tol: f64,
    /// Maximum number of passes over the data
    pub max_iter: usize,
    /// Random seed
    pub random_state: u64,
}

impl Default for SVMConfig {
    fn default() -> Self {
        Self {
            c: 1.0,
            kernel: KernelType::Rbf,
            gamma: Gamma::Scale,
            tol: 1e-3,
            max_iter: 1000,
            random_state: 42,
        }
    }
}

const POLY_DEGREE: i32 = 3;

/// A single binary machine; positive scores favour its class
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BinarySVM {
    support_vectors: Array2<f64>,
    /// `alpha_i * y_i` per support vector
    dual_coef: Array1<f64>,
    bias: f64,
}

/// Support Vector Classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SVMClassifier {
    config: SVMConfig,
    gamma: f64,
    n_features: usize,
    n_classes: usize,
    /// One machine for two classes, otherwise one per class
    machines: Vec<BinarySVM>,
}

impl SVMClassifier {
    /// Create a new SVM classifier
    pub fn new(config: SVMConfig) -> Self {
        Self {
            config,
            gamma: 1.0,
            n_features: 0,
            n_classes: 0,
            machines: Vec::new(),
        }
    }

    pub fn config(&self) -> &SVMConfig {
        &self.config
    }

    fn kernel(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        match self.config.kernel {
            KernelType::Linear => a.dot(&b),
            KernelType::Poly => (self.gamma * a.dot(&b)).powi(POLY_DEGREE),
            KernelType::Rbf => {
                let norm_sq: f64 = a.iter().zip(b.iter()).map(|(p, q)| (p - q) * (p - q)).sum();
                (-self.gamma * norm_sq).exp()
            }
        }
    }

    /// Compute kernel matrix, upper-triangle rows in parallel
    fn compute_kernel_matrix(&self, x: &Array2<f64>) -> Array2<f64> {
        let n = x.nrows();
        let rows: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|i| (i..n).map(|j| self.kernel(x.row(i), x.row(j))).collect())
            .collect();

        let mut k = Array2::zeros((n, n));
        for (i, row_vals) in rows.into_iter().enumerate() {
            for (offset, val) in row_vals.into_iter().enumerate() {
                k[[i, i + offset]] = val;
                k[[i + offset, i]] = val;
            }
        }
        k
    }

    /// SMO on labels in {-1, +1} with per-sample bounds
    fn smo_train(&self, k: &Array2<f64>, y: &[f64], bounds: &[f64]) -> (Vec<f64>, f64) {
        let n = y.len();
        let mut alphas = vec![0.0; n];
        let mut bias = 0.0;
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.random_state);
        let tol = self.config.tol;

        let decision = |alphas: &[f64], bias: f64, idx: usize| -> f64 {
            (0..n).filter(|&i| alphas[i] != 0.0).map(|i| alphas[i] * y[i] * k[[i, idx]]).sum::<f64>() + bias
        };

        let mut passes = 0;
        let max_passes = 5;
        let mut total_iter = 0;

        while n > 1 && passes < max_passes && total_iter < self.config.max_iter {
            let mut num_changed = 0;

            for i in 0..n {
                let e_i = decision(&alphas, bias, i) - y[i];

                // KKT violation
                if (y[i] * e_i < -tol && alphas[i] < bounds[i]) || (y[i] * e_i > tol && alphas[i] > 0.0) {
                    let j = loop {
                        let j = rng.gen_range(0..n);
                        if j != i {
                            break j;
                        }
                    };
                    let e_j = decision(&alphas, bias, j) - y[j];

                    let alpha_i_old = alphas[i];
                    let alpha_j_old = alphas[j];

                    let (l, h) = if y[i] != y[j] {
                        ((alpha_j_old - alpha_i_old).max(0.0), (bounds[i] + alpha_j_old - alpha_i_old).min(bounds[j]))
                    } else {
                        ((alpha_i_old + alpha_j_old - bounds[i]).max(0.0), (alpha_i_old + alpha_j_old).min(bounds[j]))
                    };
                    if h - l < 1e-10 {
                        continue;
                    }

                    let eta = 2.0 * k[[i, j]] - k[[i, i]] - k[[j, j]];
                    if eta >= 0.0 {
                        continue;
                    }

                    alphas[j] = (alpha_j_old - y[j] * (e_i - e_j) / eta).clamp(l, h);
                    if (alphas[j] - alpha_j_old).abs() < 1e-5 {
                        continue;
                    }
                    alphas[i] = alpha_i_old + y[i] * y[j] * (alpha_j_old - alphas[j]);

                    let b1 = bias - e_i - y[i] * (alphas[i] - alpha_i_old) * k[[i, i]] - y[j] * (alphas[j] - alpha_j_old) * k[[i, j]];
                    let b2 = bias - e_j - y[i] * (alphas[i] - alpha_i_old) * k[[i, j]] - y[j] * (alphas[j] - alpha_j_old) * k[[j, j]];

                    bias = if alphas[i] > 0.0 && alphas[i] < bounds[i] {
                        b1
                    } else if alphas[j] > 0.0 && alphas[j] < bounds[j] {
                        b2
                    } else {
                        (b1 + b2) / 2.0
                    };
                    num_changed += 1;
                }
            }

            total_iter += 1;
            if num_changed == 0 {
                passes += 1;
            } else {
                passes = 0;
            }
        }

        (alphas, bias)
    }

    fn fit_machine(&self, x: &Array2<f64>, k: &Array2<f64>, y: &[f64], bounds: &[f64]) -> BinarySVM {
        let (alphas, bias) = self.smo_train(k, y, bounds);
        let support: Vec<usize> = (0..alphas.len()).filter(|&i| alphas[i] > 1e-8).collect();
        BinarySVM {
            support_vectors: x.select(ndarray::Axis(0), &support),
            dual_coef: support.iter().map(|&i| alphas[i] * y[i]).collect(),
            bias,
        }
    }

    fn score_sample(&self, machine: &BinarySVM, sample: ArrayView1<f64>) -> f64 {
        machine
            .support_vectors
            .outer_iter()
            .zip(machine.dual_coef.iter())
            .map(|(sv, &coef)| coef * self.kernel(sample, sv))
            .sum::<f64>()
            + machine.bias
    }

    /// Raw machine scores, `n_samples x n_machines`
    pub fn decision_function(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.machines.is_empty() {
            return Err(FlowError::ModelNotFitted);
        }
        check_width(x, self.n_features)?;
        let mut scores = Array2::zeros((x.nrows(), self.machines.len()));
        for (i, sample) in x.outer_iter().enumerate() {
            for (m, machine) in self.machines.iter().enumerate() {
                scores[[i, m]] = self.score_sample(machine, sample);
            }
        }
        Ok(scores)
    }

    /// Get number of support vectors across machines
    pub fn n_support_vectors(&self) -> usize {
        self.machines.iter().map(|m| m.support_vectors.nrows()).sum()
    }
}

impl Classifier for SVMClassifier {
    fn fit(&mut self, x: &Array2<f64>, y: &[usize], n_classes: usize, sample_weight: Option<&[f64]>) -> Result<()> {
        let n = x.nrows();
        if n != y.len() {
            return Err(FlowError::ShapeError {
                expected: format!("y length = {}", n),
                actual: format!("y length = {}", y.len()),
            });
        }
        if n > MAX_KERNEL_MATRIX_SAMPLES {
            return Err(FlowError::TrainingError(format!(
                "Dataset has {} samples, exceeding the maximum {} for SVM kernel matrix",
                n, MAX_KERNEL_MATRIX_SAMPLES
            )));
        }
        if n_classes < 2 {
            return Err(FlowError::TrainingError("SVM requires at least 2 classes".to_string()));
        }
        if !(self.config.c > 0.0) {
            return Err(FlowError::InvalidParameter {
                name: "C".to_string(),
                value: self.config.c.to_string(),
                reason: "must be positive".to_string(),
            });
        }

        self.gamma = self.config.gamma.resolve(x);
        self.n_features = x.ncols();
        self.n_classes = n_classes;

        let bounds: Vec<f64> = match sample_weight {
            Some(w) => w.iter().map(|&wi| self.config.c * wi).collect(),
            None => vec![self.config.c; n],
        };
        let kernel_matrix = self.compute_kernel_matrix(x);

        let positives: Vec<usize> = if n_classes == 2 { vec![1] } else { (0..n_classes).collect() };
        self.machines = positives
            .into_iter()
            .map(|cls| {
                let y_binary: Vec<f64> = y.iter().map(|&c| if c == cls { 1.0 } else { -1.0 }).collect();
                self.fit_machine(x, &kernel_matrix, &y_binary, &bounds)
            })
            .collect();
        Ok(())
    }

    /// No probability output
    fn predict_proba(&self, _x: &Array2<f64>) -> Result<Option<Array2<f64>>> {
        Ok(None)
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Vec<usize>> {
        let scores = self.decision_function(x)?;
        Ok(scores
            .outer_iter()
            .map(|row| {
                if self.n_classes == 2 {
                    usize::from(row[0] >= 0.0)
                } else {
                    argmax(row.iter().copied())
                }
            })
            .collect())
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn create_linear_separable_data() -> (Array2<f64>, Vec<usize>) {
        let x = array![
            [1.0, 1.0], [1.5, 1.2], [1.2, 1.8], [2.0, 1.5], [1.8, 2.0],
            [5.0, 5.0], [5.5, 5.2], [5.2, 5.8], [6.0, 5.5], [5.8, 6.0],
        ];
        (x, vec![0, 0, 0, 0, 0, 1, 1, 1, 1, 1])
    }

    #[test]
    fn test_svm_classifier_linear() {
        let (x, y) = create_linear_separable_data();
        let mut svm = SVMClassifier::new(SVMConfig { kernel: KernelType::Linear, ..Default::default() });
        svm.fit(&x, &y, 2, None).unwrap();

        assert_eq!(svm.predict(&x).unwrap(), y);
        assert!(svm.n_support_vectors() > 0);
    }

    #[test]
    fn test_svm_classifier_rbf() {
        let (x, y) = create_linear_separable_data();
        let mut svm = SVMClassifier::new(SVMConfig { c: 10.0, ..Default::default() });
        svm.fit(&x, &y, 2, None).unwrap();
        assert_eq!(svm.predict(&x).unwrap(), y);
    }

    #[test]
    fn test_svm_classifier_multiclass() {
        let x = array![
            [0.0, 0.0], [0.2, 0.1], [0.1, 0.3],
            [5.0, 0.0], [5.2, 0.1], [5.1, 0.3],
            [0.0, 5.0], [0.2, 5.1], [0.1, 5.3],
        ];
        let y = vec![0, 0, 0, 1, 1, 1, 2, 2, 2];
        let mut svm = SVMClassifier::new(SVMConfig { c: 10.0, gamma: Gamma::Value(0.5), ..Default::default() });
        svm.fit(&x, &y, 3, None).unwrap();

        assert_eq!(svm.decision_function(&x).unwrap().ncols(), 3);
        assert_eq!(svm.predict(&x).unwrap(), y);
    }

    #[test]
    fn test_no_probabilities() {
        let (x, y) = create_linear_separable_data();
        let mut svm = SVMClassifier::new(SVMConfig::default());
        svm.fit(&x, &y, 2, None).unwrap();
        assert!(svm.predict_proba(&x).unwrap().is_none());
    }

    #[test]
    fn test_gamma_resolution() {
        let x = array![[0.0, 2.0], [2.0, 0.0]];
        assert!((Gamma::Auto.resolve(&x) - 0.5).abs() < 1e-12);
        // variance of {0, 2, 2, 0} is 1
        assert!((Gamma::Scale.resolve(&x) - 0.5).abs() < 1e-12);
        assert_eq!(Gamma::Value(0.01).resolve(&x), 0.01);
    }

    #[test]
    fn test_kernel_matrix_limit() {
        let x = Array2::zeros((MAX_KERNEL_MATRIX_SAMPLES + 1, 1));
        let y = vec![0; MAX_KERNEL_MATRIX_SAMPLES + 1];
        let mut svm = SVMClassifier::new(SVMConfig::default());
        assert!(svm.fit(&x, &y, 2, None).is_err());
    }
}

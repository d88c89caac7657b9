//! Linear model implementations

use super::decision_tree::check_width;
use super::models::Classifier;
use crate::error::{FlowError, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Multinomial logistic regression with L2 penalty
///
/// `c` is the inverse regularization strength; the penalty applied to the
/// weighted mean loss is `1 / (c * sum(sample_weight))`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    /// Fitted coefficients, `n_features x n_classes`
    pub coefficients: Option<Array2<f64>>,
    /// Fitted intercepts, one per class
    pub intercept: Option<Array1<f64>>,
    /// Whether to fit intercept
    pub fit_intercept: bool,
    /// Inverse regularization strength
    pub c: f64,
    /// Maximum iterations
    pub max_iter: usize,
    /// Convergence tolerance
    pub tol: f64,
    /// Learning rate
    pub learning_rate: f64,
    n_classes: usize,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new()
    }
}

impl LogisticRegression {
    /// Create a new logistic regression model
    pub fn new() -> Self {
        Self {
            coefficients: None,
            intercept: None,
            fit_intercept: true,
            c: 1.0,
            max_iter: 1000,
            tol: 1e-6,
            learning_rate: 0.5,
            n_classes: 0,
        }
    }

    /// Set inverse regularization strength
    pub fn with_c(mut self, c: f64) -> Self {
        self.c = c;
        self
    }

    /// Set maximum iterations
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set learning rate
    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn is_fitted(&self) -> bool {
        self.coefficients.is_some()
    }

    /// Row-wise softmax in place
    fn softmax(z: &mut Array2<f64>) {
        for mut row in z.axis_iter_mut(Axis(0)) {
            let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row.mapv_inplace(|v| v / sum);
        }
    }
}

impl Classifier for LogisticRegression {
    /// Fit the model using full-batch gradient descent
    fn fit(&mut self, x: &Array2<f64>, y: &[usize], n_classes: usize, sample_weight: Option<&[f64]>) -> Result<()> {
        let n_samples = x.nrows();
        let n_features = x.ncols();

        if n_samples != y.len() {
            return Err(FlowError::ShapeError {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }
        if !(self.c > 0.0) {
            return Err(FlowError::InvalidParameter {
                name: "C".to_string(),
                value: self.c.to_string(),
                reason: "must be positive".to_string(),
            });
        }

        let sw: Array1<f64> = match sample_weight {
            Some(w) => Array1::from(w.to_vec()),
            None => Array1::ones(n_samples),
        };
        let total_weight = sw.sum().max(f64::EPSILON);
        let alpha = 1.0 / (self.c * total_weight);

        let mut targets = Array2::<f64>::zeros((n_samples, n_classes));
        for (i, &c) in y.iter().enumerate() {
            targets[[i, c]] = 1.0;
        }

        let mut weights = Array2::<f64>::zeros((n_features, n_classes));
        let mut bias = Array1::<f64>::zeros(n_classes);
        let lr = self.learning_rate;

        for _iter in 0..self.max_iter {
            let mut proba = x.dot(&weights) + &bias;
            Self::softmax(&mut proba);

            // Weighted errors
            let mut errors = proba - &targets;
            for (mut row, &w) in errors.axis_iter_mut(Axis(0)).zip(sw.iter()) {
                row *= w / total_weight;
            }

            let dw = x.t().dot(&errors) + alpha * &weights;
            let db = errors.sum_axis(Axis(0));

            let grad_norm = (dw.mapv(|v| v * v).sum() + db.mapv(|v| v * v).sum()).sqrt();
            if grad_norm < self.tol {
                break;
            }

            weights = weights - lr * dw;
            if self.fit_intercept {
                bias = bias - lr * db;
            }
        }

        self.coefficients = Some(weights);
        self.intercept = Some(bias);
        self.n_classes = n_classes;
        Ok(())
    }

    /// Predict probabilities
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Option<Array2<f64>>> {
        let (coefficients, intercept) = match (&self.coefficients, &self.intercept) {
            (Some(c), Some(i)) => (c, i),
            _ => return Err(FlowError::ModelNotFitted),
        };
        check_width(x, coefficients.nrows())?;

        let mut proba = x.dot(coefficients) + intercept;
        Self::softmax(&mut proba);
        Ok(Some(proba))
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_logistic_regression() {
        let x = array![[0.0, 0.0], [0.5, 0.2], [0.2, 0.4], [3.0, 3.0], [3.5, 3.2], [3.2, 3.6], [0.0, 4.0], [0.3, 4.5], [0.2, 3.8]];
        let y = vec![0, 0, 0, 1, 1, 1, 2, 2, 2];

        let mut model = LogisticRegression::new().with_c(10.0);
        model.fit(&x, &y, 3, None).unwrap();

        assert_eq!(model.predict(&x).unwrap(), y);
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = vec![0, 0, 1, 1];
        let mut model = LogisticRegression::new();
        model.fit(&x, &y, 2, None).unwrap();

        let proba = model.predict_proba(&x).unwrap().unwrap();
        for row in proba.outer_iter() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
        assert!(proba[[3, 1]] > proba[[0, 1]]);
    }

    #[test]
    fn test_sample_weights_shift_boundary() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = vec![0, 0, 1, 1];

        let mut plain = LogisticRegression::new();
        plain.fit(&x, &y, 2, None).unwrap();
        let mut weighted = LogisticRegression::new();
        weighted.fit(&x, &y, 2, Some(&[1.0, 1.0, 5.0, 5.0])).unwrap();

        let probe = array![[1.5]];
        let p_plain = plain.predict_proba(&probe).unwrap().unwrap()[[0, 1]];
        let p_weighted = weighted.predict_proba(&probe).unwrap().unwrap()[[0, 1]];
        assert!(p_weighted > p_plain);
    }

    #[test]
    fn test_invalid_c_rejected() {
        let x = array![[0.0], [1.0]];
        let mut model = LogisticRegression::new().with_c(0.0);
        assert!(model.fit(&x, &[0, 1], 2, None).is_err());
    }

    #[test]
    fn test_unfitted_model() {
        let model = LogisticRegression::new();
        assert!(matches!(model.predict_proba(&array![[1.0]]), Err(FlowError::ModelNotFitted)));
    }
}

//! Neural Network (Multi-Layer Perceptron) implementation
//!
//! A feedforward classifier with ReLU hidden layers, a softmax output and
//! mini-batch Adam updates.

use super::decision_tree::check_width;
use super::models::Classifier;
use crate::error::{FlowError, Result};
use ndarray::{Array1, Array2, Axis};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

/// Step-size schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningRateSchedule {
    /// Keep the initial learning rate
    #[default]
    Constant,
    /// Divide the learning rate by 5 whenever the training loss stalls for two
    /// consecutive epochs
    Adaptive,
}

/// Neural Network configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MLPConfig {
    /// Hidden layer sizes
    pub hidden_layers: Vec<usize>,
    /// Initial learning rate
    pub learning_rate_init: f64,
    /// Learning rate schedule
    pub learning_rate: LearningRateSchedule,
    /// Number of epochs
    pub max_epochs: usize,
    /// Batch size
    pub batch_size: usize,
    /// L2 regularization
    pub alpha: f64,
    /// Random seed
    pub random_state: u64,
    /// Epochs without improvement before stopping
    pub n_iter_no_change: usize,
    /// Minimum loss improvement
    pub tol: f64,
}

impl Default for MLPConfig {
    fn default() -> Self {
        Self {
            hidden_layers: vec![100],
            learning_rate_init: 0.001,
            learning_rate: LearningRateSchedule::Constant,
            max_epochs: 200,
            batch_size: 200,
            alpha: 0.0001,
            random_state: 42,
            n_iter_no_change: 10,
            tol: 1e-4,
        }
    }
}

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;

/// Multi-Layer Perceptron Classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MLPClassifier {
    config: MLPConfig,
    weights: Vec<Array2<f64>>,
    biases: Vec<Array1<f64>>,
    n_features: usize,
    n_classes: usize,
    n_epochs: usize,
}

impl MLPClassifier {
    pub fn new(config: MLPConfig) -> Self {
        Self {
            config,
            weights: Vec::new(),
            biases: Vec::new(),
            n_features: 0,
            n_classes: 0,
            n_epochs: 0,
        }
    }

    pub fn config(&self) -> &MLPConfig {
        &self.config
    }

    /// Epochs actually run by the last fit
    pub fn n_epochs(&self) -> usize {
        self.n_epochs
    }

    fn initialize_weights(&mut self, rng: &mut Xoshiro256PlusPlus) {
        self.weights.clear();
        self.biases.clear();

        let mut layer_sizes = vec![self.n_features];
        layer_sizes.extend(&self.config.hidden_layers);
        layer_sizes.push(self.n_classes);

        for pair in layer_sizes.windows(2) {
            let (n_in, n_out) = (pair[0], pair[1]);
            // Xavier/Glorot initialization
            let scale = (6.0 / (n_in + n_out) as f64).sqrt();
            self.weights.push(Array2::from_shape_fn((n_in, n_out), |_| rng.gen_range(-scale..scale)));
            self.biases.push(Array1::zeros(n_out));
        }
    }

    /// Activations of every layer, input first, softmax output last
    fn forward(&self, x: &Array2<f64>) -> Vec<Array2<f64>> {
        let mut activations = vec![x.clone()];
        let last = self.weights.len() - 1;
        for (i, (w, b)) in self.weights.iter().zip(&self.biases).enumerate() {
            let mut z = activations[i].dot(w) + b;
            if i < last {
                z.mapv_inplace(|v| v.max(0.0));
            } else {
                softmax(&mut z);
            }
            activations.push(z);
        }
        activations
    }

    fn backward(&self, targets: &Array2<f64>, activations: &[Array2<f64>]) -> Vec<(Array2<f64>, Array1<f64>)> {
        let n = targets.nrows() as f64;
        let mut gradients = Vec::with_capacity(self.weights.len());

        // Softmax with cross-entropy
        let mut delta = (&activations[activations.len() - 1] - targets) / n;

        for i in (0..self.weights.len()).rev() {
            let grad_w = activations[i].t().dot(&delta) + (self.config.alpha / n) * &self.weights[i];
            let grad_b = delta.sum_axis(Axis(0));
            gradients.push((grad_w, grad_b));

            if i > 0 {
                let relu_grad = activations[i].mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
                delta = delta.dot(&self.weights[i].t()) * relu_grad;
            }
        }

        gradients.reverse();
        gradients
    }
}

fn softmax(z: &mut Array2<f64>) {
    for mut row in z.rows_mut() {
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
}

fn cross_entropy(proba: &Array2<f64>, y: &[usize]) -> f64 {
    y.iter().enumerate().map(|(i, &c)| -proba[[i, c]].max(1e-15).ln()).sum::<f64>() / y.len().max(1) as f64
}

impl Classifier for MLPClassifier {
    /// Sample weights are not used by this learner
    fn fit(&mut self, x: &Array2<f64>, y: &[usize], n_classes: usize, _sample_weight: Option<&[f64]>) -> Result<()> {
        let n_samples = x.nrows();
        if n_samples != y.len() || n_samples == 0 {
            return Err(FlowError::ShapeError {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }
        if self.config.hidden_layers.iter().any(|&h| h == 0) {
            return Err(FlowError::InvalidParameter {
                name: "hidden_layers".to_string(),
                value: format!("{:?}", self.config.hidden_layers),
                reason: "layer sizes must be positive".to_string(),
            });
        }

        self.n_features = x.ncols();
        self.n_classes = n_classes;
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.random_state);
        self.initialize_weights(&mut rng);

        let mut targets = Array2::<f64>::zeros((n_samples, n_classes));
        for (i, &c) in y.iter().enumerate() {
            targets[[i, c]] = 1.0;
        }

        let mut m_w: Vec<Array2<f64>> = self.weights.iter().map(|w| Array2::zeros(w.raw_dim())).collect();
        let mut v_w = m_w.clone();
        let mut m_b: Vec<Array1<f64>> = self.biases.iter().map(|b| Array1::zeros(b.len())).collect();
        let mut v_b = m_b.clone();

        let batch_size = self.config.batch_size.clamp(1, n_samples);
        let mut lr = self.config.learning_rate_init;
        let mut step = 0i32;
        let mut best_loss = f64::INFINITY;
        let mut stalled = 0;
        self.n_epochs = 0;

        for _epoch in 0..self.config.max_epochs {
            let mut indices: Vec<usize> = (0..n_samples).collect();
            indices.shuffle(&mut rng);
            let mut epoch_loss = 0.0;

            for batch in indices.chunks(batch_size) {
                let x_batch = x.select(Axis(0), batch);
                let t_batch = targets.select(Axis(0), batch);

                let activations = self.forward(&x_batch);
                let batch_y: Vec<usize> = batch.iter().map(|&i| y[i]).collect();
                epoch_loss += cross_entropy(&activations[activations.len() - 1], &batch_y) * batch.len() as f64;
                let gradients = self.backward(&t_batch, &activations);

                step += 1;
                let bias1 = 1.0 - BETA1.powi(step);
                let bias2 = 1.0 - BETA2.powi(step);
                for (i, (grad_w, grad_b)) in gradients.into_iter().enumerate() {
                    m_w[i] = BETA1 * &m_w[i] + (1.0 - BETA1) * &grad_w;
                    v_w[i] = BETA2 * &v_w[i] + (1.0 - BETA2) * &grad_w.mapv(|g| g * g);
                    m_b[i] = BETA1 * &m_b[i] + (1.0 - BETA1) * &grad_b;
                    v_b[i] = BETA2 * &v_b[i] + (1.0 - BETA2) * &grad_b.mapv(|g| g * g);

                    let step_w = (&m_w[i] / bias1) / (v_w[i].mapv(|v| (v / bias2).sqrt()) + ADAM_EPS);
                    let step_b = (&m_b[i] / bias1) / (v_b[i].mapv(|v| (v / bias2).sqrt()) + ADAM_EPS);
                    self.weights[i] = &self.weights[i] - &(lr * step_w);
                    self.biases[i] = &self.biases[i] - &(lr * step_b);
                }
            }
            self.n_epochs += 1;

            let loss = epoch_loss / n_samples as f64;
            if loss < best_loss - self.config.tol {
                best_loss = loss;
                stalled = 0;
            } else {
                stalled += 1;
            }

            match self.config.learning_rate {
                LearningRateSchedule::Adaptive if stalled >= 2 => {
                    lr /= 5.0;
                    stalled = 0;
                    if lr < 1e-6 {
                        break;
                    }
                }
                LearningRateSchedule::Constant if stalled >= self.config.n_iter_no_change => break,
                _ => {}
            }
        }

        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Option<Array2<f64>>> {
        if self.weights.is_empty() {
            return Err(FlowError::ModelNotFitted);
        }
        check_width(x, self.n_features)?;
        let mut activations = self.forward(x);
        Ok(activations.pop())
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_classification_data() -> (Array2<f64>, Vec<usize>) {
        let x = Array2::from_shape_fn((60, 2), |(i, j)| {
            let centre = (i / 20) as f64 * 3.0;
            centre + ((i * 7 + j * 3) % 10) as f64 * 0.05
        });
        let y = (0..60).map(|i| i / 20).collect();
        (x, y)
    }

    #[test]
    fn test_mlp_classifier() {
        let (x, y) = create_classification_data();
        let config = MLPConfig { hidden_layers: vec![16], learning_rate_init: 0.01, max_epochs: 300, batch_size: 16, ..Default::default() };

        let mut model = MLPClassifier::new(config);
        model.fit(&x, &y, 3, None).unwrap();

        let predictions = model.predict(&x).unwrap();
        let correct = y.iter().zip(&predictions).filter(|(a, b)| a == b).count();
        let accuracy = correct as f64 / y.len() as f64;
        assert!(accuracy > 0.9, "Accuracy ({}) should be above 90%", accuracy);
    }

    #[test]
    fn test_probabilities_are_softmax() {
        let (x, y) = create_classification_data();
        let mut model = MLPClassifier::new(MLPConfig { hidden_layers: vec![8, 4], max_epochs: 5, ..Default::default() });
        model.fit(&x, &y, 3, None).unwrap();

        let proba = model.predict_proba(&x).unwrap().unwrap();
        assert_eq!(proba.dim(), (60, 3));
        for row in proba.outer_iter() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_adaptive_schedule_runs() {
        let (x, y) = create_classification_data();
        let config = MLPConfig { hidden_layers: vec![8], learning_rate: LearningRateSchedule::Adaptive, max_epochs: 20, ..Default::default() };
        let mut model = MLPClassifier::new(config);
        model.fit(&x, &y, 3, None).unwrap();
        assert!(model.n_epochs() >= 1 && model.n_epochs() <= 20);
    }

    #[test]
    fn test_zero_width_layer_rejected() {
        let (x, y) = create_classification_data();
        let mut model = MLPClassifier::new(MLPConfig { hidden_layers: vec![0], ..Default::default() });
        assert!(model.fit(&x, &y, 3, None).is_err());
    }
}

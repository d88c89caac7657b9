//! Inference module
//!
//! Applies a persisted bundle to new flow records:
//! - Replays normalization, engineering, cleaning, scaling and selection
//! - Scores batches in parallel via rayon
//! - Reports a label, a confidence in `[0, 1]` and the row's identifiers
//! - Checks input columns against the training schema

mod config;
mod engine;

pub use config::InferenceConfig;
pub use engine::{predictions_table, InferenceService, Prediction, PLACEHOLDER_CONFIDENCE};

//! flowsentry - Multi-source network-flow classification
//!
//! Reconciles heterogeneous flow-capture CSV exports into one canonical
//! schema, trains and compares a catalogue of classifiers, and serves the
//! winner for batch inference.
//!
//! # Modules
//!
//! ## Data
//! - [`ingest`] - CSV discovery, per-file sampling, unified dataset
//! - [`schema`] - Column name reconciliation and label standardization
//! - [`feature_engineering`] - Derived flow ratios and rates
//! - [`preprocessing`] - Cleaning, encoding, splitting, scaling, selection
//!
//! ## Models
//! - [`training`] - Learner catalogue, hyperparameter search, metrics
//! - [`ensemble`] - Soft-voting ensemble over the best candidates
//! - [`export`] - Versioned, checksummed artifact bundles
//! - [`inference`] - Batched prediction with confidences
//!
//! ## Orchestration
//! - [`pipeline`] - End-to-end training run and reporting
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;

// Data
pub mod ingest;
pub mod schema;
pub mod feature_engineering;
pub mod preprocessing;

// Models
pub mod training;
pub mod ensemble;
pub mod export;
pub mod inference;

// Orchestration
pub mod pipeline;
pub mod cli;

pub mod utils;

pub use error::{FlowError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{FlowError, Result};

    pub use crate::ingest::{FlowTable, SourceIngestor, UnifiedDataset};
    pub use crate::schema::{LabelVocabulary, SchemaMap, Strictness};
    pub use crate::feature_engineering::FeatureEngineer;
    pub use crate::preprocessing::{DatasetCleaner, FeatureSelector, Scaler, ScalerType, SelectionStrategy};
    pub use crate::training::{Classifier, LearnerKind, ModelMetrics, SearchStrategy, TrainedModel};
    pub use crate::ensemble::SoftVotingEnsemble;
    pub use crate::export::{ArtifactHandle, TrainedArtifact};
    pub use crate::inference::{InferenceConfig, InferenceService, Prediction};
    pub use crate::pipeline::{PipelineConfig, TrainingPipeline, TrainingRun};
}

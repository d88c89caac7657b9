//! Error types for the flowsentry pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for flowsentry operations
pub type Result<T> = std::result::Result<T, FlowError>;

/// Main error type for the pipeline
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("Source skipped: {path}: {reason}")]
    SourceSkipped { path: PathBuf, reason: String },

    #[error("No usable source files in {0}")]
    NoUsableSources(PathBuf),

    #[error("Target column '{0}' not found")]
    MissingTarget(String),

    #[error("Preprocessing error: {0}")]
    PreprocessingError(String),

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("Candidate '{learner}' failed: {reason}")]
    CandidateFailed { learner: String, reason: String },

    #[error("No candidate learner completed successfully")]
    NoCandidateSucceeded,

    #[error("Inference error: {0}")]
    InferenceError(String),

    #[error("Columns not seen during training: {}", columns.join(", "))]
    SchemaDrift { columns: Vec<String> },

    #[error("Labels outside the known vocabulary: {}", labels.join(", "))]
    UnknownLabel { labels: Vec<String> },

    #[error("Failed to load artifact {path}: {reason}")]
    LoadError { path: PathBuf, reason: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<polars::error::PolarsError> for FlowError {
    fn from(err: polars::error::PolarsError) -> Self {
        FlowError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        FlowError::SerializationError(err.to_string())
    }
}

impl From<bincode::Error> for FlowError {
    fn from(err: bincode::Error) -> Self {
        FlowError::SerializationError(err.to_string())
    }
}

impl From<toml::de::Error> for FlowError {
    fn from(err: toml::de::Error) -> Self {
        FlowError::ConfigError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for FlowError {
    fn from(err: ndarray::ShapeError) -> Self {
        FlowError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

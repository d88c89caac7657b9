//! Schema reconciliation
//!
//! - [`SchemaMap`]: raw column names → canonical feature names
//! - [`LabelVocabulary`]: raw label tokens → canonical labels
//! - [`Strictness`]: how pass-through columns and labels are treated

mod labels;
mod normalizer;

pub use labels::{normalize_token, LabelVocabulary};
pub use normalizer::{normalize_name, PatternRule, Resolution, SchemaMap, LABEL_COLUMN};

use serde::{Deserialize, Serialize};

/// Policy for columns or labels no rule recognizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strictness {
    /// Log and continue
    #[default]
    Warn,
    /// Fail the operation
    Reject,
}

//! Inference configuration

use crate::schema::Strictness;
use serde::{Deserialize, Serialize};

/// Configuration for batch scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Rows scored per batch; batches run in parallel
    pub batch_size: usize,

    /// Overrides the strictness recorded in the artifact
    pub schema_strictness: Option<Strictness>,

    /// Attach side-table identifiers to each prediction
    pub include_identifiers: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            schema_strictness: None,
            include_identifiers: true,
        }
    }
}

impl InferenceConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_schema_strictness(mut self, strictness: Strictness) -> Self {
        self.schema_strictness = Some(strictness);
        self
    }

    pub fn with_identifiers(mut self, include: bool) -> Self {
        self.include_identifiers = include;
        self
    }
}

//! Immutable state threaded through the training stages

use crate::ingest::SideTable;
use crate::preprocessing::CategoryEncoder;
use crate::schema::{LabelVocabulary, SchemaMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What the stages have learned so far.
///
/// Stages never mutate a context; each one returns a new context next to
/// its output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineContext {
    schema: SchemaMap,
    vocabulary: LabelVocabulary,
    target_column: String,
    training_columns: Vec<String>,
    classes: Vec<String>,
    side_table: SideTable,
    encoders: BTreeMap<String, CategoryEncoder>,
    feature_columns: Vec<String>,
}

impl PipelineContext {
    pub fn new(schema: SchemaMap, vocabulary: LabelVocabulary, target_column: impl Into<String>) -> Self {
        Self {
            schema,
            vocabulary,
            target_column: target_column.into(),
            training_columns: Vec::new(),
            classes: Vec::new(),
            side_table: SideTable::default(),
            encoders: BTreeMap::new(),
            feature_columns: Vec::new(),
        }
    }

    /// Columns present after normalization and engineering
    pub fn with_training_columns(self, training_columns: Vec<String>) -> Self {
        Self { training_columns, ..self }
    }

    /// Sorted distinct training labels; position is the class index
    pub fn with_classes(self, classes: Vec<String>) -> Self {
        Self { classes, ..self }
    }

    pub fn with_side_table(self, side_table: SideTable) -> Self {
        Self { side_table, ..self }
    }

    pub fn with_encoders(self, encoders: BTreeMap<String, CategoryEncoder>) -> Self {
        Self { encoders, ..self }
    }

    /// Model input columns after selection
    pub fn with_feature_columns(self, feature_columns: Vec<String>) -> Self {
        Self { feature_columns, ..self }
    }

    pub fn schema(&self) -> &SchemaMap {
        &self.schema
    }

    pub fn vocabulary(&self) -> &LabelVocabulary {
        &self.vocabulary
    }

    pub fn target_column(&self) -> &str {
        &self.target_column
    }

    pub fn training_columns(&self) -> &[String] {
        &self.training_columns
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn side_table(&self) -> &SideTable {
        &self.side_table
    }

    pub fn encoders(&self) -> &BTreeMap<String, CategoryEncoder> {
        &self.encoders
    }

    pub fn feature_columns(&self) -> &[String] {
        &self.feature_columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_returns_new_context() {
        let base = PipelineContext::new(SchemaMap::default(), LabelVocabulary::default(), "label");
        let next = base.clone().with_classes(vec!["BENIGN".into(), "SYN".into()]);

        assert!(base.classes().is_empty());
        assert_eq!(next.n_classes(), 2);
        assert_eq!(next.target_column(), "label");
        assert_eq!(next.schema(), base.schema());
    }
}

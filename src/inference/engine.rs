//! Inference service
//!
//! Replays the frozen training chain on new flow records:
//!
//! normalize → engineer → clean → scale → select → model
//!
//! and attaches a confidence and the row's network identifiers to every
//! predicted label.

use super::InferenceConfig;
use crate::error::{FlowError, Result};
use crate::export::{ArtifactHandle, TrainedArtifact};
use crate::feature_engineering::FeatureEngineer;
use crate::ingest::{CsvLoader, FlowColumn, FlowTable, SideRow, SideTable, SOURCE_COLUMN};
use crate::schema::{Strictness, LABEL_COLUMN};
use crate::training::Classifier;
use crate::utils::stats::argmax;
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Confidence reported when the model has no probability output.
/// A fixed placeholder, not a calibrated score.
pub const PLACEHOLDER_CONFIDENCE: f64 = 0.8;

/// One scored row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    /// In `[0, 1]`
    pub confidence: f64,
    /// False when `confidence` is [`PLACEHOLDER_CONFIDENCE`]
    pub calibrated: bool,
    /// Side-table identifiers of the row
    pub identifiers: SideRow,
}

/// Scores flow records against the current artifact
#[derive(Debug, Clone)]
pub struct InferenceService {
    config: InferenceConfig,
    handle: ArtifactHandle,
}

impl InferenceService {
    pub fn new(handle: ArtifactHandle, config: InferenceConfig) -> Self {
        Self { config, handle }
    }

    pub fn from_artifact(artifact: TrainedArtifact) -> Self {
        Self::new(ArtifactHandle::new(artifact), InferenceConfig::default())
    }

    /// Load the bundle under `prefix`
    pub fn open(prefix: impl AsRef<Path>, config: InferenceConfig) -> Result<Self> {
        Ok(Self::new(ArtifactHandle::open(prefix)?, config))
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    /// Handle used to swap the artifact while the service runs
    pub fn handle(&self) -> &ArtifactHandle {
        &self.handle
    }

    /// Score a CSV file
    pub fn predict_csv(&self, path: &Path) -> Result<Vec<Prediction>> {
        let table = CsvLoader::new().load(path)?;
        self.predict(table)
    }

    /// Score raw flow records. An empty table yields no predictions.
    pub fn predict(&self, raw: FlowTable) -> Result<Vec<Prediction>> {
        if raw.n_rows() == 0 {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let artifact = self.handle.current();
        let n_rows = raw.n_rows();

        let table = self.prepare(&artifact, raw)?;
        let side = if self.config.include_identifiers {
            SideTable::extract(&table)
        } else {
            SideTable::default()
        };

        let batch = self.config.batch_size.max(1);
        let ranges: Vec<(usize, usize)> = (0..n_rows)
            .step_by(batch)
            .map(|lo| (lo, (lo + batch).min(n_rows)))
            .collect();

        let scored: Vec<Vec<(usize, f64, bool)>> = ranges
            .par_iter()
            .map(|&(lo, hi)| {
                let rows: Vec<usize> = (lo..hi).collect();
                let x = features(&artifact, &table.take_rows(&rows))?;
                score(&artifact, &x)
            })
            .collect::<Result<_>>()?;

        let classes = &artifact.metadata.classes;
        let predictions = scored
            .into_iter()
            .flatten()
            .enumerate()
            .map(|(row, (class, confidence, calibrated))| {
                let label = classes.get(class).cloned().ok_or_else(|| {
                    FlowError::InferenceError(format!("class index {} outside {} classes", class, classes.len()))
                })?;
                let identifiers = if side.is_empty() { SideRow::new() } else { side.row(row) };
                Ok(Prediction { label, confidence, calibrated, identifiers })
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            rows = n_rows,
            model = %artifact.metadata.model_name,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "batch scored"
        );
        Ok(predictions)
    }

    /// Normalize and engineer, drop the label and check for unseen columns
    fn prepare(&self, artifact: &TrainedArtifact, raw: FlowTable) -> Result<FlowTable> {
        let meta = &artifact.metadata;
        let mut table = meta.schema.normalize(raw);
        for name in [meta.target_column.as_str(), LABEL_COLUMN, SOURCE_COLUMN] {
            if table.remove_column(name).is_some() {
                debug!(column = name, "ignored column at inference");
            }
        }
        let table = FeatureEngineer::new().engineer(table);

        let known: HashSet<&str> = meta.training_columns.iter().map(String::as_str).collect();
        let unseen: Vec<String> = table
            .column_names()
            .into_iter()
            .filter(|name| !known.contains(name.as_str()))
            .collect();

        if !unseen.is_empty() {
            match self.config.schema_strictness.unwrap_or(meta.schema_strictness) {
                Strictness::Warn => warn!(columns = ?unseen, "columns not seen during training are ignored"),
                Strictness::Reject => return Err(FlowError::SchemaDrift { columns: unseen }),
            }
        }

        let missing: Vec<String> = meta
            .cleaner
            .feature_columns()
            .into_iter()
            .filter(|name| !table.contains(name))
            .collect();
        if !missing.is_empty() {
            warn!(columns = ?missing, "feature columns absent from input are imputed");
        }
        Ok(table)
    }
}

/// Cleaner, scaler and selector with their frozen parameters
fn features(artifact: &TrainedArtifact, table: &FlowTable) -> Result<Array2<f64>> {
    let x = artifact.metadata.cleaner.transform(table)?;
    let x = artifact.scaler.transform(&x)?;
    artifact.metadata.selector.transform(&x)
}

/// `(class, confidence, calibrated)` per row
fn score(artifact: &TrainedArtifact, x: &Array2<f64>) -> Result<Vec<(usize, f64, bool)>> {
    match artifact.model.predict_proba(x)? {
        Some(proba) => Ok(proba
            .outer_iter()
            .map(|row| {
                let class = argmax(row.iter().copied());
                let confidence = row[class];
                let confidence = if confidence.is_finite() { confidence.clamp(0.0, 1.0) } else { 0.0 };
                (class, confidence, true)
            })
            .collect()),
        None => Ok(artifact
            .model
            .predict(x)?
            .into_iter()
            .map(|class| (class, PLACEHOLDER_CONFIDENCE, false))
            .collect()),
    }
}

/// Predictions as a table: `prediction`, `confidence`, `calibrated`, then
/// the identifier columns present
pub fn predictions_table(predictions: &[Prediction]) -> Result<FlowTable> {
    let mut identifier_names: Vec<&str> = Vec::new();
    for p in predictions {
        for name in p.identifiers.keys() {
            if !identifier_names.contains(&name.as_str()) {
                identifier_names.push(name);
            }
        }
    }

    let mut columns = vec![
        FlowColumn::text("prediction", predictions.iter().map(|p| Some(p.label.clone())).collect()),
        FlowColumn::numeric("confidence", predictions.iter().map(|p| Some(p.confidence)).collect()),
        FlowColumn::text("calibrated", predictions.iter().map(|p| Some(p.calibrated.to_string())).collect()),
    ];
    for name in identifier_names {
        columns.push(FlowColumn::text(
            name,
            predictions.iter().map(|p| p.identifiers.get(name).cloned()).collect(),
        ));
    }
    FlowTable::from_columns(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::fixture;
    use crate::training::{SVMClassifier, SVMConfig, TrainedModel, XGBoostClassifier, XGBoostConfig};
    use tempfile::TempDir;

    fn flows() -> FlowTable {
        FlowTable::from_columns(vec![
            FlowColumn::numeric("Flow Duration", vec![Some(1.5), Some(10.5), None]),
            FlowColumn::numeric("Total Fwd Packets", vec![Some(5.0), Some(45.0), Some(7.0)]),
            FlowColumn::text("service", vec![Some("http".into()), Some("dns".into()), Some("smtp".into())]),
            FlowColumn::numeric("Source Port", vec![Some(443.0), Some(53.0), Some(8080.0)]),
            FlowColumn::text("Label", vec![Some("BENIGN".into()), Some("SYN".into()), None]),
        ])
        .unwrap()
    }

    #[test]
    fn test_predictions_are_bounded() {
        let service = InferenceService::from_artifact(fixture());
        let preds = service.predict(flows()).unwrap();

        assert_eq!(preds.len(), 3);
        for p in &preds {
            assert!((0.0..=1.0).contains(&p.confidence));
            assert!(p.calibrated);
            assert!(p.label == "BENIGN" || p.label == "SYN");
        }
        assert_eq!(preds[0].identifiers.get("src_port").map(String::as_str), Some("443"));
    }

    #[test]
    fn test_empty_input_is_empty_result() {
        let service = InferenceService::from_artifact(fixture());
        assert!(service.predict(FlowTable::default()).unwrap().is_empty());
    }

    #[test]
    fn test_batches_match_single_pass() {
        let artifact = fixture();
        let whole = InferenceService::from_artifact(artifact.clone()).predict(flows()).unwrap();
        let batched = InferenceService::new(ArtifactHandle::new(artifact), InferenceConfig::default().with_batch_size(1))
            .predict(flows())
            .unwrap();
        assert_eq!(whole, batched);
    }

    #[test]
    fn test_unseen_columns_by_strictness() {
        let mut table = flows();
        table
            .push_column(FlowColumn::numeric("mystery_counter", vec![Some(1.0), Some(2.0), Some(3.0)]))
            .unwrap();

        let lenient = InferenceService::from_artifact(fixture());
        assert_eq!(lenient.predict(table.clone()).unwrap().len(), 3);

        let strict = InferenceService::new(
            ArtifactHandle::new(fixture()),
            InferenceConfig::default().with_schema_strictness(Strictness::Reject),
        );
        match strict.predict(table) {
            Err(FlowError::SchemaDrift { columns }) => assert_eq!(columns, vec!["mystery_counter".to_string()]),
            other => panic!("expected schema drift, got {:?}", other),
        }
    }

    #[test]
    fn test_placeholder_confidence_without_probabilities() {
        let mut artifact = fixture();
        let table = FlowTable::from_columns(vec![
            FlowColumn::numeric("flow_duration", vec![Some(1.0), Some(2.0), Some(10.0), Some(11.0)]),
            FlowColumn::numeric("tot_fwd_pkts", vec![Some(5.0), Some(4.0), Some(40.0), Some(50.0)]),
            FlowColumn::text("service", vec![Some("http".into()), Some("http".into()), Some("dns".into()), None]),
        ])
        .unwrap();
        let x = artifact.metadata.cleaner.transform(&table).unwrap();
        let x = artifact.scaler.transform(&x).unwrap();
        let mut svm = SVMClassifier::new(SVMConfig::default());
        svm.fit(&x, &[0, 0, 1, 1], 2, None).unwrap();
        artifact.model = TrainedModel::Svm(svm);

        let preds = InferenceService::from_artifact(artifact).predict(table).unwrap();
        for p in preds {
            assert_eq!(p.confidence, PLACEHOLDER_CONFIDENCE);
            assert!(!p.calibrated);
        }
    }

    #[test]
    fn test_reloaded_bundle_scores_identically() {
        let mut boosted = fixture();
        let table = FlowTable::from_columns(vec![
            FlowColumn::numeric("flow_duration", vec![Some(1.0), Some(2.0), Some(10.0), Some(11.0)]),
            FlowColumn::numeric("tot_fwd_pkts", vec![Some(5.0), Some(4.0), Some(40.0), Some(50.0)]),
            FlowColumn::text("service", vec![Some("http".into()), Some("http".into()), Some("dns".into()), None]),
        ])
        .unwrap();
        let x = boosted.metadata.cleaner.transform(&table).unwrap();
        let x = boosted.scaler.transform(&x).unwrap();
        let mut model = XGBoostClassifier::new(XGBoostConfig { n_estimators: 10, min_child_weight: 0.0, ..Default::default() });
        model.fit(&x, &[0, 0, 1, 1], 2, None).unwrap();
        boosted.model = TrainedModel::XGBoost(model);

        let dir = TempDir::new().unwrap();
        for (name, artifact) in [("logistic", fixture()), ("xgboost", boosted)] {
            let prefix = dir.path().join(name);
            artifact.save(&prefix).unwrap();
            let before = InferenceService::from_artifact(artifact).predict(flows()).unwrap();
            let after = InferenceService::open(&prefix, InferenceConfig::default())
                .unwrap()
                .predict(flows())
                .unwrap();

            assert_eq!(before.len(), after.len());
            for (a, b) in before.iter().zip(&after) {
                assert_eq!(a.label, b.label, "{name}");
                assert_eq!(a.confidence.to_bits(), b.confidence.to_bits(), "{name}");
            }
            assert_eq!(before, after);
        }
    }

    #[test]
    fn test_predictions_table_layout() {
        let preds = InferenceService::from_artifact(fixture()).predict(flows()).unwrap();
        let table = predictions_table(&preds).unwrap();
        assert_eq!(table.column_names(), vec!["prediction", "confidence", "calibrated", "src_port"]);
        assert_eq!(table.n_rows(), 3);
    }
}

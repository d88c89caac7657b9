//! Run reporting
//!
//! Candidate comparison, per-class classification report, top-N feature
//! importances and the JSON summary written beside the artifact.

use super::PipelineConfig;
use crate::error::Result;
use crate::ingest::SkippedSource;
use crate::training::{CandidateOutcome, CandidateResult, Classifier, ModelMetrics, SearchReport, TrainedModel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use uuid::Uuid;

/// One line of the candidate comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub name: String,
    pub succeeded: bool,
    /// Mean cross-validated weighted F1; absent for failures and the ensemble
    pub cv_f1: Option<f64>,
    pub accuracy: Option<f64>,
    pub f1: Option<f64>,
    pub fit_secs: Option<f64>,
    pub params: Option<String>,
    pub failure: Option<String>,
    pub selected: bool,
}

impl CandidateSummary {
    fn from_result(result: &CandidateResult, selected: &str) -> Self {
        Self {
            name: result.name.clone(),
            succeeded: true,
            cv_f1: result.cv_score.is_finite().then_some(result.cv_score),
            accuracy: Some(result.metrics.accuracy),
            f1: Some(result.metrics.weighted_f1),
            fit_secs: Some(result.fit_secs),
            params: Some(result.best_params.to_string()),
            failure: None,
            selected: result.name == selected,
        }
    }
}

/// Candidates in evaluation order, then the ensemble when one was built
pub fn summarize_candidates(report: &SearchReport) -> Vec<CandidateSummary> {
    let mut rows: Vec<CandidateSummary> = report
        .outcomes
        .iter()
        .map(|outcome| match outcome {
            CandidateOutcome::Succeeded(result) => CandidateSummary::from_result(result, &report.selected),
            CandidateOutcome::Failed { learner, reason } => CandidateSummary {
                name: learner.clone(),
                succeeded: false,
                cv_f1: None,
                accuracy: None,
                f1: None,
                fit_secs: None,
                params: None,
                failure: Some(reason.clone()),
                selected: false,
            },
        })
        .collect();
    if let Some(ensemble) = &report.ensemble {
        rows.push(CandidateSummary::from_result(ensemble, &report.selected));
    }
    rows
}

/// A feature and its importance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// Top `n` importances of `model`, mapped onto the selected column names.
/// Empty when the model has no importances.
pub fn top_importances(model: &TrainedModel, feature_columns: &[String], n: usize) -> Vec<FeatureImportance> {
    let Some(importances) = model.feature_importances() else {
        return Vec::new();
    };
    let mut ranked: Vec<FeatureImportance> = feature_columns
        .iter()
        .zip(importances)
        .map(|(feature, importance)| FeatureImportance { feature: feature.clone(), importance })
        .collect();
    // Stable: equal importances keep column order
    ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    ranked.truncate(n);
    ranked
}

/// Machine-readable record of a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub bundle_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub selected_model: String,
    pub classes: Vec<String>,
    pub feature_columns: Vec<String>,
    pub n_train: usize,
    pub n_test: usize,
    pub stratified_split: bool,
    pub sources: Vec<String>,
    pub skipped_sources: Vec<SkippedSource>,
    pub candidates: Vec<CandidateSummary>,
    pub metrics: ModelMetrics,
    pub importances: Vec<FeatureImportance>,
    pub config: PipelineConfig,
}

impl RunSummary {
    /// Write as pretty-printed JSON
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_json(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}

/// Candidate comparison as aligned text. The selected model is marked `*`.
pub fn format_comparison(rows: &[CandidateSummary]) -> String {
    let width = rows.iter().map(|r| r.name.len()).max().unwrap_or(0).max("model".len());
    let mut out = String::new();
    out.push_str(&format!(
        "  {:<width$}  {:>7}  {:>8}  {:>7}  {:>9}\n",
        "model", "cv_f1", "accuracy", "f1", "fit_secs"
    ));
    for row in rows {
        let mark = if row.selected { '*' } else { ' ' };
        if !row.succeeded {
            out.push_str(&format!(
                "{} {:<width$}  failed: {}\n",
                mark,
                row.name,
                row.failure.as_deref().unwrap_or("unknown error")
            ));
            continue;
        }
        out.push_str(&format!(
            "{} {:<width$}  {:>7}  {:>8.4}  {:>7.4}  {:>9.2}\n",
            mark,
            row.name,
            row.cv_f1.map(|v| format!("{:.4}", v)).unwrap_or_else(|| "-".to_string()),
            row.accuracy.unwrap_or(0.0),
            row.f1.unwrap_or(0.0),
            row.fit_secs.unwrap_or(0.0),
        ));
    }
    out
}

/// Per-class precision, recall, F1 and support, followed by the confusion matrix
pub fn format_classification_report(metrics: &ModelMetrics, classes: &[String]) -> String {
    let width = classes.iter().map(String::len).max().unwrap_or(0).max("weighted avg".len());
    let mut out = String::new();
    out.push_str(&format!(
        "  {:<width$}  {:>9}  {:>9}  {:>9}  {:>9}\n",
        "", "precision", "recall", "f1", "support"
    ));
    for (class, report) in classes.iter().zip(&metrics.per_class) {
        out.push_str(&format!(
            "  {:<width$}  {:>9.4}  {:>9.4}  {:>9.4}  {:>9}\n",
            class, report.precision, report.recall, report.f1, report.support
        ));
    }
    out.push('\n');
    out.push_str(&format!("  {:<width$}  {:>9}  {:>9}  {:>9.4}  {:>9}\n", "accuracy", "", "", metrics.accuracy, metrics.n_samples));
    out.push_str(&format!(
        "  {:<width$}  {:>9}  {:>9}  {:>9.4}  {:>9}\n",
        "weighted avg", "", "", metrics.weighted_f1, metrics.n_samples
    ));

    out.push_str("\n  confusion matrix (rows: true, columns: predicted)\n");
    let cell = metrics
        .confusion_matrix
        .iter()
        .flatten()
        .map(|v| v.to_string().len())
        .max()
        .unwrap_or(1)
        .max(classes.iter().map(String::len).max().unwrap_or(1));
    out.push_str(&format!("  {:<width$}", ""));
    for class in classes {
        out.push_str(&format!("  {:>cell$}", class));
    }
    out.push('\n');
    for (class, row) in classes.iter().zip(&metrics.confusion_matrix) {
        out.push_str(&format!("  {:<width$}", class));
        for v in row {
            out.push_str(&format!("  {:>cell$}", v));
        }
        out.push('\n');
    }
    out
}

/// Ranked importances, one per line
pub fn format_importances(importances: &[FeatureImportance]) -> String {
    let width = importances.iter().map(|f| f.feature.len()).max().unwrap_or(0);
    importances
        .iter()
        .enumerate()
        .map(|(i, f)| format!("  {:>2}. {:<width$}  {:.4}\n", i + 1, f.feature, f.importance))
        .collect()
}

//! Training pipeline
//!
//! Composes the stages end to end:
//!
//! ingest → normalize → engineer → standardize labels → split → clean →
//! scale → select → model search → artifact
//!
//! Each stage takes the current [`PipelineContext`] by value and returns the
//! next one beside its output. Cleaner, scaler and selector are fit on the
//! training rows only and replayed on the held-out rows.

mod config;
mod context;
pub mod report;

pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use report::{CandidateSummary, FeatureImportance, RunSummary};

use crate::error::{FlowError, Result};
use crate::export::{ArtifactMetadata, ArtifactPaths, TrainedArtifact, FORMAT_VERSION};
use crate::feature_engineering::FeatureEngineer;
use crate::ingest::{FlowColumn, FlowTable, SideTable, SourceIngestor, UnifiedDataset};
use crate::preprocessing::{stratified_split, DatasetCleaner, FeatureSelector, Scaler, SplitOutcome};
use crate::schema::{LabelVocabulary, SchemaMap, Strictness};
use crate::training::{ModelSearch, SearchReport};
use chrono::Utc;
use ndarray::Array2;
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Everything a training run produced
#[derive(Debug, Clone)]
pub struct TrainingRun {
    pub artifact: TrainedArtifact,
    pub search: SearchReport,
    pub context: PipelineContext,
    pub split: SplitOutcome,
    pub summary: RunSummary,
}

impl TrainingRun {
    /// Persist the artifact and write the JSON summary beside it
    pub fn save(&self, prefix: impl AsRef<std::path::Path>) -> Result<ArtifactPaths> {
        let paths = self.artifact.save(prefix)?;
        self.summary.write_json(&paths.summary)?;
        info!(summary = %paths.summary.display(), "run summary written");
        Ok(paths)
    }
}

/// Labelled rows after standardization
struct LabelledRows {
    table: FlowTable,
    y: Vec<usize>,
}

/// Matrices after the fitted transforms
struct PreparedSplit {
    x_train: Array2<f64>,
    y_train: Vec<usize>,
    x_test: Array2<f64>,
    y_test: Vec<usize>,
    cleaner: DatasetCleaner,
    scaler: Scaler,
    selector: FeatureSelector,
}

/// End-to-end trainer
#[derive(Debug, Clone)]
pub struct TrainingPipeline {
    config: PipelineConfig,
    schema: SchemaMap,
    vocabulary: LabelVocabulary,
    engineer: FeatureEngineer,
}

impl TrainingPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            schema: SchemaMap::default(),
            vocabulary: LabelVocabulary::default(),
            engineer: FeatureEngineer::new(),
        })
    }

    pub fn with_schema(mut self, schema: SchemaMap) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_vocabulary(mut self, vocabulary: LabelVocabulary) -> Self {
        self.vocabulary = vocabulary;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Ingest the configured data directory and train
    pub fn run(&self) -> Result<TrainingRun> {
        let dir = self
            .config
            .data_dir
            .as_deref()
            .ok_or_else(|| FlowError::ConfigError("data_dir is not set".to_string()))?;
        let ingestor = SourceIngestor::new(self.schema.clone(), self.config.ingest_options());
        let dataset = ingestor.load_dir(dir)?;
        self.train(dataset)
    }

    /// Train on an already unified dataset
    pub fn train(&self, dataset: UnifiedDataset) -> Result<TrainingRun> {
        let start = Instant::now();
        let UnifiedDataset { table, sources, skipped } = dataset;
        let context = PipelineContext::new(self.schema.clone(), self.vocabulary.clone(), &self.config.target_column);

        let table = self.engineer.engineer(table);
        let context = context.with_training_columns(table.column_names());

        let (context, labelled) = self.standardize_labels(context, table)?;
        let side = SideTable::extract(&labelled.table);
        let context = context.with_side_table(side);

        let split = stratified_split(&labelled.y, context.n_classes(), self.config.test_size, self.config.seed);
        if !split.stratified {
            warn!(train = split.train.len(), test = split.test.len(), "unstratified split used");
        }

        let (context, prepared) = self.fit_transforms(context, &labelled, &split)?;
        drop(labelled);

        let search = ModelSearch::new(self.config.engine_config()).run(
            &prepared.x_train,
            &prepared.y_train,
            &prepared.x_test,
            &prepared.y_test,
            context.n_classes(),
        )?;
        let best = search.best().ok_or(FlowError::NoCandidateSucceeded)?.clone();

        let metadata = ArtifactMetadata {
            model_name: best.name.clone(),
            feature_columns: context.feature_columns().to_vec(),
            classes: context.classes().to_vec(),
            target_column: context.target_column().to_string(),
            schema: context.schema().clone(),
            vocabulary: context.vocabulary().clone(),
            cleaner: prepared.cleaner,
            selector: prepared.selector,
            side_table: context.side_table().select(&split.test),
            training_columns: context.training_columns().to_vec(),
            schema_strictness: self.config.schema_strictness,
            metrics: best.metrics.clone(),
            best_params: best.best_params.to_string(),
            created_at: Utc::now(),
            format_version: FORMAT_VERSION,
        };
        let artifact = TrainedArtifact::new(best.model.clone(), prepared.scaler, metadata);

        let summary = RunSummary {
            bundle_id: artifact.bundle_id(),
            created_at: artifact.metadata.created_at,
            selected_model: best.name.clone(),
            classes: context.classes().to_vec(),
            feature_columns: context.feature_columns().to_vec(),
            n_train: split.train.len(),
            n_test: split.test.len(),
            stratified_split: split.stratified,
            sources,
            skipped_sources: skipped,
            candidates: report::summarize_candidates(&search),
            metrics: best.metrics.clone(),
            importances: report::top_importances(&best.model, context.feature_columns(), self.config.importance_top_n),
            config: self.config.clone(),
        };

        info!(
            selected = %best.name,
            f1 = best.metrics.weighted_f1,
            secs = start.elapsed().as_secs_f64(),
            "training run finished"
        );
        Ok(TrainingRun { artifact, search, context, split, summary })
    }

    /// Standardize the target, drop unlabelled rows and encode classes
    fn standardize_labels(&self, context: PipelineContext, mut table: FlowTable) -> Result<(PipelineContext, LabelledRows)> {
        let target = context.target_column().to_string();
        let raw = table
            .text_values(&target)
            .ok_or_else(|| FlowError::MissingTarget(target.clone()))?;
        let labels = context.vocabulary().standardize(&raw);

        let unknown = context.vocabulary().pass_through(labels.iter().flatten().map(String::as_str));
        if !unknown.is_empty() {
            match self.config.label_strictness {
                Strictness::Warn => warn!(labels = ?unknown, "labels outside the vocabulary passed through"),
                Strictness::Reject => return Err(FlowError::UnknownLabel { labels: unknown }),
            }
        }

        let keep: Vec<usize> = (0..labels.len()).filter(|&i| labels[i].is_some()).collect();
        if keep.len() < labels.len() {
            info!(dropped = labels.len() - keep.len(), "rows without a label dropped");
        }
        let labels: Vec<String> = keep.iter().filter_map(|&i| labels[i].clone()).collect();

        table.remove_column(&target);
        let mut table = table.take_rows(&keep);
        table.push_column(FlowColumn::text(target.as_str(), labels.iter().cloned().map(Some).collect()))?;

        let classes: Vec<String> = labels.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
        if classes.len() < 2 {
            return Err(FlowError::TrainingError(format!(
                "need at least two classes, found {}",
                classes.len()
            )));
        }
        let y: Vec<usize> = labels
            .iter()
            .map(|l| classes.binary_search(l).unwrap_or_else(|pos| pos))
            .collect();

        info!(rows = y.len(), classes = ?classes, "labels standardized");
        Ok((context.with_classes(classes), LabelledRows { table, y }))
    }

    /// Fit cleaner, scaler and selector on the training rows, apply to both sides
    fn fit_transforms(
        &self,
        context: PipelineContext,
        labelled: &LabelledRows,
        split: &SplitOutcome,
    ) -> Result<(PipelineContext, PreparedSplit)> {
        let y_train: Vec<usize> = split.train.iter().map(|&i| labelled.y[i]).collect();
        let y_test: Vec<usize> = split.test.iter().map(|&i| labelled.y[i]).collect();

        let mut cleaner = DatasetCleaner::new(context.target_column());
        let (x_train, x_test) = {
            let train_table = labelled.table.take_rows(&split.train);
            let test_table = labelled.table.take_rows(&split.test);
            let x_train = cleaner.fit_transform(&train_table)?;
            (x_train, cleaner.transform(&test_table)?)
        };

        let mut scaler = Scaler::new(self.config.scaler);
        let x_train = scaler.fit_transform(&x_train)?;
        let x_test = scaler.transform(&x_test)?;

        let mut selector =
            FeatureSelector::new(self.config.selection, self.config.k_features).with_seed(self.config.seed);
        let x_train = selector.fit_transform(&x_train, &y_train, context.n_classes())?;
        let x_test = selector.transform(&x_test)?;

        let cleaned = cleaner.feature_columns();
        let feature_columns = selector.selected_names(&cleaned).unwrap_or(cleaned);
        debug!(features = ?feature_columns, "feature columns fixed");
        info!(
            train = x_train.nrows(),
            test = x_test.nrows(),
            features = feature_columns.len(),
            scaler = %self.config.scaler,
            selection = %self.config.selection,
            "features prepared"
        );

        let context = context
            .with_encoders(cleaner.encoders().clone())
            .with_feature_columns(feature_columns);
        Ok((
            context,
            PreparedSplit { x_train, y_train, x_test, y_test, cleaner, scaler, selector },
        ))
    }
}

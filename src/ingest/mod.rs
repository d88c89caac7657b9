//! Multi-source ingestion
//!
//! Loads every CSV export in a directory, reconciles column names, resolves
//! the label column, caps oversized sources with balanced per-class sampling
//! and concatenates everything into one [`UnifiedDataset`].
//!
//! A source that fails to parse or has no resolvable label column is recorded
//! as a [`SkippedSource`] and the run continues.

mod loader;
mod sampling;
mod side_table;
mod table;

pub use loader::{csv_files, write_csv, CsvLoader};
pub use sampling::balanced_sample;
pub use side_table::{SideRow, SideTable, SIDE_COLUMNS};
pub use table::{ColumnValues, FlowColumn, FlowTable};

use crate::error::{FlowError, Result};
use crate::schema::{normalize_token, SchemaMap};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Column holding the source file stem of each row
pub const SOURCE_COLUMN: &str = "source_file";

/// Label column names tried, in order, when the target is absent
pub const LABEL_ALTERNATIVES: [&str; 4] = ["label", "target", "class", "attack"];

/// Ingestion options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestOptions {
    /// Canonical target column name
    pub target_column: String,
    /// Per-file row cap before balanced sampling kicks in
    pub max_samples_per_file: usize,
    /// Seed for sampling
    pub seed: u64,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            target_column: "label".to_string(),
            max_samples_per_file: 75_000,
            seed: 42,
        }
    }
}

/// A source excluded from the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedSource {
    pub path: PathBuf,
    pub reason: String,
}

/// Concatenation of all usable sources over one canonical vocabulary
#[derive(Debug, Clone)]
pub struct UnifiedDataset {
    /// Canonical columns plus the target and [`SOURCE_COLUMN`]
    pub table: FlowTable,
    /// Stems of the sources that contributed rows, in load order
    pub sources: Vec<String>,
    /// Sources that were skipped
    pub skipped: Vec<SkippedSource>,
}

/// Loads and reconciles flow exports
#[derive(Debug, Clone)]
pub struct SourceIngestor {
    schema: SchemaMap,
    options: IngestOptions,
    loader: CsvLoader,
}

impl SourceIngestor {
    pub fn new(schema: SchemaMap, options: IngestOptions) -> Self {
        Self { schema, options, loader: CsvLoader::new() }
    }

    pub fn with_loader(mut self, loader: CsvLoader) -> Self {
        self.loader = loader;
        self
    }

    pub fn options(&self) -> &IngestOptions {
        &self.options
    }

    /// Load every CSV file in `dir`, in sorted order
    pub fn load_dir(&self, dir: &Path) -> Result<UnifiedDataset> {
        let files = csv_files(dir)?;
        info!(dir = %dir.display(), files = files.len(), "loading sources");

        let mut tables = Vec::with_capacity(files.len());
        let mut sources = Vec::with_capacity(files.len());
        let mut skipped = Vec::new();

        for path in files {
            match self.load_source(&path) {
                Ok(table) => {
                    info!(file = %path.display(), rows = table.n_rows(), "source loaded");
                    sources.push(source_stem(&path));
                    tables.push(table);
                }
                Err(FlowError::SourceSkipped { path, reason }) => {
                    warn!(file = %path.display(), %reason, "source skipped");
                    skipped.push(SkippedSource { path, reason });
                }
                Err(err) => {
                    warn!(file = %path.display(), error = %err, "source skipped");
                    skipped.push(SkippedSource { path, reason: err.to_string() });
                }
            }
        }

        if tables.is_empty() {
            return Err(FlowError::NoUsableSources(dir.to_path_buf()));
        }

        let table = FlowTable::concat(tables);
        info!(rows = table.n_rows(), cols = table.n_cols(), sources = sources.len(), "sources combined");
        Ok(UnifiedDataset { table, sources, skipped })
    }

    /// Load and prepare a single source
    pub fn load_source(&self, path: &Path) -> Result<FlowTable> {
        let raw = self.loader.load(path).map_err(|e| FlowError::SourceSkipped {
            path: path.to_path_buf(),
            reason: format!("parse failure: {}", e),
        })?;
        self.prepare(raw, &source_stem(path)).map_err(|e| match e {
            FlowError::MissingTarget(target) => FlowError::SourceSkipped {
                path: path.to_path_buf(),
                reason: format!("no label column (looked for '{}' and alternatives)", target),
            },
            other => other,
        })
    }

    /// Normalize, resolve the label column, cap and tag an in-memory source
    pub fn prepare(&self, raw: FlowTable, source: &str) -> Result<FlowTable> {
        let target = self.options.target_column.as_str();
        let mut table = self.schema.normalize(raw);

        if !table.contains(target) {
            let alternative = LABEL_ALTERNATIVES
                .iter()
                .find(|alt| table.contains(alt))
                .ok_or_else(|| FlowError::MissingTarget(target.to_string()))?;
            info!(source, from = *alternative, to = target, "renamed label column");
            table.rename_column(alternative, target);
        }

        // Label tokens are kept as trimmed, upper-cased text
        let labels: Vec<Option<String>> = table
            .text_values(target)
            .unwrap_or_default()
            .into_iter()
            .map(|l| l.map(|s| normalize_token(&s)).filter(|s| !s.is_empty()))
            .collect();
        table.remove_column(target);
        table.push_column(FlowColumn::text(target, labels.clone()))?;

        let cap = self.options.max_samples_per_file;
        if table.n_rows() > cap {
            let keep = balanced_sample(&labels, cap, self.options.seed);
            info!(source, before = table.n_rows(), after = keep.len(), "balanced sampling applied");
            table = table.take_rows(&keep);
        }

        table.remove_column(SOURCE_COLUMN);
        let n = table.n_rows();
        table.push_column(FlowColumn::text(SOURCE_COLUMN, vec![Some(source.to_string()); n]))?;
        Ok(table)
    }
}

fn source_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

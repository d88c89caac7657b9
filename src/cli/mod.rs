//! flowsentry CLI Module
//!
//! Command-line interface for training, prediction and artifact inspection.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::export::{ArtifactPaths, TrainedArtifact};
use crate::ingest::write_csv;
use crate::inference::{predictions_table, InferenceConfig, InferenceService};
use crate::pipeline::report::{format_classification_report, format_comparison, format_importances};
use crate::pipeline::{PipelineConfig, RunSummary, TrainingPipeline};
use crate::preprocessing::{ScalerType, SelectionStrategy};
use crate::schema::Strictness;
use crate::training::{LearnerKind, SearchStrategy};

// ─── Styling helpers ───────────────────────────────────────────────────────────

const W: usize = 58; // box inner width

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn line_box_top()    { println!("  {}", dim("┌─────────────────────────────────────────────────────────┐")); }
fn line_box_bottom() { println!("  {}", dim("└─────────────────────────────────────────────────────────┘")); }

fn line_box(content: &str) {
    let visible_len = strip_ansi(content).chars().count();
    let pad = W.saturating_sub(visible_len);
    println!("  {}  {}{} {}", dim("│"), content, " ".repeat(pad), dim("│"));
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::new();
    let mut in_escape = false;
    for c in s.chars() {
        if c == '\x1b' { in_escape = true; continue; }
        if in_escape { if c == 'm' { in_escape = false; } continue; }
        out.push(c);
    }
    out
}

fn kv(key: &str, val: &str) -> String {
    format!("{} {}", muted(key), val.white())
}

fn step_ok(msg: &str) {
    println!("  {} {}", ok("✓"), msg);
}

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
    let _ = std::io::stdout().flush();
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

/// Print a pre-formatted block, highlighting lines that mark the selection
fn print_block(text: &str) {
    for line in text.lines() {
        if line.starts_with('*') {
            println!("{}", ok(line).bold());
        } else if line.contains("failed:") {
            println!("{}", line.red());
        } else {
            println!("{}", line);
        }
    }
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "flowsentry")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Multi-source network-flow classifier training and inference")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Hyperparameter search strategy flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SearchArg {
    Grid,
    Random,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train on a directory of flow CSV exports and persist the best model
    Train {
        /// Directory of CSV sources
        #[arg(short, long)]
        data: PathBuf,

        /// Artifact name prefix
        #[arg(short, long)]
        output: PathBuf,

        /// TOML configuration file; flags override its values
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Scaling strategy (robust, minmax, standard)
        #[arg(long)]
        scaler: Option<ScalerType>,

        /// Feature selection (mutual_info, f_classif, rfe, none)
        #[arg(long)]
        selection: Option<SelectionStrategy>,

        /// Number of features kept by selection
        #[arg(short, long)]
        k: Option<usize>,

        /// Per-file sample cap
        #[arg(long)]
        max_samples: Option<usize>,

        /// Target label column
        #[arg(short, long)]
        target: Option<String>,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Hyperparameter search strategy
        #[arg(long, value_enum)]
        search: Option<SearchArg>,

        /// Combinations sampled by random search
        #[arg(long)]
        n_iter: Option<usize>,

        /// Search worker threads (0 = all cores)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Comma-separated learners (rf, xgb, gb, et, lr, knn, nn, svm)
        #[arg(long, value_delimiter = ',')]
        learners: Option<Vec<LearnerKind>>,

        /// Reject unknown labels and unseen columns instead of warning
        #[arg(long)]
        strict: bool,
    },

    /// Score a CSV file with a persisted model
    Predict {
        /// Artifact name prefix
        #[arg(short, long)]
        model: PathBuf,

        /// Input CSV file
        #[arg(short, long)]
        data: PathBuf,

        /// Output predictions CSV
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Fail on columns not seen during training
        #[arg(long)]
        strict: bool,
    },

    /// Show the metadata of a persisted model
    Inspect {
        /// Artifact name prefix
        #[arg(short, long)]
        model: PathBuf,
    },
}

/// Flag overrides for `train`
#[derive(Debug, Clone, Default)]
pub struct TrainOverrides {
    pub config: Option<PathBuf>,
    pub scaler: Option<ScalerType>,
    pub selection: Option<SelectionStrategy>,
    pub k: Option<usize>,
    pub max_samples: Option<usize>,
    pub target: Option<String>,
    pub seed: Option<u64>,
    pub search: Option<SearchArg>,
    pub n_iter: Option<usize>,
    pub jobs: Option<usize>,
    pub learners: Option<Vec<LearnerKind>>,
    pub strict: bool,
}

impl TrainOverrides {
    /// Start from the config file (or defaults) and apply every flag given
    pub fn resolve(&self, data: &Path) -> anyhow::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_toml_file(path)
                .with_context(|| format!("failed to read config {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        config.data_dir = Some(data.to_path_buf());

        if let Some(scaler) = self.scaler {
            config.scaler = scaler;
        }
        if let Some(selection) = self.selection {
            config.selection = selection;
        }
        if let Some(k) = self.k {
            config.k_features = k;
        }
        if let Some(cap) = self.max_samples {
            config.max_samples_per_file = cap;
        }
        if let Some(target) = &self.target {
            config.target_column = target.clone();
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        let n_iter = match (self.n_iter, config.search) {
            (Some(n), _) => n,
            (None, SearchStrategy::Random { n_iter }) => n_iter,
            (None, SearchStrategy::Grid) => 10,
        };
        match self.search {
            Some(SearchArg::Grid) => config.search = SearchStrategy::Grid,
            Some(SearchArg::Random) => config.search = SearchStrategy::Random { n_iter },
            None if self.n_iter.is_some() => config.search = SearchStrategy::Random { n_iter },
            None => {}
        }
        if let Some(jobs) = self.jobs {
            config.n_jobs = jobs;
        }
        if let Some(learners) = &self.learners {
            config.learners = Some(learners.clone());
        }
        if self.strict {
            config.schema_strictness = Strictness::Reject;
            config.label_strictness = Strictness::Reject;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub fn cmd_train(data: &Path, output: &Path, overrides: &TrainOverrides) -> anyhow::Result<()> {
    let config = overrides.resolve(data)?;
    section("Train");
    println!("  {}", kv("data      ", &data.display().to_string()));
    println!("  {}", kv("scaler    ", &config.scaler.to_string()));
    println!("  {}", kv("selection ", &format!("{} (k={})", config.selection, config.k_features)));
    println!("  {}", kv("search    ", &format!("{:?}, {} folds", config.search, config.cv_folds)));
    println!();

    step_run("Training");
    let start = Instant::now();
    let pipeline = TrainingPipeline::new(config).context("invalid configuration")?;
    let run = pipeline.run().context("training failed")?;
    step_done(&format!("{:.1}s", start.elapsed().as_secs_f64()));

    print_summary(&run.summary);

    section("Artifacts");
    let paths = run
        .save(output)
        .with_context(|| format!("failed to save artifact {}", output.display()))?;
    print_paths(&paths);
    println!();
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    for skipped in &summary.skipped_sources {
        println!("  {} {} {}", "!".yellow(), skipped.path.display(), dim(&skipped.reason));
    }
    if !summary.stratified_split {
        println!("  {} {}", "!".yellow(), "stratified split infeasible, shuffled split used".yellow());
    }

    section("Candidates");
    print_block(&format_comparison(&summary.candidates));

    section(&format!("Classification report ({})", summary.selected_model));
    print!("{}", format_classification_report(&summary.metrics, &summary.classes));

    if !summary.importances.is_empty() {
        section("Top features");
        print!("{}", format_importances(&summary.importances));
    }
}

fn print_paths(paths: &ArtifactPaths) {
    step_ok(&format!("model     {}", paths.model.display()));
    step_ok(&format!("scaler    {}", paths.scaler.display()));
    step_ok(&format!("metadata  {}", paths.metadata.display()));
    step_ok(&format!("summary   {}", paths.summary.display()));
}

pub fn cmd_predict(model: &Path, data: &Path, output: Option<&Path>, strict: bool) -> anyhow::Result<()> {
    section("Predict");

    step_run("Loading model");
    let mut config = InferenceConfig::default();
    if strict {
        config = config.with_schema_strictness(Strictness::Reject);
    }
    let service = InferenceService::open(model, config)
        .with_context(|| format!("failed to load model {}", model.display()))?;
    step_done(&service.handle().current().metadata.model_name);

    step_run("Scoring");
    let start = Instant::now();
    let predictions = service
        .predict_csv(data)
        .with_context(|| format!("failed to score {}", data.display()))?;
    step_done(&format!("{} rows in {:.2}s", predictions.len(), start.elapsed().as_secs_f64()));

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut placeholder = 0;
    for p in &predictions {
        *counts.entry(p.label.as_str()).or_default() += 1;
        if !p.calibrated {
            placeholder += 1;
        }
    }
    println!();
    for (label, count) in &counts {
        println!("  {:<20} {}", muted(label), count.to_string().white().bold());
    }
    if placeholder > 0 {
        println!();
        println!("  {}", "model has no probability output; confidences are a fixed placeholder".yellow());
    }

    if let Some(path) = output {
        let table = predictions_table(&predictions)?;
        write_csv(&table, path).with_context(|| format!("failed to write {}", path.display()))?;
        println!();
        step_ok(&format!("predictions written to {}", path.display()));
    }
    println!();
    Ok(())
}

pub fn cmd_inspect(model: &Path) -> anyhow::Result<()> {
    let artifact = TrainedArtifact::load(model).with_context(|| format!("failed to load model {}", model.display()))?;
    let meta = &artifact.metadata;

    println!();
    line_box_top();
    line_box(&kv("model     ", &format!("{} ({})", meta.model_name, artifact.model.kind())));
    line_box(&kv("bundle    ", &artifact.bundle_id().to_string()));
    line_box(&kv("created   ", &meta.created_at.format("%Y-%m-%d %H:%M UTC").to_string()));
    line_box(&kv("format    ", &format!("v{}", meta.format_version)));
    line_box(&kv("scaler    ", &artifact.scaler.scaler_type().to_string()));
    line_box(&kv("selection ", &meta.selector.strategy().to_string()));
    line_box(&kv("strictness", &format!("{:?}", meta.schema_strictness).to_lowercase()));
    line_box(&kv("held out  ", &format!("{} rows", meta.side_table.len())));
    line_box_bottom();

    section("Hyperparameters");
    println!("  {}", meta.best_params);

    section(&format!("Features ({})", meta.feature_columns.len()));
    for (i, name) in meta.feature_columns.iter().enumerate() {
        println!("  {:>3}. {}", i + 1, name);
    }
    if !meta.cleaner.dropped_constant().is_empty() {
        println!("  {} {}", muted("dropped constant:"), meta.cleaner.dropped_constant().join(", "));
    }

    section("Held-out evaluation");
    print!("{}", format_classification_report(&meta.metrics, &meta.classes));
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_train_flags() {
        let cli = Cli::try_parse_from([
            "flowsentry", "train", "--data", "flows", "--output", "out/model", "--scaler", "minmax",
            "--learners", "rf,lr", "--search", "grid", "--strict",
        ])
        .unwrap();
        match cli.command {
            Commands::Train { scaler, learners, search, strict, .. } => {
                assert_eq!(scaler, Some(ScalerType::MinMax));
                assert_eq!(learners, Some(vec![LearnerKind::RandomForest, LearnerKind::LogisticRegression]));
                assert_eq!(search, Some(SearchArg::Grid));
                assert!(strict);
            }
            _ => panic!("expected train"),
        }
    }

    #[test]
    fn test_overrides_apply_on_defaults() {
        let overrides = TrainOverrides {
            k: Some(10),
            n_iter: Some(3),
            strict: true,
            ..Default::default()
        };
        let config = overrides.resolve(Path::new("flows")).unwrap();
        assert_eq!(config.k_features, 10);
        assert_eq!(config.search, SearchStrategy::Random { n_iter: 3 });
        assert_eq!(config.label_strictness, Strictness::Reject);
        assert_eq!(config.data_dir, Some(PathBuf::from("flows")));
    }

    #[test]
    fn test_invalid_override_rejected() {
        let overrides = TrainOverrides { k: Some(0), ..Default::default() };
        assert!(overrides.resolve(Path::new("flows")).is_err());
    }

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[1mbold\x1b[0m"), "bold");
    }
}

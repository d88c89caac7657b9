//! Persisted training bundle
//!
//! A bundle is three independently loadable units sharing a name prefix:
//!
//! - `{prefix}.model.bin`: the selected model
//! - `{prefix}.scaler.bin`: the fitted scaler
//! - `{prefix}.metadata.bin`: everything needed to replay preprocessing
//!
//! Each unit is a bincode [`Envelope`] carrying a magic tag, the format
//! version, the unit kind, the bundle id shared by all three units and an
//! FNV-1a checksum of the payload. Loading rejects partial or mixed bundles.

use crate::error::{FlowError, Result};
use crate::ingest::SideTable;
use crate::preprocessing::{CategoryEncoder, DatasetCleaner, FeatureSelector, Scaler};
use crate::schema::{LabelVocabulary, SchemaMap, Strictness};
use crate::training::{Classifier, ModelMetrics, TrainedModel};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Leading tag of every unit
pub const ARTIFACT_MAGIC: [u8; 4] = *b"FSNT";

/// Current on-disk format version
pub const FORMAT_VERSION: u32 = 1;

/// The three units of a bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitKind {
    Model,
    Scaler,
    Metadata,
}

impl UnitKind {
    fn suffix(&self) -> &'static str {
        match self {
            UnitKind::Model => ".model.bin",
            UnitKind::Scaler => ".scaler.bin",
            UnitKind::Metadata => ".metadata.bin",
        }
    }
}

/// On-disk wrapper around one serialized unit
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    magic: [u8; 4],
    format_version: u32,
    kind: UnitKind,
    bundle_id: Uuid,
    checksum: u64,
    payload: Vec<u8>,
}

/// 64-bit FNV-1a
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes.iter().fold(OFFSET, |hash, &b| (hash ^ b as u64).wrapping_mul(PRIME))
}

/// File locations of a bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub model: PathBuf,
    pub scaler: PathBuf,
    pub metadata: PathBuf,
    /// JSON run summary written beside the bundle
    pub summary: PathBuf,
}

impl ArtifactPaths {
    pub fn for_prefix(prefix: impl AsRef<Path>) -> Self {
        let prefix = prefix.as_ref();
        Self {
            model: with_suffix(prefix, UnitKind::Model.suffix()),
            scaler: with_suffix(prefix, UnitKind::Scaler.suffix()),
            metadata: with_suffix(prefix, UnitKind::Metadata.suffix()),
            summary: with_suffix(prefix, ".summary.json"),
        }
    }

    fn unit(&self, kind: UnitKind) -> &Path {
        match kind {
            UnitKind::Model => &self.model,
            UnitKind::Scaler => &self.scaler,
            UnitKind::Metadata => &self.metadata,
        }
    }
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = prefix.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Everything besides the model and scaler needed to replay preprocessing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Selected model name as reported by the search
    pub model_name: String,
    /// Model input columns, in order
    pub feature_columns: Vec<String>,
    /// Class labels indexed by class id
    pub classes: Vec<String>,
    pub target_column: String,
    pub schema: SchemaMap,
    pub vocabulary: LabelVocabulary,
    /// Fitted cleaner, including the per-column category encoders
    pub cleaner: DatasetCleaner,
    pub selector: FeatureSelector,
    /// Identifiers of the held-out rows
    pub side_table: SideTable,
    /// Columns seen after normalization and engineering at training time
    pub training_columns: Vec<String>,
    pub schema_strictness: Strictness,
    /// Held-out metrics of the selected model
    pub metrics: ModelMetrics,
    /// Hyperparameters of the selected model, rendered
    pub best_params: String,
    pub created_at: DateTime<Utc>,
    pub format_version: u32,
}

/// The persisted result of one training run. Immutable once built.
#[derive(Debug, Clone)]
pub struct TrainedArtifact {
    pub model: TrainedModel,
    pub scaler: Scaler,
    pub metadata: ArtifactMetadata,
    bundle_id: Uuid,
}

impl TrainedArtifact {
    /// Bundle a freshly trained model under a new bundle id
    pub fn new(model: TrainedModel, scaler: Scaler, metadata: ArtifactMetadata) -> Self {
        Self { model, scaler, metadata, bundle_id: Uuid::new_v4() }
    }

    pub fn bundle_id(&self) -> Uuid {
        self.bundle_id
    }

    /// Per-column category encoders
    pub fn encoders(&self) -> &BTreeMap<String, CategoryEncoder> {
        self.metadata.cleaner.encoders()
    }

    /// Write the three units under `prefix`
    pub fn save(&self, prefix: impl AsRef<Path>) -> Result<ArtifactPaths> {
        let paths = ArtifactPaths::for_prefix(prefix);
        if let Some(parent) = paths.model.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        write_unit(paths.unit(UnitKind::Model), UnitKind::Model, self.bundle_id, &self.model)?;
        write_unit(paths.unit(UnitKind::Scaler), UnitKind::Scaler, self.bundle_id, &self.scaler)?;
        write_unit(paths.unit(UnitKind::Metadata), UnitKind::Metadata, self.bundle_id, &self.metadata)?;

        info!(
            model = %paths.model.display(),
            bundle = %self.bundle_id,
            kind = self.model.kind(),
            "artifact saved"
        );
        Ok(paths)
    }

    /// Load and validate the bundle under `prefix`
    pub fn load(prefix: impl AsRef<Path>) -> Result<Self> {
        let paths = ArtifactPaths::for_prefix(prefix);

        let (model_id, model): (Uuid, TrainedModel) = read_unit(&paths.model, UnitKind::Model)?;
        let (scaler_id, scaler): (Uuid, Scaler) = read_unit(&paths.scaler, UnitKind::Scaler)?;
        let (metadata_id, metadata): (Uuid, ArtifactMetadata) = read_unit(&paths.metadata, UnitKind::Metadata)?;

        if scaler_id != model_id {
            return Err(load_error(&paths.scaler, "unit belongs to a different bundle"));
        }
        if metadata_id != model_id {
            return Err(load_error(&paths.metadata, "unit belongs to a different bundle"));
        }
        if model.n_classes() != metadata.classes.len() {
            return Err(load_error(
                &paths.model,
                format!("model has {} classes, metadata lists {}", model.n_classes(), metadata.classes.len()),
            ));
        }
        if scaler.n_features() != metadata.cleaner.feature_columns().len() {
            return Err(load_error(
                &paths.scaler,
                format!(
                    "scaler expects {} columns, cleaner produces {}",
                    scaler.n_features(),
                    metadata.cleaner.feature_columns().len()
                ),
            ));
        }

        info!(model = %paths.model.display(), bundle = %model_id, kind = model.kind(), "artifact loaded");
        Ok(Self { model, scaler, metadata, bundle_id: model_id })
    }
}

fn load_error(path: &Path, reason: impl Into<String>) -> FlowError {
    FlowError::LoadError { path: path.to_path_buf(), reason: reason.into() }
}

// Temp sibling, flush, fsync, rename
fn write_unit<T: Serialize>(path: &Path, kind: UnitKind, bundle_id: Uuid, value: &T) -> Result<()> {
    let payload = bincode::serialize(value)?;
    let envelope = Envelope {
        magic: ARTIFACT_MAGIC,
        format_version: FORMAT_VERSION,
        kind,
        bundle_id,
        checksum: fnv1a64(&payload),
        payload,
    };

    let tmp = with_suffix(path, ".tmp");
    {
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, &envelope)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&tmp, path)?;
    debug!(file = %path.display(), ?kind, bytes = envelope.payload.len(), "unit written");
    Ok(())
}

fn read_unit<T: DeserializeOwned>(path: &Path, kind: UnitKind) -> Result<(Uuid, T)> {
    if !path.is_file() {
        return Err(load_error(path, "unit is missing"));
    }
    let bytes = fs::read(path).map_err(|e| load_error(path, e.to_string()))?;
    let envelope: Envelope =
        bincode::deserialize(&bytes).map_err(|e| load_error(path, format!("unreadable envelope: {}", e)))?;

    if envelope.magic != ARTIFACT_MAGIC {
        return Err(load_error(path, "not a flowsentry artifact"));
    }
    if envelope.format_version != FORMAT_VERSION {
        return Err(load_error(
            path,
            format!("unsupported format version {} (expected {})", envelope.format_version, FORMAT_VERSION),
        ));
    }
    if envelope.kind != kind {
        return Err(load_error(path, format!("expected a {:?} unit, found {:?}", kind, envelope.kind)));
    }
    if fnv1a64(&envelope.payload) != envelope.checksum {
        return Err(load_error(path, "checksum mismatch"));
    }

    let value = bincode::deserialize(&envelope.payload)
        .map_err(|e| load_error(path, format!("corrupt payload: {}", e)))?;
    Ok((envelope.bundle_id, value))
}

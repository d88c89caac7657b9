//! Artifact persistence
//!
//! Saves a trained bundle as three checksummed bincode units sharing a name
//! prefix, loads it back with full validation, and offers a lock-protected
//! handle so a running service can swap bundles atomically.

mod artifact;
mod handle;

pub use artifact::{
    fnv1a64, ArtifactMetadata, ArtifactPaths, TrainedArtifact, UnitKind, ARTIFACT_MAGIC, FORMAT_VERSION,
};
pub use handle::ArtifactHandle;

#[cfg(test)]
pub(crate) use artifact::tests::fixture;

//! Hot-swappable artifact reference

use super::TrainedArtifact;
use crate::error::Result;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Shared reference to the current bundle.
///
/// Readers clone the inner `Arc` and keep scoring against it while a swap
/// installs the next bundle, so a reader sees either the previous or the
/// next complete artifact.
#[derive(Debug, Clone)]
pub struct ArtifactHandle {
    current: Arc<RwLock<Arc<TrainedArtifact>>>,
}

impl ArtifactHandle {
    pub fn new(artifact: TrainedArtifact) -> Self {
        Self { current: Arc::new(RwLock::new(Arc::new(artifact))) }
    }

    /// Load the bundle under `prefix`
    pub fn open(prefix: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(TrainedArtifact::load(prefix)?))
    }

    /// The bundle in force right now
    pub fn current(&self) -> Arc<TrainedArtifact> {
        Arc::clone(&self.current.read())
    }

    /// Install `artifact`, returning the one it replaced
    pub fn swap(&self, artifact: TrainedArtifact) -> Arc<TrainedArtifact> {
        let next = Arc::new(artifact);
        let previous = std::mem::replace(&mut *self.current.write(), next);
        info!(previous = %previous.bundle_id(), "artifact swapped");
        previous
    }

    /// Load the bundle under `prefix` and install it. On failure the current
    /// bundle stays in place.
    pub fn reload(&self, prefix: impl AsRef<Path>) -> Result<Arc<TrainedArtifact>> {
        let artifact = TrainedArtifact::load(prefix)?;
        Ok(self.swap(artifact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::fixture;
    use tempfile::TempDir;

    #[test]
    fn test_swap_returns_previous() {
        let first = fixture();
        let first_id = first.bundle_id();
        let second = fixture();
        let second_id = second.bundle_id();

        let handle = ArtifactHandle::new(first);
        let held = handle.current();
        let previous = handle.swap(second);

        assert_eq!(previous.bundle_id(), first_id);
        assert_eq!(held.bundle_id(), first_id);
        assert_eq!(handle.current().bundle_id(), second_id);
    }

    #[test]
    fn test_failed_reload_keeps_current() {
        let dir = TempDir::new().unwrap();
        let artifact = fixture();
        let id = artifact.bundle_id();
        let handle = ArtifactHandle::new(artifact);

        assert!(handle.reload(dir.path().join("missing")).is_err());
        assert_eq!(handle.current().bundle_id(), id);
    }

    #[test]
    fn test_reload_from_disk() {
        let dir = TempDir::new().unwrap();
        let saved = fixture();
        saved.save(dir.path().join("next")).unwrap();

        let handle = ArtifactHandle::new(fixture());
        handle.reload(dir.path().join("next")).unwrap();
        assert_eq!(handle.current().bundle_id(), saved.bundle_id());
    }
}

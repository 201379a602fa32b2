//! Durable scene checkpoints.
//!
//! The driver persists the full scene record after every stage success, so
//! a restarted driver resumes from the last completed stage instead of the
//! beginning. Writes for different scene ids may land concurrently; writes
//! for the same id are already serialized by strict stage sequencing.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::errors::PipelineError;
use crate::scene::{Scene, SceneId};

/// Durable store of scene snapshots.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Writes the current scene record.
    ///
    /// Must be safe to call repeatedly with monotonically-advancing state:
    /// a later call never regresses an already-written output field back
    /// to absent.
    async fn persist(&self, scene: &Scene) -> Result<(), PipelineError>;

    /// Returns the latest snapshot for `id`.
    async fn load(&self, id: &SceneId) -> Result<Scene, PipelineError>;
}

/// Concurrent in-memory checkpoint store.
///
/// The monotonic-write guarantee is enforced here rather than trusted from
/// callers: a snapshot with an absent output field never overwrites a
/// stored value for that field.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    scenes: DashMap<SceneId, Scene>,
}

impl MemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of checkpointed scenes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    /// Returns true if nothing has been persisted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }
}

fn merge_monotonic(previous: &Scene, incoming: &Scene) -> Scene {
    let mut merged = incoming.clone();
    if merged.description.is_none() {
        merged.description.clone_from(&previous.description);
    }
    if merged.edit_prompt.is_none() {
        merged.edit_prompt.clone_from(&previous.edit_prompt);
    }
    if merged.result.is_none() {
        merged.result.clone_from(&previous.result);
    }
    merged
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn persist(&self, scene: &Scene) -> Result<(), PipelineError> {
        match self.scenes.entry(scene.id) {
            Entry::Occupied(mut occupied) => {
                let merged = merge_monotonic(occupied.get(), scene);
                occupied.insert(merged);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(scene.clone());
            }
        }
        Ok(())
    }

    async fn load(&self, id: &SceneId) -> Result<Scene, PipelineError> {
        self.scenes
            .get(id)
            .map(|entry| entry.clone())
            .ok_or(PipelineError::NotFound(*id))
    }
}

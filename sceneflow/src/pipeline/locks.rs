//! Per-stage-kind mutual exclusion.
//!
//! One lock per [`StageKind`], owned by the engine instance and shared by
//! reference with every scene pipeline it drives. Holding the lock for the
//! duration of a stage invocation caps in-flight calls to each downstream
//! AI service at one, no matter how many scenes are running. Different
//! kinds are independent.

use std::future::Future;
use tokio::sync::Mutex;

use crate::scene::StageKind;

/// The engine's lock table: one mutex per stage kind, created at engine
/// construction and reused for the process lifetime.
#[derive(Debug, Default)]
pub struct StageLocks {
    describe: Mutex<()>,
    prompt: Mutex<()>,
    edit: Mutex<()>,
}

impl StageLocks {
    /// Creates the lock table with all locks free.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, kind: StageKind) -> &Mutex<()> {
        match kind {
            StageKind::Describe => &self.describe,
            StageKind::Prompt => &self.prompt,
            StageKind::EditFrameStore => &self.edit,
        }
    }

    /// Runs `action` while holding the lock for `kind`.
    ///
    /// The guard is released on every exit path: normal completion, error,
    /// or the future being dropped mid-flight by cancellation.
    pub async fn with_lock<T, Fut>(&self, kind: StageKind, action: Fut) -> T
    where
        Fut: Future<Output = T>,
    {
        let _guard = self.lock_for(kind).lock().await;
        action.await
    }

    /// Returns true if the lock for `kind` is currently free.
    ///
    /// Best-effort probe for tests and diagnostics.
    #[must_use]
    pub fn is_free(&self, kind: StageKind) -> bool {
        self.lock_for(kind).try_lock().is_ok()
    }
}

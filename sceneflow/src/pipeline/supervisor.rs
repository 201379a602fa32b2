//! Detached pipeline execution with supervised handles.
//!
//! Submission returns before the pipeline runs; the supervisor is what
//! keeps hold of the detached tasks so shutdown can cancel and drain them,
//! and so an operator can ask how many are in flight. One scene's panic or
//! failure never touches another scene's task.

use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cancellation::CancellationToken;
use crate::scene::SceneId;

use super::driver::PipelineEngine;

struct SceneTask {
    scene_id: SceneId,
    handle: JoinHandle<()>,
}

/// Supervises detached per-scene pipeline tasks.
pub struct PipelineSupervisor {
    engine: Arc<PipelineEngine>,
    token: Arc<CancellationToken>,
    tasks: Mutex<Vec<SceneTask>>,
}

impl PipelineSupervisor {
    /// Creates a supervisor around a shared engine.
    #[must_use]
    pub fn new(engine: Arc<PipelineEngine>) -> Self {
        Self {
            engine,
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// The cancellation token shared by every spawned pipeline.
    #[must_use]
    pub fn cancel_token(&self) -> Arc<CancellationToken> {
        self.token.clone()
    }

    /// The engine driving the pipelines.
    #[must_use]
    pub fn engine(&self) -> &Arc<PipelineEngine> {
        &self.engine
    }

    /// Launches the pipeline for `scene_id` detached from the caller.
    ///
    /// Returns immediately; the outcome is observable through the engine's
    /// event sink and the checkpointed scene status.
    pub fn spawn(&self, scene_id: SceneId) {
        let engine = self.engine.clone();
        let token = self.token.clone();

        let handle = tokio::spawn(async move {
            match engine.run(scene_id, &token).await {
                Ok(status) => {
                    info!(scene_id = %scene_id, status = ?status, "pipeline finished");
                }
                Err(err) if err.is_cancelled() => {
                    info!(scene_id = %scene_id, "pipeline cancelled");
                }
                Err(err) => {
                    warn!(scene_id = %scene_id, error = %err, "pipeline aborted");
                }
            }
        });

        self.tasks.lock().push(SceneTask { scene_id, handle });
    }

    /// Number of pipelines still running.
    #[must_use]
    pub fn running(&self) -> usize {
        self.tasks
            .lock()
            .iter()
            .filter(|task| !task.handle.is_finished())
            .count()
    }

    /// Waits for every spawned pipeline to finish.
    ///
    /// Panicked tasks are contained and logged; they never resurface as a
    /// panic here.
    pub async fn join_all(&self) {
        let drained: Vec<SceneTask> = std::mem::take(&mut *self.tasks.lock());

        let results = join_all(drained.into_iter().map(|task| async move {
            (task.scene_id, task.handle.await)
        }))
        .await;

        for (scene_id, result) in results {
            if let Err(join_err) = result {
                if join_err.is_panic() {
                    error!(scene_id = %scene_id, "pipeline task panicked");
                }
            }
        }
    }

    /// Cancels every in-flight pipeline and waits for the tasks to drain.
    pub async fn shutdown(&self, reason: &str) {
        self.token.cancel(reason);
        self.join_all().await;
    }
}

impl std::fmt::Debug for PipelineSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineSupervisor")
            .field("running", &self.running())
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

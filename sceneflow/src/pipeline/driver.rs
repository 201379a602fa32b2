//! The pipeline driver: one engine instance drives every scene.
//!
//! The engine owns the stage locks, the retry policy, and handles to every
//! collaborator. `run` executes the fixed stage sequence for one scene,
//! checkpointing after each success; a terminal stage failure parks the
//! scene in `Failed` and is never propagated back to the submitter.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info};

use crate::cancellation::CancellationToken;
use crate::checkpoint::CheckpointStore;
use crate::errors::PipelineError;
use crate::events::{kinds, EventSink, NoOpEventSink, PipelineEvent};
use crate::framer::FrameCompositor;
use crate::scene::{Scene, SceneId, SceneStatus, StageKind, StageResult};
use crate::services::{DescribeService, ImageEditService, PromptService};
use crate::stages;
use crate::storage::BlobStore;

use super::locks::StageLocks;
use super::retry::RetryPolicy;

/// Default lifetime of the presigned URLs handed to the AI services.
const DEFAULT_SHARE_TTL: Duration = Duration::from_secs(300);

/// Error from [`PipelineEngineBuilder::build`] when a required
/// collaborator is missing.
#[derive(Debug, Error)]
#[error("engine configuration incomplete: missing {missing}")]
pub struct EngineBuildError {
    /// Name of the first missing collaborator.
    pub missing: &'static str,
}

/// The orchestration engine.
///
/// Construct once per process via [`PipelineEngineBuilder`] and share
/// behind an `Arc`; the stage locks only serialize calls if every scene
/// pipeline goes through the same instance.
pub struct PipelineEngine {
    describer: Arc<dyn DescribeService>,
    prompter: Arc<dyn PromptService>,
    editor: Arc<dyn ImageEditService>,
    blobs: Arc<dyn BlobStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    events: Arc<dyn EventSink>,
    compositor: FrameCompositor,
    frame: Vec<u8>,
    locks: StageLocks,
    retry: RetryPolicy,
    share_ttl: Duration,
}

impl std::fmt::Debug for PipelineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEngine")
            .field("retry", &self.retry)
            .field("share_ttl", &self.share_ttl)
            .field("frame_bytes", &self.frame.len())
            .finish()
    }
}

impl PipelineEngine {
    /// Starts a builder.
    #[must_use]
    pub fn builder() -> PipelineEngineBuilder {
        PipelineEngineBuilder::new()
    }

    /// The per-kind lock table.
    #[must_use]
    pub fn locks(&self) -> &StageLocks {
        &self.locks
    }

    /// The retry policy applied to every stage action.
    #[must_use]
    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    /// Presigned-URL lifetime for collaborator calls.
    #[must_use]
    pub fn share_ttl(&self) -> Duration {
        self.share_ttl
    }

    pub(crate) fn describer(&self) -> &dyn DescribeService {
        self.describer.as_ref()
    }

    pub(crate) fn prompter(&self) -> &dyn PromptService {
        self.prompter.as_ref()
    }

    pub(crate) fn editor(&self) -> &dyn ImageEditService {
        self.editor.as_ref()
    }

    pub(crate) fn blobs(&self) -> &dyn BlobStore {
        self.blobs.as_ref()
    }

    pub(crate) fn checkpoints(&self) -> &dyn CheckpointStore {
        self.checkpoints.as_ref()
    }

    pub(crate) fn compositor(&self) -> &FrameCompositor {
        &self.compositor
    }

    pub(crate) fn frame(&self) -> &[u8] {
        &self.frame
    }

    /// Accepts an upload: stores the base64 payload, creates the scene in
    /// the submitted state, writes its first checkpoint.
    ///
    /// This is the synchronous half of submission; the caller then hands
    /// the scene id to a supervisor to run detached.
    pub async fn submit(
        &self,
        email: impl Into<String>,
        name: impl Into<String>,
        original_base64: &str,
    ) -> Result<Scene, PipelineError> {
        let input = self.blobs.put_base64(original_base64).await?;
        let scene = Scene::new(email, name, input);
        self.checkpoints.persist(&scene).await?;
        info!(scene_id = %scene.id, input = %scene.original_data, "scene submitted");
        Ok(scene)
    }

    /// Runs the pipeline for one scene to a terminal state.
    ///
    /// Returns the terminal status. Stage failures are absorbed: the scene
    /// is parked in `Failed` and `Ok(Failed { .. })` comes back. Only
    /// `NotFound` (unknown id) and `Cancelled` surface as errors.
    pub async fn run(
        &self,
        id: SceneId,
        token: &CancellationToken,
    ) -> Result<SceneStatus, PipelineError> {
        let mut scene = self.checkpoints.load(&id).await?;
        info!(scene_id = %scene.id, status = ?scene.status, "pipeline starting");

        while let Some(stage) = scene.status.next_stage() {
            if token.is_cancelled() {
                self.emit_cancelled(&scene, stage);
                return Err(PipelineError::Cancelled(
                    token.reason().unwrap_or_else(|| "cancelled".to_string()),
                ));
            }

            scene.status = stage.working_status();
            self.events
                .emit(PipelineEvent::new(kinds::STAGE_STARTED, scene.id).with_stage(stage));

            let started = Instant::now();
            let result = self.run_stage(stage, &mut scene, token).await;
            match result.outcome {
                Ok(()) => {
                    self.events.emit(
                        PipelineEvent::new(kinds::STAGE_COMPLETED, scene.id)
                            .with_stage(stage)
                            .with_detail(json!({
                                "duration_ms": started.elapsed().as_millis() as u64,
                            })),
                    );
                }
                Err(err) if err.is_cancelled() => {
                    self.emit_cancelled(&scene, stage);
                    return Err(err);
                }
                Err(err) => {
                    error!(
                        scene_id = %scene.id,
                        stage = %stage,
                        error = %err,
                        "stage failed, halting pipeline"
                    );
                    scene.mark_failed(stage);
                    if let Err(persist_err) = self.checkpoints.persist(&scene).await {
                        error!(
                            scene_id = %scene.id,
                            error = %persist_err,
                            "failed to checkpoint failed state"
                        );
                    }
                    self.events.emit(
                        PipelineEvent::new(kinds::STAGE_FAILED, scene.id)
                            .with_stage(stage)
                            .with_detail(json!({ "error": err.to_string() })),
                    );
                    self.events.emit(
                        PipelineEvent::new(kinds::SCENE_FAILED, scene.id).with_stage(stage),
                    );
                    return Ok(scene.status);
                }
            }
        }

        if scene.status == SceneStatus::Completed {
            info!(scene_id = %scene.id, "pipeline completed");
            self.events
                .emit(PipelineEvent::new(kinds::SCENE_COMPLETED, scene.id));
        }
        Ok(scene.status)
    }

    async fn run_stage(
        &self,
        stage: StageKind,
        scene: &mut Scene,
        token: &CancellationToken,
    ) -> StageResult {
        let outcome = match stage {
            StageKind::Describe => stages::run_describe(self, scene, token).await,
            StageKind::Prompt => stages::run_prompt(self, scene, token).await,
            StageKind::EditFrameStore => stages::run_edit_frame_store(self, scene, token).await,
        };
        match outcome {
            Ok(()) => StageResult::success(stage),
            Err(err) => StageResult::failure(stage, err),
        }
    }

    fn emit_cancelled(&self, scene: &Scene, stage: StageKind) {
        info!(scene_id = %scene.id, stage = %stage, "pipeline cancelled");
        self.events
            .emit(PipelineEvent::new(kinds::SCENE_CANCELLED, scene.id).with_stage(stage));
    }
}

/// Builder for [`PipelineEngine`].
pub struct PipelineEngineBuilder {
    describer: Option<Arc<dyn DescribeService>>,
    prompter: Option<Arc<dyn PromptService>>,
    editor: Option<Arc<dyn ImageEditService>>,
    blobs: Option<Arc<dyn BlobStore>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    events: Arc<dyn EventSink>,
    frame: Option<Vec<u8>>,
    retry: RetryPolicy,
    share_ttl: Duration,
}

impl Default for PipelineEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineEngineBuilder {
    /// Creates a builder with the default retry policy and share TTL.
    #[must_use]
    pub fn new() -> Self {
        Self {
            describer: None,
            prompter: None,
            editor: None,
            blobs: None,
            checkpoints: None,
            events: Arc::new(NoOpEventSink),
            frame: None,
            retry: RetryPolicy::default(),
            share_ttl: DEFAULT_SHARE_TTL,
        }
    }

    /// Sets the describe collaborator.
    #[must_use]
    pub fn with_describer(mut self, describer: Arc<dyn DescribeService>) -> Self {
        self.describer = Some(describer);
        self
    }

    /// Sets the prompt collaborator.
    #[must_use]
    pub fn with_prompter(mut self, prompter: Arc<dyn PromptService>) -> Self {
        self.prompter = Some(prompter);
        self
    }

    /// Sets the image-edit collaborator.
    #[must_use]
    pub fn with_editor(mut self, editor: Arc<dyn ImageEditService>) -> Self {
        self.editor = Some(editor);
        self
    }

    /// Sets the blob store.
    #[must_use]
    pub fn with_blobs(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    /// Sets the checkpoint store.
    #[must_use]
    pub fn with_checkpoints(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    /// Sets the event sink. Defaults to discarding events.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the frame asset (PNG bytes) used by the edit stage.
    #[must_use]
    pub fn with_frame(mut self, frame: Vec<u8>) -> Self {
        self.frame = Some(frame);
        self
    }

    /// Sets the per-stage retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the presigned-URL lifetime.
    #[must_use]
    pub fn with_share_ttl(mut self, ttl: Duration) -> Self {
        self.share_ttl = ttl;
        self
    }

    /// Builds the engine, failing if a required collaborator is absent.
    pub fn build(self) -> Result<PipelineEngine, EngineBuildError> {
        let missing = |name| EngineBuildError { missing: name };
        Ok(PipelineEngine {
            describer: self.describer.ok_or_else(|| missing("describer"))?,
            prompter: self.prompter.ok_or_else(|| missing("prompter"))?,
            editor: self.editor.ok_or_else(|| missing("editor"))?,
            blobs: self.blobs.ok_or_else(|| missing("blob store"))?,
            checkpoints: self.checkpoints.ok_or_else(|| missing("checkpoint store"))?,
            events: self.events,
            compositor: FrameCompositor::new(),
            frame: self.frame.ok_or_else(|| missing("frame asset"))?,
            locks: StageLocks::new(),
            retry: self.retry,
            share_ttl: self.share_ttl,
        })
    }
}

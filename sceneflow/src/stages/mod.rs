//! The three pipeline stages.
//!
//! Every stage has the same shape: take the current scene, call one
//! external collaborator under the stage's lock and the engine's retry
//! policy, write exactly one output field, checkpoint. The composition is
//! spelled out here rather than hidden behind decorators: a cancellation
//! race wraps the lock scope, which wraps the retry wrapper, which wraps
//! the raw call.

use std::future::Future;
use tracing::info;

use crate::cancellation::CancellationToken;
use crate::errors::PipelineError;
use crate::pipeline::driver::PipelineEngine;
use crate::scene::{Scene, StageKind};

/// Races a stage action against cancellation, so a shutdown interrupts a
/// task parked on lock acquisition as well as one inside the action.
/// Dropping the action future releases any lock guard it holds.
async fn guarded<T>(
    token: &CancellationToken,
    action: impl Future<Output = Result<T, PipelineError>>,
) -> Result<T, PipelineError> {
    tokio::select! {
        outcome = action => outcome,
        () = token.cancelled() => Err(PipelineError::Cancelled(
            token.reason().unwrap_or_else(|| "cancelled".to_string()),
        )),
    }
}

/// Describe stage: presign the input, ask the vision model what it sees,
/// record the description.
pub(crate) async fn run_describe(
    engine: &PipelineEngine,
    scene: &mut Scene,
    token: &CancellationToken,
) -> Result<(), PipelineError> {
    let input = scene.original_data.clone();
    let retry = engine.retry();
    let ttl = engine.share_ttl();

    let description = guarded(
        token,
        engine.locks().with_lock(
            StageKind::Describe,
            retry.execute(token, StageKind::Describe.as_str(), || {
                let input = input.clone();
                async move {
                    let url = engine.blobs().shareable_url(&input, ttl).await?;
                    let text = engine.describer().describe(&url).await?;
                    if text.trim().is_empty() {
                        return Err(PipelineError::EmptyResult);
                    }
                    Ok(text)
                }
            }),
        ),
    )
    .await?;

    info!(scene_id = %scene.id, "description returned");
    scene.record_description(description);
    engine.checkpoints().persist(scene).await?;
    Ok(())
}

/// Prompt stage: turn the recorded description into an edit prompt.
pub(crate) async fn run_prompt(
    engine: &PipelineEngine,
    scene: &mut Scene,
    token: &CancellationToken,
) -> Result<(), PipelineError> {
    let description = scene.description.clone().ok_or_else(|| {
        PipelineError::Internal(format!(
            "scene {} reached the prompt stage without a description",
            scene.id
        ))
    })?;
    let retry = engine.retry();

    let prompt = guarded(
        token,
        engine.locks().with_lock(
            StageKind::Prompt,
            retry.execute(token, StageKind::Prompt.as_str(), || {
                let description = description.clone();
                async move {
                    let text = engine.prompter().generate(&description).await?;
                    if text.trim().is_empty() {
                        return Err(PipelineError::EmptyResult);
                    }
                    Ok(text)
                }
            }),
        ),
    )
    .await?;

    info!(scene_id = %scene.id, "prompt prepared");
    scene.record_edit_prompt(prompt);
    engine.checkpoints().persist(scene).await?;
    Ok(())
}

/// Edit stage: run the edit model, composite the answer onto the frame,
/// store the framed image, record its handle.
pub(crate) async fn run_edit_frame_store(
    engine: &PipelineEngine,
    scene: &mut Scene,
    token: &CancellationToken,
) -> Result<(), PipelineError> {
    let input = scene.original_data.clone();
    let prompt = scene.edit_prompt.clone().ok_or_else(|| {
        PipelineError::Internal(format!(
            "scene {} reached the edit stage without a prompt",
            scene.id
        ))
    })?;
    let retry = engine.retry();
    let ttl = engine.share_ttl();

    let result = guarded(
        token,
        engine.locks().with_lock(
            StageKind::EditFrameStore,
            retry.execute(token, StageKind::EditFrameStore.as_str(), || {
                let input = input.clone();
                let prompt = prompt.clone();
                async move {
                    let url = engine.blobs().shareable_url(&input, ttl).await?;
                    let edited = engine.editor().edit(&url, &prompt).await?;
                    if edited.is_empty() {
                        return Err(PipelineError::EmptyResult);
                    }
                    // Decode failures inside compose are terminal and
                    // escape the retry loop immediately.
                    let framed = engine.compositor().compose(engine.frame(), &edited)?;
                    let blob = engine.blobs().put(&framed).await?;
                    Ok(blob)
                }
            }),
        ),
    )
    .await?;

    info!(scene_id = %scene.id, result = %result, "framed result stored");
    scene.record_result(result);
    engine.checkpoints().persist(scene).await?;
    Ok(())
}

//! End-to-end tests of the engine: full runs, failure isolation,
//! resumability, lock serialization, and cancellation.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

use crate::cancellation::CancellationToken;
use crate::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use crate::errors::PipelineError;
use crate::events::CollectingEventSink;
use crate::pipeline::{PipelineEngine, PipelineSupervisor, RetryPolicy};
use crate::scene::{Scene, SceneId, SceneStatus, StageKind};
use crate::storage::{BlobStore, MemoryBlobStore};
use crate::testing::{png_bytes, CallLog, StubDescriber, StubEditor, StubPrompter};

const FRAME_W: u32 = 100;
const FRAME_H: u32 = 80;

struct Harness {
    engine: Arc<PipelineEngine>,
    checkpoints: Arc<MemoryCheckpointStore>,
    blobs: Arc<MemoryBlobStore>,
    events: Arc<CollectingEventSink>,
    describer: Arc<StubDescriber>,
    prompter: Arc<StubPrompter>,
    editor: Arc<StubEditor>,
}

impl Harness {
    fn new(describer: StubDescriber, prompter: StubPrompter, editor: StubEditor) -> Self {
        Self::with_retry(
            describer,
            prompter,
            editor,
            RetryPolicy::new()
                .with_max_attempts(3)
                .with_backoff(Duration::from_millis(1)),
        )
    }

    fn with_retry(
        describer: StubDescriber,
        prompter: StubPrompter,
        editor: StubEditor,
        retry: RetryPolicy,
    ) -> Self {
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let events = Arc::new(CollectingEventSink::new());
        let describer = Arc::new(describer);
        let prompter = Arc::new(prompter);
        let editor = Arc::new(editor);

        let engine = Arc::new(
            PipelineEngine::builder()
                .with_describer(describer.clone())
                .with_prompter(prompter.clone())
                .with_editor(editor.clone())
                .with_blobs(blobs.clone())
                .with_checkpoints(checkpoints.clone())
                .with_events(events.clone())
                .with_frame(png_bytes(FRAME_W, FRAME_H))
                .with_retry(retry)
                .build()
                .expect("engine"),
        );

        Self {
            engine,
            checkpoints,
            blobs,
            events,
            describer,
            prompter,
            editor,
        }
    }

    async fn submit(&self) -> Scene {
        let upload = BASE64.encode(png_bytes(60, 40));
        self.engine
            .submit("ada@example.com", "Ada", &upload)
            .await
            .expect("submit")
    }
}

fn happy_stubs() -> (StubDescriber, StubPrompter, StubEditor) {
    (
        StubDescriber::new("a person holding a sign that says red wig"),
        StubPrompter::new("put a red curly wig on the person"),
        StubEditor::with_png(64, 64),
    )
}

#[tokio::test]
async fn test_full_pipeline_completes() {
    let (describer, prompter, editor) = happy_stubs();
    let harness = Harness::new(describer, prompter, editor);
    let scene = harness.submit().await;
    let token = CancellationToken::new();

    let status = harness
        .engine
        .run(scene.id, &token)
        .await
        .expect("run should not error");
    assert_eq!(status, SceneStatus::Completed);

    let stored = harness
        .checkpoints
        .load(&scene.id)
        .await
        .expect("checkpointed");
    assert_eq!(stored.status, SceneStatus::Completed);
    assert!(stored.ordering_holds());
    assert!(stored.description.is_some());
    assert!(stored.edit_prompt.is_some());

    // The stored result is the framed PNG, at frame dimensions.
    let result = stored.result.expect("result blob");
    let bytes = harness.blobs.get(&result).expect("stored bytes");
    let img = image::load_from_memory(&bytes).expect("valid png");
    assert_eq!((img.width(), img.height()), (FRAME_W, FRAME_H));

    assert_eq!(
        harness.events.kinds(),
        vec![
            "scene.stage.started",
            "scene.stage.completed",
            "scene.stage.started",
            "scene.stage.completed",
            "scene.stage.started",
            "scene.stage.completed",
            "scene.completed",
        ]
    );
}

#[tokio::test]
async fn test_transient_failures_are_retried_to_success() {
    let (describer, prompter, editor) = happy_stubs();
    let harness = Harness::new(describer.failing_first(2), prompter, editor);
    let scene = harness.submit().await;
    let token = CancellationToken::new();

    let status = harness.engine.run(scene.id, &token).await.expect("run");

    assert_eq!(status, SceneStatus::Completed);
    assert_eq!(harness.describer.calls(), 3);
}

#[tokio::test]
async fn test_exhausted_stage_parks_scene_in_failed() {
    let (describer, prompter, _) = happy_stubs();
    let harness = Harness::new(describer, prompter, StubEditor::with_png(8, 8).always_failing());
    let scene = harness.submit().await;
    let token = CancellationToken::new();

    let status = harness
        .engine
        .run(scene.id, &token)
        .await
        .expect("failure is absorbed, not propagated");
    assert_eq!(
        status,
        SceneStatus::Failed {
            stage: StageKind::EditFrameStore
        }
    );
    assert_eq!(harness.editor.calls(), 3);

    let stored = harness.checkpoints.load(&scene.id).await.expect("load");
    assert_eq!(
        stored.status,
        SceneStatus::Failed {
            stage: StageKind::EditFrameStore
        }
    );
    // Earlier stage outputs survive the failure.
    assert!(stored.description.is_some());
    assert!(stored.edit_prompt.is_some());
    assert!(stored.result.is_none());
    assert!(stored.ordering_holds());

    let kinds = harness.events.kinds();
    assert!(kinds.contains(&"scene.stage.failed".to_string()));
    assert_eq!(kinds.last().map(String::as_str), Some("scene.failed"));
}

#[tokio::test]
async fn test_empty_answers_are_retried_then_terminal() {
    let (_, prompter, editor) = happy_stubs();
    // A describer that always answers with whitespace only.
    let harness = Harness::new(StubDescriber::new("   "), prompter, editor);
    let scene = harness.submit().await;
    let token = CancellationToken::new();

    let status = harness.engine.run(scene.id, &token).await.expect("run");

    assert_eq!(
        status,
        SceneStatus::Failed {
            stage: StageKind::Describe
        }
    );
    assert_eq!(harness.describer.calls(), 3);
}

#[tokio::test]
async fn test_one_scene_failure_never_touches_another() {
    let (describer, prompter, _) = happy_stubs();
    // First scene burns through the editor's three scripted failures and
    // fails; the second scene succeeds against the same engine.
    let harness = Harness::new(describer, prompter, StubEditor::with_png(8, 8).failing_first(3));
    let failing = harness.submit().await;
    let healthy = harness.submit().await;
    let token = CancellationToken::new();

    let first = harness.engine.run(failing.id, &token).await.expect("run");
    assert_eq!(
        first,
        SceneStatus::Failed {
            stage: StageKind::EditFrameStore
        }
    );

    let second = harness.engine.run(healthy.id, &token).await.expect("run");
    assert_eq!(second, SceneStatus::Completed);

    let stored = harness.checkpoints.load(&healthy.id).await.expect("load");
    assert!(stored.ordering_holds());
    assert_eq!(stored.status, SceneStatus::Completed);
}

#[tokio::test]
async fn test_driver_resumes_from_checkpoint() {
    let (describer, prompter, editor) = happy_stubs();
    let harness = Harness::new(describer, prompter, editor);
    let mut scene = harness.submit().await;

    // Simulate a previous run that finished the first two stages.
    scene.record_description("a person holding a sign");
    scene.record_edit_prompt("put a wig on the person");
    harness.checkpoints.persist(&scene).await.expect("persist");
    assert_eq!(scene.status, SceneStatus::Editing);

    let token = CancellationToken::new();
    let status = harness.engine.run(scene.id, &token).await.expect("run");

    assert_eq!(status, SceneStatus::Completed);
    assert_eq!(harness.describer.calls(), 0);
    assert_eq!(harness.prompter.calls(), 0);
    assert_eq!(harness.editor.calls(), 1);
}

#[tokio::test]
async fn test_unknown_scene_is_not_found() {
    let (describer, prompter, editor) = happy_stubs();
    let harness = Harness::new(describer, prompter, editor);
    let token = CancellationToken::new();
    let unknown = SceneId::new();

    let err = harness
        .engine
        .run(unknown, &token)
        .await
        .expect_err("unknown id");
    assert!(matches!(err, PipelineError::NotFound(id) if id == unknown));
    assert_eq!(harness.describer.calls(), 0);
}

#[tokio::test]
async fn test_same_stage_kind_never_overlaps_across_scenes() {
    let log = CallLog::new();
    let (_, prompter, editor) = happy_stubs();
    let harness = Harness::new(
        StubDescriber::new("a sign")
            .with_delay(Duration::from_millis(40))
            .with_log(log.clone()),
        prompter,
        editor,
    );
    let a = harness.submit().await;
    let b = harness.submit().await;

    let supervisor = PipelineSupervisor::new(harness.engine.clone());
    supervisor.spawn(a.id);
    supervisor.spawn(b.id);
    supervisor.join_all().await;

    assert_eq!(log.count("describe"), 2);
    assert!(
        !log.overlapped("describe", "describe"),
        "describe calls for different scenes must be serialized"
    );
}

#[tokio::test]
async fn test_different_stage_kinds_overlap_freely() {
    let log = CallLog::new();
    let (_, prompter, _) = happy_stubs();
    let harness = Harness::new(
        StubDescriber::new("a sign")
            .with_delay(Duration::from_millis(80))
            .with_log(log.clone()),
        prompter,
        StubEditor::with_png(8, 8)
            .with_delay(Duration::from_millis(80))
            .with_log(log.clone()),
    );

    // Scene A starts from the top; scene B is already checkpointed at the
    // edit stage, so the two scenes hit different locks at the same time.
    let a = harness.submit().await;
    let mut b = harness.submit().await;
    b.record_description("desc");
    b.record_edit_prompt("prompt");
    harness.checkpoints.persist(&b).await.expect("persist");

    let supervisor = PipelineSupervisor::new(harness.engine.clone());
    supervisor.spawn(a.id);
    supervisor.spawn(b.id);
    supervisor.join_all().await;

    assert!(
        log.overlapped("describe", "edit"),
        "different stage kinds should not serialize against each other"
    );
}

#[tokio::test]
async fn test_cancel_during_backoff_stops_promptly_and_frees_lock() {
    let (_, prompter, editor) = happy_stubs();
    let harness = Harness::with_retry(
        StubDescriber::new("a sign").always_failing(),
        prompter,
        editor,
        RetryPolicy::new()
            .with_max_attempts(5)
            .with_backoff(Duration::from_secs(60)),
    );
    let scene = harness.submit().await;

    let supervisor = PipelineSupervisor::new(harness.engine.clone());
    supervisor.spawn(scene.id);

    // Let the first attempt fail and the 60s backoff begin.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.describer.calls(), 1);

    tokio::time::timeout(Duration::from_millis(500), supervisor.shutdown("shutdown"))
        .await
        .expect("cancellation must interrupt the backoff wait");

    // No further attempt ran, and the stage lock is immediately free.
    assert_eq!(harness.describer.calls(), 1);
    assert!(harness.engine.locks().is_free(StageKind::Describe));
    tokio::time::timeout(
        Duration::from_millis(100),
        harness
            .engine
            .locks()
            .with_lock(StageKind::Describe, async {}),
    )
    .await
    .expect("lock must be acquirable right after cancellation");

    // The scene was not marked failed; a restart can resume it.
    let stored = harness.checkpoints.load(&scene.id).await.expect("load");
    assert_eq!(stored.status, SceneStatus::Submitted);
}

#[tokio::test]
async fn test_cancel_while_parked_on_stage_lock() {
    let (_, prompter, editor) = happy_stubs();
    // The first scene occupies the describe lock for a long time; the
    // second parks on lock acquisition.
    let harness = Harness::new(
        StubDescriber::new("a sign").with_delay(Duration::from_secs(60)),
        prompter,
        editor,
    );
    let a = harness.submit().await;
    let b = harness.submit().await;

    let supervisor = PipelineSupervisor::new(harness.engine.clone());
    supervisor.spawn(a.id);
    supervisor.spawn(b.id);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.describer.calls(), 1);

    tokio::time::timeout(Duration::from_millis(500), supervisor.shutdown("shutdown"))
        .await
        .expect("cancellation must interrupt both the call and the lock wait");

    assert_eq!(harness.describer.calls(), 1);
    assert!(harness.engine.locks().is_free(StageKind::Describe));
}

#[tokio::test]
async fn test_supervisor_tracks_and_drains_tasks() {
    let (describer, prompter, editor) = happy_stubs();
    let harness = Harness::new(
        describer.with_delay(Duration::from_millis(30)),
        prompter,
        editor,
    );
    let a = harness.submit().await;
    let b = harness.submit().await;

    let supervisor = PipelineSupervisor::new(harness.engine.clone());
    supervisor.spawn(a.id);
    supervisor.spawn(b.id);
    assert!(supervisor.running() >= 1);

    supervisor.join_all().await;
    assert_eq!(supervisor.running(), 0);

    for id in [a.id, b.id] {
        let stored = harness.checkpoints.load(&id).await.expect("load");
        assert_eq!(stored.status, SceneStatus::Completed);
        assert!(stored.ordering_holds());
    }
}

#[tokio::test]
async fn test_submit_stores_upload_and_first_checkpoint() -> anyhow::Result<()> {
    let (describer, prompter, editor) = happy_stubs();
    let harness = Harness::new(describer, prompter, editor);

    let scene = harness.submit().await;

    assert_eq!(scene.status, SceneStatus::Submitted);
    assert!(harness.blobs.get(&scene.original_data).is_some());

    let stored = harness.checkpoints.load(&scene.id).await?;
    assert_eq!(stored, scene);

    let url = harness
        .blobs
        .shareable_url(&scene.original_data, Duration::from_secs(300))
        .await?;
    assert!(url.contains("expires=300"));
    Ok(())
}

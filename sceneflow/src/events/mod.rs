//! Pipeline run observability.
//!
//! Pipelines run detached from the submission call, so the only way an
//! operator sees them is through the event stream the driver emits: stage
//! started / completed / failed, scene completed / failed / cancelled.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::scene::{SceneId, StageKind};

/// Event kinds emitted by the pipeline driver.
pub mod kinds {
    /// A stage began executing for a scene.
    pub const STAGE_STARTED: &str = "scene.stage.started";
    /// A stage completed and its checkpoint was written.
    pub const STAGE_COMPLETED: &str = "scene.stage.completed";
    /// A stage hit a terminal error.
    pub const STAGE_FAILED: &str = "scene.stage.failed";
    /// All stages completed; the scene has a result.
    pub const SCENE_COMPLETED: &str = "scene.completed";
    /// The scene entered the absorbing failed state.
    pub const SCENE_FAILED: &str = "scene.failed";
    /// The pipeline task was cancelled before finishing.
    pub const SCENE_CANCELLED: &str = "scene.cancelled";
}

/// One observable pipeline occurrence.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineEvent {
    /// Dotted event kind, e.g. `scene.stage.completed`.
    pub kind: String,
    /// The scene this event belongs to.
    pub scene_id: SceneId,
    /// The stage involved, when stage-scoped.
    pub stage: Option<StageKind>,
    /// Free-form detail payload.
    pub detail: Option<serde_json::Value>,
    /// Emission timestamp.
    pub at: DateTime<Utc>,
}

impl PipelineEvent {
    /// Creates an event of the given kind for a scene.
    #[must_use]
    pub fn new(kind: impl Into<String>, scene_id: SceneId) -> Self {
        Self {
            kind: kind.into(),
            scene_id,
            stage: None,
            detail: None,
            at: Utc::now(),
        }
    }

    /// Attaches the stage this event is about.
    #[must_use]
    pub fn with_stage(mut self, stage: StageKind) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Attaches a detail payload.
    #[must_use]
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Receiver for pipeline events.
///
/// Implementations must never fail or block the driver; emission is fire
/// and forget.
pub trait EventSink: Send + Sync {
    /// Delivers one event.
    fn emit(&self, event: PipelineEvent);
}

/// Discards all events. The default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event: PipelineEvent) {}
}

/// Logs events through the tracing framework.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventSink;

impl LoggingEventSink {
    /// Creates a logging sink.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LoggingEventSink {
    fn emit(&self, event: PipelineEvent) {
        tracing::info!(
            kind = %event.kind,
            scene_id = %event.scene_id,
            stage = event.stage.map(StageKind::as_str),
            detail = ?event.detail,
            "pipeline event"
        );
    }
}

/// Buffers events for inspection in tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<PipelineEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    #[must_use]
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.read().clone()
    }

    /// The kinds emitted, in order.
    #[must_use]
    pub fn kinds(&self) -> Vec<String> {
        self.events.read().iter().map(|e| e.kind.clone()).collect()
    }

    /// Drops all buffered events.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event: PipelineEvent) {
        self.events.write().push(event);
    }
}

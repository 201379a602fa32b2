//! The scene record and its lifecycle vocabulary.
//!
//! A scene is the unit of work: one uploaded image and the artifacts the
//! pipeline derives from it. Stage outputs are cumulative and strictly
//! ordered; the stored [`SceneStatus`] is the source of truth for which
//! stage runs next.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::PipelineError;
use crate::storage::BlobRef;

/// Opaque scene identifier, assigned at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SceneId(Uuid);

impl SceneId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SceneId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SceneId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for SceneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The category of a pipeline stage, used for lock scoping.
///
/// One lock exists per kind, shared across all scenes, so at most one
/// in-flight call reaches a given downstream service at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Describe the uploaded image.
    Describe,
    /// Turn the description into an edit prompt.
    Prompt,
    /// Edit the image, composite it onto the frame, store the result.
    EditFrameStore,
}

impl StageKind {
    /// Stable string form, used in logs and events.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Describe => "describe",
            Self::Prompt => "prompt",
            Self::EditFrameStore => "edit_frame_store",
        }
    }

    /// The in-flight status a scene carries while this stage runs.
    #[must_use]
    pub fn working_status(self) -> SceneStatus {
        match self {
            Self::Describe => SceneStatus::Describing,
            Self::Prompt => SceneStatus::Prompting,
            Self::EditFrameStore => SceneStatus::Editing,
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a scene sits in the pipeline.
///
/// Stored alongside the scene on every checkpoint; the driver derives the
/// next stage from this field rather than guessing from populated outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum SceneStatus {
    /// Accepted, nothing run yet.
    Submitted,
    /// Description stage in flight.
    Describing,
    /// Description recorded, prompt stage next.
    Prompting,
    /// Prompt recorded, edit stage next.
    Editing,
    /// All stages done, `result` is populated.
    Completed,
    /// A stage exhausted its retry budget or hit a terminal error.
    Failed {
        /// The stage that failed.
        stage: StageKind,
    },
}

impl SceneStatus {
    /// The stage that should run next, or `None` in a terminal state.
    #[must_use]
    pub fn next_stage(&self) -> Option<StageKind> {
        match self {
            Self::Submitted | Self::Describing => Some(StageKind::Describe),
            Self::Prompting => Some(StageKind::Prompt),
            Self::Editing => Some(StageKind::EditFrameStore),
            Self::Completed | Self::Failed { .. } => None,
        }
    }

    /// Returns true once no further stage will run.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.next_stage().is_none()
    }
}

/// One end-to-end unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    /// Unique id, assigned at creation.
    pub id: SceneId,
    /// Requester email.
    pub email: String,
    /// Requester display name.
    pub name: String,
    /// Storage handle of the uploaded input image.
    pub original_data: BlobRef,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Bumped on every stage completion.
    pub modified_at: DateTime<Utc>,
    /// Output of the describe stage.
    pub description: Option<String>,
    /// Output of the prompt stage.
    pub edit_prompt: Option<String>,
    /// Storage handle of the framed result image.
    pub result: Option<BlobRef>,
    /// Lifecycle position.
    pub status: SceneStatus,
}

impl Scene {
    /// Creates a freshly submitted scene around an uploaded input.
    #[must_use]
    pub fn new(
        email: impl Into<String>,
        name: impl Into<String>,
        original_data: BlobRef,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SceneId::new(),
            email: email.into(),
            name: name.into(),
            original_data,
            created_at: now,
            modified_at: now,
            description: None,
            edit_prompt: None,
            result: None,
            status: SceneStatus::Submitted,
        }
    }

    /// Records the describe stage output and advances to `Prompting`.
    pub fn record_description(&mut self, description: impl Into<String>) {
        self.description = Some(description.into());
        self.status = SceneStatus::Prompting;
        self.touch();
    }

    /// Records the prompt stage output and advances to `Editing`.
    pub fn record_edit_prompt(&mut self, prompt: impl Into<String>) {
        self.edit_prompt = Some(prompt.into());
        self.status = SceneStatus::Editing;
        self.touch();
    }

    /// Records the stored result and advances to `Completed`.
    pub fn record_result(&mut self, result: BlobRef) {
        self.result = Some(result);
        self.status = SceneStatus::Completed;
        self.touch();
    }

    /// Moves the scene into the absorbing failed state.
    pub fn mark_failed(&mut self, stage: StageKind) {
        self.status = SceneStatus::Failed { stage };
        self.touch();
    }

    /// Checks the cumulative-output invariant:
    /// `result` implies `edit_prompt` implies `description`.
    #[must_use]
    pub fn ordering_holds(&self) -> bool {
        (self.result.is_none() || self.edit_prompt.is_some())
            && (self.edit_prompt.is_none() || self.description.is_some())
    }

    fn touch(&mut self) {
        self.modified_at = Utc::now();
    }
}

/// Transient outcome of one stage invocation. Never persisted.
#[derive(Debug)]
pub struct StageResult {
    /// The stage that ran.
    pub stage: StageKind,
    /// Success, or the terminal error that stopped the stage.
    pub outcome: Result<(), PipelineError>,
}

impl StageResult {
    /// A successful stage invocation.
    #[must_use]
    pub fn success(stage: StageKind) -> Self {
        Self {
            stage,
            outcome: Ok(()),
        }
    }

    /// A failed stage invocation.
    #[must_use]
    pub fn failure(stage: StageKind, error: PipelineError) -> Self {
        Self {
            stage,
            outcome: Err(error),
        }
    }

    /// Returns true if the stage completed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Human-readable detail of the failure, if any.
    #[must_use]
    pub fn error_detail(&self) -> Option<String> {
        self.outcome.as_ref().err().map(ToString::to_string)
    }
}

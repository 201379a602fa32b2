//! # Sceneflow
//!
//! Pipeline orchestration engine for the scene photo-editing service.
//!
//! A **scene** — one uploaded image and its derived artifacts — moves
//! through a fixed sequence of stages:
//!
//! - **Describe**: a vision model describes the uploaded image
//! - **Prompt**: a text model turns the description into an edit prompt
//! - **Edit + frame + store**: an image model applies the edit, the result
//!   is composited onto the event frame and stored
//!
//! The engine provides:
//!
//! - **Per-kind stage locks**: at most one in-flight call per downstream
//!   AI service, across all scenes
//! - **Bounded retry with fixed backoff**: transient faults re-attempted,
//!   exhaustion parks the scene in a failed state
//! - **Durable checkpoints**: the scene record is persisted after every
//!   stage, so a restarted driver resumes mid-pipeline
//! - **Failure isolation**: one scene's failure never touches another
//!   scene or the submission caller
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sceneflow::prelude::*;
//!
//! let engine = Arc::new(
//!     PipelineEngine::builder()
//!         .with_describer(describer)
//!         .with_prompter(prompter)
//!         .with_editor(editor)
//!         .with_blobs(blobs)
//!         .with_checkpoints(checkpoints)
//!         .with_frame(frame_png)
//!         .build()?,
//! );
//!
//! let supervisor = PipelineSupervisor::new(engine.clone());
//! let scene = engine.submit(email, name, &upload_base64).await?;
//! supervisor.spawn(scene.id);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod events;
pub mod framer;
pub mod pipeline;
pub mod scene;
pub mod services;
pub mod stages;
pub mod storage;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::checkpoint::{CheckpointStore, MemoryCheckpointStore};
    pub use crate::config::{EngineConfig, ServiceSettings};
    pub use crate::errors::PipelineError;
    pub use crate::events::{
        CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, PipelineEvent,
    };
    pub use crate::framer::{FrameCompositor, InteriorRegion};
    pub use crate::pipeline::{
        EngineBuildError, PipelineEngine, PipelineEngineBuilder, PipelineSupervisor,
        RetryPolicy, StageLocks,
    };
    pub use crate::scene::{Scene, SceneId, SceneStatus, StageKind, StageResult};
    pub use crate::services::{
        DescribeService, ImageEditService, LoggingNotifier, Notifier, PromptService,
    };
    #[cfg(feature = "clients")]
    pub use crate::services::{ChatDescriber, ChatPrompter, PredictImageEditor};
    pub use crate::storage::{BlobRef, BlobStore, LocalDiskStore, MemoryBlobStore};
}

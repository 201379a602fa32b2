//! Collaborator seams for the external AI services and notification.
//!
//! The engine only knows these traits. HTTP-backed implementations live in
//! the sibling client modules, compiled under the `clients` feature.

use async_trait::async_trait;
use tracing::info;

use crate::errors::PipelineError;
use crate::scene::Scene;

#[cfg(feature = "clients")]
pub mod describer;
#[cfg(feature = "clients")]
pub mod editor;
#[cfg(feature = "clients")]
pub mod prompter;

#[cfg(feature = "clients")]
pub use describer::ChatDescriber;
#[cfg(feature = "clients")]
pub use editor::PredictImageEditor;
#[cfg(feature = "clients")]
pub use prompter::ChatPrompter;

/// Describes the uploaded image, focusing on any text it carries.
#[async_trait]
pub trait DescribeService: Send + Sync {
    /// Returns a textual description of the image behind `image_url`.
    async fn describe(&self, image_url: &str) -> Result<String, PipelineError>;
}

/// Turns an image description into an edit prompt.
#[async_trait]
pub trait PromptService: Send + Sync {
    /// Returns a model-friendly edit prompt for `description`.
    async fn generate(&self, description: &str) -> Result<String, PipelineError>;
}

/// Applies an edit prompt to the image and returns the edited bytes.
#[async_trait]
pub trait ImageEditService: Send + Sync {
    /// Edits the image behind `image_url` as instructed by `prompt`.
    async fn edit(&self, image_url: &str, prompt: &str) -> Result<Vec<u8>, PipelineError>;
}

/// Tells the requester their result is ready.
///
/// Driven by the admin confirmation flow once a scene is observed in the
/// completed state; the pipeline driver itself never calls this.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends the notification for a completed scene.
    async fn notify(&self, scene: &Scene, result_url: &str) -> Result<(), PipelineError>;
}

/// Notifier that only logs. Stands in where delivery is wired elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, scene: &Scene, result_url: &str) -> Result<(), PipelineError> {
        info!(
            scene_id = %scene.id,
            email = %scene.email,
            result_url,
            "scene result ready"
        );
        Ok(())
    }
}

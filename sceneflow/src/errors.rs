//! Error taxonomy for the pipeline engine.
//!
//! Errors are split along the retry boundary: transient collaborator
//! failures and semantically-empty answers are retryable, everything else
//! terminates the stage immediately.

use thiserror::Error;

use crate::scene::SceneId;

/// The error type threaded through every pipeline operation.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A collaborator call failed in transit (non-2xx, transport fault).
    #[error("remote call failed: {0}")]
    Remote(String),

    /// A collaborator returned a well-formed but semantically empty answer.
    #[error("collaborator returned an empty result")]
    EmptyResult,

    /// The retry budget for a stage is exhausted.
    ///
    /// Carries the last underlying error observed before giving up.
    #[error("gave up after {attempts} attempts: {source}")]
    TooManyAttempts {
        /// Total attempts made, including the first.
        attempts: usize,
        /// The error from the final attempt.
        #[source]
        source: Box<PipelineError>,
    },

    /// A binary payload could not be decoded as an image.
    #[error("malformed image payload: {0}")]
    Decode(String),

    /// No scene exists under the given id.
    #[error("scene not found: {0}")]
    NotFound(SceneId),

    /// The surrounding task was cancelled cooperatively.
    #[error("pipeline cancelled: {0}")]
    Cancelled(String),

    /// A stored invariant did not hold when a stage went to use it.
    #[error("internal invariant violated: {0}")]
    Internal(String),

    /// Local storage I/O failed.
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Returns true if the retry executor may re-attempt after this error.
    ///
    /// `Io` sits in the same transient-transport band as `Remote`: the
    /// original deployment saw both as recoverable object-store hiccups.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Remote(_) | Self::EmptyResult | Self::Io(_)
        )
    }

    /// Returns true if this error is a cooperative cancellation rather
    /// than a stage failure.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

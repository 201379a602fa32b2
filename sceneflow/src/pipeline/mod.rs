//! Pipeline orchestration: retry, locking, driving, supervision.

pub mod driver;
pub mod locks;
pub mod retry;
pub mod supervisor;

#[cfg(test)]
mod integration_tests;

pub use driver::{EngineBuildError, PipelineEngine, PipelineEngineBuilder};
pub use locks::StageLocks;
pub use retry::RetryPolicy;
pub use supervisor::PipelineSupervisor;

//! Shared types, config, and error definitions for the evaluation engine.

pub mod config;
pub mod error;
pub mod types;

pub use config::{EngineConfig, RetryConfig};
pub use error::{
    AdapterError, ConfigError, EvaluationError, ExecutionError, PipelineError, RegistryError,
    SchedulerError,
};
pub use types::*;

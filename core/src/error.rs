// core/src/error.rs
use anyhow::Error as AnyhowError;
use thiserror::Error;

/// Framework-level failures of the step pipeline engine.
///
/// Handler errors of a concrete pipeline use that pipeline's own `Err` type;
/// this enum only covers what the engine itself detects, and must therefore be
/// convertible into every pipeline error type (`Err: From<PipelineError>`).
#[derive(Debug, Error)]
pub enum PipelineError {
  #[error("Handler missing for non-optional step: {step_name}")]
  HandlerMissing { step_name: String },

  #[error("No pipeline registered for context type {type_name}")]
  NotRegistered { type_name: String },

  #[error("Type mismatch during context dispatch (expected {expected_type})")]
  TypeMismatch { expected_type: String },

  #[error("Error in step handler. Source: {source}")]
  HandlerError {
    #[source]
    source: AnyhowError,
  },
}

impl From<AnyhowError> for PipelineError {
  fn from(err: AnyhowError) -> Self {
    PipelineError::HandlerError { source: err }
  }
}

pub type EngineResult<T, E = PipelineError> = std::result::Result<T, E>;

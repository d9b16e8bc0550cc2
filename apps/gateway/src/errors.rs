// apps/gateway/src/errors.rs

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use ingest::config::ConfigError;
use ingest::{PipelineError, PublishError, ValidationError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
  /// Rejected billing payload; the message is returned to the caller verbatim.
  #[error("{0}")]
  Validation(String),

  #[error("Failed to queue order: {source}")]
  QueueUnavailable {
    #[from]
    source: PublishError,
  },

  #[error("Inventory service unavailable: {0}")]
  InventoryUnavailable(String),

  #[error("Configuration Error: {0}")]
  Config(String),

  #[error("Workflow Error: {source}")]
  Workflow {
    #[from]
    source: PipelineError,
  },

  #[error("Internal Server Error: {0}")]
  Internal(String),
}

impl From<ValidationError> for AppError {
  fn from(err: ValidationError) -> Self {
    AppError::Validation(err.to_string())
  }
}

impl From<ConfigError> for AppError {
  fn from(err: ConfigError) -> Self {
    AppError::Config(err.to_string())
  }
}

impl From<anyhow::Error> for AppError {
  fn from(err: anyhow::Error) -> Self {
    AppError::Internal(err.to_string())
  }
}

impl ResponseError for AppError {
  fn status_code(&self) -> StatusCode {
    match self {
      AppError::Validation(_) => StatusCode::BAD_REQUEST,
      AppError::InventoryUnavailable(_) => StatusCode::BAD_GATEWAY,
      AppError::QueueUnavailable { .. } | AppError::Config(_) | AppError::Workflow { .. } | AppError::Internal(_) => {
        StatusCode::INTERNAL_SERVER_ERROR
      }
    }
  }

  fn error_response(&self) -> HttpResponse {
    let status = self.status_code();
    if status.is_server_error() {
      tracing::error!(application_error = %self, "Responding with error");
    } else {
      tracing::warn!(application_error = %self, "Rejecting request");
    }
    let body = match self {
      AppError::Validation(m) => json!({ "error": m }),
      AppError::QueueUnavailable { .. } => json!({ "error": "Failed to queue order" }),
      AppError::InventoryUnavailable(_) => json!({ "error": "Inventory service unavailable" }),
      AppError::Config(_) => json!({ "error": "Configuration issue" }),
      AppError::Workflow { source } => {
        tracing::error!(pipeline_error = ?source, "Workflow error details");
        json!({ "error": "Workflow processing error" })
      }
      AppError::Internal(_) => json!({ "error": "An internal error occurred" }),
    };
    HttpResponse::build(status).json(body)
  }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;

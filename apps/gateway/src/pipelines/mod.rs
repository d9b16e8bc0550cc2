// apps/gateway/src/pipelines/mod.rs

//! Pipelines run by the gateway's HTTP handlers.

use crate::state::AppState;

pub mod billing_pipeline;
pub mod contexts;

/// Registers every gateway pipeline in `app_state.registry`. Called once at startup.
pub fn register_all_pipelines(app_state: &AppState) {
  tracing::info!("Registering gateway pipelines...");
  billing_pipeline::register_billing_pipeline(&app_state.registry);
  tracing::info!(count = app_state.registry.len(), "Gateway pipelines registered.");
}

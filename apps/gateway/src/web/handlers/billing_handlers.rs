// apps/gateway/src/web/handlers/billing_handlers.rs

use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::errors::AppError;
use crate::pipelines::contexts::BillingSubmitCtxData;
use crate::state::AppState;
use ingest::{ContextData, PipelineResult};

/// Accepts an order and returns as soon as the broker confirms the publish.
///
/// The body is read raw whatever its content type; validation happens in the
/// `validate_payload` step.
#[instrument(name = "handler::submit_billing", skip(app_state, body), fields(body_len = body.len()))]
pub async fn submit_billing_handler(
  app_state: web::Data<AppState>,
  body: web::Bytes,
) -> Result<HttpResponse, AppError> {
  let ctx_data = ContextData::new(BillingSubmitCtxData::new(app_state.get_ref().clone(), body.to_vec()));

  match app_state.registry.run(ctx_data.clone()).await? {
    PipelineResult::Completed => {
      let receipt = ctx_data.read().receipt.clone().ok_or_else(|| {
        warn!("Billing pipeline completed without a publish receipt.");
        AppError::Internal("Order was not queued.".to_string())
      })?;
      info!(message_id = %receipt.message_id, "Billing submission accepted.");
      Ok(HttpResponse::Ok().json(json!({
        "message": "Order queued for processing",
        "status": "queued",
      })))
    }
    PipelineResult::Stopped => {
      warn!("Billing pipeline stopped before publishing.");
      Err(AppError::Internal("Order was not queued.".to_string()))
    }
  }
}

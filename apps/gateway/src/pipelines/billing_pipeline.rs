// apps/gateway/src/pipelines/billing_pipeline.rs

use crate::errors::AppError;
use crate::pipelines::contexts::BillingSubmitCtxData;
use ingest::{ContextData, OrderEvent, Pipeline, PipelineControl, PipelineRegistry};
use tracing::{event, info, warn, Level};

pub const BILLING_PIPELINE: &str = "billing_submit";

/// Validate the body, then publish it to the billing queue.
pub fn build_billing_pipeline() -> Pipeline<BillingSubmitCtxData, AppError> {
  let mut p = Pipeline::<BillingSubmitCtxData, AppError>::new(
    BILLING_PIPELINE,
    &[("validate_payload", false, None), ("publish_event", false, None)],
  );

  p.on_step("validate_payload", |ctx_data: ContextData<BillingSubmitCtxData>| {
    Box::pin(async move {
      let parsed = ctx_data.with(|d| OrderEvent::from_body(&d.body));
      match parsed {
        Ok(order) => {
          event!(Level::DEBUG, user_id = %order.user_id, "Billing payload validated.");
          ctx_data.write().order = Some(order);
          Ok::<_, AppError>(PipelineControl::Continue)
        }
        Err(e) => {
          warn!(reason = %e, "Rejected billing payload.");
          Err(AppError::from(e))
        }
      }
    })
  });

  p.on_step("publish_event", |ctx_data: ContextData<BillingSubmitCtxData>| {
    Box::pin(async move {
      let (order, publisher) = {
        let guard = ctx_data.read();
        let order = guard
          .order
          .clone()
          .ok_or_else(|| AppError::Internal("publish_event reached without a validated order".to_string()))?;
        (order, guard.app_state.publisher.clone())
      }; // guard dropped before awaiting

      let receipt = publisher.publish(&order).await?;
      ctx_data.write().receipt = Some(receipt);
      Ok::<_, AppError>(PipelineControl::Continue)
    })
  });

  p.after_step("publish_event", |ctx_data: ContextData<BillingSubmitCtxData>| {
    Box::pin(async move {
      if let Some(receipt) = ctx_data.read().receipt.as_ref() {
        info!(message_id = %receipt.message_id, queue = %receipt.queue, "Order queued.");
      }
      Ok::<_, AppError>(PipelineControl::Continue)
    })
  });

  p
}

pub fn register_billing_pipeline(registry: &PipelineRegistry<AppError>) {
  registry.register_pipeline(build_billing_pipeline());
}

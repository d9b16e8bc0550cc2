// apps/gateway/src/pipelines/contexts.rs

use crate::state::AppState;
use ingest::{OrderEvent, PublishReceipt};

/// Data of one `POST /api/billing` submission.
#[derive(Clone)]
pub struct BillingSubmitCtxData {
  pub app_state: AppState,
  pub body: Vec<u8>,
  // Populated by the pipeline:
  pub order: Option<OrderEvent>,
  pub receipt: Option<PublishReceipt>,
}

impl BillingSubmitCtxData {
  pub fn new(app_state: AppState, body: Vec<u8>) -> Self {
    Self {
      app_state,
      body,
      order: None,
      receipt: None,
    }
  }
}

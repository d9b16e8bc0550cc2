// core/src/consumer/pipeline.rs

//! The per-delivery pipeline: decode_event -> persist_record -> acknowledge_delivery.
//!
//! The acknowledgement step only runs after the insert has committed, so a
//! message is never acknowledged for an order that is not stored.

use crate::broker::{BrokerError, InboundDelivery, QueueSession};
use crate::error::PipelineError;
use crate::model::{DecodeError, OrderEvent, OrderRecord};
use crate::pipeline::{ContextData, Pipeline, PipelineControl};
use crate::store::{OrderStore, StoreError};

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{event, Level};

pub struct DeliveryCtxData {
  pub session: Arc<dyn QueueSession>,
  pub delivery: InboundDelivery,
  pub event: Option<OrderEvent>,
  pub record: Option<OrderRecord>,
  pub acknowledged: bool,
}

impl DeliveryCtxData {
  pub fn new(session: Arc<dyn QueueSession>, delivery: InboundDelivery) -> Self {
    Self {
      session,
      delivery,
      event: None,
      record: None,
      acknowledged: false,
    }
  }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
  #[error("Undecodable message: {0}")]
  Decode(#[from] DecodeError),

  #[error("Failed to persist order: {0}")]
  Persist(#[source] StoreError),

  #[error("Failed to acknowledge committed order: {0}")]
  Ack(#[source] BrokerError),

  #[error(transparent)]
  Pipeline(#[from] PipelineError),
}

pub fn build_delivery_pipeline(
  store: Arc<dyn OrderStore>,
  store_timeout: Duration,
) -> Pipeline<DeliveryCtxData, DeliveryError> {
  let mut p = Pipeline::<DeliveryCtxData, DeliveryError>::new(
    "billing_delivery",
    &[
      ("decode_event", false, None),
      ("persist_record", false, None),
      ("acknowledge_delivery", false, None),
    ],
  );

  p.on_step("decode_event", |ctx_data: ContextData<DeliveryCtxData>| {
    Box::pin(async move {
      let payload = ctx_data.with(|d| d.delivery.payload.clone());
      let order = OrderEvent::decode(&payload)?;
      event!(Level::DEBUG, user_id = %order.user_id, "Decoded order message.");
      ctx_data.write().event = Some(order);
      Ok::<_, DeliveryError>(PipelineControl::Continue)
    })
  });

  p.on_step("persist_record", move |ctx_data: ContextData<DeliveryCtxData>| {
    let store = Arc::clone(&store);
    Box::pin(async move {
      let order = ctx_data
        .with(|d| d.event.clone())
        .ok_or_else(|| PipelineError::from(anyhow::anyhow!("persist_record ran without a decoded order")))?;

      let record = match tokio::time::timeout(store_timeout, store.insert_order(&order)).await {
        Ok(Ok(record)) => record,
        Ok(Err(e)) => return Err(DeliveryError::Persist(e)),
        Err(_) => return Err(DeliveryError::Persist(StoreError::Timeout(store_timeout))),
      };
      ctx_data.write().record = Some(record);
      Ok(PipelineControl::Continue)
    })
  });

  p.after_step("persist_record", |ctx_data: ContextData<DeliveryCtxData>| {
    Box::pin(async move {
      let (record_id, delivery_tag) = ctx_data.with(|d| (d.record.as_ref().map(|r| r.id), d.delivery.tag));
      event!(Level::INFO, ?record_id, delivery_tag, "Order committed.");
      Ok::<_, DeliveryError>(PipelineControl::Continue)
    })
  });

  p.on_step("acknowledge_delivery", |ctx_data: ContextData<DeliveryCtxData>| {
    Box::pin(async move {
      let (session, tag) = ctx_data.with(|d| (Arc::clone(&d.session), d.delivery.tag));
      session.ack(tag).await.map_err(DeliveryError::Ack)?;
      ctx_data.write().acknowledged = true;
      Ok::<_, DeliveryError>(PipelineControl::Continue)
    })
  });

  p
}

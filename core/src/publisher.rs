// core/src/publisher.rs

//! The gateway's side of the queue: one long-lived session, opened on first
//! use and replaced after any failure, shared by all requests.

use crate::broker::{BrokerError, OutboundMessage, QueueConnector, QueueSession, QueueSpec};
use crate::model::OrderEvent;

use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{event, instrument, Level};

#[derive(Debug, Clone)]
pub struct PublisherSettings {
  pub queue: String,
  /// Upper bound for connect + declare + confirmed publish.
  pub timeout: Duration,
  /// Publishes in flight at once; further callers wait for a permit.
  pub max_concurrency: usize,
}

impl Default for PublisherSettings {
  fn default() -> Self {
    Self {
      queue: "billing_queue".to_string(),
      timeout: Duration::from_secs(5),
      max_concurrency: 16,
    }
  }
}

#[derive(Debug, Error)]
pub enum PublishError {
  #[error(transparent)]
  Broker(#[from] BrokerError),

  #[error("Publish did not complete within {0:?}")]
  Timeout(Duration),

  #[error("Failed to encode order: {0}")]
  Encode(#[from] serde_json::Error),

  #[error("Publisher is shut down")]
  Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
  pub message_id: String,
  pub queue: String,
}

pub struct OrderPublisher {
  connector: Arc<dyn QueueConnector>,
  settings: PublisherSettings,
  permits: Semaphore,
  session: Mutex<Option<Arc<dyn QueueSession>>>,
}

impl OrderPublisher {
  pub fn new(connector: Arc<dyn QueueConnector>, settings: PublisherSettings) -> Self {
    let permits = Semaphore::new(settings.max_concurrency.max(1));
    Self {
      connector,
      settings,
      permits,
      session: Mutex::new(None),
    }
  }

  pub fn queue(&self) -> &str {
    &self.settings.queue
  }

  /// Publishes `order` as a persistent JSON message and waits for the broker
  /// to confirm it. The queue is declared durable before first use.
  #[instrument(name = "OrderPublisher::publish", skip_all, fields(queue = %self.settings.queue, message_id))]
  pub async fn publish(&self, order: &OrderEvent) -> Result<PublishReceipt, PublishError> {
    let _permit = self.permits.acquire().await.map_err(|_| PublishError::Closed)?;
    let message = OutboundMessage::persistent_json(order.to_json_bytes()?);
    tracing::Span::current().record("message_id", message.message_id.as_str());

    let used: OnceLock<Arc<dyn QueueSession>> = OnceLock::new();
    let attempt = async {
      let session = self.session().await?;
      let _ = used.set(Arc::clone(&session));
      session
        .publish(&self.settings.queue, &message)
        .await
        .map_err(|e| (e, Some(session)))
    };
    let outcome = tokio::time::timeout(self.settings.timeout, attempt).await;

    match outcome {
      Ok(Ok(())) => {
        event!(Level::INFO, "Order published.");
        Ok(PublishReceipt {
          message_id: message.message_id,
          queue: self.settings.queue.clone(),
        })
      }
      Ok(Err((e, failed))) => {
        event!(Level::WARN, error = %e, "Publish failed, dropping session.");
        if let Some(failed) = failed {
          self.invalidate(&failed).await;
        }
        Err(PublishError::Broker(e))
      }
      Err(_) => {
        event!(Level::WARN, timeout = ?self.settings.timeout, "Publish timed out, dropping session.");
        if let Some(stalled) = used.get() {
          self.invalidate(stalled).await;
        }
        Err(PublishError::Timeout(self.settings.timeout))
      }
    }
  }

  async fn session(&self) -> Result<Arc<dyn QueueSession>, (BrokerError, Option<Arc<dyn QueueSession>>)> {
    let mut slot = self.session.lock().await;
    if let Some(session) = slot.as_ref() {
      return Ok(Arc::clone(session));
    }
    if self.permits.is_closed() {
      return Err((BrokerError::Closed, None));
    }

    let session = self.connector.connect().await.map_err(|e| (e, None))?;
    if let Err(e) = session.declare_queue(&QueueSpec::durable(self.settings.queue.clone())).await {
      let _ = session.close().await;
      return Err((e, None));
    }
    event!(Level::INFO, broker = %self.connector.describe(), "Publisher session opened.");
    *slot = Some(Arc::clone(&session));
    Ok(session)
  }

  /// Drops the cached session only if it is still `failed`; a session opened
  /// by another caller in the meantime is kept.
  async fn invalidate(&self, failed: &Arc<dyn QueueSession>) {
    let mut slot = self.session.lock().await;
    if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, failed)) {
      if let Some(session) = slot.take() {
        let _ = session.close().await;
      }
    }
  }

  pub async fn is_connected(&self) -> bool {
    self.session.lock().await.is_some()
  }

  /// Refuses new publishes and closes the session.
  pub async fn shutdown(&self) {
    self.permits.close();
    if let Some(session) = self.session.lock().await.take() {
      if let Err(e) = session.close().await {
        event!(Level::WARN, error = %e, "Error closing publisher session.");
      }
    }
  }
}

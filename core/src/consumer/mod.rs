// core/src/consumer/mod.rs

//! The billing consumer: receive one order message at a time, persist it,
//! then acknowledge it.
//!
//! Startup checks the store with a bounded fixed-delay retry and gives up for
//! good when that fails. Broker connectivity is retried forever with capped
//! exponential backoff. Each delivery runs through the pipeline in
//! [`pipeline`]; whatever it does not settle is handled by the configured
//! [`FailurePolicy`].

pub mod health;
pub mod pipeline;

use crate::broker::{BrokerError, InboundDelivery, OutboundMessage, QueueConnector, QueueSession, QueueSpec};
use crate::config::{ConfigError, EnvSource};
use crate::pipeline::{ContextData, Pipeline};
use crate::retry::{ExponentialBackoff, FixedRetry};
use crate::store::{OrderStore, StoreError};

use health::{ConsumerHealth, ConsumerState};
use pipeline::{build_delivery_pipeline, DeliveryCtxData, DeliveryError};

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{event, instrument, Level};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailurePolicy {
  /// Failed deliveries stay unacknowledged and come back after the session is recycled.
  LeaveUnacknowledged,
  /// Failed deliveries are re-published with a higher attempt count or dead-lettered,
  /// and the original is rejected without requeue.
  Bounded {
    max_attempts: u32,
    dead_letter_queue: String,
  },
}

impl FailurePolicy {
  pub fn bounded(max_attempts: u32, dead_letter_queue: impl Into<String>) -> Self {
    FailurePolicy::Bounded {
      max_attempts: max_attempts.max(1),
      dead_letter_queue: dead_letter_queue.into(),
    }
  }
}

/// Policy name as configured; the bounded parameters come from other settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicyKind {
  Bounded,
  LeaveUnacknowledged,
}

impl FromStr for FailurePolicyKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "bounded" => Ok(FailurePolicyKind::Bounded),
      "leave-unacked" | "leave_unacked" => Ok(FailurePolicyKind::LeaveUnacknowledged),
      other => Err(format!("expected 'bounded' or 'leave-unacked', got '{other}'")),
    }
  }
}

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
  pub queue: String,
  pub consumer_tag: String,
  pub prefetch: u16,
  pub store_init: FixedRetry,
  pub reconnect: ExponentialBackoff,
  /// Wait before a failed persist is re-queued, by attempt number.
  pub requeue_backoff: ExponentialBackoff,
  pub failure_policy: FailurePolicy,
  pub store_timeout: Duration,
}

impl ConsumerSettings {
  pub const DEFAULT_DEAD_LETTER_SUFFIX: &'static str = ".dead";

  pub fn new(queue: impl Into<String>) -> Self {
    let queue = queue.into();
    let dead_letter_queue = format!("{queue}{}", Self::DEFAULT_DEAD_LETTER_SUFFIX);
    Self {
      consumer_tag: "billing_consumer".to_string(),
      prefetch: 1,
      store_init: FixedRetry::new(5, Duration::from_secs(5)),
      reconnect: ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30)),
      requeue_backoff: ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30)),
      failure_policy: FailurePolicy::bounded(5, dead_letter_queue),
      store_timeout: Duration::from_secs(10),
      queue,
    }
  }

  pub fn from_source(src: &EnvSource, queue: &str) -> Result<Self, ConfigError> {
    let defaults = Self::new(queue);
    let dead_letter_queue = src.string("DEAD_LETTER_QUEUE", &format!("{queue}{}", Self::DEFAULT_DEAD_LETTER_SUFFIX));
    let failure_policy = match src.parse("FAILURE_POLICY", FailurePolicyKind::Bounded)? {
      FailurePolicyKind::Bounded => FailurePolicy::bounded(src.parse("MAX_DELIVERY_ATTEMPTS", 5u32)?, dead_letter_queue),
      FailurePolicyKind::LeaveUnacknowledged => FailurePolicy::LeaveUnacknowledged,
    };
    Ok(Self {
      consumer_tag: src.string("CONSUMER_TAG", &defaults.consumer_tag),
      store_init: FixedRetry::new(
        src.parse("DB_INIT_RETRIES", 5u32)?,
        src.millis("DB_INIT_RETRY_DELAY_MS", 5_000)?,
      ),
      reconnect: ExponentialBackoff::new(
        src.millis("RECONNECT_BASE_MS", 1_000)?,
        src.millis("RECONNECT_MAX_MS", 30_000)?,
      ),
      requeue_backoff: ExponentialBackoff::new(
        src.millis("REQUEUE_DELAY_MS", 1_000)?,
        src.millis("REQUEUE_MAX_DELAY_MS", 30_000)?,
      ),
      failure_policy,
      store_timeout: src.millis("STORE_TIMEOUT_MS", 10_000)?,
      ..defaults
    })
  }
}

/// How a single delivery was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
  Acknowledged { record_id: i32 },
  /// A copy was re-published with this attempt number; the original was rejected.
  Requeued { attempt: u32 },
  DeadLettered { reason: String },
  /// The broker still holds the delivery; the session must be recycled to get it back.
  LeftUnacknowledged { reason: String },
}

#[derive(Debug, Error)]
pub enum ConsumerError {
  #[error("Order store unavailable after {attempts} attempts: {source}")]
  StoreUnavailable {
    attempts: u32,
    #[source]
    source: StoreError,
  },
}

enum SessionEnd {
  Shutdown,
  Lost(String),
  Recycle(String),
}

pub struct BillingConsumer {
  connector: Arc<dyn QueueConnector>,
  store: Arc<dyn OrderStore>,
  settings: ConsumerSettings,
  pipeline: Pipeline<DeliveryCtxData, DeliveryError>,
  health: ConsumerHealth,
}

impl BillingConsumer {
  pub fn new(connector: Arc<dyn QueueConnector>, store: Arc<dyn OrderStore>, settings: ConsumerSettings) -> Self {
    let pipeline = build_delivery_pipeline(Arc::clone(&store), settings.store_timeout);
    Self {
      connector,
      store,
      settings,
      pipeline,
      health: ConsumerHealth::default(),
    }
  }

  pub fn health(&self) -> ConsumerHealth {
    self.health.clone()
  }

  pub fn settings(&self) -> &ConsumerSettings {
    &self.settings
  }

  /// Ensures the orders table exists, retrying with a fixed delay.
  #[instrument(name = "BillingConsumer::initialize_store", skip(self))]
  pub async fn initialize_store(&self) -> Result<(), ConsumerError> {
    let retry = self.settings.store_init;
    let attempts = retry.effective_attempts();
    let mut attempt = 1;
    loop {
      let result = match tokio::time::timeout(self.settings.store_timeout, self.store.ensure_schema()).await {
        Ok(r) => r,
        Err(_) => Err(StoreError::Timeout(self.settings.store_timeout)),
      };
      match result {
        Ok(()) => {
          event!(Level::INFO, attempt, "Order store initialized.");
          return Ok(());
        }
        Err(e) if attempt < attempts => {
          event!(Level::WARN, attempt, attempts, error = %e, "Order store not ready, retrying.");
          self.health.record_error(&e);
          attempt += 1;
          tokio::time::sleep(retry.delay).await;
        }
        Err(e) => {
          event!(Level::ERROR, attempts, error = %e, "Order store unavailable, giving up.");
          self.health.record_error(&e);
          return Err(ConsumerError::StoreUnavailable { attempts, source: e });
        }
      }
    }
  }

  /// Runs until `shutdown` is cancelled. Only a store that never becomes
  /// available ends the loop with an error.
  #[instrument(name = "BillingConsumer::run", skip_all, fields(queue = %self.settings.queue))]
  pub async fn run(&self, shutdown: CancellationToken) -> Result<(), ConsumerError> {
    self.health.set_state(ConsumerState::Starting);
    let init = tokio::select! {
      biased;
      _ = shutdown.cancelled() => None,
      r = self.initialize_store() => Some(r),
    };
    match init {
      None => {
        self.health.set_state(ConsumerState::Stopped);
        return Ok(());
      }
      Some(Err(e)) => {
        self.health.set_state(ConsumerState::Failed);
        return Err(e);
      }
      Some(Ok(())) => {}
    }

    let mut failures: u32 = 0;
    while !shutdown.is_cancelled() {
      self.health.set_state(ConsumerState::Connecting);
      let opened = tokio::select! {
        biased;
        _ = shutdown.cancelled() => break,
        r = self.open_session() => r,
      };

      let reason = match opened {
        Ok(session) => {
          failures = 0;
          self.health.reset_reconnects();
          let end = self.consume(&session, &shutdown).await;
          if let Err(e) = session.close().await {
            event!(Level::DEBUG, error = %e, "Error closing consumer session.");
          }
          match end {
            SessionEnd::Shutdown => break,
            SessionEnd::Lost(reason) => reason,
            SessionEnd::Recycle(reason) => reason,
          }
        }
        Err(e) => format!("connect failed: {e}"),
      };

      let delay = self.settings.reconnect.delay_for(failures);
      failures = failures.saturating_add(1);
      self.health.record_error(&reason);
      self.health.record_reconnect();
      event!(Level::WARN, %reason, delay_ms = delay.as_millis() as u64, "Reconnecting to broker.");

      tokio::select! {
        biased;
        _ = shutdown.cancelled() => break,
        _ = tokio::time::sleep(delay) => {}
      }
    }

    self.health.set_state(ConsumerState::ShuttingDown);
    event!(Level::INFO, "Billing consumer stopped.");
    self.health.set_state(ConsumerState::Stopped);
    Ok(())
  }

  async fn open_session(&self) -> Result<Arc<dyn QueueSession>, BrokerError> {
    let session = self.connector.connect().await?;
    if let Err(e) = self.prepare_session(session.as_ref()).await {
      let _ = session.close().await;
      return Err(e);
    }
    event!(Level::INFO, broker = %self.connector.describe(), "Consuming from queue.");
    Ok(session)
  }

  async fn prepare_session(&self, session: &dyn QueueSession) -> Result<(), BrokerError> {
    session.declare_queue(&QueueSpec::durable(self.settings.queue.clone())).await?;
    if let FailurePolicy::Bounded { dead_letter_queue, .. } = &self.settings.failure_policy {
      session.declare_queue(&QueueSpec::durable(dead_letter_queue.clone())).await?;
    }
    session.set_prefetch(self.settings.prefetch).await?;
    session
      .start_consuming(&self.settings.queue, &self.settings.consumer_tag)
      .await
  }

  async fn consume(&self, session: &Arc<dyn QueueSession>, shutdown: &CancellationToken) -> SessionEnd {
    loop {
      self.health.set_state(ConsumerState::WaitingForMessage);
      let next = tokio::select! {
        biased;
        _ = shutdown.cancelled() => return SessionEnd::Shutdown,
        n = session.next_delivery() => n,
      };
      let delivery = match next {
        Ok(Some(delivery)) => delivery,
        Ok(None) => return SessionEnd::Lost("consumer stream closed".to_string()),
        Err(e) => return SessionEnd::Lost(e.to_string()),
      };

      self.health.set_state(ConsumerState::Processing);
      let delivery_tag = delivery.tag;
      // Cancelling drops the handler mid-flight; the delivery stays unsettled.
      let outcome = tokio::select! {
        biased;
        _ = shutdown.cancelled() => {
          event!(Level::INFO, delivery_tag, "Shutdown during processing, leaving delivery for redelivery.");
          return SessionEnd::Shutdown;
        }
        o = self.handle_delivery(session, delivery) => o,
      };
      self.health.record_outcome(&outcome);
      if let DeliveryOutcome::LeftUnacknowledged { reason } = outcome {
        return SessionEnd::Recycle(reason);
      }
    }
  }

  /// Runs one delivery through the pipeline and settles it.
  #[instrument(
    name = "BillingConsumer::handle_delivery",
    skip_all,
    fields(delivery_tag = delivery.tag, message_id = ?delivery.message_id, attempt = delivery.attempt, redelivered = delivery.redelivered)
  )]
  pub async fn handle_delivery(&self, session: &Arc<dyn QueueSession>, delivery: InboundDelivery) -> DeliveryOutcome {
    let ctx = ContextData::new(DeliveryCtxData::new(Arc::clone(session), delivery.clone()));
    match self.pipeline.run(ctx.clone()).await {
      Ok(_) => match ctx.with(|d| d.record.as_ref().map(|r| r.id)) {
        Some(record_id) => DeliveryOutcome::Acknowledged { record_id },
        None => DeliveryOutcome::LeftUnacknowledged {
          reason: "pipeline finished without a committed record".to_string(),
        },
      },
      Err(DeliveryError::Ack(e)) => {
        event!(Level::ERROR, error = %e, "Order committed but acknowledgement failed; it will be redelivered.");
        DeliveryOutcome::LeftUnacknowledged {
          reason: format!("ack failed after commit: {e}"),
        }
      }
      Err(e @ DeliveryError::Decode(_)) => self.settle_failure(session, &delivery, e, true).await,
      Err(e @ DeliveryError::Persist(_)) => self.settle_failure(session, &delivery, e, false).await,
      Err(DeliveryError::Pipeline(e)) => {
        event!(Level::ERROR, error = %e, "Delivery pipeline failed.");
        DeliveryOutcome::LeftUnacknowledged { reason: e.to_string() }
      }
    }
  }

  async fn settle_failure(
    &self,
    session: &Arc<dyn QueueSession>,
    delivery: &InboundDelivery,
    error: DeliveryError,
    permanent: bool,
  ) -> DeliveryOutcome {
    let reason = error.to_string();
    let (max_attempts, dead_letter_queue) = match &self.settings.failure_policy {
      FailurePolicy::LeaveUnacknowledged => {
        event!(Level::WARN, %reason, "Delivery failed, leaving it unacknowledged.");
        return DeliveryOutcome::LeftUnacknowledged { reason };
      }
      FailurePolicy::Bounded {
        max_attempts,
        dead_letter_queue,
      } => (*max_attempts, dead_letter_queue.as_str()),
    };

    let base = OutboundMessage::persistent_json(delivery.payload.clone());
    let base = match &delivery.message_id {
      Some(id) => base.with_message_id(id.clone()),
      None => base,
    };

    let retry = !permanent && delivery.attempt < max_attempts;
    if retry {
      // Held (and still unsettled) while waiting; shutdown drops this future.
      let delay = self.settings.requeue_backoff.delay_for(delivery.attempt.saturating_sub(1));
      event!(Level::DEBUG, %reason, delay_ms = delay.as_millis() as u64, "Waiting before re-queueing delivery.");
      tokio::time::sleep(delay).await;
    }
    let (target, copy) = if retry {
      (self.settings.queue.as_str(), base.with_attempt(delivery.attempt + 1))
    } else {
      (dead_letter_queue, base.with_attempt(delivery.attempt))
    };

    if let Err(e) = session.publish(target, &copy).await {
      event!(Level::ERROR, %reason, error = %e, queue = target, "Could not re-publish failed delivery.");
      return DeliveryOutcome::LeftUnacknowledged {
        reason: format!("{reason}; re-publish failed: {e}"),
      };
    }
    if let Err(e) = session.reject(delivery.tag, false).await {
      event!(Level::ERROR, error = %e, "Could not reject delivery after re-publishing it.");
      return DeliveryOutcome::LeftUnacknowledged {
        reason: format!("{reason}; reject failed: {e}"),
      };
    }

    if retry {
      event!(Level::WARN, %reason, next_attempt = copy.attempt, max_attempts, "Delivery failed, re-queued.");
      DeliveryOutcome::Requeued { attempt: copy.attempt }
    } else {
      event!(Level::ERROR, %reason, queue = target, "Delivery dead-lettered.");
      DeliveryOutcome::DeadLettered { reason }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn settings_read_policy_and_timings() {
    let src = EnvSource::from_pairs(&[
      ("FAILURE_POLICY", "bounded"),
      ("MAX_DELIVERY_ATTEMPTS", "3"),
      ("DB_INIT_RETRIES", "2"),
      ("RECONNECT_MAX_MS", "4000"),
      ("REQUEUE_DELAY_MS", "250"),
    ]);
    let settings = ConsumerSettings::from_source(&src, "billing_queue").unwrap();
    assert_eq!(settings.failure_policy, FailurePolicy::bounded(3, "billing_queue.dead"));
    assert_eq!(settings.store_init.attempts, 2);
    assert_eq!(settings.store_init.delay, Duration::from_secs(5));
    assert_eq!(settings.reconnect.max, Duration::from_secs(4));
    assert_eq!(settings.requeue_backoff.initial, Duration::from_millis(250));
    assert_eq!(settings.requeue_backoff.max, Duration::from_secs(30));
    assert_eq!(settings.prefetch, 1);
  }

  #[test]
  fn legacy_policy_and_bad_names() {
    let legacy = EnvSource::from_pairs(&[("FAILURE_POLICY", "leave-unacked")]);
    assert_eq!(
      ConsumerSettings::from_source(&legacy, "q").unwrap().failure_policy,
      FailurePolicy::LeaveUnacknowledged
    );

    let bogus = EnvSource::from_pairs(&[("FAILURE_POLICY", "retry-forever")]);
    assert!(ConsumerSettings::from_source(&bogus, "q").is_err());
  }
}

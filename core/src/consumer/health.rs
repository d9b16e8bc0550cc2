// core/src/consumer/health.rs

//! Observable consumer state, shared between the run loop and whatever
//! exposes it (the billing binary's health endpoint, tests).

use super::DeliveryOutcome;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsumerState {
  Starting,
  Connecting,
  WaitingForMessage,
  Processing,
  ShuttingDown,
  Stopped,
  Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
  pub state: ConsumerState,
  pub since: DateTime<Utc>,
  pub reconnect_attempts: u32,
  pub last_error: Option<String>,
  pub acknowledged: u64,
  pub requeued: u64,
  pub dead_lettered: u64,
  pub left_unacknowledged: u64,
}

impl HealthSnapshot {
  /// Connected to both the broker and the store.
  pub fn is_ready(&self) -> bool {
    matches!(self.state, ConsumerState::WaitingForMessage | ConsumerState::Processing)
  }
}

#[derive(Debug, Clone)]
pub struct ConsumerHealth(Arc<RwLock<HealthSnapshot>>);

impl Default for ConsumerHealth {
  fn default() -> Self {
    Self(Arc::new(RwLock::new(HealthSnapshot {
      state: ConsumerState::Starting,
      since: Utc::now(),
      reconnect_attempts: 0,
      last_error: None,
      acknowledged: 0,
      requeued: 0,
      dead_lettered: 0,
      left_unacknowledged: 0,
    })))
  }
}

impl ConsumerHealth {
  pub fn snapshot(&self) -> HealthSnapshot {
    self.0.read().clone()
  }

  pub fn state(&self) -> ConsumerState {
    self.0.read().state
  }

  pub fn is_ready(&self) -> bool {
    self.0.read().is_ready()
  }

  pub(crate) fn set_state(&self, state: ConsumerState) {
    let mut snap = self.0.write();
    if snap.state != state {
      snap.state = state;
      snap.since = Utc::now();
    }
  }

  pub(crate) fn record_error(&self, error: impl ToString) {
    self.0.write().last_error = Some(error.to_string());
  }

  pub(crate) fn record_reconnect(&self) {
    self.0.write().reconnect_attempts += 1;
  }

  pub(crate) fn reset_reconnects(&self) {
    self.0.write().reconnect_attempts = 0;
  }

  pub(crate) fn record_outcome(&self, outcome: &DeliveryOutcome) {
    let mut snap = self.0.write();
    match outcome {
      DeliveryOutcome::Acknowledged { .. } => snap.acknowledged += 1,
      DeliveryOutcome::Requeued { .. } => snap.requeued += 1,
      DeliveryOutcome::DeadLettered { .. } => snap.dead_lettered += 1,
      DeliveryOutcome::LeftUnacknowledged { .. } => snap.left_unacknowledged += 1,
    }
  }
}

// core/src/broker/mod.rs

//! The durable queue contract.
//!
//! A `QueueConnector` opens sessions (one connection plus one channel); a
//! `QueueSession` declares queues, publishes with publisher confirms and
//! consumes with manual acknowledgement. Messages a session received but did
//! not settle go back to the queue when the session goes away.

pub mod amqp;
pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub use amqp::AmqpConnector;
pub use memory::{MemoryBroker, StoredMessage};

/// Header carrying the 1-based delivery attempt of a re-published message.
pub const DELIVERY_ATTEMPT_HEADER: &str = "x-delivery-attempt";

pub const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
  #[error("Broker unreachable: {0}")]
  Unreachable(String),

  #[error("Channel error: {0}")]
  Channel(String),

  #[error("Broker did not confirm the publish")]
  PublishRejected,

  #[error("Session is not consuming from any queue")]
  NotConsuming,

  #[error("Session is closed")]
  Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
  pub name: String,
  pub durable: bool,
}

impl QueueSpec {
  pub fn durable(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      durable: true,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
  pub payload: Vec<u8>,
  pub message_id: String,
  pub persistent: bool,
  pub attempt: u32,
}

impl OutboundMessage {
  /// A persistent JSON message with a fresh id, first attempt.
  pub fn persistent_json(payload: Vec<u8>) -> Self {
    Self {
      payload,
      message_id: Uuid::new_v4().to_string(),
      persistent: true,
      attempt: 1,
    }
  }

  pub fn with_attempt(mut self, attempt: u32) -> Self {
    self.attempt = attempt;
    self
  }

  pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
    self.message_id = message_id.into();
    self
  }
}

/// A message handed to a consumer and not yet settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundDelivery {
  pub tag: u64,
  pub payload: Vec<u8>,
  pub message_id: Option<String>,
  pub redelivered: bool,
  /// 1 unless the message was re-published after a failed attempt.
  pub attempt: u32,
}

#[async_trait]
pub trait QueueConnector: Send + Sync {
  async fn connect(&self) -> Result<Arc<dyn QueueSession>, BrokerError>;

  /// Where this connector points, without credentials. Used in logs.
  fn describe(&self) -> String;
}

#[async_trait]
pub trait QueueSession: Send + Sync {
  /// Idempotent. Fails if the queue exists with a different durability.
  async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), BrokerError>;

  /// At most `count` unsettled deliveries for this session. 0 means unlimited.
  async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError>;

  /// Returns once the broker has confirmed the message.
  async fn publish(&self, queue: &str, message: &OutboundMessage) -> Result<(), BrokerError>;

  async fn start_consuming(&self, queue: &str, consumer_tag: &str) -> Result<(), BrokerError>;

  /// Waits for the next delivery. `Ok(None)` means the session was closed.
  async fn next_delivery(&self) -> Result<Option<InboundDelivery>, BrokerError>;

  async fn ack(&self, tag: u64) -> Result<(), BrokerError>;

  async fn reject(&self, tag: u64, requeue: bool) -> Result<(), BrokerError>;

  async fn close(&self) -> Result<(), BrokerError>;
}

// src/lib.rs

//! Ingest: the asynchronous half of the order ingestion pipeline.
//!
//! The crate holds everything between "the gateway accepted a billing payload"
//! and "an order row is committed":
//!  - A durable queue contract (`QueueConnector` / `QueueSession`) with an AMQP
//!    implementation and an in-process broker that enforces the same contract.
//!  - `OrderPublisher`, a process-lifetime publisher session with bounded concurrency.
//!  - `BillingConsumer`, the receive/persist/acknowledge loop with reconnect
//!    backoff, prefetch of one and an explicit failure policy.
//!  - `OrderStore`, the relational persistence adapter (Postgres or in-memory).
//!  - A small step pipeline engine (`Pipeline`, `PipelineRegistry`) that both
//!    the gateway submit path and the per-delivery handler run on.

pub mod broker;
pub mod config;
pub mod consumer;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod publisher;
pub mod registry;
pub mod retry;
pub mod store;

// --- Re-exports for the Public API ---

pub use crate::pipeline::{ContextData, Handler, Pipeline, PipelineControl, PipelineResult, SkipCondition, StepDef};
pub use crate::registry::PipelineRegistry;
pub use crate::error::{EngineResult, PipelineError};

pub use crate::broker::{BrokerError, InboundDelivery, OutboundMessage, QueueConnector, QueueSession, QueueSpec};
pub use crate::consumer::{BillingConsumer, ConsumerError, ConsumerSettings, DeliveryOutcome, FailurePolicy};
pub use crate::model::{DecodeError, OrderEvent, OrderRecord, ValidationError};
pub use crate::publisher::{OrderPublisher, PublishError, PublishReceipt, PublisherSettings};
pub use crate::store::{OrderStore, StoreError};

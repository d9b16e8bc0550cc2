// core/src/store/mod.rs

//! Persistence of accepted orders.

pub mod memory;
pub mod postgres;

use crate::model::{OrderEvent, OrderRecord};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use memory::MemoryOrderStore;
pub use postgres::PgOrderStore;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("Order store unavailable: {0}")]
  Unavailable(String),

  #[error("Order store did not answer within {0:?}")]
  Timeout(Duration),

  #[error("Database error: {0}")]
  Sqlx(#[from] sqlx::Error),
}

#[async_trait]
pub trait OrderStore: Send + Sync {
  /// Creates the `orders` table if it does not exist. Safe to call repeatedly.
  async fn ensure_schema(&self) -> Result<(), StoreError>;

  /// Inserts one row and returns it once the transaction has committed.
  async fn insert_order(&self, event: &OrderEvent) -> Result<OrderRecord, StoreError>;
}

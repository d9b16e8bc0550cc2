// core/src/store/memory.rs

use super::{OrderStore, StoreError};
use crate::model::{OrderEvent, OrderRecord};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct Inner {
  schema_ready: bool,
  schema_failures_left: u32,
  schema_attempts: u32,
  fail_inserts: bool,
  insert_delay: Option<Duration>,
  rows: Vec<OrderRecord>,
}

/// In-process order table with switchable failures. Clones share the table.
#[derive(Debug, Clone, Default)]
pub struct MemoryOrderStore {
  inner: Arc<Mutex<Inner>>,
}

impl MemoryOrderStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Schema creation never succeeds.
  pub fn unreachable() -> Self {
    Self::failing_schema(u32::MAX)
  }

  /// The first `n` schema attempts fail.
  pub fn failing_schema(n: u32) -> Self {
    let store = Self::default();
    store.inner.lock().schema_failures_left = n;
    store
  }

  pub fn set_fail_inserts(&self, fail: bool) {
    self.inner.lock().fail_inserts = fail;
  }

  /// Each insert waits this long before touching the table.
  pub fn set_insert_delay(&self, delay: Option<Duration>) {
    self.inner.lock().insert_delay = delay;
  }

  pub fn records(&self) -> Vec<OrderRecord> {
    self.inner.lock().rows.clone()
  }

  pub fn schema_attempts(&self) -> u32 {
    self.inner.lock().schema_attempts
  }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
  async fn ensure_schema(&self) -> Result<(), StoreError> {
    let mut inner = self.inner.lock();
    inner.schema_attempts += 1;
    if inner.schema_failures_left > 0 {
      inner.schema_failures_left -= 1;
      return Err(StoreError::Unavailable("connection refused".into()));
    }
    inner.schema_ready = true;
    Ok(())
  }

  async fn insert_order(&self, event: &OrderEvent) -> Result<OrderRecord, StoreError> {
    let delay = self.inner.lock().insert_delay;
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    let mut inner = self.inner.lock();
    if !inner.schema_ready {
      return Err(StoreError::Unavailable("relation \"orders\" does not exist".into()));
    }
    if inner.fail_inserts {
      return Err(StoreError::Unavailable("insert failed".into()));
    }
    let id = i32::try_from(inner.rows.len() + 1).map_err(|_| StoreError::Unavailable("id space exhausted".into()))?;
    let record = OrderRecord {
      id,
      user_id: event.user_id.clone(),
      number_of_items: event.number_of_items.clone(),
      total_amount: event.total_amount.clone(),
    };
    inner.rows.push(record.clone());
    Ok(record)
  }
}

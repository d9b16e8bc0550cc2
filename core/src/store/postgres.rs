// core/src/store/postgres.rs

use super::{OrderStore, StoreError};
use crate::config::StoreSettings;
use crate::model::{OrderEvent, OrderRecord};

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::{event, instrument, Level};

const CREATE_ORDERS_TABLE: &str = "CREATE TABLE IF NOT EXISTS orders (
  id SERIAL PRIMARY KEY,
  user_id VARCHAR(255),
  number_of_items VARCHAR(255),
  total_amount VARCHAR(255)
)";

const INSERT_ORDER: &str = "INSERT INTO orders (user_id, number_of_items, total_amount)
  VALUES ($1, $2, $3)
  RETURNING id, user_id, number_of_items, total_amount";

/// Postgres-backed store. The pool connects on first use, so building one
/// never fails; reachability shows up in `ensure_schema`.
#[derive(Debug, Clone)]
pub struct PgOrderStore {
  pool: PgPool,
}

impl PgOrderStore {
  pub fn new(settings: &StoreSettings) -> Self {
    let options = PgConnectOptions::new()
      .host(&settings.host)
      .port(settings.port)
      .username(&settings.username)
      .password(&settings.password)
      .database(&settings.database);
    let pool = PgPoolOptions::new()
      .max_connections(settings.max_connections)
      .acquire_timeout(settings.acquire_timeout)
      .connect_lazy_with(options);
    Self { pool }
  }

  pub async fn close(&self) {
    self.pool.close().await;
  }
}

#[async_trait]
impl OrderStore for PgOrderStore {
  #[instrument(name = "PgOrderStore::ensure_schema", skip(self), err(Display))]
  async fn ensure_schema(&self) -> Result<(), StoreError> {
    sqlx::query(CREATE_ORDERS_TABLE).execute(&self.pool).await?;
    event!(Level::INFO, "Orders table is ready.");
    Ok(())
  }

  #[instrument(name = "PgOrderStore::insert_order", skip_all, fields(user_id = %event.user_id))]
  async fn insert_order(&self, event: &OrderEvent) -> Result<OrderRecord, StoreError> {
    let mut tx = self.pool.begin().await?;
    let record = sqlx::query_as::<_, OrderRecord>(INSERT_ORDER)
      .bind(&event.user_id)
      .bind(&event.number_of_items)
      .bind(&event.total_amount)
      .fetch_one(&mut *tx)
      .await?;
    tx.commit().await?;
    Ok(record)
  }
}

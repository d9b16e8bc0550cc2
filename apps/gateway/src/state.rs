// apps/gateway/src/state.rs
use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::services::inventory_proxy::InventoryProxy;
use ingest::{OrderPublisher, PipelineRegistry, QueueConnector};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
  pub registry: Arc<PipelineRegistry<AppError>>,
  pub publisher: Arc<OrderPublisher>,
  pub inventory: Arc<InventoryProxy>,
  pub config: Arc<AppConfig>,
}

impl AppState {
  /// Wires the publisher and proxy; pipelines are registered separately.
  pub fn build(config: AppConfig, connector: Arc<dyn QueueConnector>) -> Result<Self> {
    let publisher = OrderPublisher::new(connector, config.publisher_settings());
    let inventory = InventoryProxy::new(&config.inventory_url, config.proxy_timeout)?;
    Ok(Self {
      registry: Arc::new(PipelineRegistry::new()),
      publisher: Arc::new(publisher),
      inventory: Arc::new(inventory),
      config: Arc::new(config),
    })
  }
}

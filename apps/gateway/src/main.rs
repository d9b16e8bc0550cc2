// apps/gateway/src/main.rs

mod config;
mod errors;
mod pipelines;
mod services;
mod state;
mod web;

use crate::config::AppConfig;
use crate::state::AppState;

use actix_web::{web as actix_data, App, HttpServer};
use ingest::broker::AmqpConnector;
use ingest::config::LogFormat;
use std::sync::Arc;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let builder = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_span_events(FmtSpan::CLOSE);
  match format {
    LogFormat::Json => builder.json().init(),
    LogFormat::Pretty => builder.init(),
  }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
  let app_config = AppConfig::from_env()?;
  init_tracing(app_config.log_format);
  tracing::info!(config = ?app_config, "Starting billing gateway...");

  let connector = Arc::new(AmqpConnector::new(app_config.broker.clone()));
  let app_state = AppState::build(app_config, connector)?;
  pipelines::register_all_pipelines(&app_state);

  let server_address = app_state.config.bind_address();
  tracing::info!(
    address = %server_address,
    inventory_url = %app_state.inventory.base_url(),
    queue = %app_state.publisher.queue(),
    "Binding HTTP server."
  );

  let server_state = app_state.clone();
  HttpServer::new(move || {
    App::new()
      .app_data(actix_data::Data::new(server_state.clone()))
      .wrap(tracing_actix_web::TracingLogger::default())
      .configure(web::configure_app_routes)
  })
  .bind(&server_address)?
  .run()
  .await?;

  tracing::info!("HTTP server stopped; closing publisher session.");
  app_state.publisher.shutdown().await;
  Ok(())
}

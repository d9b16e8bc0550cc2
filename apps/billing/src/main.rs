// apps/billing/src/main.rs

mod config;
mod health;

use crate::config::BillingConfig;

use ingest::broker::AmqpConnector;
use ingest::config::LogFormat;
use ingest::store::PgOrderStore;
use ingest::BillingConsumer;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
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
  let config = BillingConfig::from_env()?;
  init_tracing(config.log_format);
  tracing::info!(
    broker = ?config.broker,
    store = ?config.store,
    policy = ?config.consumer.failure_policy,
    "Starting billing consumer..."
  );

  let store = Arc::new(PgOrderStore::new(&config.store));
  let connector = Arc::new(AmqpConnector::new(config.broker.clone()));
  let consumer = BillingConsumer::new(connector, store.clone(), config.consumer.clone());

  let health_address = config.health_address();
  let server = health::health_server(consumer.health(), &health_address)?;
  let server_handle = server.handle();
  actix_web::rt::spawn(server);
  tracing::info!(address = %health_address, "Health endpoint listening.");

  let shutdown = CancellationToken::new();
  let signal_token = shutdown.clone();
  actix_web::rt::spawn(async move {
    match tokio::signal::ctrl_c().await {
      Ok(()) => {
        tracing::info!("Shutdown signal received.");
        signal_token.cancel();
      }
      Err(e) => tracing::error!(error = %e, "Failed to listen for the shutdown signal."),
    }
  });

  let result = consumer.run(shutdown).await;

  server_handle.stop(true).await;
  store.close().await;
  if let Err(e) = &result {
    tracing::error!(error = %e, "Billing consumer exited with a fatal error.");
  }
  result?;
  tracing::info!("Billing consumer stopped.");
  Ok(())
}

// apps/billing/src/config.rs

use ingest::config::{BrokerSettings, ConfigError, EnvSource, LogFormat, StoreSettings};
use ingest::ConsumerSettings;

/// The consumer runs next to the broker.
pub const DEFAULT_BROKER_HOST: &str = "localhost";

#[derive(Debug, Clone)]
pub struct BillingConfig {
  pub broker: BrokerSettings,
  pub store: StoreSettings,
  pub consumer: ConsumerSettings,
  pub health_host: String,
  pub health_port: u16,
  pub log_format: LogFormat,
}

impl BillingConfig {
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::from_source(&EnvSource::process())
  }

  pub fn from_source(src: &EnvSource) -> Result<Self, ConfigError> {
    let broker = BrokerSettings::from_source(src, DEFAULT_BROKER_HOST)?;
    let consumer = ConsumerSettings::from_source(src, &broker.queue)?;
    Ok(Self {
      store: StoreSettings::from_source(src)?,
      health_host: src.string("HEALTH_HOST", "0.0.0.0"),
      health_port: src.parse("HEALTH_PORT", 8081u16)?,
      log_format: LogFormat::from_source(src)?,
      broker,
      consumer,
    })
  }

  pub fn health_address(&self) -> String {
    format!("{}:{}", self.health_host, self.health_port)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ingest::FailurePolicy;
  use std::time::Duration;

  #[test]
  fn defaults_target_the_local_broker_and_store() {
    let config = BillingConfig::from_source(&EnvSource::from_pairs(&[])).unwrap();
    assert_eq!(config.broker.host, "localhost");
    assert_eq!(config.store.host, "localhost");
    assert_eq!(config.health_address(), "0.0.0.0:8081");
    assert_eq!(config.consumer.queue, "billing_queue");
    assert_eq!(config.consumer.prefetch, 1);
    assert_eq!(config.consumer.failure_policy, FailurePolicy::bounded(5, "billing_queue.dead"));
  }

  #[test]
  fn consumer_follows_the_configured_queue() {
    let src = EnvSource::from_pairs(&[
      ("BILLING_QUEUE", "orders"),
      ("FAILURE_POLICY", "leave-unacked"),
      ("DB_INIT_RETRY_DELAY_MS", "250"),
    ]);
    let config = BillingConfig::from_source(&src).unwrap();
    assert_eq!(config.consumer.queue, "orders");
    assert_eq!(config.consumer.failure_policy, FailurePolicy::LeaveUnacknowledged);
    assert_eq!(config.consumer.store_init.delay, Duration::from_millis(250));
  }

  #[test]
  fn invalid_health_port_is_rejected() {
    let src = EnvSource::from_pairs(&[("HEALTH_PORT", "-1")]);
    assert!(BillingConfig::from_source(&src).is_err());
  }
}

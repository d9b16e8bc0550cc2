// apps/gateway/src/config.rs

use crate::errors::Result;
use ingest::config::{BrokerSettings, EnvSource, LogFormat};
use ingest::PublisherSettings;
use std::time::Duration;

/// The gateway reaches the broker over the private network.
pub const DEFAULT_BROKER_HOST: &str = "192.168.56.12";
pub const DEFAULT_INVENTORY_URL: &str = "http://192.168.56.11:5000/api/movies";

#[derive(Debug, Clone)]
pub struct AppConfig {
  pub server_host: String,
  pub server_port: u16,
  pub inventory_url: String,
  pub broker: BrokerSettings,
  pub publish_timeout: Duration,
  pub publish_max_concurrency: usize,
  pub proxy_timeout: Duration,
  pub log_format: LogFormat,
}

impl AppConfig {
  pub fn from_env() -> Result<Self> {
    Self::from_source(&EnvSource::process())
  }

  pub fn from_source(src: &EnvSource) -> Result<Self> {
    Ok(Self {
      server_host: src.string("SERVER_HOST", "0.0.0.0"),
      server_port: src.parse("SERVER_PORT", 3000u16)?,
      inventory_url: src
        .string("INVENTORY_URL", DEFAULT_INVENTORY_URL)
        .trim_end_matches('/')
        .to_string(),
      broker: BrokerSettings::from_source(src, DEFAULT_BROKER_HOST)?,
      publish_timeout: src.millis("PUBLISH_TIMEOUT_MS", 5_000)?,
      publish_max_concurrency: src.parse("PUBLISH_MAX_CONCURRENCY", 16usize)?.max(1),
      proxy_timeout: src.millis("PROXY_TIMEOUT_MS", 10_000)?,
      log_format: LogFormat::from_source(src)?,
    })
  }

  pub fn bind_address(&self) -> String {
    format!("{}:{}", self.server_host, self.server_port)
  }

  pub fn publisher_settings(&self) -> PublisherSettings {
    PublisherSettings {
      queue: self.broker.queue.clone(),
      timeout: self.publish_timeout,
      max_concurrency: self.publish_max_concurrency,
    }
  }
}

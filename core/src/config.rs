// core/src/config.rs

//! Environment-driven settings shared by the gateway and the billing consumer.
//!
//! Every option has a default; only values that are present but unparsable
//! are errors. Settings are read through an `EnvSource` so tests can feed a
//! plain map instead of mutating the process environment.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("Invalid value for {key}: '{value}' ({reason})")]
  Invalid { key: String, value: String, reason: String },
}

/// Key/value lookup the settings are read from.
pub struct EnvSource {
  lookup: Box<dyn Fn(&str) -> Option<String> + Send + Sync>,
}

impl EnvSource {
  /// The process environment, after loading `.env` if one is present.
  pub fn process() -> Self {
    dotenvy::dotenv().ok();
    Self {
      lookup: Box::new(|key| std::env::var(key).ok()),
    }
  }

  pub fn from_map(map: HashMap<String, String>) -> Self {
    Self {
      lookup: Box::new(move |key| map.get(key).cloned()),
    }
  }

  pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
    Self::from_map(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
  }

  /// Blank values count as unset.
  pub fn get(&self, key: &str) -> Option<String> {
    (self.lookup)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
  }

  pub fn string(&self, key: &str, default: &str) -> String {
    self.get(key).unwrap_or_else(|| default.to_string())
  }

  pub fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
  where
    T: FromStr,
    T::Err: Display,
  {
    match self.get(key) {
      None => Ok(default),
      Some(raw) => raw.parse::<T>().map_err(|e| ConfigError::Invalid {
        key: key.to_string(),
        value: raw.clone(),
        reason: e.to_string(),
      }),
    }
  }

  pub fn millis(&self, key: &str, default_ms: u64) -> Result<Duration, ConfigError> {
    self.parse::<u64>(key, default_ms).map(Duration::from_millis)
  }
}

/// Where the durable queue lives and how to authenticate against it.
#[derive(Clone)]
pub struct BrokerSettings {
  pub host: String,
  pub port: u16,
  pub username: String,
  pub password: String,
  pub vhost: String,
  pub queue: String,
}

impl BrokerSettings {
  pub const DEFAULT_QUEUE: &'static str = "billing_queue";

  /// `default_host` differs per service: the gateway reaches the broker over
  /// the private network, the consumer runs next to it.
  pub fn from_source(src: &EnvSource, default_host: &str) -> Result<Self, ConfigError> {
    Ok(Self {
      host: src.string("RABBIT_HOST", default_host),
      port: src.parse("RABBIT_PORT", 5672u16)?,
      username: src.string("RABBIT_USER", "myuser"),
      password: src.string("RABBIT_PASS", "mypassword"),
      vhost: src.string("RABBIT_VHOST", "/"),
      queue: src.string("BILLING_QUEUE", Self::DEFAULT_QUEUE),
    })
  }
}

impl std::fmt::Debug for BrokerSettings {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BrokerSettings")
      .field("host", &self.host)
      .field("port", &self.port)
      .field("username", &self.username)
      .field("password", &"[REDACTED]")
      .field("vhost", &self.vhost)
      .field("queue", &self.queue)
      .finish()
  }
}

/// Postgres connection settings for the order store.
#[derive(Clone)]
pub struct StoreSettings {
  pub host: String,
  pub port: u16,
  pub username: String,
  pub password: String,
  pub database: String,
  pub max_connections: u32,
  pub acquire_timeout: Duration,
}

impl StoreSettings {
  pub fn from_source(src: &EnvSource) -> Result<Self, ConfigError> {
    Ok(Self {
      host: src.string("POSTGRES_HOST", "localhost"),
      port: src.parse("POSTGRES_PORT", 5432u16)?,
      username: src.string("POSTGRES_USER", "myuser"),
      password: src.string("POSTGRES_PASSWORD", "mypassword"),
      database: src.string("POSTGRES_DB", "billing_db"),
      max_connections: src.parse("POSTGRES_MAX_CONNECTIONS", 5u32)?,
      acquire_timeout: src.millis("POSTGRES_ACQUIRE_TIMEOUT_MS", 5_000)?,
    })
  }
}

impl std::fmt::Debug for StoreSettings {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StoreSettings")
      .field("host", &self.host)
      .field("port", &self.port)
      .field("username", &self.username)
      .field("password", &"[REDACTED]")
      .field("database", &self.database)
      .field("max_connections", &self.max_connections)
      .field("acquire_timeout", &self.acquire_timeout)
      .finish()
  }
}

/// Output format of the binaries' `tracing` subscriber (`LOG_FORMAT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
  #[default]
  Pretty,
  Json,
}

impl FromStr for LogFormat {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "pretty" | "text" | "plain" => Ok(LogFormat::Pretty),
      "json" => Ok(LogFormat::Json),
      other => Err(format!("expected 'pretty' or 'json', got '{}'", other)),
    }
  }
}

impl LogFormat {
  pub fn from_source(src: &EnvSource) -> Result<Self, ConfigError> {
    src.parse("LOG_FORMAT", LogFormat::Pretty)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_apply_when_unset_or_blank() {
    let src = EnvSource::from_pairs(&[("RABBIT_USER", "  ")]);
    let broker = BrokerSettings::from_source(&src, "localhost").unwrap();
    assert_eq!(broker.host, "localhost");
    assert_eq!(broker.port, 5672);
    assert_eq!(broker.username, "myuser");
    assert_eq!(broker.queue, "billing_queue");

    let store = StoreSettings::from_source(&src).unwrap();
    assert_eq!(store.database, "billing_db");
    assert_eq!(store.acquire_timeout, Duration::from_secs(5));
  }

  #[test]
  fn explicit_values_override_defaults() {
    let src = EnvSource::from_pairs(&[
      ("RABBIT_HOST", "broker.internal"),
      ("RABBIT_PASS", "s3cret"),
      ("BILLING_QUEUE", "orders"),
      ("POSTGRES_DB", "ledger"),
    ]);
    let broker = BrokerSettings::from_source(&src, "localhost").unwrap();
    assert_eq!(broker.host, "broker.internal");
    assert_eq!(broker.password, "s3cret");
    assert_eq!(broker.queue, "orders");
    assert!(!format!("{:?}", broker).contains("s3cret"));
    assert_eq!(StoreSettings::from_source(&src).unwrap().database, "ledger");
  }

  #[test]
  fn unparsable_values_are_errors() {
    let src = EnvSource::from_pairs(&[("RABBIT_PORT", "amqp")]);
    let err = BrokerSettings::from_source(&src, "localhost").unwrap_err();
    assert!(err.to_string().starts_with("Invalid value for RABBIT_PORT: 'amqp'"));
  }

  #[test]
  fn log_format_accepts_json_case_insensitively() {
    assert_eq!(LogFormat::from_source(&EnvSource::from_pairs(&[])).unwrap(), LogFormat::Pretty);
    let src = EnvSource::from_pairs(&[("LOG_FORMAT", "JSON")]);
    assert_eq!(LogFormat::from_source(&src).unwrap(), LogFormat::Json);
    assert!(LogFormat::from_source(&EnvSource::from_pairs(&[("LOG_FORMAT", "xml")])).is_err());
  }
}

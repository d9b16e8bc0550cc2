// core/src/broker/amqp.rs

//! RabbitMQ sessions over lapin. Publishes go through the default exchange
//! with the queue name as routing key, with publisher confirms enabled.

use super::{
  BrokerError, InboundDelivery, OutboundMessage, QueueConnector, QueueSession, QueueSpec, DELIVERY_ATTEMPT_HEADER,
  JSON_CONTENT_TYPE,
};
use crate::config::BrokerSettings;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
  BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, BasicRejectOptions, ConfirmSelectOptions,
  QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{event, instrument, Level};

const PERSISTENT_DELIVERY_MODE: u8 = 2;

fn channel_err(err: lapin::Error) -> BrokerError {
  BrokerError::Channel(err.to_string())
}

#[derive(Debug, Clone)]
pub struct AmqpConnector {
  settings: BrokerSettings,
}

impl AmqpConnector {
  pub fn new(settings: BrokerSettings) -> Self {
    Self { settings }
  }

  fn uri(&self) -> AMQPUri {
    AMQPUri {
      authority: AMQPAuthority {
        userinfo: AMQPUserInfo {
          username: self.settings.username.clone(),
          password: self.settings.password.clone(),
        },
        host: self.settings.host.clone(),
        port: self.settings.port,
      },
      vhost: self.settings.vhost.clone(),
      ..Default::default()
    }
  }
}

#[async_trait]
impl QueueConnector for AmqpConnector {
  #[instrument(name = "AmqpConnector::connect", skip(self), fields(broker = %self.describe()))]
  async fn connect(&self) -> Result<Arc<dyn QueueSession>, BrokerError> {
    let connection = Connection::connect_uri(self.uri(), ConnectionProperties::default())
      .await
      .map_err(|e| BrokerError::Unreachable(e.to_string()))?;
    let channel = connection.create_channel().await.map_err(channel_err)?;
    channel
      .confirm_select(ConfirmSelectOptions::default())
      .await
      .map_err(channel_err)?;
    event!(Level::DEBUG, channel_id = channel.id(), "AMQP session opened.");

    Ok(Arc::new(AmqpSession {
      connection,
      channel,
      consumer: Mutex::new(None),
    }))
  }

  fn describe(&self) -> String {
    format!("amqp://{}:{}{}", self.settings.host, self.settings.port, self.settings.vhost)
  }
}

pub struct AmqpSession {
  connection: Connection,
  channel: Channel,
  consumer: Mutex<Option<Consumer>>,
}

fn attempt_from_headers(properties: &BasicProperties) -> u32 {
  let value = properties.headers().as_ref().and_then(|headers| {
    headers
      .inner()
      .iter()
      .find(|(key, _)| key.as_str() == DELIVERY_ATTEMPT_HEADER)
      .map(|(_, value)| value.clone())
  });
  let attempt = match value {
    Some(AMQPValue::LongLongInt(v)) => v,
    Some(AMQPValue::LongInt(v)) => i64::from(v),
    Some(AMQPValue::LongUInt(v)) => i64::from(v),
    Some(AMQPValue::ShortInt(v)) => i64::from(v),
    Some(AMQPValue::ShortUInt(v)) => i64::from(v),
    _ => 1,
  };
  u32::try_from(attempt).ok().filter(|a| *a > 0).unwrap_or(1)
}

#[async_trait]
impl QueueSession for AmqpSession {
  async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), BrokerError> {
    self
      .channel
      .queue_declare(
        &spec.name,
        QueueDeclareOptions {
          durable: spec.durable,
          ..Default::default()
        },
        FieldTable::default(),
      )
      .await
      .map_err(channel_err)?;
    Ok(())
  }

  async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError> {
    self
      .channel
      .basic_qos(count, BasicQosOptions::default())
      .await
      .map_err(channel_err)
  }

  async fn publish(&self, queue: &str, message: &OutboundMessage) -> Result<(), BrokerError> {
    let mut headers = FieldTable::default();
    headers.insert(
      ShortString::from(DELIVERY_ATTEMPT_HEADER),
      AMQPValue::LongLongInt(i64::from(message.attempt)),
    );
    let mut properties = BasicProperties::default()
      .with_content_type(ShortString::from(JSON_CONTENT_TYPE))
      .with_message_id(ShortString::from(message.message_id.clone()))
      .with_headers(headers);
    if message.persistent {
      properties = properties.with_delivery_mode(PERSISTENT_DELIVERY_MODE);
    }

    let confirmation = self
      .channel
      .basic_publish("", queue, BasicPublishOptions::default(), &message.payload, properties)
      .await
      .map_err(channel_err)?
      .await
      .map_err(channel_err)?;
    if confirmation.is_nack() {
      return Err(BrokerError::PublishRejected);
    }
    Ok(())
  }

  async fn start_consuming(&self, queue: &str, consumer_tag: &str) -> Result<(), BrokerError> {
    let consumer = self
      .channel
      .basic_consume(queue, consumer_tag, BasicConsumeOptions::default(), FieldTable::default())
      .await
      .map_err(channel_err)?;
    *self.consumer.lock().await = Some(consumer);
    Ok(())
  }

  async fn next_delivery(&self) -> Result<Option<InboundDelivery>, BrokerError> {
    let mut guard = self.consumer.lock().await;
    let consumer = guard.as_mut().ok_or(BrokerError::NotConsuming)?;
    match consumer.next().await {
      None => Ok(None),
      Some(Err(e)) => Err(channel_err(e)),
      Some(Ok(delivery)) => Ok(Some(InboundDelivery {
        tag: delivery.delivery_tag,
        attempt: attempt_from_headers(&delivery.properties),
        message_id: delivery.properties.message_id().as_ref().map(|id| id.as_str().to_string()),
        redelivered: delivery.redelivered,
        payload: delivery.data,
      })),
    }
  }

  async fn ack(&self, tag: u64) -> Result<(), BrokerError> {
    self
      .channel
      .basic_ack(tag, BasicAckOptions::default())
      .await
      .map_err(channel_err)
  }

  async fn reject(&self, tag: u64, requeue: bool) -> Result<(), BrokerError> {
    self
      .channel
      .basic_reject(tag, BasicRejectOptions { requeue })
      .await
      .map_err(channel_err)
  }

  async fn close(&self) -> Result<(), BrokerError> {
    if !self.connection.status().connected() {
      return Ok(());
    }
    self.connection.close(200, "closing").await.map_err(channel_err)
  }
}

// core/src/broker/memory.rs

//! In-process broker with the same settlement rules as the AMQP one.
//!
//! Delivery tags are unique per broker. A session's unsettled deliveries are
//! put back at the head of their queue, flagged as redelivered, when the
//! session is closed, dropped or disconnected. Publishing to a queue that was
//! never declared drops the message, as the default exchange does.

use super::{BrokerError, InboundDelivery, OutboundMessage, QueueConnector, QueueSession, QueueSpec};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{event, Level};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
  pub payload: Vec<u8>,
  pub message_id: Option<String>,
  pub persistent: bool,
  pub attempt: u32,
  pub redelivered: bool,
}

impl StoredMessage {
  pub fn payload_str(&self) -> String {
    String::from_utf8_lossy(&self.payload).into_owned()
  }
}

#[derive(Debug, Default)]
struct QueueState {
  durable: bool,
  ready: VecDeque<StoredMessage>,
  acked: Vec<StoredMessage>,
  rejected: Vec<StoredMessage>,
}

#[derive(Debug)]
struct Unsettled {
  session: u64,
  queue: String,
  message: StoredMessage,
}

#[derive(Debug)]
struct BrokerState {
  reachable: bool,
  refuse_next: u32,
  fail_publishes: bool,
  epoch: u64,
  next_session: u64,
  next_tag: u64,
  connects: usize,
  dropped: usize,
  queues: HashMap<String, QueueState>,
  unsettled: HashMap<u64, Unsettled>,
}

impl BrokerState {
  /// Returns every unsettled delivery matching `owned` to the head of its queue.
  fn requeue_where(&mut self, owned: impl Fn(&Unsettled) -> bool) -> usize {
    let mut tags: Vec<u64> = self
      .unsettled
      .iter()
      .filter(|(_, u)| owned(u))
      .map(|(tag, _)| *tag)
      .collect();
    tags.sort_unstable_by(|a, b| b.cmp(a));
    for tag in &tags {
      if let Some(u) = self.unsettled.remove(tag) {
        let mut message = u.message;
        message.redelivered = true;
        if let Some(queue) = self.queues.get_mut(&u.queue) {
          queue.ready.push_front(message);
        }
      }
    }
    tags.len()
  }

  fn unsettled_for(&self, session: u64) -> usize {
    self.unsettled.values().filter(|u| u.session == session).count()
  }
}

struct Shared {
  state: Mutex<BrokerState>,
  changed: Notify,
}

impl Shared {
  fn release_session(&self, session: u64) {
    let requeued = self.state.lock().requeue_where(|u| u.session == session);
    if requeued > 0 {
      event!(Level::DEBUG, session, requeued, "Returned unsettled deliveries to their queues.");
    }
    self.changed.notify_waiters();
  }
}

/// Cloneable handle; every clone sees the same queues.
#[derive(Clone)]
pub struct MemoryBroker {
  shared: Arc<Shared>,
}

impl Default for MemoryBroker {
  fn default() -> Self {
    Self::new()
  }
}

impl MemoryBroker {
  pub fn new() -> Self {
    Self {
      shared: Arc::new(Shared {
        state: Mutex::new(BrokerState {
          reachable: true,
          refuse_next: 0,
          fail_publishes: false,
          epoch: 0,
          next_session: 1,
          next_tag: 1,
          connects: 0,
          dropped: 0,
          queues: HashMap::new(),
          unsettled: HashMap::new(),
        }),
        changed: Notify::new(),
      }),
    }
  }

  /// An unreachable broker also drops every open session.
  pub fn set_reachable(&self, reachable: bool) {
    let mut state = self.shared.state.lock();
    state.reachable = reachable;
    if !reachable {
      state.epoch += 1;
      state.requeue_where(|_| true);
    }
    drop(state);
    self.shared.changed.notify_waiters();
  }

  /// Fails the next `n` connection attempts.
  pub fn refuse_connections(&self, n: u32) {
    self.shared.state.lock().refuse_next = n;
  }

  pub fn set_fail_publishes(&self, fail: bool) {
    self.shared.state.lock().fail_publishes = fail;
  }

  /// Drops every open session as a broker restart would.
  pub fn disconnect_all(&self) {
    let mut state = self.shared.state.lock();
    state.epoch += 1;
    state.requeue_where(|_| true);
    drop(state);
    self.shared.changed.notify_waiters();
  }

  /// Enqueues raw bytes, declaring the queue durable if needed.
  pub fn publish_direct(&self, queue: &str, payload: impl Into<Vec<u8>>) {
    let mut state = self.shared.state.lock();
    let entry = state.queues.entry(queue.to_string()).or_insert_with(|| QueueState {
      durable: true,
      ..Default::default()
    });
    entry.ready.push_back(StoredMessage {
      payload: payload.into(),
      message_id: None,
      persistent: true,
      attempt: 1,
      redelivered: false,
    });
    drop(state);
    self.shared.changed.notify_waiters();
  }

  pub fn queue_exists(&self, queue: &str) -> bool {
    self.shared.state.lock().queues.contains_key(queue)
  }

  pub fn is_durable(&self, queue: &str) -> bool {
    self.shared.state.lock().queues.get(queue).map(|q| q.durable).unwrap_or(false)
  }

  /// Messages waiting to be delivered.
  pub fn queue_depth(&self, queue: &str) -> usize {
    self.shared.state.lock().queues.get(queue).map(|q| q.ready.len()).unwrap_or(0)
  }

  pub fn messages(&self, queue: &str) -> Vec<StoredMessage> {
    self
      .shared
      .state
      .lock()
      .queues
      .get(queue)
      .map(|q| q.ready.iter().cloned().collect())
      .unwrap_or_default()
  }

  pub fn unacked_count(&self, queue: &str) -> usize {
    self.shared.state.lock().unsettled.values().filter(|u| u.queue == queue).count()
  }

  pub fn acked(&self, queue: &str) -> Vec<StoredMessage> {
    self
      .shared
      .state
      .lock()
      .queues
      .get(queue)
      .map(|q| q.acked.clone())
      .unwrap_or_default()
  }

  /// Messages rejected without requeue.
  pub fn rejected(&self, queue: &str) -> Vec<StoredMessage> {
    self
      .shared
      .state
      .lock()
      .queues
      .get(queue)
      .map(|q| q.rejected.clone())
      .unwrap_or_default()
  }

  pub fn connect_count(&self) -> usize {
    self.shared.state.lock().connects
  }

  /// Publishes that hit an undeclared queue.
  pub fn dropped_count(&self) -> usize {
    self.shared.state.lock().dropped
  }
}

#[async_trait]
impl QueueConnector for MemoryBroker {
  async fn connect(&self) -> Result<Arc<dyn QueueSession>, BrokerError> {
    let mut state = self.shared.state.lock();
    state.connects += 1;
    if !state.reachable {
      return Err(BrokerError::Unreachable("memory broker is offline".into()));
    }
    if state.refuse_next > 0 {
      state.refuse_next -= 1;
      return Err(BrokerError::Unreachable("connection refused".into()));
    }
    let id = state.next_session;
    state.next_session += 1;
    let epoch = state.epoch;
    drop(state);

    Ok(Arc::new(MemorySession {
      id,
      epoch,
      shared: Arc::clone(&self.shared),
      local: Mutex::new(SessionLocal::default()),
    }))
  }

  fn describe(&self) -> String {
    "memory://".to_string()
  }
}

#[derive(Debug, Default)]
struct SessionLocal {
  closed: bool,
  prefetch: u16,
  consuming: Option<String>,
}

pub struct MemorySession {
  id: u64,
  epoch: u64,
  shared: Arc<Shared>,
  local: Mutex<SessionLocal>,
}

impl MemorySession {
  fn is_open(&self, state: &BrokerState) -> bool {
    !self.local.lock().closed && state.epoch == self.epoch
  }

  fn check_open(&self, state: &BrokerState) -> Result<(), BrokerError> {
    if self.is_open(state) {
      Ok(())
    } else {
      Err(BrokerError::Closed)
    }
  }

  fn settle(&self, tag: u64, outcome: impl FnOnce(&mut QueueState, StoredMessage)) -> Result<(), BrokerError> {
    let mut state = self.shared.state.lock();
    self.check_open(&state)?;
    match state.unsettled.get(&tag) {
      Some(u) if u.session == self.id => {}
      _ => return Err(BrokerError::Channel(format!("unknown delivery tag {tag}"))),
    }
    if let Some(u) = state.unsettled.remove(&tag) {
      if let Some(queue) = state.queues.get_mut(&u.queue) {
        outcome(queue, u.message);
      }
    }
    drop(state);
    self.shared.changed.notify_waiters();
    Ok(())
  }
}

#[async_trait]
impl QueueSession for MemorySession {
  async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), BrokerError> {
    let mut state = self.shared.state.lock();
    self.check_open(&state)?;
    match state.queues.get(&spec.name) {
      Some(existing) if existing.durable != spec.durable => Err(BrokerError::Channel(format!(
        "PRECONDITION_FAILED - inequivalent arg 'durable' for queue '{}'",
        spec.name
      ))),
      Some(_) => Ok(()),
      None => {
        state.queues.insert(
          spec.name.clone(),
          QueueState {
            durable: spec.durable,
            ..Default::default()
          },
        );
        Ok(())
      }
    }
  }

  async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError> {
    let state = self.shared.state.lock();
    self.check_open(&state)?;
    self.local.lock().prefetch = count;
    Ok(())
  }

  async fn publish(&self, queue: &str, message: &OutboundMessage) -> Result<(), BrokerError> {
    let mut state = self.shared.state.lock();
    self.check_open(&state)?;
    if state.fail_publishes {
      return Err(BrokerError::PublishRejected);
    }
    let stored = StoredMessage {
      payload: message.payload.clone(),
      message_id: Some(message.message_id.clone()),
      persistent: message.persistent,
      attempt: message.attempt,
      redelivered: false,
    };
    match state.queues.get_mut(queue) {
      Some(q) => q.ready.push_back(stored),
      None => {
        state.dropped += 1;
        event!(Level::WARN, queue, "Publish to undeclared queue dropped.");
      }
    }
    drop(state);
    self.shared.changed.notify_waiters();
    Ok(())
  }

  async fn start_consuming(&self, queue: &str, _consumer_tag: &str) -> Result<(), BrokerError> {
    let state = self.shared.state.lock();
    self.check_open(&state)?;
    if !state.queues.contains_key(queue) {
      return Err(BrokerError::Channel(format!("NOT_FOUND - no queue '{queue}'")));
    }
    self.local.lock().consuming = Some(queue.to_string());
    Ok(())
  }

  async fn next_delivery(&self) -> Result<Option<InboundDelivery>, BrokerError> {
    // Stands in for the network read so a busy consumer cannot starve other tasks.
    tokio::task::yield_now().await;
    loop {
      // Registered before the state check so no wakeup is lost in between.
      let changed = self.shared.changed.notified();
      {
        let mut state = self.shared.state.lock();
        if !self.is_open(&state) {
          return Ok(None);
        }
        let (queue_name, prefetch) = {
          let local = self.local.lock();
          (local.consuming.clone().ok_or(BrokerError::NotConsuming)?, local.prefetch)
        };
        let saturated = prefetch > 0 && state.unsettled_for(self.id) >= usize::from(prefetch);
        if !saturated {
          let next = state.queues.get_mut(&queue_name).and_then(|q| q.ready.pop_front());
          if let Some(message) = next {
            let tag = state.next_tag;
            state.next_tag += 1;
            let delivery = InboundDelivery {
              tag,
              payload: message.payload.clone(),
              message_id: message.message_id.clone(),
              redelivered: message.redelivered,
              attempt: message.attempt,
            };
            state.unsettled.insert(
              tag,
              Unsettled {
                session: self.id,
                queue: queue_name,
                message,
              },
            );
            return Ok(Some(delivery));
          }
        }
      }
      changed.await;
    }
  }

  async fn ack(&self, tag: u64) -> Result<(), BrokerError> {
    self.settle(tag, |queue, message| queue.acked.push(message))
  }

  async fn reject(&self, tag: u64, requeue: bool) -> Result<(), BrokerError> {
    self.settle(tag, |queue, mut message| {
      if requeue {
        message.redelivered = true;
        queue.ready.push_front(message);
      } else {
        queue.rejected.push(message);
      }
    })
  }

  async fn close(&self) -> Result<(), BrokerError> {
    let already_closed = std::mem::replace(&mut self.local.lock().closed, true);
    if !already_closed {
      self.shared.release_session(self.id);
    }
    Ok(())
  }
}

impl Drop for MemorySession {
  fn drop(&mut self) {
    if !self.local.get_mut().closed {
      self.shared.release_session(self.id);
    }
  }
}

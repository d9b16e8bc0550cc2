// tests/common/mod.rs
#![allow(dead_code)]

use ingest::broker::MemoryBroker;
use ingest::consumer::health::ConsumerState;
use ingest::retry::{ExponentialBackoff, FixedRetry};
use ingest::store::MemoryOrderStore;
use ingest::{BillingConsumer, ConsumerError, ConsumerSettings, ContextData, FailurePolicy, PipelineControl, PipelineError};
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Level;

pub const QUEUE: &str = "billing_queue";
pub const DEAD_LETTER_QUEUE: &str = "billing_queue.dead";

// --- Pipeline engine fixtures ---

#[derive(Clone, Debug, Default)]
pub struct TestContext {
  pub counter: i32,
  pub message: String,
  pub steps_executed: Vec<String>,
  pub should_stop_at: Option<String>,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TestError {
  #[error("Pipeline error: {0}")]
  Pipeline(String),

  #[error("Test handler failed: {0}")]
  Handler(String),
}

impl From<PipelineError> for TestError {
  fn from(err: PipelineError) -> Self {
    TestError::Pipeline(format!("{:?}", err))
  }
}

pub fn create_simple_handler(
  step_name: &'static str,
  message_to_append: &'static str,
) -> ingest::Handler<TestContext, TestError> {
  Box::new(move |ctx: ContextData<TestContext>| {
    Box::pin(async move {
      HANDLER_EXEC_COUNTER.fetch_add(1, Ordering::SeqCst);
      let mut guard = ctx.write();
      guard.counter += 1;
      guard.message.push_str(message_to_append);
      guard.steps_executed.push(step_name.to_string());
      if guard.should_stop_at.as_deref() == Some(step_name) {
        return Ok(PipelineControl::Stop);
      }
      Ok(PipelineControl::Continue)
    })
  })
}

pub fn create_failing_handler(
  step_name: &'static str,
  error_message: &'static str,
) -> ingest::Handler<TestContext, TestError> {
  Box::new(move |ctx: ContextData<TestContext>| {
    Box::pin(async move {
      ctx.write().steps_executed.push(step_name.to_string());
      Err(TestError::Handler(error_message.to_string()))
    })
  })
}

pub static HANDLER_EXEC_COUNTER: Lazy<AtomicUsize> = Lazy::new(|| AtomicUsize::new(0));

pub fn reset_counters() {
  HANDLER_EXEC_COUNTER.store(0, Ordering::SeqCst);
}

static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer()
    .try_init()
    .ok();
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}

// --- Broker / store fixtures ---

pub fn order_json(user_id: &str) -> String {
  format!(r#"{{"user_id":"{user_id}","number_of_items":"2","total_amount":"19.99"}}"#)
}

/// Millisecond-scale timings so failure paths finish quickly.
pub fn fast_settings(policy: FailurePolicy) -> ConsumerSettings {
  ConsumerSettings {
    store_init: FixedRetry::new(3, Duration::from_millis(1)),
    reconnect: ExponentialBackoff::fast(),
    requeue_backoff: ExponentialBackoff::fast(),
    store_timeout: Duration::from_millis(500),
    failure_policy: policy,
    ..ConsumerSettings::new(QUEUE)
  }
}

pub fn bounded(max_attempts: u32) -> FailurePolicy {
  FailurePolicy::bounded(max_attempts, DEAD_LETTER_QUEUE)
}

pub struct RunningConsumer {
  pub consumer: Arc<BillingConsumer>,
  pub shutdown: CancellationToken,
  pub handle: JoinHandle<Result<(), ConsumerError>>,
}

impl RunningConsumer {
  pub async fn stop(self) -> Result<(), ConsumerError> {
    self.shutdown.cancel();
    self.handle.await.expect("consumer task panicked")
  }

  pub fn state(&self) -> ConsumerState {
    self.consumer.health().state()
  }
}

pub fn spawn_consumer(consumer: BillingConsumer) -> RunningConsumer {
  let consumer = Arc::new(consumer);
  let shutdown = CancellationToken::new();
  let handle = {
    let consumer = Arc::clone(&consumer);
    let shutdown = shutdown.clone();
    tokio::spawn(async move { consumer.run(shutdown).await })
  };
  RunningConsumer {
    consumer,
    shutdown,
    handle,
  }
}

pub fn memory_consumer(broker: &MemoryBroker, store: &MemoryOrderStore, settings: ConsumerSettings) -> BillingConsumer {
  BillingConsumer::new(Arc::new(broker.clone()), Arc::new(store.clone()), settings)
}

/// Polls `cond` every few milliseconds, panicking after five seconds.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
  let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
  while !cond() {
    if tokio::time::Instant::now() > deadline {
      panic!("timed out waiting for {what}");
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
}

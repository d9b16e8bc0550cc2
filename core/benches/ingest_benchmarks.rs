use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ingest::broker::MemoryBroker;
use ingest::store::MemoryOrderStore;
use ingest::{
  BillingConsumer, ConsumerSettings, ContextData, OrderEvent, Pipeline, PipelineControl, PipelineError, QueueConnector,
  QueueSession, QueueSpec, SkipCondition,
};
use std::sync::Arc;
use tokio::runtime::Runtime;

const QUEUE: &str = "bench_queue";
const ORDER: &[u8] = br#"{"user_id":"u1","number_of_items":"2","total_amount":"19.99"}"#;

#[derive(Clone, Debug, Default)]
struct BenchContext {
  counter: u64,
}

fn create_sync_increment_handler(iterations: u64) -> ingest::Handler<BenchContext, PipelineError> {
  Box::new(move |ctx: ContextData<BenchContext>| {
    Box::pin(async move {
      let mut data = ctx.write();
      for _ in 0..iterations {
        data.counter = data.counter.wrapping_add(1);
      }
      Ok(PipelineControl::Continue)
    })
  })
}

fn bench_step_pipeline(c: &mut Criterion) {
  let mut group = c.benchmark_group("StepPipeline");
  let rt = Runtime::new().unwrap();

  for num_steps in [1usize, 3, 10] {
    let step_defs: Vec<(&str, bool, Option<SkipCondition<BenchContext>>)> = (0..num_steps)
      .map(|i| (Box::leak(format!("step_{i}").into_boxed_str()) as &'static str, false, None))
      .collect();
    let mut pipeline = Pipeline::<BenchContext, PipelineError>::new("bench", &step_defs);
    for i in 0..num_steps {
      pipeline.on_step(&format!("step_{i}"), create_sync_increment_handler(10));
    }
    let pipeline = Arc::new(pipeline);

    group.throughput(Throughput::Elements(num_steps as u64));
    group.bench_with_input(BenchmarkId::new("steps", num_steps), &num_steps, |b, _| {
      b.to_async(&rt).iter_batched(
        || ContextData::new(BenchContext::default()),
        |ctx| {
          let p = Arc::clone(&pipeline);
          async move { p.run(ctx).await.unwrap() }
        },
        criterion::BatchSize::SmallInput,
      );
    });
  }
  group.finish();
}

fn bench_order_decoding(c: &mut Criterion) {
  let mut group = c.benchmark_group("OrderDecoding");
  group.bench_function("valid_order", |b| {
    b.iter(|| criterion::black_box(OrderEvent::decode(ORDER).unwrap()))
  });
  group.bench_function("invalid_json", |b| {
    b.iter(|| criterion::black_box(OrderEvent::decode(b"not json").is_err()))
  });
  group.finish();
}

fn bench_delivery_handling(c: &mut Criterion) {
  let mut group = c.benchmark_group("DeliveryHandling");
  let rt = Runtime::new().unwrap();

  let broker = MemoryBroker::new();
  let store = MemoryOrderStore::new();
  let consumer = BillingConsumer::new(
    Arc::new(broker.clone()),
    Arc::new(store.clone()),
    ConsumerSettings::new(QUEUE),
  );
  let session = rt.block_on(async {
    consumer.initialize_store().await.unwrap();
    let session = broker.connect().await.unwrap();
    session.declare_queue(&QueueSpec::durable(QUEUE)).await.unwrap();
    session.set_prefetch(1).await.unwrap();
    session.start_consuming(QUEUE, "bench").await.unwrap();
    session
  });

  group.throughput(Throughput::Elements(1));
  group.bench_function("receive_persist_ack", |b| {
    b.to_async(&rt).iter(|| async {
      broker.publish_direct(QUEUE, ORDER);
      let delivery = session.next_delivery().await.unwrap().unwrap();
      criterion::black_box(consumer.handle_delivery(&session, delivery).await)
    });
  });
  group.finish();
}

fn bench_context_data_access(c: &mut Criterion) {
  let mut group = c.benchmark_group("ContextDataAccess");
  let ctx = ContextData::new(BenchContext::default());

  group.bench_function("with_projection", |b| {
    b.iter(|| criterion::black_box(ctx.with(|d| d.counter)))
  });
  group.bench_function("write_lock_and_modify", |b| {
    b.iter(|| {
      let mut guard = ctx.write();
      guard.counter += 1;
      criterion::black_box(guard.counter);
    })
  });
  group.finish();
}

criterion_group!(
  benches,
  bench_step_pipeline,
  bench_order_decoding,
  bench_delivery_handling,
  bench_context_data_access
);
criterion_main!(benches);

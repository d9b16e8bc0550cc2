// tests/pipeline_execution_tests.rs
mod common;

use common::*;
use ingest::{ContextData, Pipeline, PipelineControl, PipelineResult};
use serial_test::serial;
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[tokio::test]
#[serial]
async fn test_pipeline_runs_steps_in_order() {
  setup_tracing();
  let mut pipeline = Pipeline::<TestContext, TestError>::new(
    "ordered",
    &[("step1", false, None), ("step2", false, None), ("step3", false, None)],
  );

  pipeline.on_step("step1", create_simple_handler("step1", " S1"));
  pipeline.on_step("step2", create_simple_handler("step2", " S2"));
  pipeline.on_step("step3", create_simple_handler("step3", " S3"));

  let ctx = ContextData::new(TestContext::default());
  let result = pipeline.run(ctx.clone()).await;

  assert_eq!(result.unwrap(), PipelineResult::Completed);
  let guard = ctx.read();
  assert_eq!(guard.counter, 3);
  assert_eq!(guard.message, " S1 S2 S3");
  assert_eq!(guard.steps_executed, vec!["step1", "step2", "step3"]);
}

#[tokio::test]
#[serial]
async fn test_before_on_after_phases_run_in_that_order() {
  setup_tracing();
  let mut pipeline = Pipeline::<TestContext, TestError>::new("phases", &[("work", false, None)]);

  pipeline.after_step("work", create_simple_handler("after", "c"));
  pipeline.on_step("work", create_simple_handler("on", "b"));
  pipeline.before_step("work", create_simple_handler("before", "a"));

  let ctx = ContextData::new(TestContext::default());
  pipeline.run(ctx.clone()).await.unwrap();
  assert_eq!(ctx.read().message, "abc");
  assert_eq!(ctx.read().steps_executed, vec!["before", "on", "after"]);
}

#[tokio::test]
#[serial]
async fn test_pipeline_stops_on_pipeline_control_stop() {
  setup_tracing();
  reset_counters();
  let mut pipeline = Pipeline::<TestContext, TestError>::new(
    "stopping",
    &[("stepA", false, None), ("stopStep", false, None), ("stepC", false, None)],
  );

  pipeline.on_step("stepA", create_simple_handler("stepA", "A"));
  pipeline.on_step("stopStep", |ctx: ContextData<TestContext>| {
    Box::pin(async move {
      ctx.write().steps_executed.push("stopStep".to_string());
      Ok::<PipelineControl, TestError>(PipelineControl::Stop)
    })
  });
  pipeline.on_step("stepC", create_simple_handler("stepC", "C"));

  let ctx = ContextData::new(TestContext::default());
  let result = pipeline.run(ctx.clone()).await;

  assert_eq!(result.unwrap(), PipelineResult::Stopped);
  assert_eq!(HANDLER_EXEC_COUNTER.load(Ordering::SeqCst), 1);
  let guard = ctx.read();
  assert_eq!(guard.message, "A");
  assert_eq!(guard.steps_executed, vec!["stepA", "stopStep"]);
}

#[tokio::test]
#[serial]
async fn test_stop_requested_through_context_data() {
  setup_tracing();
  let mut pipeline =
    Pipeline::<TestContext, TestError>::new("ctx_stop", &[("first", false, None), ("second", false, None)]);
  pipeline.on_step("first", create_simple_handler("first", "1"));
  pipeline.on_step("second", create_simple_handler("second", "2"));

  let ctx = ContextData::new(TestContext {
    should_stop_at: Some("first".to_string()),
    ..Default::default()
  });
  assert_eq!(pipeline.run(ctx.clone()).await.unwrap(), PipelineResult::Stopped);
  assert_eq!(ctx.read().steps_executed, vec!["first"]);
}

#[tokio::test]
#[serial]
async fn test_pipeline_propagates_handler_error() {
  setup_tracing();
  let mut pipeline = Pipeline::<TestContext, TestError>::new(
    "failing",
    &[("good_step", false, None), ("bad_step", false, None), ("another_step", false, None)],
  );

  pipeline.on_step("good_step", create_simple_handler("good_step", "Good"));
  pipeline.on_step("bad_step", create_failing_handler("bad_step", "I am a bad step!"));
  pipeline.on_step("another_step", create_simple_handler("another_step", "NeverRun"));

  let ctx = ContextData::new(TestContext::default());
  let result = pipeline.run(ctx.clone()).await;

  assert_eq!(result.unwrap_err(), TestError::Handler("I am a bad step!".to_string()));
  let guard = ctx.read();
  assert_eq!(guard.message, "Good");
  assert_eq!(guard.steps_executed, vec!["good_step", "bad_step"]);
}

#[tokio::test]
#[serial]
async fn test_pipeline_skips_step_if_condition_met() {
  setup_tracing();
  let mut pipeline = Pipeline::<TestContext, TestError>::new(
    "skipping",
    &[
      ("step1", false, None),
      (
        "step_to_skip",
        false,
        Some(Arc::new(|ctx: ContextData<TestContext>| ctx.read().counter > 0)),
      ),
      ("step3", false, None),
    ],
  );

  pipeline.on_step("step1", create_simple_handler("step1", " S1"));
  pipeline.on_step("step_to_skip", create_simple_handler("step_to_skip", " SKIPPED_THIS"));
  pipeline.on_step("step3", create_simple_handler("step3", " S3"));

  let ctx = ContextData::new(TestContext::default());
  assert_eq!(pipeline.run(ctx.clone()).await.unwrap(), PipelineResult::Completed);
  let guard = ctx.read();
  assert_eq!(guard.message, " S1 S3");
  assert_eq!(guard.steps_executed, vec!["step1", "step3"]);
}

#[tokio::test]
#[serial]
async fn test_skip_condition_can_be_set_after_construction() {
  setup_tracing();
  let mut pipeline = Pipeline::<TestContext, TestError>::new("late_skip", &[("only", false, None)]);
  pipeline.on_step("only", create_simple_handler("only", "x"));
  pipeline.set_skip_condition("only", Some(Arc::new(|_ctx: ContextData<TestContext>| true)));

  let ctx = ContextData::new(TestContext::default());
  assert_eq!(pipeline.run(ctx.clone()).await.unwrap(), PipelineResult::Completed);
  assert!(ctx.read().steps_executed.is_empty());
}

#[tokio::test]
#[serial]
async fn test_non_optional_step_missing_handler_fails() {
  setup_tracing();
  let pipeline = Pipeline::<TestContext, TestError>::new("missing", &[("step_with_no_handler", false, None)]);

  let result = pipeline.run(ContextData::new(TestContext::default())).await;

  match result {
    Err(TestError::Pipeline(s)) => {
      assert!(s.contains("HandlerMissing"));
      assert!(s.contains("step_with_no_handler"));
    }
    other => panic!("Expected HandlerMissing, got {:?}", other),
  }
}

#[tokio::test]
#[serial]
async fn test_optional_step_missing_handler_succeeds() {
  setup_tracing();
  let mut pipeline = Pipeline::<TestContext, TestError>::new(
    "optional",
    &[("optional_step_no_handler", true, None), ("real_step", false, None)],
  );
  pipeline.on_step("real_step", create_simple_handler("real_step", "R"));

  let ctx = ContextData::new(TestContext::default());
  assert_eq!(pipeline.run(ctx.clone()).await.unwrap(), PipelineResult::Completed);
  assert_eq!(ctx.read().steps_executed, vec!["real_step"]);
}

#[test]
#[should_panic(expected = "step 'nope' not found")]
fn test_registering_handler_for_unknown_step_panics() {
  let mut pipeline = Pipeline::<TestContext, TestError>::new("wiring", &[("real", false, None)]);
  pipeline.on_step("nope", create_simple_handler("nope", ""));
}

#[test]
fn test_step_names_reflect_definition_order() {
  let pipeline = Pipeline::<TestContext, TestError>::new("names", &[("a", false, None), ("b", true, None)]);
  assert_eq!(pipeline.name(), "names");
  assert_eq!(pipeline.step_names(), vec!["a", "b"]);
}

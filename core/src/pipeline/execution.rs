// core/src/pipeline/execution.rs

//! `Pipeline::run()`: walks the steps in order and drives their handlers.

use crate::error::PipelineError;
use crate::pipeline::context::ContextData;
use crate::pipeline::control::{PipelineControl, PipelineResult};
use crate::pipeline::definition::{Phase, Pipeline, StepDef};
use tracing::{event, instrument, span, Instrument, Level};

impl<TData, Err> Pipeline<TData, Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + From<PipelineError> + Send + Sync + 'static,
{
  /// Executes the pipeline against `ctx_data`.
  ///
  /// Returns the first handler error unchanged. A non-optional step with no
  /// handlers at all fails with `PipelineError::HandlerMissing` converted into `Err`.
  #[instrument(
    name = "Pipeline::run",
    skip_all,
    fields(pipeline = %self.name, num_steps = self.steps.len()),
    err(Display)
  )]
  pub async fn run(&self, ctx_data: ContextData<TData>) -> Result<PipelineResult, Err> {
    event!(Level::DEBUG, "Pipeline execution starting.");

    for (step_idx, step_def) in self.steps.iter().enumerate() {
      let step_span = span!(
        Level::DEBUG,
        "pipeline_step",
        step_name = step_def.name.as_str(),
        step_index = step_idx,
        optional = step_def.optional
      );

      let control = self.run_step(step_def, ctx_data.clone()).instrument(step_span).await?;
      if control == PipelineControl::Stop {
        event!(Level::INFO, step_name = %step_def.name, "Pipeline stopped by a handler.");
        return Ok(PipelineResult::Stopped);
      }
    }

    event!(Level::DEBUG, "Pipeline execution completed.");
    Ok(PipelineResult::Completed)
  }

  async fn run_step(&self, step_def: &StepDef<TData>, ctx_data: ContextData<TData>) -> Result<PipelineControl, Err> {
    if let Some(skip_cond) = &step_def.skip_if {
      if skip_cond(ctx_data.clone()) {
        event!(Level::DEBUG, "Step skipped due to 'skip_if' condition.");
        return Ok(PipelineControl::Continue);
      }
    }

    let has_handlers = Phase::ORDER
      .iter()
      .any(|phase| !self.handlers_for(*phase, &step_def.name).is_empty());
    if !has_handlers {
      if step_def.optional {
        event!(Level::DEBUG, "Optional step has no handlers, skipping.");
        return Ok(PipelineControl::Continue);
      }
      event!(Level::ERROR, "Non-optional step has no handlers.");
      return Err(Err::from(PipelineError::HandlerMissing {
        step_name: step_def.name.clone(),
      }));
    }

    for phase in Phase::ORDER {
      for (handler_idx, handler_fn) in self.handlers_for(phase, &step_def.name).iter().enumerate() {
        match handler_fn(ctx_data.clone()).await {
          Ok(PipelineControl::Continue) => {}
          Ok(PipelineControl::Stop) => {
            event!(Level::DEBUG, phase = phase.as_str(), handler_idx, "Handler requested stop.");
            return Ok(PipelineControl::Stop);
          }
          Err(e) => {
            event!(Level::WARN, phase = phase.as_str(), handler_idx, error = %e, "Handler failed.");
            return Err(e);
          }
        }
      }
    }

    Ok(PipelineControl::Continue)
  }
}

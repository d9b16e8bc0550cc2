// core/src/registry.rs

//! A type-keyed registry of pipelines.
//!
//! Pipelines are stored by the `TypeId` of their context data, so a caller
//! only needs to build the right `ContextData<TData>` to dispatch to the
//! pipeline registered for it. The registry returns the application error
//! type `E`, which must absorb both the pipelines' handler errors and
//! `PipelineError` (e.g. nothing registered for a context type).

use crate::error::PipelineError;
use crate::pipeline::{ContextData, Pipeline, PipelineResult};

use async_trait::async_trait;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{event, instrument, Level};

#[async_trait]
trait ErasedPipeline<E>: Send + Sync
where
  E: std::error::Error + Send + Sync + 'static,
{
  fn name(&self) -> &str;

  /// `ctx_obj` must hold a `ContextData<TData>` for the wrapped pipeline.
  async fn run_erased(&self, ctx_obj: Box<dyn Any + Send>) -> Result<PipelineResult, E>;
}

struct Registered<TData, HandlerErr, E>
where
  TData: 'static + Send + Sync,
  HandlerErr: std::error::Error + From<PipelineError> + Send + Sync + 'static,
{
  pipeline: Arc<Pipeline<TData, HandlerErr>>,
  _app_err: PhantomData<fn() -> E>,
}

#[async_trait]
impl<TData, HandlerErr, E> ErasedPipeline<E> for Registered<TData, HandlerErr, E>
where
  TData: 'static + Send + Sync,
  HandlerErr: std::error::Error + From<PipelineError> + Send + Sync + 'static,
  E: std::error::Error + From<HandlerErr> + From<PipelineError> + Send + Sync + 'static,
{
  fn name(&self) -> &str {
    self.pipeline.name()
  }

  async fn run_erased(&self, ctx_obj: Box<dyn Any + Send>) -> Result<PipelineResult, E> {
    let typed_ctx = match ctx_obj.downcast::<ContextData<TData>>() {
      Ok(boxed) => *boxed,
      Err(_) => {
        let expected_type = std::any::type_name::<ContextData<TData>>().to_string();
        event!(Level::ERROR, %expected_type, "Context object type mismatch.");
        return Err(E::from(PipelineError::TypeMismatch { expected_type }));
      }
    };
    self.pipeline.run(typed_ctx).await.map_err(E::from)
  }
}

/// Registry of pipelines keyed by context data type. `E` is what `run` returns.
pub struct PipelineRegistry<E = PipelineError>
where
  E: std::error::Error + From<PipelineError> + Send + Sync + 'static,
{
  pipelines: RwLock<HashMap<TypeId, Arc<dyn ErasedPipeline<E>>>>,
}

impl<E> PipelineRegistry<E>
where
  E: std::error::Error + From<PipelineError> + Send + Sync + 'static,
{
  pub fn new() -> Self {
    Self {
      pipelines: RwLock::new(HashMap::new()),
    }
  }

  /// Registers `pipeline` for its context type, replacing any earlier one.
  pub fn register_pipeline<TData, HandlerErr>(&self, pipeline: Pipeline<TData, HandlerErr>)
  where
    TData: 'static + Send + Sync,
    HandlerErr: std::error::Error + From<PipelineError> + Send + Sync + 'static,
    E: From<HandlerErr>,
  {
    event!(
      Level::DEBUG,
      pipeline = pipeline.name(),
      tdata_type = %std::any::type_name::<TData>(),
      "Registering pipeline."
    );
    let entry = Registered::<TData, HandlerErr, E> {
      pipeline: Arc::new(pipeline),
      _app_err: PhantomData,
    };
    self.pipelines.write().insert(TypeId::of::<TData>(), Arc::new(entry));
  }

  pub fn contains<TData: 'static + Send + Sync>(&self) -> bool {
    self.pipelines.read().contains_key(&TypeId::of::<TData>())
  }

  pub fn len(&self) -> usize {
    self.pipelines.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Runs the pipeline registered for `TData`.
  #[instrument(name = "PipelineRegistry::run", skip_all, fields(tdata_type = %std::any::type_name::<TData>()))]
  pub async fn run<TData>(&self, ctx_data: ContextData<TData>) -> Result<PipelineResult, E>
  where
    TData: 'static + Send + Sync,
  {
    let entry = self
      .pipelines
      .read()
      .get(&TypeId::of::<TData>())
      .cloned()
      .ok_or_else(|| {
        let type_name = std::any::type_name::<TData>().to_string();
        event!(Level::ERROR, %type_name, "No pipeline registered for context type.");
        E::from(PipelineError::NotRegistered { type_name })
      })?;

    event!(Level::DEBUG, pipeline = entry.name(), "Dispatching to registered pipeline.");
    entry.run_erased(Box::new(ctx_data)).await
  }
}

impl<E> Default for PipelineRegistry<E>
where
  E: std::error::Error + From<PipelineError> + Send + Sync + 'static,
{
  fn default() -> Self {
    Self::new()
  }
}

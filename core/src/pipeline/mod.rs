// core/src/pipeline/mod.rs

//! Named-step pipelines over a shared, lockable context.
//!
//! A pipeline is an ordered list of steps. Each step may carry `before`, `on`
//! and `after` handlers; handlers run in that order, receive a clone of the
//! `ContextData` and decide with `PipelineControl` whether the run continues.

pub mod context;
pub mod control;
pub mod definition;
pub mod execution;
pub mod hooks;

pub use context::{ContextData, Handler};
pub use control::{PipelineControl, PipelineResult};
pub use definition::{Pipeline, SkipCondition, StepDef};

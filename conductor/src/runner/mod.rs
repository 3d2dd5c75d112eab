//! Runners turning a [`Pipeline`](crate::pipeline::Pipeline) into a stream
//! of outcomes.
//!
//! - [`run_sequential`]: one item at a time, outcomes in source order.
//! - [`run_concurrent`]: transforms dispatched to a
//!   [`WorkerPool`](crate::pool::WorkerPool), outcomes in completion order.
//!
//! Both runners share the failure rules in [`chain`]: a stage error or panic
//! finishes the item with an `error` outcome and never ends the run.

pub mod chain;
mod concurrent;
mod sequential;


pub use chain::{failure_item, invoke_sink, invoke_transform, FAILURE_KEY};
pub use concurrent::run_concurrent;
pub use sequential::{run_sequential, RunnerState};

use crate::core::Outcome;
use crate::errors::ConductorError;
use futures::stream::BoxStream;

/// Lazy stream of outcomes.
///
/// An `Err` element is fatal: it is always the last element of the stream.
pub type OutcomeStream = BoxStream<'static, Result<Outcome, ConductorError>>;

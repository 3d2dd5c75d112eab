//! Core data model for conductor pipelines.
//!
//! - [`Item`]: the envelope passed from stage to stage
//! - [`StageResult`]: tagged records appended by stages
//! - [`Outcome`]: the per-item record reported to callers

mod item;
mod outcome;
mod result;

pub use item::{Continuation, Item};
pub use outcome::{Outcome, OutcomeStatus};
pub use result::{ResultState, StageResult};

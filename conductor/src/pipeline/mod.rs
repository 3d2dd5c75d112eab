//! Pipeline specification and assembly.
//!
//! This module provides:
//! - JSON pipeline specifications ([`PipelineSpec`])
//! - Assembly of specifications into runnable [`Pipeline`]s through a
//!   [`StageRegistry`](crate::registry::StageRegistry)

mod assembly;
mod spec;

pub use assembly::{assemble, build_transforms, Pipeline};
pub use spec::{ElementSpec, PipelineSpec};

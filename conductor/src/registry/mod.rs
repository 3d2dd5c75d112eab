//! Explicit stage registry.
//!
//! Stages are looked up by kind and id in a [`StageRegistry`] populated at
//! process start. Each entry documents its parameters so arguments can be
//! validated before any item is processed and rendered for `--pipeline-help`.

mod arguments;
mod descriptor;
mod params;

pub use arguments::{parse_element_arguments, ElementArguments};
pub use descriptor::{
    SinkFactory, SourceFactory, StageArgs, StageDescriptor, StageKind, StageRegistry,
    TransformFactory,
};
pub use params::{ParamKind, ParamSpec};

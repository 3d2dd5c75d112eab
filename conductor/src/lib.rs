//! # Conductor
//!
//! A streaming pipeline engine: one source produces items, an ordered chain
//! of transforms enriches them and an optional sink consumes them. Every item
//! ends as exactly one [`Outcome`](core::Outcome) (`ok`, `error` or
//! `stopped`), and a failing item never stops the run.
//!
//! Transforms run:
//!
//! - **sequentially** on the calling task,
//! - **threaded** on tokio tasks bounded by a worker count, or
//! - **in worker processes** that rebuild the pipeline from its specification.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use conductor::prelude::*;
//!
//! let registry = StageRegistry::with_builtins();
//! let spec = PipelineSpec::load("pipeline.json")?;
//! let pipeline = assemble(&spec, &["provider.count=10"], &registry)?;
//!
//! let conductor = Conductor::new(ConductorConfig::new(Strategy::Threaded));
//! let report = conductor.collect(pipeline).await?;
//! println!("{} ok, {} failed", report.stats.ok, report.stats.error);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod conductor;
pub mod core;
pub mod errors;
pub mod observability;
pub mod pipeline;
pub mod pool;
pub mod registry;
pub mod runner;
pub mod stages;
pub mod testing;

pub use crate::conductor::{Conductor, ConductorConfig, RunReport, Strategy};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::conductor::{Conductor, ConductorConfig, RunReport, Strategy};
    pub use crate::core::{Continuation, Item, Outcome, OutcomeStatus, ResultState, StageResult};
    pub use crate::errors::{
        ConductorError, ConfigurationError, PoolError, SourceError, StageError, StageFailure,
    };
    pub use crate::observability::RunStats;
    pub use crate::pipeline::{assemble, ElementSpec, Pipeline, PipelineSpec};
    pub use crate::pool::WorkerCommand;
    pub use crate::registry::{ParamKind, ParamSpec, StageArgs, StageDescriptor, StageKind, StageRegistry};
    pub use crate::runner::OutcomeStream;
    pub use crate::stages::{FnSink, FnTransform, ItemStream, IterSource, Sink, Source, Transform};
}

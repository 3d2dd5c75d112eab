//! Worker substrate for the concurrent runner.
//!
//! A pool runs one transform invocation per submitted [`StageJob`] and
//! reports back through a [`JobHandle`]. Two implementations exist:
//!
//! - [`ThreadPool`]: tokio tasks in this process,
//! - [`ProcessPool`]: long-lived child processes speaking the line-delimited
//!   JSON [`protocol`].

pub mod protocol;
pub mod worker;

mod process;
mod thread;

pub use process::{ProcessPool, WorkerCommand};
pub use thread::ThreadPool;

use crate::core::Item;
use crate::errors::{PoolError, StageFailure};
use async_trait::async_trait;
use futures::future::BoxFuture;

/// One transform invocation for one item.
#[derive(Debug, Clone)]
pub struct StageJob {
    /// Submission order of the item.
    pub sequence: u64,
    /// Index of the transform to run.
    pub stage_index: usize,
    /// The item.
    pub item: Item,
}

impl StageJob {
    /// Creates a job.
    #[must_use]
    pub fn new(sequence: u64, stage_index: usize, item: Item) -> Self {
        Self {
            sequence,
            stage_index,
            item,
        }
    }
}

/// Why a job did not produce an item.
#[derive(Debug, Clone)]
pub enum JobError {
    /// The stage failed for this item only.
    Stage(StageFailure),
    /// The pool can no longer run jobs.
    Fatal(PoolError),
}

/// The result of a finished job.
#[derive(Debug, Clone)]
pub struct JobCompletion {
    /// Submission order of the item.
    pub sequence: u64,
    /// Index of the transform that ran.
    pub stage_index: usize,
    /// Path of the item as submitted.
    pub path: Option<String>,
    /// The transformed item or the error.
    pub result: Result<Item, JobError>,
}

/// Future resolving when a submitted job finishes.
///
/// The work runs whether or not the handle is polled.
pub type JobHandle = BoxFuture<'static, JobCompletion>;

/// Runs transform invocations on behalf of the concurrent runner.
#[async_trait]
pub trait WorkerPool: Send + Sync {
    /// Starts a job.
    fn submit(&self, job: StageJob) -> JobHandle;

    /// Upper bound on items with an outstanding job, if the pool needs one.
    fn max_in_flight(&self) -> Option<usize>;

    /// Number of workers.
    fn workers(&self) -> usize;

    /// Releases the workers. Jobs submitted afterwards fail with
    /// [`JobError::Fatal`].
    async fn shutdown(&self);
}

//! One item at a time, every stage on the calling task.

use super::chain::{after_stage, complete, invoke_transform, Step};
use super::OutcomeStream;
use crate::core::{Item, Outcome};
use crate::errors::{ConductorError, SourceError};
use crate::pipeline::Pipeline;
use crate::stages::{Sink, Transform};
use async_stream::stream;
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;
use tracing::{error, trace};

/// Lifecycle of the sequential runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// Waiting for the next item.
    Idle,
    /// An item is moving through the stages.
    Running,
    /// The last item completed every stage.
    ItemDone,
    /// The last item failed.
    ItemFailed,
    /// The last item was stopped early.
    ItemStopped,
    /// The source is exhausted.
    Drained,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Running => "RUNNING",
            Self::ItemDone => "ITEM_DONE",
            Self::ItemFailed => "ITEM_FAILED",
            Self::ItemStopped => "ITEM_STOPPED",
            Self::Drained => "DRAINED",
        };
        f.write_str(name)
    }
}

impl RunnerState {
    fn after(outcome: &Outcome) -> Self {
        if outcome.is_error() {
            Self::ItemFailed
        } else if outcome.is_stopped() {
            Self::ItemStopped
        } else {
            Self::ItemDone
        }
    }
}

/// Runs a pipeline without any concurrency.
///
/// Outcomes are yielded in source order.
#[must_use]
pub fn run_sequential(pipeline: Pipeline) -> OutcomeStream {
    let Pipeline {
        source,
        transforms,
        sink,
        ..
    } = pipeline;

    Box::pin(stream! {
        let mut items = source.produce();
        let mut sequence = 0_u64;
        trace!(state = %RunnerState::Idle, source = source.name(), "Sequential runner started");

        while let Some(next) = items.next().await {
            let item = match next {
                Ok(item) => item,
                Err(err) => {
                    error!(source = source.name(), error = %err, "Source failed");
                    yield Err(ConductorError::from(SourceError::new(source.name(), err.message)));
                    return;
                }
            };

            trace!(state = %RunnerState::Running, sequence, path = ?item.path, "Item received");

            let outcome = if item.is_stopped() || item.has_failure() {
                Outcome::classify(sequence, item, Some(source.name()))
            } else {
                process(sequence, item, &transforms, sink.as_deref()).await
            };

            trace!(state = %RunnerState::after(&outcome), sequence, "Item finished");
            sequence += 1;
            yield Ok(outcome);
        }

        trace!(state = %RunnerState::Drained, items = sequence, "Sequential runner finished");
    })
}

async fn process(
    sequence: u64,
    mut item: Item,
    transforms: &[Arc<dyn Transform>],
    sink: Option<&dyn Sink>,
) -> Outcome {
    for transform in transforms {
        let path = item.path.clone();
        let result = invoke_transform(transform.as_ref(), item).await;
        match after_stage(sequence, transform.name(), path, result) {
            Step::Advance(next) => item = next,
            Step::Finished(outcome) => return outcome,
        }
    }
    complete(sequence, item, sink).await
}

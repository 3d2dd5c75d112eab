//! Concurrent execution over a [`WorkerPool`].
//!
//! Every pool submission runs exactly one transform. The completion of stage
//! `i` for an item triggers the submission of stage `i + 1`, so the stages
//! of one item stay ordered while different items overlap freely.

use super::chain::{after_stage, complete, Step};
use super::OutcomeStream;
use crate::core::Outcome;
use crate::errors::{ConductorError, SourceError};
use crate::pipeline::Pipeline;
use crate::pool::{JobCompletion, JobError, JobHandle, StageJob, WorkerPool};
use crate::stages::{Sink, Transform};
use async_stream::stream;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, trace};

enum Drained {
    Resubmit(StageJob),
    Finished(Outcome),
    Fatal(ConductorError),
}

async fn drain(
    completion: JobCompletion,
    transforms: &[Arc<dyn Transform>],
    sink: Option<&dyn Sink>,
) -> Drained {
    let JobCompletion {
        sequence,
        stage_index,
        path,
        result,
    } = completion;
    let stage = transforms
        .get(stage_index)
        .map_or("", |transform| transform.name());

    let result = match result {
        Ok(item) => Ok(item),
        Err(JobError::Stage(failure)) => Err(failure),
        Err(JobError::Fatal(err)) => {
            error!(sequence, stage_index, error = %err, "Worker pool failed");
            return Drained::Fatal(err.into());
        }
    };

    match after_stage(sequence, stage, path, result) {
        Step::Finished(outcome) => Drained::Finished(outcome),
        Step::Advance(item) if stage_index + 1 < transforms.len() => {
            trace!(sequence, stage_index = stage_index + 1, "Submitting next stage");
            Drained::Resubmit(StageJob::new(sequence, stage_index + 1, item))
        }
        Step::Advance(item) => Drained::Finished(complete(sequence, item, sink).await),
    }
}

/// Runs a pipeline on `pool`, yielding outcomes in completion order.
///
/// At most `max_in_flight` items have an outstanding submission at any time
/// when a bound is given. The sink runs on the task polling the stream.
pub fn run_concurrent(
    pipeline: Pipeline,
    pool: Arc<dyn WorkerPool>,
    max_in_flight: Option<usize>,
) -> OutcomeStream {
    let Pipeline {
        source,
        transforms,
        sink,
        ..
    } = pipeline;
    let bound = max_in_flight.map(|bound| bound.max(1));

    Box::pin(stream! {
        let mut items = source.produce();
        let mut inflight: FuturesUnordered<JobHandle> = FuturesUnordered::new();
        let mut sequence = 0_u64;
        let mut exhausted = false;
        let mut ready_only = false;

        debug!(
            transforms = transforms.len(),
            workers = pool.workers(),
            max_in_flight = ?bound,
            "Concurrent runner started"
        );

        loop {
            let completion = if ready_only {
                // Collect whatever already finished without waiting.
                match inflight.next().now_or_never() {
                    Some(Some(completion)) => completion,
                    _ => {
                        ready_only = false;
                        continue;
                    }
                }
            } else if exhausted || bound.is_some_and(|bound| inflight.len() >= bound) {
                match inflight.next().await {
                    Some(completion) => completion,
                    None if exhausted => break,
                    None => continue,
                }
            } else {
                match items.next().await {
                    Some(Ok(item)) => {
                        let current = sequence;
                        sequence += 1;
                        if item.is_stopped() || item.has_failure() {
                            yield Ok(Outcome::classify(current, item, Some(source.name())));
                        } else if transforms.is_empty() {
                            yield Ok(complete(current, item, sink.as_deref()).await);
                        } else {
                            trace!(sequence = current, path = ?item.path, "Submitting item");
                            inflight.push(pool.submit(StageJob::new(current, 0, item)));
                        }
                        ready_only = true;
                        continue;
                    }
                    Some(Err(err)) => {
                        error!(source = source.name(), error = %err, "Source failed");
                        yield Err(ConductorError::from(SourceError::new(source.name(), err.message)));
                        pool.shutdown().await;
                        return;
                    }
                    None => {
                        debug!(items = sequence, pending = inflight.len(), "Source exhausted");
                        exhausted = true;
                        continue;
                    }
                }
            };

            match drain(completion, &transforms, sink.as_deref()).await {
                Drained::Resubmit(job) => inflight.push(pool.submit(job)),
                Drained::Finished(outcome) => yield Ok(outcome),
                Drained::Fatal(err) => {
                    yield Err(err);
                    pool.shutdown().await;
                    return;
                }
            }
        }

        pool.shutdown().await;
        debug!(items = sequence, "Concurrent runner finished");
    })
}

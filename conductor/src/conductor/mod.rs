//! The conductor: runs a pipeline with the configured strategy.

mod config;

pub use config::{ConductorConfig, Strategy, ENV_MAX_IN_FLIGHT, ENV_MAX_WORKERS, ENV_STRATEGY};

use crate::core::Outcome;
use crate::errors::{ConductorError, ConfigurationError};
use crate::observability::{RunStats, SpanTimer};
use crate::pipeline::Pipeline;
use crate::pool::{ProcessPool, ThreadPool, WorkerPool};
use crate::runner::{run_concurrent, run_sequential, OutcomeStream};
use async_stream::stream;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Id of the run, as logged.
    pub run_id: Uuid,
    /// Outcomes in the order they were yielded.
    pub outcomes: Vec<Outcome>,
    /// Outcome counts and duration.
    pub stats: RunStats,
}

/// Runs pipelines.
///
/// A pool is created for each run and shut down once the run drains.
///
/// # Example
///
/// ```no_run
/// use conductor::prelude::*;
/// use futures::StreamExt;
///
/// # async fn example(pipeline: Pipeline) -> Result<(), ConductorError> {
/// let conductor = Conductor::new(ConductorConfig::new(Strategy::Threaded));
/// let mut outcomes = conductor.run(pipeline).await?;
/// while let Some(outcome) = outcomes.next().await {
///     println!("{}", outcome?.to_json());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Conductor {
    config: ConductorConfig,
}

impl Conductor {
    /// Creates a conductor.
    #[must_use]
    pub fn new(config: ConductorConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }

    /// Starts a run and returns its outcomes as a lazy stream.
    ///
    /// For the process strategy the worker processes are started and
    /// initialised before this returns. Dropping the stream abandons the run.
    ///
    /// # Errors
    ///
    /// Returns a configuration error before any item is processed if the
    /// configuration does not fit the pipeline, or a pool error if the
    /// workers cannot be started.
    pub async fn run(&self, pipeline: Pipeline) -> Result<OutcomeStream, ConductorError> {
        self.start(pipeline, Uuid::new_v4()).await
    }

    async fn start(&self, pipeline: Pipeline, run_id: Uuid) -> Result<OutcomeStream, ConductorError> {
        self.config.validate()?;
        let strategy = self.config.strategy;
        let workers = self.config.workers();

        info!(
            %run_id,
            %strategy,
            workers,
            source = pipeline.source.name(),
            transforms = pipeline.stage_count(),
            sink = ?pipeline.sink.as_ref().map(|sink| sink.name()),
            "Starting pipeline run"
        );

        let outcomes = match strategy {
            Strategy::Sequential => run_sequential(pipeline),
            Strategy::Threaded => {
                let pool = ThreadPool::new(pipeline.transforms.clone(), workers);
                run_concurrent(pipeline, Arc::new(pool), self.config.max_in_flight)
            }
            Strategy::Process => {
                let definition = pipeline.definition.clone().ok_or_else(|| {
                    ConfigurationError::new(
                        "The process strategy needs a pipeline assembled from a specification",
                    )
                })?;
                let command = self.config.worker_command.clone().ok_or_else(|| {
                    ConfigurationError::new("The process strategy needs a worker command")
                })?;

                let pool: Arc<dyn WorkerPool> = if pipeline.transforms.is_empty() {
                    debug!(%run_id, "No transforms; skipping worker processes");
                    Arc::new(ThreadPool::new(Vec::new(), 1))
                } else {
                    Arc::new(ProcessPool::start(command, definition, workers).await?)
                };
                let bound = self.config.max_in_flight.or_else(|| pool.max_in_flight());
                run_concurrent(pipeline, pool, bound)
            }
        };

        Ok(instrument(outcomes, run_id))
    }

    /// Runs a pipeline to completion and collects every outcome.
    ///
    /// # Errors
    ///
    /// Returns the configuration error or the fatal error that ended the run.
    pub async fn collect(&self, pipeline: Pipeline) -> Result<RunReport, ConductorError> {
        let timer = SpanTimer::start("conduct.collect");
        let run_id = Uuid::new_v4();
        let mut outcomes_stream = self.start(pipeline, run_id).await?;

        let mut outcomes = Vec::new();
        let mut stats = RunStats::default();
        while let Some(outcome) = outcomes_stream.next().await {
            let outcome = outcome?;
            stats.record(&outcome);
            outcomes.push(outcome);
        }
        stats.duration_ms = timer.finish();

        Ok(RunReport {
            run_id,
            outcomes,
            stats,
        })
    }
}

fn instrument(outcomes: OutcomeStream, run_id: Uuid) -> OutcomeStream {
    Box::pin(stream! {
        let timer = SpanTimer::start("conduct.run");
        let mut stats = RunStats::default();
        let mut outcomes = outcomes;

        while let Some(next) = outcomes.next().await {
            match &next {
                Ok(outcome) => {
                    stats.record(outcome);
                    debug!(
                        %run_id,
                        sequence = outcome.sequence,
                        status = %outcome.status,
                        stage = ?outcome.stage,
                        path = ?outcome.path,
                        "Item finished"
                    );
                }
                Err(err) => error!(%run_id, error = %err, "Pipeline run aborted"),
            }
            yield next;
        }

        stats.duration_ms = timer.finish();
        info!(
            %run_id,
            ok = stats.ok,
            error = stats.error,
            stopped = stats.stopped,
            duration_ms = stats.duration_ms,
            "Pipeline run finished"
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ElementSpec, PipelineSpec};
    use crate::testing::{item_n, numbered_source, DoubleTransform};

    #[tokio::test]
    async fn test_collect_sequential() {
        let pipeline = Pipeline::new(numbered_source("numbers", 4)).transform(DoubleTransform::new("double"));
        let report = Conductor::default().collect(pipeline).await.unwrap();

        assert_eq!(report.outcomes.len(), 4);
        assert_eq!(report.stats.ok, 4);
        assert!(report.outcomes.iter().all(Outcome::is_ok));
    }

    #[tokio::test]
    async fn test_process_strategy_requires_definition() {
        let conductor = Conductor::new(
            ConductorConfig::new(Strategy::Process)
                .with_worker_command(crate::pool::WorkerCommand::new("conduct")),
        );
        let pipeline = Pipeline::new(numbered_source("numbers", 1)).transform(DoubleTransform::new("double"));

        let err = conductor.run(pipeline).await.err().unwrap();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_process_strategy_requires_worker_command() {
        let pipeline = Pipeline::new(numbered_source("numbers", 1))
            .with_definition(PipelineSpec::new(ElementSpec::new("numbers", "probe")));
        let err = Conductor::new(ConductorConfig::new(Strategy::Process))
            .run(pipeline)
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("worker command"));
    }

    #[tokio::test]
    async fn test_zero_workers_rejected() {
        let conductor = Conductor::new(ConductorConfig::new(Strategy::Threaded).with_max_workers(0));
        let err = conductor
            .run(Pipeline::new(numbered_source("numbers", 1)))
            .await
            .err()
            .unwrap();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_process_strategy_without_transforms_needs_no_workers() {
        let source = crate::stages::IterSource::new("single", vec![item_n(7)]);
        let pipeline = Pipeline::new(source)
            .with_definition(PipelineSpec::new(ElementSpec::new("single", "probe")));
        let conductor = Conductor::new(
            ConductorConfig::new(Strategy::Process)
                .with_worker_command(crate::pool::WorkerCommand::new("/no/such/worker")),
        );

        let report = conductor.collect(pipeline).await.unwrap();
        assert_eq!(report.stats.ok, 1);
        assert_eq!(report.outcomes[0].path.as_deref(), Some("item-7"));
    }
}

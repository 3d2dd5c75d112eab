use super::{JobCompletion, JobError, JobHandle, StageJob, WorkerPool};
use crate::errors::{PoolError, StageError, StageFailure};
use crate::runner::invoke_transform;
use crate::stages::Transform;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

/// Runs transforms as tokio tasks, at most `workers` at a time.
pub struct ThreadPool {
    transforms: Arc<[Arc<dyn Transform>]>,
    permits: Arc<Semaphore>,
    workers: usize,
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("transforms", &self.transforms.len())
            .field("workers", &self.workers)
            .field("available", &self.permits.available_permits())
            .finish()
    }
}

impl ThreadPool {
    /// Creates a pool running `transforms` with `workers` concurrent invocations.
    #[must_use]
    pub fn new(transforms: Vec<Arc<dyn Transform>>, workers: usize) -> Self {
        let workers = workers.max(1);
        debug!(workers, transforms = transforms.len(), "Thread pool created");
        Self {
            transforms: transforms.into(),
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }
}

#[async_trait]
impl WorkerPool for ThreadPool {
    fn submit(&self, job: StageJob) -> JobHandle {
        let StageJob {
            sequence,
            stage_index,
            item,
        } = job;
        let path = item.path.clone();
        let stage = self
            .transforms
            .get(stage_index)
            .map_or_else(|| format!("#{stage_index}"), |t| t.name().to_string());

        let transforms = Arc::clone(&self.transforms);
        let permits = Arc::clone(&self.permits);
        let task = tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| PoolError::new("thread pool is shut down"))?;
            let transform = transforms
                .get(stage_index)
                .ok_or_else(|| PoolError::new(format!("no transform at index {stage_index}")))?;
            Ok::<_, PoolError>(invoke_transform(transform.as_ref(), item).await)
        });

        Box::pin(async move {
            let result = match task.await {
                Ok(Ok(Ok(item))) => Ok(item),
                Ok(Ok(Err(failure))) => Err(JobError::Stage(failure)),
                Ok(Err(err)) => Err(JobError::Fatal(err)),
                Err(err) => Err(JobError::Stage(StageFailure::new(
                    stage,
                    StageError::new(format!("worker task failed: {err}")),
                ))),
            };
            JobCompletion {
                sequence,
                stage_index,
                path,
                result,
            }
        })
    }

    fn max_in_flight(&self) -> Option<usize> {
        None
    }

    fn workers(&self) -> usize {
        self.workers
    }

    async fn shutdown(&self) {
        self.permits.close();
        debug!(workers = self.workers, "Thread pool shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Item;
    use crate::errors::StageError;
    use crate::stages::FnTransform;

    fn pool() -> ThreadPool {
        let upper: Arc<dyn Transform> = Arc::new(FnTransform::new("upper", |item: Item| {
            let path = item.path.clone().unwrap_or_default().to_uppercase();
            Ok(item.with_path(path))
        }));
        let broken: Arc<dyn Transform> = Arc::new(FnTransform::new("broken", |_item: Item| {
            Err(StageError::new("always fails"))
        }));
        ThreadPool::new(vec![upper, broken], 2)
    }

    #[tokio::test]
    async fn test_submit_runs_stage() {
        let pool = pool();
        let completion = pool.submit(StageJob::new(3, 0, Item::new().with_path("abc"))).await;

        assert_eq!(completion.sequence, 3);
        assert_eq!(completion.path.as_deref(), Some("abc"));
        assert_eq!(completion.result.unwrap().path.as_deref(), Some("ABC"));
    }

    #[tokio::test]
    async fn test_stage_error_is_per_item() {
        let pool = pool();
        let completion = pool.submit(StageJob::new(0, 1, Item::new())).await;

        match completion.result {
            Err(JobError::Stage(failure)) => assert_eq!(failure.stage, "broken"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_fatal() {
        let pool = pool();
        pool.shutdown().await;

        let completion = pool.submit(StageJob::new(0, 0, Item::new())).await;
        assert!(matches!(completion.result, Err(JobError::Fatal(_))));
    }
}

//! Stage invocation and item finalization shared by all runners.

use crate::core::{Item, Outcome, StageResult};
use crate::errors::{StageError, StageFailure};
use crate::stages::{Sink, Transform};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tracing::warn;

/// Result key under which the engine records stage failures.
pub const FAILURE_KEY: &str = "conduct";

/// What to do with an item after a stage returned.
#[derive(Debug)]
pub(crate) enum Step {
    /// Hand the item to the next stage.
    Advance(Item),
    /// The item is done.
    Finished(Outcome),
}

/// Runs one transform, turning errors and panics into a [`StageFailure`].
pub async fn invoke_transform(transform: &dyn Transform, item: Item) -> Result<Item, StageFailure> {
    match AssertUnwindSafe(transform.apply(item)).catch_unwind().await {
        Ok(Ok(item)) => Ok(item),
        Ok(Err(error)) => Err(StageFailure::new(transform.name(), error)),
        Err(panic) => Err(StageFailure::new(transform.name(), panic_error(&*panic))),
    }
}

/// Runs the sink, turning errors and panics into a [`StageFailure`].
pub async fn invoke_sink(sink: &dyn Sink, item: Item) -> Result<Item, StageFailure> {
    match AssertUnwindSafe(sink.consume(item)).catch_unwind().await {
        Ok(Ok(item)) => Ok(item),
        Ok(Err(error)) => Err(StageFailure::new(sink.name(), error)),
        Err(panic) => Err(StageFailure::new(sink.name(), panic_error(&*panic))),
    }
}

fn panic_error(panic: &(dyn Any + Send)) -> StageError {
    let detail = panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    StageError::new(format!("stage panicked: {detail}"))
}

/// Builds the item reported for a failed stage.
///
/// The pre-failure item is used when the stage handed it back, otherwise a
/// minimal item carrying only `path`. Either way a failure result naming the
/// stage is appended under [`FAILURE_KEY`].
#[must_use]
pub fn failure_item(failure: StageFailure, path: Option<String>) -> Item {
    let StageFailure { stage, error } = failure;
    let StageError { message, cause, item } = error;

    let mut item = item.map_or_else(Item::new, |item| *item);
    if item.path.is_none() {
        item.path = path;
    }

    let mut result = StageResult::failure(message).with_stage(stage);
    if let Some(cause) = cause {
        result = result.with_cause(cause);
    }
    item.add_result(FAILURE_KEY, result);
    item
}

/// Decides how to continue after `stage` returned for item `sequence`.
pub(crate) fn after_stage(
    sequence: u64,
    stage: &str,
    path: Option<String>,
    result: Result<Item, StageFailure>,
) -> Step {
    match result {
        Ok(item) if item.has_failure() || item.is_stopped() => {
            Step::Finished(Outcome::classify(sequence, item, Some(stage)))
        }
        Ok(item) => Step::Advance(item),
        Err(failure) => {
            warn!(
                sequence,
                stage = %failure.stage,
                error = %failure.error,
                "Stage failed for item"
            );
            Step::Finished(Outcome::classify(sequence, failure_item(failure, path), Some(stage)))
        }
    }
}

/// Runs the sink, if any, on an item that passed every transform.
pub(crate) async fn complete(sequence: u64, item: Item, sink: Option<&dyn Sink>) -> Outcome {
    let Some(sink) = sink else {
        return Outcome::classify(sequence, item, None);
    };
    let path = item.path.clone();
    match after_stage(sequence, sink.name(), path, invoke_sink(sink, item).await) {
        Step::Advance(item) => Outcome::classify(sequence, item, Some(sink.name())),
        Step::Finished(outcome) => outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::OutcomeStatus;
    use crate::stages::{FnSink, FnTransform};
    use serde_json::json;

    #[tokio::test]
    async fn test_invoke_transform_catches_panic() {
        let stage = FnTransform::new("explode", |_item: Item| -> Result<Item, StageError> {
            panic!("kaboom")
        });

        let failure = invoke_transform(&stage, Item::new()).await.unwrap_err();
        assert_eq!(failure.stage, "explode");
        assert!(failure.error.message.contains("kaboom"));
    }

    #[test]
    fn test_failure_item_preserves_pre_failure_data() {
        let before = Item::new()
            .with_path("a")
            .with_result("metadata", StageResult::success(json!({"k": 1})));
        let failure = StageFailure::new(
            "adder",
            StageError::new("store locked").with_cause("EAGAIN").with_item(before),
        );

        let item = failure_item(failure, Some("ignored".into()));
        assert_eq!(item.path.as_deref(), Some("a"));
        assert_eq!(item.values("metadata"), vec![&json!({"k": 1})]);

        let recorded = item.last_result(FAILURE_KEY).unwrap();
        assert_eq!(recorded.stage.as_deref(), Some("adder"));
        assert_eq!(recorded.cause.as_deref(), Some("EAGAIN"));
    }

    #[test]
    fn test_failure_item_minimal() {
        let failure = StageFailure::new("extract", StageError::new("no such file"));
        let item = failure_item(failure, Some("x/y".into()));

        assert_eq!(item.path.as_deref(), Some("x/y"));
        assert_eq!(item.results.len(), 1);
        assert!(item.has_failure());
    }

    #[test]
    fn test_after_stage_decisions() {
        let advance = after_stage(0, "t", None, Ok(Item::new()));
        assert!(matches!(advance, Step::Advance(_)));

        let mut stopped = Item::new();
        stopped.stop();
        match after_stage(1, "t", None, Ok(stopped)) {
            Step::Finished(outcome) => assert_eq!(outcome.status, OutcomeStatus::Stopped),
            Step::Advance(_) => panic!("stopped item advanced"),
        }
    }

    #[tokio::test]
    async fn test_complete_with_failing_sink() {
        let sink = FnSink::new("writer", |_item: Item| Err(StageError::new("disk full")));
        let outcome = complete(4, Item::new().with_path("p"), Some(&sink)).await;

        assert!(outcome.is_error());
        assert_eq!(outcome.stage.as_deref(), Some("writer"));
        assert_eq!(outcome.path.as_deref(), Some("p"));
        assert_eq!(outcome.sequence, 4);
    }
}

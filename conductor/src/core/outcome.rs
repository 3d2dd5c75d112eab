//! Per-item outcome records yielded by the conductor.

use super::Item;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Final status of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// The item passed every stage.
    Ok,
    /// A stage failed for the item.
    Error,
    /// A stage stopped the item early.
    Stopped,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Error => write!(f, "error"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// The externally visible result for one item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    /// Final status.
    pub status: OutcomeStatus,

    /// Identifier echoed from the item.
    pub path: Option<String>,

    /// Position of the item in source order.
    pub sequence: u64,

    /// The stage that failed or stopped the item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    /// Message describing a failure or stop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// The item at the time it left the pipeline.
    pub item: Item,

    /// When the item was finalized.
    pub finished_at: DateTime<Utc>,
}

impl Outcome {
    /// Classifies a finished item.
    ///
    /// An item carrying a failure result is an error, even when it was also
    /// marked as stopped. `stage` names the last stage that touched the item.
    #[must_use]
    pub fn classify(sequence: u64, item: Item, stage: Option<&str>) -> Self {
        let (status, message) = if let Some(failure) = item.first_failure() {
            (OutcomeStatus::Error, failure.message.clone())
        } else if item.is_stopped() {
            let message = item
                .results
                .values()
                .flat_map(|list| list.iter())
                .rev()
                .find(|result| result.is_stop())
                .and_then(|result| result.message.clone());
            (OutcomeStatus::Stopped, message)
        } else {
            (OutcomeStatus::Ok, None)
        };

        let failing_stage = match status {
            OutcomeStatus::Ok => None,
            _ => item
                .first_failure()
                .and_then(|failure| failure.stage.clone())
                .or_else(|| stage.map(ToString::to_string)),
        };

        Self {
            status,
            path: item.path.clone(),
            sequence,
            stage: failing_stage,
            message,
            item,
            finished_at: Utc::now(),
        }
    }

    /// Returns true for an `ok` outcome.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == OutcomeStatus::Ok
    }

    /// Returns true for an `error` outcome.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status == OutcomeStatus::Error
    }

    /// Returns true for a `stopped` outcome.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.status == OutcomeStatus::Stopped
    }

    /// Renders the outcome as one JSON object.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageResult;
    use serde_json::json;

    #[test]
    fn test_classify_ok() {
        let item = Item::new().with_path("p").with_result("k", StageResult::success(json!(1)));
        let outcome = Outcome::classify(3, item, Some("last"));

        assert!(outcome.is_ok());
        assert_eq!(outcome.path.as_deref(), Some("p"));
        assert_eq!(outcome.sequence, 3);
        assert!(outcome.stage.is_none());
    }

    #[test]
    fn test_classify_failure_wins_over_stop() {
        let mut item = Item::new().with_result(
            "conduct",
            StageResult::failure("source gave up").with_stage("provider"),
        );
        item.stop();

        let outcome = Outcome::classify(0, item, None);
        assert!(outcome.is_error());
        assert_eq!(outcome.stage.as_deref(), Some("provider"));
        assert_eq!(outcome.message.as_deref(), Some("source gave up"));
    }

    #[test]
    fn test_classify_stopped() {
        let mut item = Item::new().with_result("filter", StageResult::stop("filtered out"));
        item.stop();

        let outcome = Outcome::classify(1, item, Some("filter"));
        assert!(outcome.is_stopped());
        assert_eq!(outcome.stage.as_deref(), Some("filter"));
        assert_eq!(outcome.message.as_deref(), Some("filtered out"));
    }

    #[test]
    fn test_to_json_shape() {
        let outcome = Outcome::classify(0, Item::new().with_path("x"), None);
        let json = outcome.to_json();

        assert_eq!(json["status"], json!("ok"));
        assert_eq!(json["path"], json!("x"));
        assert_eq!(json["sequence"], json!(0));
        assert!(json["item"].is_object());
        assert!(json.get("stage").is_none());
    }
}

//! Line-delimited JSON protocol between the process pool and its workers.
//!
//! Every message is one JSON object on one line. The parent opens with
//! [`WorkerRequest::Init`]; the worker answers [`WorkerReply::Ready`] or
//! [`WorkerReply::InitFailed`]. After that each [`WorkerRequest::Apply`] gets
//! exactly one [`WorkerReply::Applied`] or [`WorkerReply::Failed`].
//! [`WorkerRequest::Shutdown`] or end of input ends the worker.

use crate::core::Item;
use crate::errors::{StageError, StageFailure};
use crate::pipeline::PipelineSpec;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// An item as sent over the wire, scratch data included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireItem {
    /// The item.
    pub item: Item,
    /// The item's scratch data.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub scratch: HashMap<String, Value>,
}

impl From<Item> for WireItem {
    fn from(mut item: Item) -> Self {
        let scratch = std::mem::take(&mut item.scratch);
        Self { item, scratch }
    }
}

impl WireItem {
    /// Restores the item with its scratch data.
    #[must_use]
    pub fn into_item(self) -> Item {
        let Self { mut item, scratch } = self;
        item.scratch = scratch;
        item
    }
}

/// Parent to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    /// Build the transforms of a resolved pipeline.
    Init {
        /// The resolved pipeline.
        definition: PipelineSpec,
    },
    /// Run one transform on one item.
    Apply {
        /// Index of the transform.
        stage_index: usize,
        /// The item.
        item: WireItem,
    },
    /// Exit.
    Shutdown,
}

/// Worker to parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerReply {
    /// The transforms were built.
    Ready {
        /// Worker process id.
        pid: u32,
    },
    /// The transforms could not be built.
    InitFailed {
        /// What went wrong.
        message: String,
    },
    /// The transform returned an item.
    Applied {
        /// The transformed item.
        item: WireItem,
    },
    /// The transform failed.
    Failed {
        /// The stage name.
        stage: String,
        /// The error message.
        message: String,
        /// The rendered underlying error.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cause: Option<String>,
        /// The pre-failure item, if the stage handed it back.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item: Option<WireItem>,
    },
}

impl From<StageFailure> for WorkerReply {
    fn from(failure: StageFailure) -> Self {
        let StageFailure { stage, error } = failure;
        Self::Failed {
            stage,
            message: error.message,
            cause: error.cause,
            item: error.item.map(|item| WireItem::from(*item)),
        }
    }
}

/// Rebuilds the failure carried by a [`WorkerReply::Failed`].
#[must_use]
pub fn failure_from_reply(
    stage: String,
    message: String,
    cause: Option<String>,
    item: Option<WireItem>,
) -> StageFailure {
    let mut error = StageError::new(message);
    error.cause = cause;
    error.item = item.map(|item| Box::new(item.into_item()));
    StageFailure::new(stage, error)
}

/// Encodes a message as one line, newline included.
///
/// # Errors
///
/// Returns an error if the message cannot be serialized.
pub fn encode<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Decodes one line.
///
/// # Errors
///
/// Returns an error if the line is not a valid message.
pub fn decode<T: DeserializeOwned>(line: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(line.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageResult;
    use crate::pipeline::ElementSpec;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_wire_item_keeps_scratch() {
        let mut item = Item::new().with_path("a");
        item.set_scratch("offset", json!(12));

        let line = encode(&WorkerRequest::Apply {
            stage_index: 1,
            item: WireItem::from(item),
        })
        .unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let WorkerRequest::Apply { stage_index, item } = decode(&line).unwrap() else {
            panic!("wrong request type");
        };
        assert_eq!(stage_index, 1);
        assert_eq!(item.into_item().scratch("offset"), Some(&json!(12)));
    }

    #[test]
    fn test_message_shape() {
        let value = serde_json::to_value(WorkerRequest::Shutdown).unwrap();
        assert_eq!(value, json!({"type": "shutdown"}));

        let init = WorkerRequest::Init {
            definition: PipelineSpec::new(ElementSpec::new("provider", "probe")),
        };
        let value = serde_json::to_value(&init).unwrap();
        assert_eq!(value["type"], json!("init"));
        assert_eq!(value["definition"]["source"]["stage"], json!("probe"));
    }

    #[test]
    fn test_failed_reply_round_trips_failure() {
        let before = Item::new()
            .with_path("x")
            .with_result("meta", StageResult::success(json!(1)));
        let failure = StageFailure::new(
            "adder",
            StageError::new("locked").with_cause("EAGAIN").with_item(before.clone()),
        );

        let reply: WorkerReply = decode(&encode(&WorkerReply::from(failure)).unwrap()).unwrap();
        let WorkerReply::Failed {
            stage,
            message,
            cause,
            item,
        } = reply
        else {
            panic!("wrong reply type");
        };

        let failure = failure_from_reply(stage, message, cause, item);
        assert_eq!(failure.stage, "adder");
        assert_eq!(failure.error.cause.as_deref(), Some("EAGAIN"));
        assert_eq!(failure.error.item.map(|item| *item), Some(before));
    }
}

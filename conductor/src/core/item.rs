//! The unit of work flowing through a pipeline.

use super::StageResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Whether an item should continue through the remaining stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Continuation {
    /// Run the next stage.
    #[default]
    Continue,
    /// Finish this item early without treating it as an error.
    Stop,
}

/// An envelope carrying named stage results for one work unit.
///
/// Items are created by a source, moved through each transform in turn and
/// finally converted into an [`Outcome`](super::Outcome). Stages append to
/// the named result lists; the order within a list is insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Identifier echoed into the outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Continuation marker.
    #[serde(default)]
    pub continuation: Continuation,

    /// Named result lists.
    #[serde(default)]
    pub results: BTreeMap<String, Vec<StageResult>>,

    /// Free-form data that is not part of the serialized outcome.
    #[serde(skip)]
    pub scratch: HashMap<String, serde_json::Value>,
}

impl Item {
    /// Creates an empty item.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the identifying path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Appends a result under `key` and returns the item.
    #[must_use]
    pub fn with_result(mut self, key: impl Into<String>, result: StageResult) -> Self {
        self.add_result(key, result);
        self
    }

    /// Appends a result under `key`.
    pub fn add_result(&mut self, key: impl Into<String>, result: StageResult) {
        self.results.entry(key.into()).or_default().push(result);
    }

    /// Appends several results under `key`.
    pub fn add_results(&mut self, key: impl Into<String>, results: impl IntoIterator<Item = StageResult>) {
        self.results.entry(key.into()).or_default().extend(results);
    }

    /// Replaces the result list under `key`.
    pub fn set_results(&mut self, key: impl Into<String>, results: Vec<StageResult>) {
        self.results.insert(key.into(), results);
    }

    /// Returns the result list under `key`.
    #[must_use]
    pub fn results(&self, key: &str) -> Option<&[StageResult]> {
        self.results.get(key).map(Vec::as_slice)
    }

    /// Returns the most recently appended result under `key`.
    #[must_use]
    pub fn last_result(&self, key: &str) -> Option<&StageResult> {
        self.results.get(key).and_then(|list| list.last())
    }

    /// Returns the payloads stored under `key`, in insertion order.
    #[must_use]
    pub fn values(&self, key: &str) -> Vec<&serde_json::Value> {
        self.results(key)
            .unwrap_or_default()
            .iter()
            .filter_map(|result| result.value.as_ref())
            .collect()
    }

    /// Marks the item as stopped.
    pub fn stop(&mut self) {
        self.continuation = Continuation::Stop;
    }

    /// Returns true if the item was marked as stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.continuation == Continuation::Stop
    }

    /// Returns true if any result on the item is a failure.
    #[must_use]
    pub fn has_failure(&self) -> bool {
        self.first_failure().is_some()
    }

    /// Returns the first failure result, scanning keys in order.
    #[must_use]
    pub fn first_failure(&self) -> Option<&StageResult> {
        self.results
            .values()
            .flat_map(|list| list.iter())
            .find(|result| result.is_failure())
    }

    /// Returns a scratch value.
    #[must_use]
    pub fn scratch(&self, key: &str) -> Option<&serde_json::Value> {
        self.scratch.get(key)
    }

    /// Stores a scratch value.
    pub fn set_scratch(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.scratch.insert(key.into(), value);
    }

    /// Renders the item as it appears in an outcome (without scratch data).
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

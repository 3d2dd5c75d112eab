//! Stage result records stored on an item.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The state of a single stage result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResultState {
    /// The stage produced a usable result.
    Success,
    /// The stage failed for this item.
    Failure,
    /// The stage asked the pipeline to stop for this item.
    Stop,
}

impl fmt::Display for ResultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Stop => write!(f, "stop"),
        }
    }
}

/// A tagged record appended to an item by a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// The result state.
    pub state: ResultState,

    /// Human readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// The rendered underlying error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,

    /// The stage that wrote this entry, when recorded by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    /// Stage-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl StageResult {
    fn with_state(state: ResultState) -> Self {
        Self {
            state,
            message: None,
            cause: None,
            stage: None,
            value: None,
        }
    }

    /// Creates a successful result carrying a payload.
    #[must_use]
    pub fn success(value: serde_json::Value) -> Self {
        Self::with_state(ResultState::Success).with_value(value)
    }

    /// Creates a successful result without payload.
    #[must_use]
    pub fn success_empty() -> Self {
        Self::with_state(ResultState::Success)
    }

    /// Creates a failure result.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self::with_state(ResultState::Failure).with_message(message)
    }

    /// Creates a stop result.
    #[must_use]
    pub fn stop(message: impl Into<String>) -> Self {
        Self::with_state(ResultState::Stop).with_message(message)
    }

    /// Sets the message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Sets the cause.
    #[must_use]
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Sets the stage that produced the result.
    #[must_use]
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_value(mut self, value: serde_json::Value) -> Self {
        self.value = Some(value);
        self
    }

    /// Returns true for a success result.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.state == ResultState::Success
    }

    /// Returns true for a failure result.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.state == ResultState::Failure
    }

    /// Returns true for a stop result.
    #[must_use]
    pub fn is_stop(&self) -> bool {
        self.state == ResultState::Stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_state_serialize() {
        assert_eq!(serde_json::to_string(&ResultState::Failure).unwrap(), r#""FAILURE""#);
        let state: ResultState = serde_json::from_str(r#""STOP""#).unwrap();
        assert_eq!(state, ResultState::Stop);
    }

    #[test]
    fn test_failure_builder() {
        let result = StageResult::failure("boom")
            .with_cause("io: disk full")
            .with_stage("writer");

        assert!(result.is_failure());
        assert_eq!(result.message.as_deref(), Some("boom"));
        assert_eq!(result.stage.as_deref(), Some("writer"));
    }

    #[test]
    fn test_success_omits_empty_fields() {
        let json = serde_json::to_value(StageResult::success(json!(4))).unwrap();
        assert_eq!(json, json!({"state": "SUCCESS", "value": 4}));
    }
}

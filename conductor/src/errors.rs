//! Error types for the conductor engine.
//!
//! Errors fall into four groups:
//!
//! - configuration errors, raised before any item is processed,
//! - source errors, which abort the whole run,
//! - pool errors, raised when the worker substrate cannot keep running,
//! - per-item stage errors, which never abort a run and always end up
//!   as an `error` outcome for the affected item.

use crate::core::Item;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for conductor operations.
#[derive(Debug, Error)]
pub enum ConductorError {
    /// The pipeline could not be configured or assembled.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// The source stage failed; the run cannot continue.
    #[error("{0}")]
    Source(#[from] SourceError),

    /// The worker pool failed in a way that cannot be isolated to one item.
    #[error("{0}")]
    Pool(#[from] PoolError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ConductorError {
    /// Returns true if the error was raised while configuring the pipeline.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// Diagnostic metadata attached to configuration errors.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Error code (e.g., "CONDUCT-002-UNKNOWN_STAGE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ErrorInfo {
    /// Creates new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a pipeline cannot be configured.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ConfigurationError {
    /// The error message.
    pub message: String,
    /// The pipeline elements involved in the error.
    pub stages: Vec<String>,
    /// Optional diagnostic info.
    pub error_info: Option<ErrorInfo>,
}

impl ConfigurationError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the elements involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the diagnostic info.
    #[must_use]
    pub fn with_error_info(mut self, info: ErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }

    /// Two pipeline elements share a name.
    #[must_use]
    pub fn duplicate_name(name: &str) -> Self {
        Self::new(format!("Repeated pipeline element name: '{name}'"))
            .with_stages(vec![name.to_string()])
            .with_error_info(
                ErrorInfo::new("CONDUCT-001-DUPLICATE_NAME", "Element names must be unique")
                    .with_fix_hint("Give every source, transform and sink its own name."),
            )
    }

    /// An element name cannot be addressed by `<element>.<key>=<value>`.
    #[must_use]
    pub fn invalid_name(name: &str) -> Self {
        Self::new(format!("Invalid pipeline element name: '{name}'"))
            .with_stages(vec![name.to_string()])
            .with_error_info(
                ErrorInfo::new("CONDUCT-007-INVALID_NAME", "Element names cannot hold '.', '=' or whitespace")
                    .with_fix_hint("Rename the element, for example with '-' or '_' as separator."),
            )
    }

    /// The registry has no stage with the requested id.
    #[must_use]
    pub fn unknown_stage(element: &str, kind: &str, id: &str) -> Self {
        Self::new(format!("Element '{element}': no {kind} stage registered as '{id}'"))
            .with_stages(vec![element.to_string()])
            .with_error_info(
                ErrorInfo::new("CONDUCT-002-UNKNOWN_STAGE", format!("Unknown {kind} '{id}'"))
                    .with_context_entry("kind", kind)
                    .with_fix_hint("Check the stage id against the registered stages."),
            )
    }

    /// An element argument does not follow `<name>.<key>=<value>`.
    #[must_use]
    pub fn malformed_argument(argument: &str) -> Self {
        Self::new(format!("Badly formatted element argument: '{argument}'")).with_error_info(
            ErrorInfo::new("CONDUCT-003-MALFORMED_ARGUMENT", "Malformed element argument")
                .with_fix_hint("Use the form <name>.<key>=<value>."),
        )
    }

    /// An element argument names an element that is not in the pipeline.
    #[must_use]
    pub fn unknown_element(name: &str) -> Self {
        Self::new(format!("No pipeline element with name: '{name}'"))
            .with_stages(vec![name.to_string()])
            .with_error_info(ErrorInfo::new(
                "CONDUCT-004-UNKNOWN_ELEMENT",
                "Argument for an unknown element",
            ))
    }

    /// One or more element arguments are missing, unknown or invalid.
    #[must_use]
    pub fn invalid_arguments(messages: &[String], stages: Vec<String>) -> Self {
        Self::new(format!(
            "Pipeline element construction errors:\n{}",
            messages.join("\n")
        ))
        .with_stages(stages)
        .with_error_info(ErrorInfo::new(
            "CONDUCT-005-INVALID_ARGUMENTS",
            "Invalid element arguments",
        ))
    }

    /// The requested execution strategy does not exist.
    #[must_use]
    pub fn unsupported_strategy(strategy: &str) -> Self {
        Self::new(format!("Unsupported processing mode: {strategy}")).with_error_info(
            ErrorInfo::new("CONDUCT-006-UNSUPPORTED_STRATEGY", "Unsupported strategy")
                .with_fix_hint("Use one of: sequential, threaded, process."),
        )
    }
}

/// Error raised by a source stage. Always fatal to the run.
#[derive(Debug, Clone, Error)]
#[error("Source '{source_name}' failed: {message}")]
pub struct SourceError {
    /// The source element name.
    pub source_name: String,
    /// The error message.
    pub message: String,
}

impl SourceError {
    /// Creates a new source error.
    #[must_use]
    pub fn new(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}

/// Error raised when the worker pool cannot continue.
#[derive(Debug, Clone, Error)]
#[error("Worker pool error: {message}")]
pub struct PoolError {
    /// The error message.
    pub message: String,
}

impl PoolError {
    /// Creates a new pool error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error returned by a stage for a single item.
///
/// A stage may hand back the item it was working on so that its
/// pre-failure data ends up in the outcome.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StageError {
    /// The error message.
    pub message: String,
    /// The rendered underlying error, if any.
    pub cause: Option<String>,
    /// The item as it was when the stage failed.
    pub item: Option<Box<Item>>,
}

impl StageError {
    /// Creates a new stage error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
            item: None,
        }
    }

    /// Creates a stage error from any error value, keeping its source chain.
    #[must_use]
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        Self::new(err.to_string()).with_cause(render_chain(err))
    }

    /// Sets the cause.
    #[must_use]
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Attaches the pre-failure item.
    #[must_use]
    pub fn with_item(mut self, item: Item) -> Self {
        self.item = Some(Box::new(item));
        self
    }
}

impl From<std::io::Error> for StageError {
    fn from(err: std::io::Error) -> Self {
        Self::from_error(&err)
    }
}

impl From<serde_json::Error> for StageError {
    fn from(err: serde_json::Error) -> Self {
        Self::from_error(&err)
    }
}

/// A stage error together with the name of the stage that raised it.
#[derive(Debug, Clone, Error)]
#[error("Stage '{stage}' failed: {error}")]
pub struct StageFailure {
    /// The stage name.
    pub stage: String,
    /// The underlying error.
    pub error: StageError,
}

impl StageFailure {
    /// Creates a new stage failure.
    #[must_use]
    pub fn new(stage: impl Into<String>, error: StageError) -> Self {
        Self {
            stage: stage.into(),
            error,
        }
    }
}

/// Renders an error and its sources as `outer: inner: innermost`.
#[must_use]
pub fn render_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut current = err.source();
    while let Some(source) = current {
        rendered.push_str(": ");
        rendered.push_str(&source.to_string());
        current = source.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_info_creation() {
        let info = ErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("stage", "my_stage");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("stage"), Some(&"my_stage".to_string()));
    }

    #[test]
    fn test_configuration_error_codes() {
        assert_eq!(
            ConfigurationError::duplicate_name("a").code(),
            Some("CONDUCT-001-DUPLICATE_NAME")
        );
        assert_eq!(
            ConfigurationError::unknown_stage("x", "transform", "nope").code(),
            Some("CONDUCT-002-UNKNOWN_STAGE")
        );
        assert_eq!(
            ConfigurationError::invalid_name("a.b").code(),
            Some("CONDUCT-007-INVALID_NAME")
        );
        assert_eq!(
            ConfigurationError::unsupported_strategy("fibers").code(),
            Some("CONDUCT-006-UNSUPPORTED_STRATEGY")
        );
    }

    #[test]
    fn test_invalid_arguments_lists_all_messages() {
        let err = ConfigurationError::invalid_arguments(
            &["first problem".to_string(), "second problem".to_string()],
            vec!["a".to_string()],
        );
        let text = err.to_string();
        assert!(text.contains("first problem"));
        assert!(text.contains("second problem"));
    }

    #[test]
    fn test_conductor_error_from_configuration() {
        let err: ConductorError = ConfigurationError::new("bad").into();
        assert!(err.is_configuration());
        assert_eq!(err.to_string(), "bad");
    }

    #[test]
    fn test_render_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing file");
        let rendered = render_chain(&io);
        assert!(rendered.contains("missing file"));

        let stage_err = StageError::from(io);
        assert_eq!(stage_err.cause.as_deref(), Some("missing file"));
    }

    #[test]
    fn test_stage_failure_display() {
        let failure = StageFailure::new("extract", StageError::new("Connection timeout"));
        assert!(failure.to_string().contains("extract"));
        assert!(failure.to_string().contains("Connection timeout"));
    }
}

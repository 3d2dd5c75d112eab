//! Conductor configuration.

use crate::errors::ConfigurationError;
use crate::pool::WorkerCommand;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

/// Environment variable overriding the strategy.
pub const ENV_STRATEGY: &str = "CONDUCT_STRATEGY";
/// Environment variable overriding the worker count.
pub const ENV_MAX_WORKERS: &str = "CONDUCT_MAX_WORKERS";
/// Environment variable overriding the in-flight bound.
pub const ENV_MAX_IN_FLIGHT: &str = "CONDUCT_MAX_IN_FLIGHT";

/// How transforms are executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One item at a time on the calling task.
    #[default]
    Sequential,
    /// Tokio tasks in this process.
    #[serde(alias = "thread")]
    Threaded,
    /// Worker processes.
    Process,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Threaded => write!(f, "threaded"),
            Self::Process => write!(f, "process"),
        }
    }
}

impl FromStr for Strategy {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "threaded" | "thread" => Ok(Self::Threaded),
            "process" => Ok(Self::Process),
            _ => Err(ConfigurationError::unsupported_strategy(s)),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(4, NonZeroUsize::get)
}

/// Configuration of a [`Conductor`](super::Conductor).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConductorConfig {
    /// Execution strategy.
    #[serde(default)]
    pub strategy: Strategy,
    /// Number of workers; defaults to the available parallelism.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
    /// Maximum number of items with an outstanding job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_in_flight: Option<usize>,
    /// Command starting a worker process; required by the process strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_command: Option<WorkerCommand>,
}

impl ConductorConfig {
    /// Creates a configuration for `strategy`.
    #[must_use]
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    /// Sets the strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the worker count.
    #[must_use]
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers);
        self
    }

    /// Sets the in-flight bound.
    #[must_use]
    pub fn with_max_in_flight(mut self, bound: usize) -> Self {
        self.max_in_flight = Some(bound);
        self
    }

    /// Sets the worker process command.
    #[must_use]
    pub fn with_worker_command(mut self, command: WorkerCommand) -> Self {
        self.worker_command = Some(command);
        self
    }

    /// Applies `CONDUCT_STRATEGY`, `CONDUCT_MAX_WORKERS` and
    /// `CONDUCT_MAX_IN_FLIGHT` when set.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an invalid value.
    pub fn from_env(self) -> Result<Self, ConfigurationError> {
        self.overlay(|key| std::env::var(key).ok())
    }

    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigurationError> {
        if let Some(value) = lookup(ENV_STRATEGY) {
            self.strategy = value.parse()?;
        }
        if let Some(value) = lookup(ENV_MAX_WORKERS) {
            self.max_workers = Some(parse_count(ENV_MAX_WORKERS, &value)?);
        }
        if let Some(value) = lookup(ENV_MAX_IN_FLIGHT) {
            self.max_in_flight = Some(parse_count(ENV_MAX_IN_FLIGHT, &value)?);
        }
        Ok(self)
    }

    /// Returns the effective worker count.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.max_workers.unwrap_or_else(default_workers)
    }

    /// Checks the settings that do not depend on the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error for zero workers or a zero in-flight bound.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_workers == Some(0) {
            return Err(ConfigurationError::new("max_workers must be at least 1"));
        }
        if self.max_in_flight == Some(0) {
            return Err(ConfigurationError::new("max_in_flight must be at least 1"));
        }
        Ok(())
    }
}

fn parse_count(key: &str, value: &str) -> Result<usize, ConfigurationError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigurationError::new(format!("{key}: expected a positive integer, got '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("sequential".parse::<Strategy>().unwrap(), Strategy::Sequential);
        assert_eq!("thread".parse::<Strategy>().unwrap(), Strategy::Threaded);
        assert_eq!("Threaded".parse::<Strategy>().unwrap(), Strategy::Threaded);
        assert_eq!("process".parse::<Strategy>().unwrap(), Strategy::Process);

        let err = "fibers".parse::<Strategy>().unwrap_err();
        assert_eq!(err.code(), Some("CONDUCT-006-UNSUPPORTED_STRATEGY"));
        assert!(err.message.contains("fibers"));
    }

    #[test]
    fn test_config_from_json_defaults() {
        let config: ConductorConfig = serde_json::from_str(r#"{"strategy": "thread"}"#).unwrap();
        assert_eq!(config.strategy, Strategy::Threaded);
        assert_eq!(config.max_workers, None);
        assert!(config.worker_command.is_none());
    }

    #[test]
    fn test_overlay() {
        let env = HashMap::from([
            (ENV_STRATEGY, "process"),
            (ENV_MAX_WORKERS, "3"),
        ]);
        let config = ConductorConfig::default()
            .with_max_in_flight(8)
            .overlay(|key| env.get(key).map(ToString::to_string))
            .unwrap();

        assert_eq!(config.strategy, Strategy::Process);
        assert_eq!(config.workers(), 3);
        assert_eq!(config.max_in_flight, Some(8));
    }

    #[test]
    fn test_overlay_rejects_garbage() {
        let err = ConductorConfig::default()
            .overlay(|key| (key == ENV_MAX_WORKERS).then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.message.contains(ENV_MAX_WORKERS));
    }

    #[test]
    fn test_validate() {
        assert!(ConductorConfig::default().validate().is_ok());
        assert!(ConductorConfig::default().with_max_workers(0).validate().is_err());
        assert!(ConductorConfig::default().with_max_in_flight(0).validate().is_err());
    }
}

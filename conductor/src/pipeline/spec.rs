//! Pipeline specifications.

use crate::errors::{ConductorError, ConfigurationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use std::path::Path;

/// One named element of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementSpec {
    /// Unique element name, used as the prefix of command line arguments.
    pub name: String,
    /// Registry id of the stage implementation.
    pub stage: String,
    /// Construction arguments.
    #[serde(default)]
    pub arguments: BTreeMap<String, Value>,
}

impl ElementSpec {
    /// Creates an element without arguments.
    #[must_use]
    pub fn new(name: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stage: stage.into(),
            arguments: BTreeMap::new(),
        }
    }

    /// Adds an argument.
    #[must_use]
    pub fn with_argument(mut self, key: impl Into<String>, value: Value) -> Self {
        self.arguments.insert(key.into(), value);
        self
    }
}

/// A source, an ordered list of transforms and an optional sink.
///
/// The same structure describes a pipeline before assembly and, with every
/// argument evaluated and defaulted, the resolved pipeline handed to process
/// workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// The source element.
    pub source: ElementSpec,
    /// Transform elements in execution order.
    #[serde(default)]
    pub transforms: Vec<ElementSpec>,
    /// The sink element.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink: Option<ElementSpec>,
}

impl PipelineSpec {
    /// Creates a specification with only a source.
    #[must_use]
    pub fn new(source: ElementSpec) -> Self {
        Self {
            source,
            transforms: Vec::new(),
            sink: None,
        }
    }

    /// Appends a transform.
    #[must_use]
    pub fn with_transform(mut self, element: ElementSpec) -> Self {
        self.transforms.push(element);
        self
    }

    /// Sets the sink.
    #[must_use]
    pub fn with_sink(mut self, element: ElementSpec) -> Self {
        self.sink = Some(element);
        self
    }

    /// Parses a JSON specification.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the text is not a valid specification.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigurationError> {
        serde_json::from_str(text)
            .map_err(|err| ConfigurationError::new(format!("Invalid pipeline specification: {err}")))
    }

    /// Reads a JSON specification from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConductorError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(Self::from_json_str(&text)?)
    }

    /// Loads a specification from `-` (stdin), inline JSON or a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the specification cannot be read or parsed.
    pub fn load(location: &str) -> Result<Self, ConductorError> {
        if location == "-" {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            return Ok(Self::from_json_str(&text)?);
        }
        if location.trim_start().starts_with('{') {
            return Ok(Self::from_json_str(location)?);
        }
        Self::from_path(location)
    }

    /// Returns every element, source first and sink last.
    pub fn elements(&self) -> impl Iterator<Item = &ElementSpec> {
        std::iter::once(&self.source)
            .chain(self.transforms.iter())
            .chain(self.sink.iter())
    }

    /// Returns the element names in pipeline order.
    #[must_use]
    pub fn element_names(&self) -> Vec<String> {
        self.elements().map(|element| element.name.clone()).collect()
    }

    /// Checks that names are non-empty, unique and usable as the element
    /// part of a `<element>.<key>=<value>` argument.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending element.
    pub fn validate_names(&self) -> Result<(), ConfigurationError> {
        let mut seen = HashSet::new();
        for element in self.elements() {
            if element.name.trim().is_empty() {
                return Err(ConfigurationError::new(format!(
                    "Element with stage '{}' has an empty name",
                    element.stage
                )));
            }
            if element
                .name
                .chars()
                .any(|c| c == '.' || c == '=' || c.is_whitespace())
            {
                return Err(ConfigurationError::invalid_name(&element.name));
            }
            if !seen.insert(element.name.as_str()) {
                return Err(ConfigurationError::duplicate_name(&element.name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    const SPEC: &str = r#"{
        "source": {"name": "provider", "stage": "probe", "arguments": {"count": 2}},
        "transforms": [{"name": "proc", "stage": "probe"}]
    }"#;

    #[test]
    fn test_from_json_str() {
        let spec = PipelineSpec::from_json_str(SPEC).unwrap();
        assert_eq!(spec.source.arguments["count"], json!(2));
        assert_eq!(spec.transforms.len(), 1);
        assert!(spec.sink.is_none());
        assert_eq!(spec.element_names(), vec!["provider".to_string(), "proc".to_string()]);
    }

    #[test]
    fn test_invalid_json_is_configuration_error() {
        let err = PipelineSpec::from_json_str(r#"{"transforms": []}"#).unwrap_err();
        assert!(err.message.contains("Invalid pipeline specification"));
    }

    #[test]
    fn test_load_inline_and_file() {
        assert!(PipelineSpec::load(SPEC).is_ok());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SPEC.as_bytes()).unwrap();
        let spec = PipelineSpec::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(spec.source.name, "provider");

        assert!(matches!(
            PipelineSpec::load("/does/not/exist.json"),
            Err(ConductorError::Io(_))
        ));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let spec = PipelineSpec::new(ElementSpec::new("a", "probe"))
            .with_transform(ElementSpec::new("b", "probe"))
            .with_sink(ElementSpec::new("a", "append"));

        let err = spec.validate_names().unwrap_err();
        assert_eq!(err.code(), Some("CONDUCT-001-DUPLICATE_NAME"));
    }

    #[test]
    fn test_unaddressable_names_rejected() {
        for name in ["my.source", "a=b", "two words", "tab\tname"] {
            let spec = PipelineSpec::new(ElementSpec::new("provider", "probe"))
                .with_transform(ElementSpec::new(name, "probe"));

            let err = spec.validate_names().unwrap_err();
            assert_eq!(err.code(), Some("CONDUCT-007-INVALID_NAME"), "{name}");
            assert_eq!(err.stages, vec![name.to_string()]);
        }

        let spec = PipelineSpec::new(ElementSpec::new("provider-1", "probe"))
            .with_transform(ElementSpec::new("proc_2", "probe"));
        assert!(spec.validate_names().is_ok());
    }
}

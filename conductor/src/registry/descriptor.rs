//! Registry mapping stage ids to documented factories.

use super::ParamSpec;
use crate::errors::ConfigurationError;
use crate::stages::{Sink, Source, Transform};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// The role a stage plays in a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Produces items.
    Source,
    /// Processes items.
    Transform,
    /// Consumes final items.
    Sink,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Transform => write!(f, "transform"),
            Self::Sink => write!(f, "sink"),
        }
    }
}

/// Factory building a source from an element name and its arguments.
pub type SourceFactory =
    Arc<dyn Fn(&str, &StageArgs) -> Result<Arc<dyn Source>, ConfigurationError> + Send + Sync>;

/// Factory building a transform from an element name and its arguments.
pub type TransformFactory =
    Arc<dyn Fn(&str, &StageArgs) -> Result<Arc<dyn Transform>, ConfigurationError> + Send + Sync>;

/// Factory building a sink from an element name and its arguments.
pub type SinkFactory =
    Arc<dyn Fn(&str, &StageArgs) -> Result<Arc<dyn Sink>, ConfigurationError> + Send + Sync>;

#[derive(Clone)]
enum StageFactory {
    Source(SourceFactory),
    Transform(TransformFactory),
    Sink(SinkFactory),
}

/// A registered stage: documentation, parameters and factory.
#[derive(Clone)]
pub struct StageDescriptor {
    /// The id used in pipeline specifications.
    pub id: String,
    /// What the stage does.
    pub description: String,
    /// Accepted parameters.
    pub params: Vec<ParamSpec>,
    factory: StageFactory,
}

impl fmt::Debug for StageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDescriptor")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("params", &self.params.len())
            .finish()
    }
}

impl StageDescriptor {
    /// Describes a source.
    pub fn source<F>(
        id: impl Into<String>,
        description: impl Into<String>,
        params: Vec<ParamSpec>,
        factory: F,
    ) -> Self
    where
        F: Fn(&str, &StageArgs) -> Result<Arc<dyn Source>, ConfigurationError> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            description: description.into(),
            params,
            factory: StageFactory::Source(Arc::new(factory)),
        }
    }

    /// Describes a transform.
    pub fn transform<F>(
        id: impl Into<String>,
        description: impl Into<String>,
        params: Vec<ParamSpec>,
        factory: F,
    ) -> Self
    where
        F: Fn(&str, &StageArgs) -> Result<Arc<dyn Transform>, ConfigurationError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            id: id.into(),
            description: description.into(),
            params,
            factory: StageFactory::Transform(Arc::new(factory)),
        }
    }

    /// Describes a sink.
    pub fn sink<F>(
        id: impl Into<String>,
        description: impl Into<String>,
        params: Vec<ParamSpec>,
        factory: F,
    ) -> Self
    where
        F: Fn(&str, &StageArgs) -> Result<Arc<dyn Sink>, ConfigurationError> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            description: description.into(),
            params,
            factory: StageFactory::Sink(Arc::new(factory)),
        }
    }

    /// Returns the stage kind.
    #[must_use]
    pub fn kind(&self) -> StageKind {
        match self.factory {
            StageFactory::Source(_) => StageKind::Source,
            StageFactory::Transform(_) => StageKind::Transform,
            StageFactory::Sink(_) => StageKind::Sink,
        }
    }

    /// Looks up a parameter.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|param| param.key == key)
    }

    /// Validates element arguments and fills in defaults.
    ///
    /// `supplied` holds arguments from the pipeline specification, `raw`
    /// holds command line strings which take precedence. Every problem is
    /// reported, not just the first one.
    pub fn resolve_arguments(
        &self,
        element: &str,
        supplied: &BTreeMap<String, Value>,
        raw: &BTreeMap<String, String>,
    ) -> Result<StageArgs, Vec<String>> {
        let mut messages = Vec::new();
        let mut values = BTreeMap::new();

        for (key, value) in supplied {
            match self.param(key) {
                None => messages.push(format!("unknown key: '{element}.{key}'")),
                Some(param) => match param.check(value) {
                    Ok(value) => {
                        values.insert(key.clone(), value);
                    }
                    Err(reason) => messages.push(format!("{element}.{key}: {reason}")),
                },
            }
        }

        for (key, text) in raw {
            match self.param(key) {
                None => messages.push(format!("unknown key: '{element}.{key}'")),
                Some(param) => match param.evaluate(text) {
                    Ok(value) => {
                        values.insert(key.clone(), value);
                    }
                    Err(reason) => messages.push(format!("{element}.{key}: {reason}")),
                },
            }
        }

        for param in &self.params {
            if values.contains_key(&param.key) {
                continue;
            }
            if param.required {
                messages.push(format!("required key: '{element}.{}' missing", param.key));
            } else if let Some(default) = &param.default {
                values.insert(param.key.clone(), default.clone());
            }
        }

        if messages.is_empty() {
            Ok(StageArgs::new(element, values))
        } else {
            Err(messages)
        }
    }

    /// Builds a source.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor is not a source or the factory fails.
    pub fn build_source(&self, element: &str, args: &StageArgs) -> Result<Arc<dyn Source>, ConfigurationError> {
        match &self.factory {
            StageFactory::Source(factory) => factory(element, args),
            _ => Err(self.kind_mismatch(element, StageKind::Source)),
        }
    }

    /// Builds a transform.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor is not a transform or the factory fails.
    pub fn build_transform(
        &self,
        element: &str,
        args: &StageArgs,
    ) -> Result<Arc<dyn Transform>, ConfigurationError> {
        match &self.factory {
            StageFactory::Transform(factory) => factory(element, args),
            _ => Err(self.kind_mismatch(element, StageKind::Transform)),
        }
    }

    /// Builds a sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor is not a sink or the factory fails.
    pub fn build_sink(&self, element: &str, args: &StageArgs) -> Result<Arc<dyn Sink>, ConfigurationError> {
        match &self.factory {
            StageFactory::Sink(factory) => factory(element, args),
            _ => Err(self.kind_mismatch(element, StageKind::Sink)),
        }
    }

    fn kind_mismatch(&self, element: &str, wanted: StageKind) -> ConfigurationError {
        ConfigurationError::new(format!(
            "Element '{element}': stage '{}' is a {}, not a {wanted}",
            self.id,
            self.kind()
        ))
        .with_stages(vec![element.to_string()])
    }

    /// Renders the `--pipeline-help` block for element `name`.
    #[must_use]
    pub fn render_help(&self, name: &str) -> String {
        let rule = "=".repeat(name.len());
        let dots = ".".repeat(name.len());
        let entries = if self.params.is_empty() {
            "(no parameters)".to_string()
        } else {
            self.params
                .iter()
                .map(|param| param.render(name))
                .collect::<Vec<_>>()
                .join("\n\n")
        };
        format!(
            "== Element: {name} ({kind} '{id}') ==========================\n\
             {description}\n\
             .. Variables: {dots}............................\n\
             {entries}\n\
             =============={rule}============================\n",
            kind = self.kind(),
            id = self.id,
            description = self.description,
        )
    }
}

/// Evaluated constructor arguments for one element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageArgs {
    element: String,
    values: BTreeMap<String, Value>,
}

impl StageArgs {
    /// Creates an argument set.
    #[must_use]
    pub fn new(element: impl Into<String>, values: BTreeMap<String, Value>) -> Self {
        Self {
            element: element.into(),
            values,
        }
    }

    /// Returns the raw values.
    #[must_use]
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Returns a value if present and not null.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|value| !value.is_null())
    }

    fn missing(&self, key: &str) -> ConfigurationError {
        ConfigurationError::new(format!("required key: '{}.{key}' missing", self.element))
            .with_stages(vec![self.element.clone()])
    }

    fn mistyped(&self, key: &str, expected: &str) -> ConfigurationError {
        ConfigurationError::new(format!("{}.{key}: expected {expected}", self.element))
            .with_stages(vec![self.element.clone()])
    }

    /// Returns a required string.
    pub fn str(&self, key: &str) -> Result<&str, ConfigurationError> {
        self.opt_str(key)?.ok_or_else(|| self.missing(key))
    }

    /// Returns an optional string.
    pub fn opt_str(&self, key: &str) -> Result<Option<&str>, ConfigurationError> {
        self.get(key)
            .map(|value| value.as_str().ok_or_else(|| self.mistyped(key, "a string")))
            .transpose()
    }

    /// Returns a boolean, `default` when absent.
    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigurationError> {
        self.get(key).map_or(Ok(default), |value| {
            value.as_bool().ok_or_else(|| self.mistyped(key, "a boolean"))
        })
    }

    /// Returns a required non-negative integer.
    pub fn u64(&self, key: &str) -> Result<u64, ConfigurationError> {
        self.opt_u64(key)?.ok_or_else(|| self.missing(key))
    }

    /// Returns an optional non-negative integer.
    pub fn opt_u64(&self, key: &str) -> Result<Option<u64>, ConfigurationError> {
        self.get(key)
            .map(|value| {
                value
                    .as_u64()
                    .ok_or_else(|| self.mistyped(key, "a non-negative integer"))
            })
            .transpose()
    }

    /// Returns an optional number.
    pub fn opt_f64(&self, key: &str) -> Result<Option<f64>, ConfigurationError> {
        self.get(key)
            .map(|value| value.as_f64().ok_or_else(|| self.mistyped(key, "a number")))
            .transpose()
    }

    /// Returns an arbitrary JSON value.
    #[must_use]
    pub fn json(&self, key: &str) -> Option<Value> {
        self.get(key).cloned()
    }
}

/// Registry of available stages, keyed by kind and id.
#[derive(Default)]
pub struct StageRegistry {
    entries: RwLock<HashMap<(StageKind, String), StageDescriptor>>,
}

impl fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageRegistry")
            .field("stages", &self.entries.read().len())
            .finish()
    }
}

impl StageRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in stages.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        crate::stages::builtin::register_builtins(&registry);
        registry
    }

    /// Registers a stage, replacing any stage of the same kind and id.
    pub fn register(&self, descriptor: StageDescriptor) {
        let key = (descriptor.kind(), descriptor.id.clone());
        self.entries.write().insert(key, descriptor);
    }

    /// Returns a stage descriptor.
    #[must_use]
    pub fn get(&self, kind: StageKind, id: &str) -> Option<StageDescriptor> {
        self.entries.read().get(&(kind, id.to_string())).cloned()
    }

    /// Returns a stage descriptor or a configuration error naming `element`.
    ///
    /// # Errors
    ///
    /// Returns an error if no stage is registered under `id`.
    pub fn resolve(&self, kind: StageKind, id: &str, element: &str) -> Result<StageDescriptor, ConfigurationError> {
        self.get(kind, id)
            .ok_or_else(|| ConfigurationError::unknown_stage(element, &kind.to_string(), id))
    }

    /// Returns true if a stage is registered.
    #[must_use]
    pub fn contains(&self, kind: StageKind, id: &str) -> bool {
        self.entries.read().contains_key(&(kind, id.to_string()))
    }

    /// Lists the registered ids of a kind, sorted.
    #[must_use]
    pub fn ids(&self, kind: StageKind) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .read()
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, id)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ParamKind;
    use crate::stages::FnTransform;
    use serde_json::json;

    fn tagger() -> StageDescriptor {
        StageDescriptor::transform(
            "tagger",
            "Adds a tag.",
            vec![
                ParamSpec::required("tag", "The tag.", ParamKind::String),
                ParamSpec::optional("repeat", "Repetitions.", ParamKind::Integer).with_default(json!(1)),
            ],
            |name, args| {
                let _tag = args.str("tag")?.to_string();
                let stage: Arc<dyn Transform> = Arc::new(FnTransform::new(name, Ok));
                Ok(stage)
            },
        )
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = StageRegistry::new();
        registry.register(tagger());

        assert!(registry.contains(StageKind::Transform, "tagger"));
        assert!(!registry.contains(StageKind::Sink, "tagger"));
        assert_eq!(registry.ids(StageKind::Transform), vec!["tagger".to_string()]);

        let err = registry.resolve(StageKind::Source, "tagger", "src").unwrap_err();
        assert_eq!(err.code(), Some("CONDUCT-002-UNKNOWN_STAGE"));
    }

    #[test]
    fn test_resolve_arguments_applies_defaults_and_overrides() {
        let descriptor = tagger();
        let supplied = BTreeMap::from([("tag".to_string(), json!("spec"))]);
        let raw = BTreeMap::from([("tag".to_string(), "cli".to_string())]);

        let args = descriptor.resolve_arguments("t", &supplied, &raw).unwrap();
        assert_eq!(args.str("tag").unwrap(), "cli");
        assert_eq!(args.opt_u64("repeat").unwrap(), Some(1));
    }

    #[test]
    fn test_resolve_arguments_reports_every_problem() {
        let descriptor = tagger();
        let raw = BTreeMap::from([
            ("repeat".to_string(), "many".to_string()),
            ("colour".to_string(), "red".to_string()),
        ]);

        let messages = descriptor.resolve_arguments("t", &BTreeMap::new(), &raw).unwrap_err();
        assert_eq!(messages.len(), 3);
        assert!(messages.iter().any(|m| m.contains("unknown key: 't.colour'")));
        assert!(messages.iter().any(|m| m.contains("t.repeat")));
        assert!(messages.iter().any(|m| m.contains("required key: 't.tag' missing")));
    }

    #[test]
    fn test_build_checks_kind() {
        let descriptor = tagger();
        let args = StageArgs::new("t", BTreeMap::from([("tag".to_string(), json!("x"))]));

        assert!(descriptor.build_transform("t", &args).is_ok());
        assert!(descriptor.build_sink("t", &args).is_err());
    }

    #[test]
    fn test_stage_args_accessors() {
        let args = StageArgs::new(
            "probe",
            BTreeMap::from([
                ("count".to_string(), json!(3)),
                ("delay".to_string(), json!(0.5)),
                ("verbose".to_string(), json!(true)),
                ("content".to_string(), Value::Null),
            ]),
        );

        assert_eq!(args.u64("count").unwrap(), 3);
        assert_eq!(args.opt_f64("delay").unwrap(), Some(0.5));
        assert!(args.bool_or("verbose", false).unwrap());
        assert!(args.json("content").is_none());
        assert!(args.str("count").is_err());
        assert!(args.u64("missing").is_err());
    }

    #[test]
    fn test_render_help() {
        let text = tagger().render_help("proc");
        assert!(text.contains("== Element: proc (transform 'tagger')"));
        assert!(text.contains("proc.tag\n"));
        assert!(text.contains("proc.repeat (optional, default: 1)"));
    }
}

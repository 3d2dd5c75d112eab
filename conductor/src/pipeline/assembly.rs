//! Building runnable pipelines from specifications.

use super::{ElementSpec, PipelineSpec};
use crate::errors::ConfigurationError;
use crate::registry::{parse_element_arguments, StageArgs, StageDescriptor, StageKind, StageRegistry};
use crate::stages::{Sink, Source, Transform};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Stage instances ready to be run by a [`Conductor`](crate::Conductor).
#[derive(Clone)]
pub struct Pipeline {
    /// The source.
    pub source: Arc<dyn Source>,
    /// Transforms in execution order.
    pub transforms: Vec<Arc<dyn Transform>>,
    /// The optional sink.
    pub sink: Option<Arc<dyn Sink>>,
    /// The resolved specification, required for process workers.
    pub definition: Option<PipelineSpec>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("source", &self.source.name())
            .field(
                "transforms",
                &self.transforms.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .field("sink", &self.sink.as_ref().map(|s| s.name()))
            .field("definition", &self.definition.is_some())
            .finish()
    }
}

impl Pipeline {
    /// Starts a pipeline from a source.
    pub fn new(source: impl Source + 'static) -> Self {
        Self::from_source(Arc::new(source))
    }

    /// Starts a pipeline from a shared source.
    #[must_use]
    pub fn from_source(source: Arc<dyn Source>) -> Self {
        Self {
            source,
            transforms: Vec::new(),
            sink: None,
            definition: None,
        }
    }

    /// Appends a transform.
    #[must_use]
    pub fn transform(self, transform: impl Transform + 'static) -> Self {
        self.transform_arc(Arc::new(transform))
    }

    /// Appends a shared transform.
    #[must_use]
    pub fn transform_arc(mut self, transform: Arc<dyn Transform>) -> Self {
        self.transforms.push(transform);
        self
    }

    /// Sets the sink.
    #[must_use]
    pub fn sink(self, sink: impl Sink + 'static) -> Self {
        self.sink_arc(Arc::new(sink))
    }

    /// Sets a shared sink.
    #[must_use]
    pub fn sink_arc(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Attaches the resolved specification the stages were built from.
    #[must_use]
    pub fn with_definition(mut self, definition: PipelineSpec) -> Self {
        self.definition = Some(definition);
        self
    }

    /// Returns the number of transforms.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.transforms.len()
    }
}

struct Resolved {
    element: ElementSpec,
    descriptor: StageDescriptor,
    args: StageArgs,
}

/// Assembles a pipeline from a specification and `<element>.<key>=<value>`
/// arguments. Nothing is run; every configuration problem surfaces here.
///
/// # Errors
///
/// Returns a configuration error for duplicate names, malformed or unknown
/// arguments, unknown stage ids, invalid argument values and failing
/// factories. Argument problems of all elements are reported together.
pub fn assemble<S: AsRef<str>>(
    spec: &PipelineSpec,
    arguments: &[S],
    registry: &StageRegistry,
) -> Result<Pipeline, ConfigurationError> {
    spec.validate_names()?;
    let mut raw = parse_element_arguments(arguments, &spec.element_names())?;

    let kinds = std::iter::once(StageKind::Source)
        .chain(std::iter::repeat(StageKind::Transform).take(spec.transforms.len()))
        .chain(spec.sink.iter().map(|_| StageKind::Sink));

    let mut resolved = Vec::new();
    let mut messages = Vec::new();
    let mut failing = Vec::new();

    for (element, kind) in spec.elements().zip(kinds) {
        let descriptor = registry.resolve(kind, &element.stage, &element.name)?;
        let element_raw = raw.remove(&element.name).unwrap_or_default();

        match descriptor.resolve_arguments(&element.name, &element.arguments, &element_raw) {
            Ok(args) => resolved.push(Resolved {
                element: ElementSpec {
                    arguments: args.values().clone(),
                    ..element.clone()
                },
                descriptor,
                args,
            }),
            Err(mut element_messages) => {
                failing.push(element.name.clone());
                messages.append(&mut element_messages);
            }
        }
    }

    if !messages.is_empty() {
        return Err(ConfigurationError::invalid_arguments(&messages, failing));
    }

    build(resolved, spec.sink.is_some())
}

/// Rebuilds the transforms of an already resolved specification.
///
/// Used by process workers, which receive the resolved specification from
/// the parent process.
///
/// # Errors
///
/// Returns an error if a stage is not registered or cannot be built.
pub fn build_transforms(
    definition: &PipelineSpec,
    registry: &StageRegistry,
) -> Result<Vec<Arc<dyn Transform>>, ConfigurationError> {
    definition
        .transforms
        .iter()
        .map(|element| {
            let descriptor = registry.resolve(StageKind::Transform, &element.stage, &element.name)?;
            let args = descriptor
                .resolve_arguments(&element.name, &element.arguments, &BTreeMap::new())
                .map_err(|messages| {
                    ConfigurationError::invalid_arguments(&messages, vec![element.name.clone()])
                })?;
            descriptor.build_transform(&element.name, &args)
        })
        .collect()
}

fn build(resolved: Vec<Resolved>, has_sink: bool) -> Result<Pipeline, ConfigurationError> {
    let mut resolved = resolved.into_iter();
    let sink_entry = if has_sink { resolved.next_back() } else { None };
    let source_entry = resolved
        .next()
        .ok_or_else(|| ConfigurationError::new("Pipeline has no source"))?;

    let source = source_entry
        .descriptor
        .build_source(&source_entry.element.name, &source_entry.args)?;
    let mut definition = PipelineSpec::new(source_entry.element);
    let mut pipeline = Pipeline::from_source(source);

    for entry in resolved {
        let transform = entry.descriptor.build_transform(&entry.element.name, &entry.args)?;
        definition = definition.with_transform(entry.element);
        pipeline = pipeline.transform_arc(transform);
    }

    if let Some(entry) = sink_entry {
        let sink = entry.descriptor.build_sink(&entry.element.name, &entry.args)?;
        definition = definition.with_sink(entry.element);
        pipeline = pipeline.sink_arc(sink);
    }

    debug!(
        source = %definition.source.name,
        transforms = definition.transforms.len(),
        sink = definition.sink.is_some(),
        "Pipeline assembled"
    );

    Ok(pipeline.with_definition(definition))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn spec() -> PipelineSpec {
        PipelineSpec::new(ElementSpec::new("provider", "probe").with_argument("count", json!(2)))
            .with_transform(ElementSpec::new("proc", "probe"))
            .with_sink(ElementSpec::new("out", "append"))
    }

    #[test]
    fn test_assemble_builtin_pipeline() {
        let registry = StageRegistry::with_builtins();
        let pipeline = assemble(&spec(), &["out.file=/tmp/conduct-out.jsonl"], &registry).unwrap();

        assert_eq!(pipeline.source.name(), "provider");
        assert_eq!(pipeline.stage_count(), 1);
        assert_eq!(pipeline.sink.as_ref().unwrap().name(), "out");

        let definition = pipeline.definition.unwrap();
        assert_eq!(definition.transforms[0].arguments["count"], json!(1));
        assert_eq!(definition.sink.unwrap().arguments["file"], json!("/tmp/conduct-out.jsonl"));
    }

    #[test]
    fn test_cli_arguments_override_spec() {
        let registry = StageRegistry::with_builtins();
        let pipeline = assemble(
            &spec(),
            &["provider.count=5", "out.file=/tmp/x"],
            &registry,
        )
        .unwrap();

        let definition = pipeline.definition.unwrap();
        assert_eq!(definition.source.arguments["count"], json!(5));
    }

    #[test]
    fn test_unknown_stage_id() {
        let registry = StageRegistry::with_builtins();
        let spec = PipelineSpec::new(ElementSpec::new("provider", "nonexistent"));

        let err = assemble::<&str>(&spec, &[], &registry).unwrap_err();
        assert_eq!(err.code(), Some("CONDUCT-002-UNKNOWN_STAGE"));
    }

    #[test]
    fn test_all_argument_errors_reported() {
        let registry = StageRegistry::with_builtins();
        let err = assemble(&spec(), &["proc.count=lots", "proc.colour=red"], &registry).unwrap_err();

        assert_eq!(err.code(), Some("CONDUCT-005-INVALID_ARGUMENTS"));
        assert!(err.message.contains("proc.count"));
        assert!(err.message.contains("unknown key: 'proc.colour'"));
        assert!(err.message.contains("required key: 'out.file' missing"));
        assert_eq!(err.stages, vec!["proc".to_string(), "out".to_string()]);
    }

    #[test]
    fn test_huge_delay_is_configuration_error() {
        let registry = StageRegistry::with_builtins();
        let err = assemble(&spec(), &["provider.delay=1e20", "out.file=/tmp/x"], &registry).unwrap_err();

        assert_eq!(err.code(), Some("CONDUCT-005-INVALID_ARGUMENTS"));
        assert!(err.message.contains("provider.delay: 100000000000000000000 seconds is out of range"));
    }

    #[test]
    fn test_build_transforms_from_definition() {
        let registry = StageRegistry::with_builtins();
        let pipeline = assemble(&spec(), &["out.file=/tmp/x"], &registry).unwrap();

        let transforms = build_transforms(pipeline.definition.as_ref().unwrap(), &registry).unwrap();
        assert_eq!(transforms.len(), 1);
        assert_eq!(transforms[0].name(), "proc");
    }
}

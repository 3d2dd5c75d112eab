//! Built-in stages.
//!
//! | kind      | id       | purpose                                         |
//! |-----------|----------|-------------------------------------------------|
//! | source    | `probe`  | numbered synthetic items                        |
//! | source    | `lines`  | one item per non-empty line of a file or stdin  |
//! | transform | `probe`  | records which process handled an item           |
//! | transform | `filter` | stops items whose path matches a pattern        |
//! | sink      | `append` | appends item JSON to a file, one line per item  |
//!
//! The probe stages make scheduling observable: every record carries the
//! process id that produced it, so a run under the process strategy shows
//! which worker handled which item.

use super::{ItemStream, Sink, Source, Transform};
use crate::core::{Item, StageResult};
use crate::errors::{ConfigurationError, StageError};
use crate::registry::{ParamKind, ParamSpec, StageDescriptor, StageRegistry};
use async_stream::stream;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

/// Result key of the records written by the probe source.
pub const PROVIDER_RECORD: &str = "probe-provider-record";
/// Result key of the records written by the probe transform.
pub const PROCESSOR_RECORD: &str = "probe-processor-record";

/// Registers every built-in stage.
pub fn register_builtins(registry: &StageRegistry) {
    registry.register(StageDescriptor::source(
        "probe",
        "Produces `count` numbered items, optionally pausing between them.",
        vec![
            ParamSpec::required("count", "Number of items to produce.", ParamKind::Integer),
            ParamSpec::optional("delay", "Seconds to wait between items.", ParamKind::Float),
            ParamSpec::optional("content", "Value copied into every record.", ParamKind::Json),
        ],
        |name, args| {
            let stage: Arc<dyn Source> = Arc::new(ProbeSource {
                name: name.to_string(),
                count: args.u64("count")?,
                delay: seconds(name, "delay", args.opt_f64("delay")?)?,
                content: args.json("content").unwrap_or(Value::Null),
            });
            Ok(stage)
        },
    ));

    registry.register(StageDescriptor::source(
        "lines",
        "Produces one item per non-empty line; the trimmed line becomes the path.",
        vec![ParamSpec::required(
            "file",
            "File to read, or '-' for standard input.",
            ParamKind::String,
        )],
        |name, args| {
            let stage: Arc<dyn Source> = Arc::new(LinesSource {
                name: name.to_string(),
                file: args.str("file")?.to_string(),
            });
            Ok(stage)
        },
    ));

    registry.register(StageDescriptor::transform(
        "probe",
        "Appends records naming the process that handled the item.",
        vec![
            ParamSpec::optional("delay", "Seconds to sleep per item.", ParamKind::Float),
            ParamSpec::optional("jitter", "Random extra sleep, up to this many seconds.", ParamKind::Float),
            ParamSpec::optional("count", "Records to append per item.", ParamKind::Integer)
                .with_default(json!(1)),
        ],
        |name, args| {
            let stage: Arc<dyn Transform> = Arc::new(ProbeTransform {
                name: name.to_string(),
                delay: seconds(name, "delay", args.opt_f64("delay")?)?,
                jitter: seconds(name, "jitter", args.opt_f64("jitter")?)?,
                count: args.opt_u64("count")?.unwrap_or(1),
                invocations: AtomicU64::new(0),
            });
            Ok(stage)
        },
    ));

    registry.register(StageDescriptor::transform(
        "filter",
        "Stops items whose path matches a regular expression.",
        vec![
            ParamSpec::required("pattern", "Regular expression matched against the path.", ParamKind::String),
            ParamSpec::optional("invert", "Stop the items that do not match instead.", ParamKind::Bool)
                .with_default(json!(false)),
        ],
        |name, args| {
            let pattern = args.str("pattern")?;
            let regex = Regex::new(pattern).map_err(|err| {
                ConfigurationError::new(format!("{name}.pattern: invalid regular expression: {err}"))
                    .with_stages(vec![name.to_string()])
            })?;
            let stage: Arc<dyn Transform> = Arc::new(FilterTransform {
                name: name.to_string(),
                regex,
                invert: args.bool_or("invert", false)?,
            });
            Ok(stage)
        },
    ));

    registry.register(StageDescriptor::sink(
        "append",
        "Appends every item as one JSON line to a file.",
        vec![ParamSpec::required("file", "File to append to.", ParamKind::String)],
        |name, args| {
            let stage: Arc<dyn Sink> = Arc::new(AppendSink::new(name, args.str("file")?));
            Ok(stage)
        },
    ));
}

/// Converts a seconds argument; zero, negative and NaN mean "no pause".
fn seconds(element: &str, key: &str, value: Option<f64>) -> Result<Option<Duration>, ConfigurationError> {
    let Some(secs) = value.filter(|secs| *secs > 0.0) else {
        return Ok(None);
    };
    Duration::try_from_secs_f64(secs).map(Some).map_err(|_| {
        ConfigurationError::invalid_arguments(
            &[format!("{element}.{key}: {secs} seconds is out of range")],
            vec![element.to_string()],
        )
    })
}

/// Produces `count` items with paths `probe:0`, `probe:1`, ...
#[derive(Debug)]
pub struct ProbeSource {
    name: String,
    count: u64,
    delay: Option<Duration>,
    content: Value,
}

impl ProbeSource {
    /// Creates a probe source.
    #[must_use]
    pub fn new(name: impl Into<String>, count: u64) -> Self {
        Self {
            name: name.into(),
            count,
            delay: None,
            content: Value::Null,
        }
    }
}

impl Source for ProbeSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&self) -> ItemStream {
        let count = self.count;
        let delay = self.delay;
        let content = self.content.clone();
        let pid = std::process::id();

        Box::pin(stream! {
            for sequence_number in 0..count {
                if let Some(delay) = delay.filter(|_| sequence_number > 0) {
                    tokio::time::sleep(delay).await;
                }
                let record = json!({
                    "sequence_number": sequence_number,
                    "provider_pid": pid,
                    "content": content,
                });
                let item = Item::new()
                    .with_path(format!("probe:{sequence_number}"))
                    .with_result(PROVIDER_RECORD, StageResult::success(record));
                yield Ok::<Item, StageError>(item);
            }
        })
    }
}

/// Produces one item per non-empty line of a file, or of stdin for `-`.
#[derive(Debug)]
pub struct LinesSource {
    name: String,
    file: String,
}

impl LinesSource {
    /// Creates a lines source.
    #[must_use]
    pub fn new(name: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
        }
    }
}

fn line_items<R>(reader: R) -> ItemStream
where
    R: AsyncRead + Unpin + Send + 'static,
{
    Box::pin(stream! {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let path = line.trim();
                    if !path.is_empty() {
                        yield Ok(Item::new().with_path(path));
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    yield Err(StageError::from(err));
                    break;
                }
            }
        }
    })
}

impl Source for LinesSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&self) -> ItemStream {
        if self.file == "-" {
            return line_items(tokio::io::stdin());
        }

        let file = PathBuf::from(&self.file);
        Box::pin(stream! {
            match File::open(&file).await {
                Ok(handle) => {
                    let mut items = line_items(handle);
                    while let Some(item) = futures::StreamExt::next(&mut items).await {
                        yield item;
                    }
                }
                Err(err) => {
                    yield Err(StageError::new(format!("cannot open {}: {err}", file.display())));
                }
            }
        })
    }
}

/// Appends `probe-processor-record` entries to items from a probe source.
#[derive(Debug)]
pub struct ProbeTransform {
    name: String,
    delay: Option<Duration>,
    jitter: Option<Duration>,
    count: u64,
    invocations: AtomicU64,
}

impl ProbeTransform {
    /// Creates a probe transform appending one record per item.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delay: None,
            jitter: None,
            count: 1,
            invocations: AtomicU64::new(0),
        }
    }

    /// Sets the number of records appended per item.
    #[must_use]
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }

    fn pause(&self) -> Option<Duration> {
        let extra = self.jitter.map(|jitter| jitter.mul_f64(rand::random::<f64>()));
        match (self.delay, extra) {
            (Some(delay), Some(extra)) => Some(delay.saturating_add(extra)),
            (delay, extra) => delay.or(extra),
        }
    }
}

#[async_trait]
impl Transform for ProbeTransform {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, mut item: Item) -> Result<Item, StageError> {
        let invocation_count = self.invocations.fetch_add(1, Ordering::Relaxed) + 1;

        let Some(provider) = item.results(PROVIDER_RECORD).and_then(<[StageResult]>::first) else {
            return Ok(item);
        };
        let provider = provider.value.clone().unwrap_or(Value::Null);

        if let Some(pause) = self.pause() {
            tokio::time::sleep(pause).await;
        }

        let pid = std::process::id();
        let records = (0..self.count).map(|sub_sequence_number| {
            StageResult::success(json!({
                "processor_pid": pid,
                "invocation_count": invocation_count,
                "sequence_number": provider["sequence_number"],
                "content": provider["content"],
                "sub_sequence_number": sub_sequence_number,
            }))
        });
        item.add_results(PROCESSOR_RECORD, records);
        Ok(item)
    }
}

/// Stops items whose path matches a regular expression.
#[derive(Debug)]
pub struct FilterTransform {
    name: String,
    regex: Regex,
    invert: bool,
}

impl FilterTransform {
    /// Creates a filter.
    #[must_use]
    pub fn new(name: impl Into<String>, regex: Regex, invert: bool) -> Self {
        Self {
            name: name.into(),
            regex,
            invert,
        }
    }
}

#[async_trait]
impl Transform for FilterTransform {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, mut item: Item) -> Result<Item, StageError> {
        let path = item.path.as_deref().unwrap_or_default();
        if self.regex.is_match(path) != self.invert {
            let reason = if self.invert {
                format!("path does not match '{}'", self.regex.as_str())
            } else {
                format!("path matches '{}'", self.regex.as_str())
            };
            item.add_result("filter", StageResult::stop(reason).with_stage(self.name.as_str()));
            item.stop();
        }
        Ok(item)
    }
}

/// Appends each item as one JSON line to a file opened on first use.
#[derive(Debug)]
pub struct AppendSink {
    name: String,
    file: PathBuf,
    handle: Mutex<Option<File>>,
}

impl AppendSink {
    /// Creates an append sink.
    #[must_use]
    pub fn new(name: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
            handle: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Sink for AppendSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn consume(&self, mut item: Item) -> Result<Item, StageError> {
        let mut line = serde_json::to_string(&item.to_json())?;
        line.push('\n');

        {
            let mut handle = self.handle.lock().await;
            if handle.is_none() {
                let file = OpenOptions::new().create(true).append(true).open(&self.file).await?;
                *handle = Some(file);
            }
            if let Some(file) = handle.as_mut() {
                file.write_all(line.as_bytes()).await?;
                file.flush().await?;
            }
        }

        item.add_result(
            "append",
            StageResult::success(json!({ "file": self.file.display().to_string() })),
        );
        Ok(item)
    }
}

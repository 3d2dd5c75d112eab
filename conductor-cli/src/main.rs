//! `conduct`: runs an item pipeline described by a JSON specification.
//!
//! Outcomes are written to stdout as one JSON object per line; logs go to
//! stderr.

use std::io::Write;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use conductor::pool::worker;
use conductor::prelude::*;
use futures::StreamExt;
use tokio::io::BufReader;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "conduct",
    version,
    about = "Run an item pipeline described by a JSON specification"
)]
struct CliArgs {
    /// Pipeline specification: a file path, '-' for stdin, or inline JSON.
    #[arg(required_unless_present = "worker")]
    pipeline: Option<String>,

    /// Element arguments of the form <element>.<key>=<value>.
    arguments: Vec<String>,

    /// Execution strategy: sequential, threaded or process [default: process].
    #[arg(short, long)]
    strategy: Option<String>,

    /// Number of workers.
    #[arg(short = 'w', long)]
    max_workers: Option<usize>,

    /// Maximum number of items in flight.
    #[arg(long)]
    max_in_flight: Option<usize>,

    /// Describe the parameters of every pipeline element and exit.
    #[arg(long)]
    pipeline_help: bool,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Serve the worker protocol on stdin/stdout.
    #[arg(long, hide = true)]
    worker: bool,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    init_tracing(&args.log_level);

    let result = if args.worker {
        serve_worker().await
    } else {
        run(args).await
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn serve_worker() -> Result<()> {
    let registry = StageRegistry::with_builtins();
    worker::serve(&registry, BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await
        .context("worker failed")
}

fn config_from(args: &CliArgs) -> Result<ConductorConfig> {
    let mut config = ConductorConfig::new(Strategy::Process).from_env()?;
    if let Some(strategy) = &args.strategy {
        config.strategy = strategy.parse()?;
    }
    if let Some(workers) = args.max_workers {
        config.max_workers = Some(workers);
    }
    if let Some(bound) = args.max_in_flight {
        config.max_in_flight = Some(bound);
    }
    if config.strategy == Strategy::Process {
        let command = WorkerCommand::current_exe()
            .context("cannot locate the conduct executable for worker processes")?
            .arg(format!("--log-level={}", args.log_level));
        config.worker_command = Some(command);
    }
    Ok(config)
}

fn pipeline_help(spec: &PipelineSpec, registry: &StageRegistry) -> Result<String> {
    let kinds = std::iter::once(StageKind::Source)
        .chain(std::iter::repeat(StageKind::Transform).take(spec.transforms.len()))
        .chain(spec.sink.iter().map(|_| StageKind::Sink));

    let mut text = String::new();
    for (element, kind) in spec.elements().zip(kinds) {
        let descriptor = registry.resolve(kind, &element.stage, &element.name)?;
        text.push_str(&descriptor.render_help(&element.name));
        text.push('\n');
    }
    Ok(text)
}

async fn run(args: CliArgs) -> Result<()> {
    let location = args.pipeline.as_deref().context("no pipeline given")?;
    let registry = StageRegistry::with_builtins();
    let spec = PipelineSpec::load(location)
        .with_context(|| format!("cannot load pipeline '{location}'"))?;

    if args.pipeline_help {
        print!("{}", pipeline_help(&spec, &registry)?);
        return Ok(());
    }

    let pipeline = assemble(&spec, &args.arguments, &registry)?;
    let conductor = Conductor::new(config_from(&args)?);
    let mut outcomes = conductor.run(pipeline).await?;

    let mut stats = RunStats::default();
    while let Some(outcome) = outcomes.next().await {
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(error = %err, "Run aborted");
                return Err(err.into());
            }
        };
        stats.record(&outcome);

        let line = serde_json::to_string(&outcome)?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}")?;
        stdout.flush()?;
    }

    info!(
        ok = stats.ok,
        error = stats.error,
        stopped = stats.stopped,
        total = stats.total(),
        "Run complete"
    );
    Ok(())
}

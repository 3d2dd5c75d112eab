use super::protocol::{decode, encode, failure_from_reply, WireItem, WorkerReply, WorkerRequest};
use super::{JobCompletion, JobError, JobHandle, StageJob, WorkerPool};
use crate::core::Item;
use crate::errors::{PoolError, StageError, StageFailure};
use crate::pipeline::PipelineSpec;
use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How to start a worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCommand {
    /// The executable.
    pub program: PathBuf,
    /// Arguments passed to it.
    #[serde(default)]
    pub args: Vec<String>,
}

impl WorkerCommand {
    /// Creates a command without arguments.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Runs the current executable with `--worker`.
    ///
    /// # Errors
    ///
    /// Returns an error if the current executable cannot be determined.
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?).arg("--worker"))
    }
}

struct WorkerProcess {
    id: usize,
    pid: u32,
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl WorkerProcess {
    async fn spawn(id: usize, command: &WorkerCommand, definition: &PipelineSpec) -> Result<Self, PoolError> {
        let spawn_error = |err: &dyn std::fmt::Display| {
            PoolError::new(format!(
                "cannot start worker {id} ({}): {err}",
                command.program.display()
            ))
        };

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| spawn_error(&err))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error(&"stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error(&"stdout not captured"))?;

        let mut worker = Self {
            id,
            pid: child.id().unwrap_or_default(),
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        };

        let init = WorkerRequest::Init {
            definition: definition.clone(),
        };
        worker.send(&init).await.map_err(|err| spawn_error(&err))?;
        match worker.receive().await.map_err(|err| spawn_error(&err))? {
            WorkerReply::Ready { pid } => {
                worker.pid = pid;
                debug!(worker = id, pid, "Worker process ready");
                Ok(worker)
            }
            WorkerReply::InitFailed { message } => Err(PoolError::new(format!(
                "worker {id} failed to initialise: {message}"
            ))),
            other => Err(spawn_error(&format!("unexpected reply {other:?}"))),
        }
    }

    async fn send(&mut self, request: &WorkerRequest) -> io::Result<()> {
        let line = encode(request).map_err(io::Error::from)?;
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await
    }

    async fn receive(&mut self) -> io::Result<WorkerReply> {
        match self.stdout.next_line().await? {
            Some(line) => decode(&line).map_err(io::Error::from),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "worker closed its output",
            )),
        }
    }

    async fn apply(&mut self, stage_index: usize, item: Item) -> io::Result<WorkerReply> {
        self.send(&WorkerRequest::Apply {
            stage_index,
            item: WireItem::from(item),
        })
        .await?;
        self.receive().await
    }

    async fn stop(mut self) {
        if self.send(&WorkerRequest::Shutdown).await.is_ok()
            && tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await.is_ok()
        {
            return;
        }
        warn!(worker = self.id, pid = self.pid, "Killing worker process");
        if let Err(err) = self.child.kill().await {
            debug!(worker = self.id, error = %err, "Worker process already gone");
        }
    }
}

struct Shared {
    command: WorkerCommand,
    definition: PipelineSpec,
    stage_names: Vec<String>,
    idle_tx: mpsc::UnboundedSender<WorkerProcess>,
    idle_rx: Mutex<mpsc::UnboundedReceiver<WorkerProcess>>,
    closed: watch::Sender<bool>,
    next_id: AtomicUsize,
}

impl Shared {
    fn stage_name(&self, stage_index: usize) -> String {
        self.stage_names
            .get(stage_index)
            .cloned()
            .unwrap_or_else(|| format!("#{stage_index}"))
    }

    /// Waits for an idle worker; fails once the pool is closed.
    async fn checkout(&self) -> Result<WorkerProcess, PoolError> {
        let mut closed = self.closed.subscribe();
        let mut idle = self.idle_rx.lock().await;
        tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => Err(PoolError::new("process pool is closed")),
            worker = idle.recv() => worker.ok_or_else(|| PoolError::new("process pool is closed")),
        }
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }

    fn checkin(&self, worker: WorkerProcess) {
        // Fails only after shutdown; dropping the worker kills it.
        let _ = self.idle_tx.send(worker);
    }

    async fn replace(&self, dead: WorkerProcess) -> Result<(), PoolError> {
        let dead_id = dead.id;
        dead.stop().await;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let worker = match WorkerProcess::spawn(id, &self.command, &self.definition).await {
            Ok(worker) => worker,
            Err(err) => {
                error!(replaced = dead_id, error = %err, "Cannot replace worker process");
                self.close();
                return Err(err);
            }
        };
        info!(replaced = dead_id, worker = id, pid = worker.pid, "Worker process replaced");
        self.checkin(worker);
        Ok(())
    }

    async fn run(&self, sequence: u64, stage_index: usize, item: Item) -> Result<Item, JobError> {
        let mut worker = self.checkout().await.map_err(JobError::Fatal)?;
        let stage = self.stage_name(stage_index);
        debug!(sequence, stage_index, stage = %stage, worker = worker.id, "Dispatching job");

        match worker.apply(stage_index, item).await {
            Ok(WorkerReply::Applied { item }) => {
                self.checkin(worker);
                Ok(item.into_item())
            }
            Ok(WorkerReply::Failed {
                stage,
                message,
                cause,
                item,
            }) => {
                self.checkin(worker);
                Err(JobError::Stage(failure_from_reply(stage, message, cause, item)))
            }
            Ok(other) => {
                let reason = format!("unexpected reply {other:?}");
                self.lost(worker, sequence, stage, &reason).await
            }
            Err(err) => self.lost(worker, sequence, stage, &err.to_string()).await,
        }
    }

    async fn lost(
        &self,
        worker: WorkerProcess,
        sequence: u64,
        stage: String,
        reason: &str,
    ) -> Result<Item, JobError> {
        let (id, pid) = (worker.id, worker.pid);
        warn!(sequence, worker = id, pid, reason, "Worker process lost");
        self.replace(worker).await.map_err(JobError::Fatal)?;
        Err(JobError::Stage(StageFailure::new(
            stage,
            StageError::new(format!("worker process {pid} died: {reason}")),
        )))
    }
}

/// Runs transforms in long-lived worker processes.
///
/// Each worker rebuilds the transforms from the resolved pipeline
/// definition. A worker is handed one job at a time; a worker that dies
/// mid-job fails that job only and is replaced.
pub struct ProcessPool {
    shared: Arc<Shared>,
    workers: usize,
}

impl std::fmt::Debug for ProcessPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessPool")
            .field("command", &self.shared.command)
            .field("workers", &self.workers)
            .finish()
    }
}

impl ProcessPool {
    /// Starts `workers` processes and waits until each one is ready.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker cannot be started or fails to build the
    /// pipeline.
    pub async fn start(
        command: WorkerCommand,
        definition: PipelineSpec,
        workers: usize,
    ) -> Result<Self, PoolError> {
        let workers = workers.max(1);
        let stage_names = definition
            .transforms
            .iter()
            .map(|element| element.name.clone())
            .collect();

        let started = try_join_all(
            (0..workers).map(|id| WorkerProcess::spawn(id, &command, &definition)),
        )
        .await?;

        let (idle_tx, idle_rx) = mpsc::unbounded_channel();
        for worker in started {
            // The receiver is alive, so this cannot fail.
            let _ = idle_tx.send(worker);
        }

        info!(workers, program = %command.program.display(), "Process pool started");
        Ok(Self {
            shared: Arc::new(Shared {
                command,
                definition,
                stage_names,
                idle_tx,
                idle_rx: Mutex::new(idle_rx),
                closed: watch::channel(false).0,
                next_id: AtomicUsize::new(workers),
            }),
            workers,
        })
    }
}

#[async_trait]
impl WorkerPool for ProcessPool {
    fn submit(&self, job: StageJob) -> JobHandle {
        let StageJob {
            sequence,
            stage_index,
            item,
        } = job;
        let path = item.path.clone();
        let stage = self.shared.stage_name(stage_index);

        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move { shared.run(sequence, stage_index, item).await });

        Box::pin(async move {
            let result = task.await.unwrap_or_else(|err| {
                Err(JobError::Stage(StageFailure::new(
                    stage,
                    StageError::new(format!("worker task failed: {err}")),
                )))
            });
            JobCompletion {
                sequence,
                stage_index,
                path,
                result,
            }
        })
    }

    fn max_in_flight(&self) -> Option<usize> {
        Some(self.workers)
    }

    fn workers(&self) -> usize {
        self.workers
    }

    async fn shutdown(&self) {
        self.shared.close();
        let mut idle = self.shared.idle_rx.lock().await;
        idle.close();
        let mut stopped = 0;
        while let Ok(worker) = idle.try_recv() {
            worker.stop().await;
            stopped += 1;
        }
        info!(stopped, "Process pool shut down");
    }
}

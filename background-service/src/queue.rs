use crate::notifier::{StatusNotifier, TaskStatus};
use crate::runner::MigrationRunner;
use crate::spacing::JobGapTracker;
use bluemigrate_core::{CoreError, ErrorExt, MigrationJob};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{error, error_span, info};

type SharedReceiver = Arc<Mutex<mpsc::UnboundedReceiver<MigrationJob>>>;

/// Producer side of the job queue. Cloning shares the same queue.
#[derive(Debug, Clone)]
pub struct JobQueue {
    sender: mpsc::UnboundedSender<MigrationJob>,
}

impl JobQueue {
    /// Creates an unbounded FIFO queue and its consumer end.
    pub fn new() -> (Self, JobReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self { sender },
            JobReceiver {
                inner: Arc::new(Mutex::new(receiver)),
            },
        )
    }

    /// Appends a job without blocking. Only fails once every worker is gone.
    pub fn enqueue(&self, job: MigrationJob) -> Result<(), CoreError> {
        let migration_id = job.migration_id.clone();
        self.sender.send(job).map_err(|_| CoreError::Internal {
            message: format!("queue closed, dropping migration {}", migration_id),
        })?;
        info!(migration_id = %migration_id, "Migration queued");
        Ok(())
    }
}

/// Consumer side of the job queue, shared by all workers.
#[derive(Debug, Clone)]
pub struct JobReceiver {
    inner: SharedReceiver,
}

impl JobReceiver {
    /// Next job in FIFO order; `None` once the queue is closed and drained.
    pub async fn next(&self) -> Option<MigrationJob> {
        self.inner.lock().await.recv().await
    }
}

/// Everything a worker needs to run jobs.
#[derive(Clone)]
pub struct WorkerContext {
    pub runner: Arc<dyn MigrationRunner>,
    pub notifier: Arc<dyn StatusNotifier>,
    pub gap: JobGapTracker,
}

pub struct WorkerPool {
    workers: Vec<(String, JoinHandle<()>)>,
}

impl WorkerPool {
    /// Spawns `count` workers named `processor-1..=count`.
    pub fn spawn(count: usize, receiver: JobReceiver, context: WorkerContext) -> Self {
        info!("Starting {} queue processors", count);
        let workers = (1..=count)
            .map(|i| {
                let name = format!("processor-{}", i);
                let handle = tokio::spawn(run_worker(
                    name.clone(),
                    receiver.clone(),
                    context.clone(),
                ));
                (name, handle)
            })
            .collect();
        Self { workers }
    }

    pub fn worker_names(&self) -> Vec<&str> {
        self.workers.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Waits for every worker to finish draining a closed queue.
    pub async fn join(self) {
        for (name, handle) in self.workers {
            if let Err(e) = handle.await {
                error!(worker = %name, "Queue processor terminated abnormally: {}", e);
            }
        }
    }
}

async fn run_worker(name: String, receiver: JobReceiver, context: WorkerContext) {
    info!(worker = %name, "Queue processor started");
    let mut last_completed: Option<Instant> = None;

    while let Some(job) = receiver.next().await {
        info!(
            worker = %name,
            migration_id = %job.migration_id,
            "Processing migration task"
        );

        let cooldown = context.runner.source_cooldown().await;
        let wait = context
            .gap
            .required_wait(last_completed, Instant::now(), cooldown);
        if !wait.is_zero() {
            info!(
                worker = %name,
                migration_id = %job.migration_id,
                "Waiting {:?} before next migration", wait
            );
            sleep(wait).await;
        }

        let outcome = run_isolated(&context, &job).await.map_err(|e| {
            error_span!("task", worker = %name, migration_id = %job.migration_id)
                .in_scope(|| e.log_error())
                .to_string()
        });

        let status = TaskStatus::new(&job, outcome, &name);
        context.notifier.notify(&status).await;
        last_completed = Some(Instant::now());
    }

    info!(worker = %name, "Queue closed, processor stopping");
}

/// Runs the job on its own task so a panic surfaces as a failed job instead
/// of taking the worker down.
async fn run_isolated(context: &WorkerContext, job: &MigrationJob) -> Result<(), CoreError> {
    let runner = Arc::clone(&context.runner);
    let job = job.clone();
    match tokio::spawn(async move { runner.run(&job).await }).await {
        Ok(result) => result,
        Err(e) => Err(CoreError::Internal {
            message: format!("migration task aborted: {}", e),
        }),
    }
}

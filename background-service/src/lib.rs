pub mod notifier;
pub mod queue;
pub mod runner;
pub mod spacing;

pub use notifier::{HttpStatusNotifier, LogNotifier, StatusNotifier, TaskStatus};
pub use queue::{JobQueue, JobReceiver, WorkerContext, WorkerPool};
pub use runner::{MigrationRunner, PipelineRunner};
pub use spacing::JobGapTracker;

use bluemigrate_core::{AppConfig, CoreError, MigrationJob, MigrationRequest, QueueConfig};
use bluesky_client::{
    AccountPointsLimiter, HttpImageDownloader, ImageProcessor, MediaPreparer, MigrationPublisher,
    PublisherConfig, XrpcClient,
};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::info;
use tracing_subscriber::EnvFilter;
use twitter_client::{BudgetConfig, EndpointBudgetTracker, PostFetcher, SourcePlatform, ThreadBuilder};

const DEFAULT_LOG_FILTER: &str =
    "bluemigrate_core=info,twitter_client=info,bluesky_client=info,background_service=info";

/// Installs the fmt subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    // A subscriber may already be installed by the embedding application
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Queue plus worker pool behind the migration request endpoint.
pub struct MigrationService {
    queue: JobQueue,
    pool: WorkerPool,
}

impl MigrationService {
    /// Spawns the workers. Must be called from within a tokio runtime.
    pub fn start(
        config: &QueueConfig,
        runner: Arc<dyn MigrationRunner>,
        notifier: Arc<dyn StatusNotifier>,
    ) -> Self {
        let (queue, receiver) = JobQueue::new();
        let context = WorkerContext {
            runner,
            notifier,
            gap: JobGapTracker::from(config),
        };
        let pool = WorkerPool::spawn(config.workers.max(1), receiver, context);
        Self { queue, pool }
    }

    /// Wires the full pipeline from configuration around the given source
    /// client. All workers share one budget tracker, one fetch gate and one
    /// points limiter.
    pub fn from_config(
        config: &AppConfig,
        source: Arc<dyn SourcePlatform>,
    ) -> Result<Self, CoreError> {
        config.validate()?;

        let budget = Arc::new(EndpointBudgetTracker::new(BudgetConfig::from(&config.source)));
        let fetcher = PostFetcher::new(source, budget, Arc::new(Semaphore::new(1)));

        let destination = Arc::new(XrpcClient::new(&config.destination.service_url)?);
        let media = MediaPreparer::new(
            Arc::new(HttpImageDownloader::new()?),
            ImageProcessor::from_config(&config.destination),
            config.destination.image_fetch_concurrency,
        );
        let publisher = MigrationPublisher::new(
            destination,
            media,
            Arc::new(AccountPointsLimiter::from_config(&config.destination)),
            PublisherConfig::from(&config.destination),
        );
        let runner = PipelineRunner::new(
            fetcher,
            ThreadBuilder::new(config.source.max_reply_depth),
            publisher,
        );

        let notifier: Arc<dyn StatusNotifier> = match &config.notifier.frontend_url {
            Some(url) => Arc::new(HttpStatusNotifier::new(url)),
            None => {
                info!("No front-end URL configured, statuses are only logged");
                Arc::new(LogNotifier)
            }
        };

        Ok(Self::start(&config.queue, Arc::new(runner), notifier))
    }

    pub fn queue(&self) -> JobQueue {
        self.queue.clone()
    }

    pub fn worker_names(&self) -> Vec<&str> {
        self.pool.worker_names()
    }

    /// Validates a request and queues it, returning the migration id.
    pub fn submit(&self, request: MigrationRequest) -> Result<String, CoreError> {
        let job = request.into_job()?;
        let migration_id = job.migration_id.clone();
        self.queue.enqueue(job)?;
        Ok(migration_id)
    }

    pub fn enqueue(&self, job: MigrationJob) -> Result<(), CoreError> {
        self.queue.enqueue(job)
    }

    /// Closes the queue and waits until the workers drained it. Jobs can
    /// still arrive through [`JobQueue`] handles obtained earlier until those
    /// are dropped too.
    pub async fn shutdown(self) {
        drop(self.queue);
        self.pool.join().await;
        info!("Migration service stopped");
    }
}

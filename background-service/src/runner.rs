use async_trait::async_trait;
use bluemigrate_core::{CoreError, ErrorExt, MigrationJob, Thread};
use bluesky_client::MigrationPublisher;
use std::time::Duration;
use tracing::{info, warn_span};
use twitter_client::{merge_threads, PostFetcher, ThreadBuilder};

/// Executes one migration job end to end.
#[async_trait]
pub trait MigrationRunner: Send + Sync {
    async fn run(&self, job: &MigrationJob) -> Result<(), CoreError>;

    /// Longest remaining window among source endpoints still in use.
    async fn source_cooldown(&self) -> Option<Duration> {
        None
    }
}

/// Fetch, rebuild threads, publish.
#[derive(Clone)]
pub struct PipelineRunner {
    fetcher: PostFetcher,
    builder: ThreadBuilder,
    publisher: MigrationPublisher,
}

impl PipelineRunner {
    pub fn new(fetcher: PostFetcher, builder: ThreadBuilder, publisher: MigrationPublisher) -> Self {
        Self {
            fetcher,
            builder,
            publisher,
        }
    }

    /// Timeline threads followed by the explicitly requested ones. A thread
    /// URL that cannot be fetched is logged and skipped.
    pub async fn collect_threads(&self, job: &MigrationJob) -> Result<Vec<Thread>, CoreError> {
        let organic = match job.source_handle.as_deref() {
            Some(handle) => {
                info!(
                    migration_id = %job.migration_id,
                    "Starting post migration for {} with limit {}",
                    handle,
                    job.post_limit
                );
                let posts = self.fetcher.fetch_user_posts(handle, job.post_limit).await?;
                self.builder.build(posts)
            }
            None => Vec::new(),
        };

        let mut explicit = Vec::with_capacity(job.explicit_thread_urls.len());
        for url in &job.explicit_thread_urls {
            match self.fetcher.fetch_thread(url).await {
                Ok(posts) => match self.builder.build_explicit(posts) {
                    Some(thread) => explicit.push(thread),
                    None => info!(
                        migration_id = %job.migration_id,
                        "No thread data returned for URL: {}", url
                    ),
                },
                Err(e) => {
                    warn_span!("explicit_thread", migration_id = %job.migration_id, url = %url)
                        .in_scope(|| e.log_warn());
                }
            }
        }

        Ok(merge_threads(organic, explicit))
    }
}

#[async_trait]
impl MigrationRunner for PipelineRunner {
    async fn run(&self, job: &MigrationJob) -> Result<(), CoreError> {
        let threads = self.collect_threads(job).await?;
        let report = self.publisher.publish(job, &threads).await?;
        info!(
            migration_id = %job.migration_id,
            "Migration completed: {} successful, {} failed",
            report.successful_posts,
            report.failed_posts
        );
        Ok(())
    }

    async fn source_cooldown(&self) -> Option<Duration> {
        self.fetcher.budget().max_remaining_cooldown().await
    }
}

use crate::api::{DestinationPlatform, PostRecord, Session};
use crate::media::{upload_images, MediaPreparer, ThreadMedia};
use crate::points_limiter::AccountPointsLimiter;
use crate::retry::{recovery_for, RecoveryAction};
use bluemigrate_core::{
    CoreError, DestinationConfig, ErrorExt, MigrationJob, ReplyRef, StrongRef, Thread,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

const PROGRESS_INTERVAL: usize = 10;

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub post_ceiling: usize,
    /// Points charged before each publish.
    pub create_points: u32,
    pub upload_concurrency: usize,
    pub rate_limit_backoff: Duration,
    pub buffer_release_interval: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self::from(&DestinationConfig::default())
    }
}

impl From<&DestinationConfig> for PublisherConfig {
    fn from(config: &DestinationConfig) -> Self {
        Self {
            post_ceiling: config.post_ceiling,
            create_points: config.create_points,
            upload_concurrency: config.upload_concurrency,
            rate_limit_backoff: Duration::from_secs(config.rate_limit_backoff_secs),
            buffer_release_interval: config.buffer_release_interval.max(1),
        }
    }
}

/// Where a publish run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishState {
    Started,
    ProcessingThread { thread: usize },
    ProcessingPost { thread: usize, post: usize },
    Posted { thread: usize, post: usize },
    PostFailed { thread: usize, post: usize },
    Completed,
    Aborted,
}

impl fmt::Display for PublishState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishState::Started => write!(f, "started"),
            PublishState::ProcessingThread { thread } => write!(f, "processing_thread({})", thread),
            PublishState::ProcessingPost { thread, post } => {
                write!(f, "processing_post({}, {})", thread, post)
            }
            PublishState::Posted { thread, post } => write!(f, "posted({}, {})", thread, post),
            PublishState::PostFailed { thread, post } => {
                write!(f, "post_failed({}, {})", thread, post)
            }
            PublishState::Completed => write!(f, "completed"),
            PublishState::Aborted => write!(f, "aborted"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub successful_posts: usize,
    pub failed_posts: usize,
    pub threads_processed: usize,
    pub limit_reached: bool,
}

impl PublishReport {
    pub fn posts_attempted(&self) -> usize {
        self.successful_posts + self.failed_posts
    }

    /// Percentage of attempted posts that were published.
    pub fn success_rate(&self) -> f64 {
        match self.posts_attempted() {
            0 => 0.0,
            attempted => self.successful_posts as f64 / attempted as f64 * 100.0,
        }
    }
}

/// Publishes reconstructed threads to the destination, one post at a time.
#[derive(Clone)]
pub struct MigrationPublisher {
    destination: Arc<dyn DestinationPlatform>,
    media: MediaPreparer,
    points: Arc<AccountPointsLimiter>,
    config: PublisherConfig,
}

struct PublishContext<'a> {
    migration_id: &'a str,
    session: Session,
    account: String,
    ceiling: usize,
}

impl MigrationPublisher {
    pub fn new(
        destination: Arc<dyn DestinationPlatform>,
        media: MediaPreparer,
        points: Arc<AccountPointsLimiter>,
        config: PublisherConfig,
    ) -> Self {
        Self {
            destination,
            media,
            points,
            config,
        }
    }

    /// Publishes `threads` for `job`.
    ///
    /// Stops with `Ok` once `min(post_limit, post_ceiling)` posts went out.
    /// Only an expired or rejected session ends the run with an error; every
    /// other failure costs at most the post that hit it.
    pub async fn publish(
        &self,
        job: &MigrationJob,
        threads: &[Thread],
    ) -> Result<PublishReport, CoreError> {
        let migration_id = job.migration_id.as_str();
        let total_posts: usize = threads.iter().map(Thread::len).sum();
        info!(
            event = "MIGRATION_START",
            migration_id = %migration_id,
            dest_handle = %job.dest_handle,
            total_threads = threads.len(),
            total_posts,
            "Migration started"
        );
        self.enter(migration_id, PublishState::Started);

        let mut report = PublishReport::default();
        if threads.is_empty() {
            info!(migration_id = %migration_id, "No posts to migrate");
            self.complete(migration_id, &report);
            return Ok(report);
        }

        let result = match self.open_context(job).await {
            Ok(ctx) => self.publish_threads(&ctx, threads, &mut report).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.complete(migration_id, &report);
                Ok(report)
            }
            Err(e) => {
                self.enter(migration_id, PublishState::Aborted);
                error!(
                    event = "MIGRATION_FAILED",
                    migration_id = %migration_id,
                    error = %e,
                    successful_posts = report.successful_posts,
                    failed_posts = report.failed_posts,
                    threads_processed = report.threads_processed,
                    posts_made = report.posts_attempted(),
                    "Migration failed"
                );
                Err(e)
            }
        }
    }

    async fn open_context<'a>(
        &self,
        job: &'a MigrationJob,
    ) -> Result<PublishContext<'a>, CoreError> {
        let session = self
            .destination
            .login(&job.dest_handle, &job.credential)
            .await?;

        let account = match self.destination.resolve_handle(&job.dest_handle).await {
            Ok(did) => did,
            Err(e) => {
                warn!(
                    migration_id = %job.migration_id,
                    "Could not resolve {}: {}; using session DID",
                    job.dest_handle,
                    e
                );
                session.did.clone()
            }
        };

        Ok(PublishContext {
            migration_id: &job.migration_id,
            session,
            account,
            ceiling: job.post_limit.min(self.config.post_ceiling),
        })
    }

    async fn publish_threads(
        &self,
        ctx: &PublishContext<'_>,
        threads: &[Thread],
        report: &mut PublishReport,
    ) -> Result<(), CoreError> {
        let mut media = ThreadMedia::default();

        for (thread_index, thread) in threads.iter().enumerate() {
            if report.successful_posts >= ctx.ceiling {
                info!(
                    event = "MIGRATION_LIMIT_REACHED",
                    migration_id = %ctx.migration_id,
                    posts_made = report.successful_posts,
                    threads_processed = report.threads_processed,
                    "Post limit of {} reached, stopping migration",
                    ctx.ceiling
                );
                report.limit_reached = true;
                break;
            }

            report.threads_processed += 1;
            self.enter(
                ctx.migration_id,
                PublishState::ProcessingThread {
                    thread: thread_index,
                },
            );
            info!(
                migration_id = %ctx.migration_id,
                thread_index,
                "Processing thread {}/{} with {} posts",
                thread_index + 1,
                threads.len(),
                thread.len()
            );

            self.media.prepare_thread(thread, &mut media).await;
            self.publish_thread(ctx, thread_index, thread, &mut media, report)
                .await?;

            if (thread_index + 1) % self.config.buffer_release_interval == 0 {
                debug!(migration_id = %ctx.migration_id, "Releasing media buffers");
                media.release();
            }
        }

        if report.successful_posts >= ctx.ceiling && !report.limit_reached {
            report.limit_reached = true;
        }
        Ok(())
    }

    async fn publish_thread(
        &self,
        ctx: &PublishContext<'_>,
        thread_index: usize,
        thread: &Thread,
        media: &mut ThreadMedia,
        report: &mut PublishReport,
    ) -> Result<(), CoreError> {
        let mut root: Option<StrongRef> = None;
        let mut parent: Option<StrongRef> = None;

        for (post_index, post) in thread.posts().iter().enumerate() {
            if report.successful_posts >= ctx.ceiling {
                break;
            }
            self.enter(
                ctx.migration_id,
                PublishState::ProcessingPost {
                    thread: thread_index,
                    post: post_index,
                },
            );

            self.points
                .acquire(&ctx.account, self.config.create_points)
                .await;

            let images = media.take(post_index);
            let blobs = if images.is_empty() {
                Vec::new()
            } else {
                upload_images(
                    self.destination.as_ref(),
                    &ctx.session,
                    images,
                    self.config.upload_concurrency,
                )
                .await
            };

            let reply = match (&root, &parent) {
                (Some(root), Some(parent)) => Some(ReplyRef {
                    root: root.clone(),
                    parent: parent.clone(),
                }),
                _ => None,
            };
            let record = PostRecord::from_post(post, blobs, reply);

            match self.destination.publish_post(&ctx.session, &record).await {
                Ok(published) => {
                    if root.is_none() {
                        root = Some(published.clone());
                    }
                    parent = Some(published);
                    report.successful_posts += 1;
                    self.enter(
                        ctx.migration_id,
                        PublishState::Posted {
                            thread: thread_index,
                            post: post_index,
                        },
                    );

                    if report.successful_posts % PROGRESS_INTERVAL == 0 {
                        info!(
                            migration_id = %ctx.migration_id,
                            "Progress: {} posts created ({} failed)",
                            report.successful_posts,
                            report.failed_posts
                        );
                    }
                }
                Err(e) => {
                    report.failed_posts += 1;
                    self.enter(
                        ctx.migration_id,
                        PublishState::PostFailed {
                            thread: thread_index,
                            post: post_index,
                        },
                    );
                    warn!(
                        migration_id = %ctx.migration_id,
                        thread_index,
                        post_index,
                        failure_kind = e.failure_kind().as_str(),
                        "Failed to publish post {}: {}",
                        post.id,
                        e
                    );

                    match recovery_for(&e, self.config.rate_limit_backoff) {
                        RecoveryAction::Backoff(wait) => {
                            info!(
                                migration_id = %ctx.migration_id,
                                "Waiting {:?} before continuing", wait
                            );
                            sleep(wait).await;
                        }
                        RecoveryAction::Abort => {
                            error!(
                                migration_id = %ctx.migration_id,
                                thread_index,
                                post_index,
                                "Session rejected, aborting migration"
                            );
                            return Err(e.into());
                        }
                        RecoveryAction::Skip => {}
                    }
                }
            }
        }
        Ok(())
    }

    fn complete(&self, migration_id: &str, report: &PublishReport) {
        self.enter(migration_id, PublishState::Completed);
        info!(
            event = "MIGRATION_COMPLETED",
            migration_id = %migration_id,
            successful_posts = report.successful_posts,
            failed_posts = report.failed_posts,
            total_posts = report.posts_attempted(),
            threads_processed = report.threads_processed,
            success_rate = report.success_rate(),
            "Migration completed"
        );
    }

    fn enter(&self, migration_id: &str, state: PublishState) {
        debug!(migration_id = %migration_id, state = %state, "Publish state");
    }
}

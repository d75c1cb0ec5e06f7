use bluemigrate_core::QueueConfig;
use std::time::Duration;
use tokio::time::Instant;

/// Decides how long a worker waits between two consecutive jobs.
///
/// A fixed minimum gap always applies. When some source endpoint still has
/// more than the threshold left in its window, the worker instead waits for
/// that window to run out (plus a buffer, capped).
#[derive(Debug, Clone)]
pub struct JobGapTracker {
    min_gap: Duration,
    adaptive_threshold: Duration,
    adaptive_buffer: Duration,
    adaptive_cap: Duration,
}

impl Default for JobGapTracker {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

impl From<&QueueConfig> for JobGapTracker {
    fn from(config: &QueueConfig) -> Self {
        Self {
            min_gap: Duration::from_secs(config.min_job_gap_secs),
            adaptive_threshold: Duration::from_secs(config.adaptive_wait_threshold_secs),
            adaptive_buffer: Duration::from_secs(config.adaptive_wait_buffer_secs),
            adaptive_cap: Duration::from_secs(config.adaptive_wait_cap_secs),
        }
    }
}

impl JobGapTracker {
    /// Wait before the next job. A worker's first job never waits.
    ///
    /// `max_remaining_cooldown` is the longest remaining window among source
    /// endpoints with a non-zero counter.
    pub fn required_wait(
        &self,
        last_completed: Option<Instant>,
        now: Instant,
        max_remaining_cooldown: Option<Duration>,
    ) -> Duration {
        let Some(last_completed) = last_completed else {
            return Duration::ZERO;
        };

        let elapsed = now.saturating_duration_since(last_completed);
        let floor = self.min_gap.saturating_sub(elapsed);
        let adaptive = match max_remaining_cooldown {
            Some(remaining) if remaining > self.adaptive_threshold => {
                (remaining + self.adaptive_buffer).min(self.adaptive_cap)
            }
            _ => Duration::ZERO,
        };
        floor.max(adaptive)
    }
}

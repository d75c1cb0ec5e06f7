use bluemigrate_core::{SourceConfig, TwitterApiError};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

const LOW_USAGE_DELAY: Duration = Duration::from_millis(100);
const MODERATE_USAGE_DELAY: Duration = Duration::from_millis(500);
const MIN_SAFE_INTERVAL: Duration = Duration::from_millis(500);
const FALLBACK_SAFE_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct BudgetConfig {
    pub window: Duration,
    pub safety_fraction: f64,
    pub threshold_fraction: f64,
    pub cooldown_buffer: Duration,
    pub rate_limit_buffer: Duration,
    pub endpoint_limits: HashMap<String, u32>,
    pub default_limit: u32,
}

impl BudgetConfig {
    /// Conservative budget for the source platform's 15 minute windows.
    pub fn twitter() -> Self {
        Self::from(&SourceConfig::default())
    }

    pub fn limit_for(&self, endpoint: &str) -> u32 {
        self.endpoint_limits
            .get(endpoint)
            .copied()
            .unwrap_or(self.default_limit)
    }
}

impl From<&SourceConfig> for BudgetConfig {
    fn from(config: &SourceConfig) -> Self {
        Self {
            window: Duration::from_secs(config.window_secs),
            safety_fraction: config.safety_fraction,
            threshold_fraction: config.threshold_fraction,
            cooldown_buffer: Duration::from_secs(config.cooldown_buffer_secs),
            rate_limit_buffer: Duration::from_secs(config.rate_limit_buffer_secs),
            endpoint_limits: config.endpoint_limits.clone(),
            default_limit: config.default_endpoint_limit,
        }
    }
}

#[derive(Debug)]
struct EndpointWindow {
    count: u32,
    window_start: Instant,
}

impl EndpointWindow {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }

    fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.window_start)
    }

    fn reset(&mut self, now: Instant) {
        self.count = 0;
        self.window_start = now;
    }
}

#[derive(Debug)]
enum Admission {
    Granted { delay: Duration, count: u32, limit: u32 },
    Cooldown { wait: Duration, count: u32, limit: u32 },
}

/// Sliding-window request budget per source endpoint.
///
/// One instance is created at startup and shared by every fetch path; all
/// window state lives behind a single mutex.
#[derive(Debug)]
pub struct EndpointBudgetTracker {
    config: BudgetConfig,
    windows: Mutex<HashMap<String, EndpointWindow>>,
}

impl EndpointBudgetTracker {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Suspends until `endpoint` may be called again. Never fails.
    pub async fn acquire(&self, endpoint: &str) {
        loop {
            match self.admit(endpoint).await {
                Admission::Granted {
                    delay,
                    count,
                    limit,
                } => {
                    debug!(
                        endpoint = %endpoint,
                        "Adaptive delay {:?} (usage: {}/{})", delay, count, limit
                    );
                    sleep(delay).await;
                    return;
                }
                Admission::Cooldown { wait, count, limit } => {
                    warn!(
                        endpoint = %endpoint,
                        "Safety threshold reached at {}/{} ({:.1}%), sleeping {:?}",
                        count,
                        limit,
                        count as f64 / limit as f64 * 100.0,
                        wait
                    );
                    sleep(wait).await;
                    self.reset_window(endpoint).await;
                }
            }
        }
    }

    /// Runs `operation` under the budget for `endpoint`.
    ///
    /// An explicit rate-limit response resets the window, waits out a full
    /// window plus buffer and retries exactly once; the retry's result is
    /// returned as is.
    pub async fn guarded_call<T, F, Fut>(
        &self,
        endpoint: &str,
        operation: F,
    ) -> Result<T, TwitterApiError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, TwitterApiError>>,
    {
        self.acquire(endpoint).await;

        match operation().await {
            Err(error) if error.is_rate_limit_signal() => {
                let wait = self.config.window + self.config.rate_limit_buffer;
                warn!(
                    endpoint = %endpoint,
                    "Rate limit hit ({}), waiting {:?} before retrying once", error, wait
                );
                self.reset_window(endpoint).await;
                sleep(wait).await;
                self.record_call(endpoint).await;
                operation().await
            }
            result => result,
        }
    }

    pub async fn usage(&self, endpoint: &str) -> EndpointUsage {
        let now = Instant::now();
        let windows = self.windows.lock().await;
        let (count, window_elapsed) = match windows.get(endpoint) {
            Some(window) if window.elapsed(now) < self.config.window => {
                (window.count, window.elapsed(now))
            }
            _ => (0, Duration::ZERO),
        };

        EndpointUsage {
            endpoint: endpoint.to_string(),
            count,
            limit: self.config.limit_for(endpoint),
            window_elapsed,
            window: self.config.window,
        }
    }

    /// Longest remaining window among endpoints that have been used.
    pub async fn max_remaining_cooldown(&self) -> Option<Duration> {
        let now = Instant::now();
        let windows = self.windows.lock().await;
        windows
            .values()
            .filter(|w| w.count > 0 && w.elapsed(now) < self.config.window)
            .map(|w| self.config.window - w.elapsed(now))
            .max()
    }

    async fn admit(&self, endpoint: &str) -> Admission {
        let limit = self.config.limit_for(endpoint);
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let window = windows
            .entry(endpoint.to_string())
            .or_insert_with(|| EndpointWindow::new(now));

        let elapsed = window.elapsed(now);
        if elapsed >= self.config.window {
            info!(endpoint = %endpoint, "Resetting counter after {:?}", elapsed);
            window.reset(now);
        }

        if window.count >= self.safety_threshold(limit) {
            let remaining = self.config.window.saturating_sub(window.elapsed(now));
            let wait = (remaining + self.config.cooldown_buffer).max(self.config.cooldown_buffer);
            return Admission::Cooldown {
                wait,
                count: window.count,
                limit,
            };
        }

        let delay = self.pacing_delay(window.count, limit);
        window.count += 1;
        Admission::Granted {
            delay,
            count: window.count,
            limit,
        }
    }

    async fn reset_window(&self, endpoint: &str) {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        windows
            .entry(endpoint.to_string())
            .and_modify(|w| w.reset(now))
            .or_insert_with(|| EndpointWindow::new(now));
    }

    async fn record_call(&self, endpoint: &str) {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let window = windows
            .entry(endpoint.to_string())
            .or_insert_with(|| EndpointWindow::new(now));
        if window.elapsed(now) >= self.config.window {
            window.reset(now);
        }
        window.count += 1;
    }

    fn safety_threshold(&self, limit: u32) -> u32 {
        ((limit as f64 * self.config.threshold_fraction) as u32).max(1)
    }

    fn pacing_delay(&self, count: u32, limit: u32) -> Duration {
        let usage_ratio = count as f64 / limit as f64;
        if usage_ratio < 0.3 {
            LOW_USAGE_DELAY
        } else if usage_ratio < 0.5 {
            MODERATE_USAGE_DELAY
        } else {
            self.safe_request_interval(limit)
        }
    }

    fn safe_request_interval(&self, limit: u32) -> Duration {
        let safe_limit = (limit as f64 * self.config.safety_fraction) as u32;
        if safe_limit == 0 {
            return FALLBACK_SAFE_INTERVAL;
        }
        let requests_per_second = safe_limit as f64 / self.config.window.as_secs_f64();
        Duration::from_secs_f64(1.0 / requests_per_second).max(MIN_SAFE_INTERVAL)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointUsage {
    pub endpoint: String,
    pub count: u32,
    pub limit: u32,
    pub window_elapsed: Duration,
    pub window: Duration,
}

impl EndpointUsage {
    pub fn utilization_percentage(&self) -> f64 {
        (self.count as f64 / self.limit as f64) * 100.0
    }

    pub fn requests_remaining_in_window(&self) -> u32 {
        self.limit.saturating_sub(self.count)
    }

    pub fn time_until_window_reset(&self) -> Duration {
        self.window.saturating_sub(self.window_elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn small_config(limit: u32) -> BudgetConfig {
        let mut config = BudgetConfig::twitter();
        config.window = Duration::from_secs(100);
        config.endpoint_limits = HashMap::from([("ep".to_string(), limit)]);
        config
    }

    #[test]
    fn test_twitter_defaults() {
        let config = BudgetConfig::twitter();
        assert_eq!(config.window, Duration::from_secs(900));
        assert_eq!(config.limit_for("get_tweet_by_id"), 140);
        assert_eq!(config.limit_for("unknown_endpoint"), 45);
    }

    #[test]
    fn test_safe_request_interval() {
        let tracker = EndpointBudgetTracker::new(BudgetConfig::twitter());
        // 45 * 0.6 = 27 requests per 900s
        let interval = tracker.safe_request_interval(45);
        assert!((interval.as_secs_f64() - 900.0 / 27.0).abs() < 0.01);

        // Huge limits never go below the floor
        assert_eq!(tracker.safe_request_interval(1_000_000), MIN_SAFE_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_usage_uses_minimal_delay() {
        let tracker = EndpointBudgetTracker::new(small_config(10));
        let start = Instant::now();
        tracker.acquire("ep").await;
        assert!(start.elapsed() >= LOW_USAGE_DELAY);
        assert!(start.elapsed() < MODERATE_USAGE_DELAY);

        let usage = tracker.usage("ep").await;
        assert_eq!(usage.count, 1);
        assert_eq!(usage.requests_remaining_in_window(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_triggers_cooldown_and_reset() {
        let tracker = EndpointBudgetTracker::new(small_config(10));
        for _ in 0..7 {
            tracker.acquire("ep").await;
        }
        let usage = tracker.usage("ep").await;
        assert_eq!(usage.count, 7);
        let remaining = usage.time_until_window_reset();

        let before = Instant::now();
        tracker.acquire("ep").await;
        assert!(before.elapsed() >= remaining + Duration::from_secs(30));

        // Window was reset after the cooldown; only this call is counted
        let usage = tracker.usage("ep").await;
        assert_eq!(usage.count, 1);
        assert!(usage.window_elapsed < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_limit_within_window() {
        let config = small_config(10);
        let window = config.window;
        let tracker = EndpointBudgetTracker::new(config);

        let mut call_times = Vec::new();
        for _ in 0..30 {
            tracker.acquire("ep").await;
            call_times.push(Instant::now());
        }

        for (i, start) in call_times.iter().enumerate() {
            let in_window = call_times[i..]
                .iter()
                .filter(|t| t.duration_since(*start) < window)
                .count();
            assert!(in_window <= 10, "{} calls within one window", in_window);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry_resets_counter() {
        let tracker = EndpointBudgetTracker::new(small_config(10));
        tracker.acquire("ep").await;
        tracker.acquire("ep").await;
        assert!(tracker.max_remaining_cooldown().await.is_some());

        sleep(Duration::from_secs(101)).await;
        assert_eq!(tracker.usage("ep").await.count, 0);
        assert!(tracker.max_remaining_cooldown().await.is_none());

        tracker.acquire("ep").await;
        assert_eq!(tracker.usage("ep").await.count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_signal_retries_once() {
        let tracker = EndpointBudgetTracker::new(small_config(10));
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;

        let start = Instant::now();
        let result = tracker
            .guarded_call("ep", move || async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(TwitterApiError::TooManyRequests {
                        endpoint: "ep".to_string(),
                    })
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_secs(100 + 10));
        assert_eq!(tracker.usage("ep").await.count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_rate_limit_propagates() {
        let tracker = EndpointBudgetTracker::new(small_config(10));
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;

        let result: Result<(), _> = tracker
            .guarded_call("ep", move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(TwitterApiError::RequestFailed {
                    status_code: Some(429),
                    message: "Too Many Requests".to_string(),
                })
            })
            .await;

        assert!(result.unwrap_err().is_rate_limit_signal());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_are_not_retried() {
        let tracker = EndpointBudgetTracker::new(small_config(10));
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;

        let result: Result<(), _> = tracker
            .guarded_call("ep", move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(TwitterApiError::PostNotFound {
                    post_id: "1".to_string(),
                })
            })
            .await;

        assert!(matches!(
            result,
            Err(TwitterApiError::PostNotFound { .. })
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}

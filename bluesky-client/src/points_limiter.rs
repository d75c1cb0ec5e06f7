use bluemigrate_core::DestinationConfig;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Point cost of write operations against the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionPoints {
    Create,
    Update,
    Delete,
}

impl ActionPoints {
    pub fn points(self) -> u32 {
        match self {
            ActionPoints::Create => 3,
            ActionPoints::Update => 2,
            ActionPoints::Delete => 1,
        }
    }
}

#[derive(Debug)]
struct PointsWindow {
    used: u32,
    started: Instant,
    length: Duration,
    limit: u32,
}

impl PointsWindow {
    fn new(length: Duration, limit: u32, now: Instant) -> Self {
        Self {
            used: 0,
            started: now,
            length,
            limit,
        }
    }

    fn roll(&mut self, now: Instant) {
        if now.saturating_duration_since(self.started) >= self.length {
            self.used = 0;
            self.started = now;
        }
    }

    /// A charge larger than the limit is admitted only into an empty window.
    fn has_room(&self, points: u32) -> bool {
        self.used == 0 || self.used + points <= self.limit
    }
}

#[derive(Debug)]
struct AccountWindows {
    hourly: PointsWindow,
    daily: PointsWindow,
}

/// Hourly and daily point ceilings per destination account.
#[derive(Debug)]
pub struct AccountPointsLimiter {
    hourly_limit: u32,
    daily_limit: u32,
    accounts: Mutex<HashMap<String, AccountWindows>>,
}

impl AccountPointsLimiter {
    pub fn new(hourly_limit: u32, daily_limit: u32) -> Self {
        Self {
            hourly_limit,
            daily_limit,
            accounts: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &DestinationConfig) -> Self {
        Self::new(config.hourly_points, config.daily_points)
    }

    /// Waits, polling once a second, until both windows of `account` can
    /// take `points`, then charges both.
    pub async fn acquire(&self, account: &str, points: u32) {
        let mut waited = false;
        loop {
            if self.try_charge(account, points).await {
                if waited {
                    info!(account = %account, "Point budget available again");
                }
                return;
            }
            if !waited {
                info!(
                    account = %account,
                    "Point budget exhausted, waiting for the window to roll over"
                );
                waited = true;
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn acquire_action(&self, account: &str, action: ActionPoints) {
        self.acquire(account, action.points()).await;
    }

    async fn try_charge(&self, account: &str, points: u32) -> bool {
        let now = Instant::now();
        let mut accounts = self.accounts.lock().await;
        let windows = accounts
            .entry(account.to_string())
            .or_insert_with(|| AccountWindows {
                hourly: PointsWindow::new(HOUR, self.hourly_limit, now),
                daily: PointsWindow::new(DAY, self.daily_limit, now),
            });
        windows.hourly.roll(now);
        windows.daily.roll(now);

        if windows.hourly.has_room(points) && windows.daily.has_room(points) {
            windows.hourly.used += points;
            windows.daily.used += points;
            debug!(
                account = %account,
                "Charged {} points (hourly {}/{}, daily {}/{})",
                points,
                windows.hourly.used,
                windows.hourly.limit,
                windows.daily.used,
                windows.daily.limit
            );
            true
        } else {
            false
        }
    }

    /// Points used in the current `(hourly, daily)` windows.
    pub async fn usage(&self, account: &str) -> (u32, u32) {
        let now = Instant::now();
        let mut accounts = self.accounts.lock().await;
        match accounts.get_mut(account) {
            Some(windows) => {
                windows.hourly.roll(now);
                windows.daily.roll(now);
                (windows.hourly.used, windows.daily.used)
            }
            None => (0, 0),
        }
    }
}

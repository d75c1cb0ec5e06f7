//! Application configuration.
//!
//! Every section defaults to the conservative production values, so an empty
//! TOML document is a valid configuration. A handful of environment variables
//! override the file for deployment-specific values.

use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

pub const ENV_FRONTEND_URL: &str = "API_FRONTEND_URL";
pub const ENV_WORKERS: &str = "BLUEMIGRATE_WORKERS";
pub const ENV_BLUESKY_SERVICE: &str = "BLUESKY_SERVICE_URL";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub queue: QueueConfig,
    pub destination: DestinationConfig,
    pub notifier: NotifierConfig,
}

/// Request budget of the source platform.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub window_secs: u64,
    pub safety_fraction: f64,
    pub threshold_fraction: f64,
    /// Added to the remaining window when the safety threshold is hit.
    pub cooldown_buffer_secs: u64,
    /// Added to the full window after an explicit rate-limit response.
    pub rate_limit_buffer_secs: u64,
    pub max_reply_depth: usize,
    pub endpoint_limits: HashMap<String, u32>,
    pub default_endpoint_limit: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        let endpoint_limits = [
            ("get_tweet_by_id", 140),
            ("get_user_by_screen_name", 90),
            ("get_user_tweets", 45),
            ("get_user_tweets_replies", 45),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            window_secs: 15 * 60,
            safety_fraction: 0.6,
            threshold_fraction: 0.7,
            cooldown_buffer_secs: 30,
            rate_limit_buffer_secs: 10,
            max_reply_depth: 100,
            endpoint_limits,
            default_endpoint_limit: 45,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub workers: usize,
    pub min_job_gap_secs: u64,
    /// Endpoint cooldowns shorter than this are absorbed by the fixed gap.
    pub adaptive_wait_threshold_secs: u64,
    pub adaptive_wait_buffer_secs: u64,
    pub adaptive_wait_cap_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            min_job_gap_secs: 60,
            adaptive_wait_threshold_secs: 60,
            adaptive_wait_buffer_secs: 30,
            adaptive_wait_cap_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DestinationConfig {
    pub service_url: String,
    pub hourly_points: u32,
    pub daily_points: u32,
    pub create_points: u32,
    pub post_ceiling: usize,
    pub upload_concurrency: usize,
    pub image_fetch_concurrency: usize,
    pub max_image_bytes: usize,
    pub resize_factor: f64,
    pub jpeg_quality: u8,
    pub rate_limit_backoff_secs: u64,
    pub buffer_release_interval: usize,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            service_url: "https://bsky.social".to_string(),
            hourly_points: 5000,
            daily_points: 35000,
            create_points: 3,
            post_ceiling: 1500,
            upload_concurrency: 3,
            image_fetch_concurrency: 5,
            max_image_bytes: 976 * 1024,
            resize_factor: 0.7,
            jpeg_quality: 85,
            rate_limit_backoff_secs: 60,
            buffer_release_interval: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub frontend_url: Option<String>,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env_overrides()?;
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = std::env::var(ENV_FRONTEND_URL) {
            debug!("Using {} from environment", ENV_FRONTEND_URL);
            self.notifier.frontend_url = Some(url);
        }
        if let Ok(workers) = std::env::var(ENV_WORKERS) {
            self.queue.workers = workers.parse().map_err(|_| ConfigError::InvalidValue {
                field: ENV_WORKERS.to_string(),
                value: workers.clone(),
            })?;
        }
        if let Ok(service) = std::env::var(ENV_BLUESKY_SERVICE) {
            self.destination.service_url = service;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fractions = [
            ("source.safety_fraction", self.source.safety_fraction),
            ("source.threshold_fraction", self.source.threshold_fraction),
            ("destination.resize_factor", self.destination.resize_factor),
        ];
        for (field, value) in fractions {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                });
            }
        }
        if self.source.window_secs == 0 {
            return Err(ConfigError::ValidationFailed {
                reason: "source.window_secs must be non-zero".to_string(),
            });
        }
        if self.source.default_endpoint_limit == 0
            || self.source.endpoint_limits.values().any(|l| *l == 0)
        {
            return Err(ConfigError::ValidationFailed {
                reason: "endpoint limits must be non-zero".to_string(),
            });
        }
        if self.queue.workers == 0 {
            return Err(ConfigError::ValidationFailed {
                reason: "queue.workers must be at least 1".to_string(),
            });
        }
        if self.destination.upload_concurrency == 0 || self.destination.image_fetch_concurrency == 0
        {
            return Err(ConfigError::ValidationFailed {
                reason: "media concurrency must be at least 1".to_string(),
            });
        }
        if self.destination.hourly_points < self.destination.create_points
            || self.destination.daily_points < self.destination.create_points
        {
            return Err(ConfigError::ValidationFailed {
                reason: "point ceilings must admit at least one post".to_string(),
            });
        }
        if !(1..=100).contains(&self.destination.jpeg_quality) {
            return Err(ConfigError::InvalidValue {
                field: "destination.jpeg_quality".to_string(),
                value: self.destination.jpeg_quality.to_string(),
            });
        }
        Ok(())
    }
}

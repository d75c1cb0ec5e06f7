use async_trait::async_trait;
use bluemigrate_core::MigrationJob;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of one job as reported to the front-end.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatus {
    #[serde(rename = "migrationId")]
    pub migration_id: String,
    #[serde(rename = "sourceHandle")]
    pub source_handle: Option<String>,
    #[serde(rename = "destHandle")]
    pub dest_handle: String,
    pub task_type: &'static str,
    pub success: bool,
    pub error_message: Option<String>,
    pub processor: String,
}

impl TaskStatus {
    pub fn new(job: &MigrationJob, outcome: Result<(), String>, processor: &str) -> Self {
        let (success, error_message) = match outcome {
            Ok(()) => (true, None),
            Err(message) => (false, Some(message)),
        };
        Self {
            migration_id: job.migration_id.clone(),
            source_handle: job.source_handle.clone(),
            dest_handle: job.dest_handle.clone(),
            task_type: "posts",
            success,
            error_message,
            processor: processor.to_string(),
        }
    }
}

/// Receives job outcomes. Delivery is best effort and never fails the caller.
#[async_trait]
pub trait StatusNotifier: Send + Sync {
    async fn notify(&self, status: &TaskStatus);
}

/// Posts job outcomes to `{frontend}/api/notify`.
#[derive(Debug, Clone)]
pub struct HttpStatusNotifier {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpStatusNotifier {
    pub fn new(frontend_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(NOTIFY_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client for notifications: {}", e);
                reqwest::Client::new()
            });
        Self {
            http,
            endpoint: format!("{}/api/notify", frontend_url.trim_end_matches('/')),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl StatusNotifier for HttpStatusNotifier {
    async fn notify(&self, status: &TaskStatus) {
        let result = self
            .http
            .post(&self.endpoint)
            .json(status)
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match result {
            Ok(_) => info!(
                worker = %status.processor,
                migration_id = %status.migration_id,
                "Notification sent for {}",
                status.dest_handle
            ),
            Err(e) => warn!(
                worker = %status.processor,
                migration_id = %status.migration_id,
                "Failed to notify status for {}: {}",
                status.dest_handle,
                e
            ),
        }
    }
}

/// Used when no front-end URL is configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl StatusNotifier for LogNotifier {
    async fn notify(&self, status: &TaskStatus) {
        debug!(
            worker = %status.processor,
            migration_id = %status.migration_id,
            success = status.success,
            "No front-end configured, status not delivered"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> MigrationJob {
        MigrationJob {
            migration_id: "m-1".to_string(),
            source_handle: Some("jack".to_string()),
            dest_handle: "jack.bsky.social".to_string(),
            credential: "pw".to_string(),
            post_limit: 800,
            explicit_thread_urls: vec![],
        }
    }

    #[test]
    fn test_payload_shape() {
        let status = TaskStatus::new(&job(), Err("boom".to_string()), "processor-2");
        let value = serde_json::to_value(&status).unwrap();

        assert_eq!(value["migrationId"], "m-1");
        assert_eq!(value["sourceHandle"], "jack");
        assert_eq!(value["destHandle"], "jack.bsky.social");
        assert_eq!(value["task_type"], "posts");
        assert_eq!(value["success"], false);
        assert_eq!(value["error_message"], "boom");
        assert_eq!(value["processor"], "processor-2");
        assert!(value.get("credential").is_none());
    }

    #[test]
    fn test_success_has_null_error() {
        let status = TaskStatus::new(&job(), Ok(()), "processor-1");
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["success"], true);
        assert!(value["error_message"].is_null());
    }

    #[test]
    fn test_endpoint_joins_trailing_slash() {
        let notifier = HttpStatusNotifier::new("https://front.example/");
        assert_eq!(notifier.endpoint(), "https://front.example/api/notify");
    }
}

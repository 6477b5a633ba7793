//! Webhook signal executor.
//!
//! POSTs a signal's payload as JSON to a webhook. The target URL is the
//! payload's `webhook_url` field when present, otherwise the configured URL.
//! A 200 or 201 response counts as success; anything else is a failure that
//! the lifecycle tracker may retry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use cadence_core::Signal;
use cadence_registry::ExecutionSettings;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

use crate::capability::{BoxFuture, SignalExecutor};
use crate::error::ExecutionError;

/// Payload field that overrides the configured URL.
const URL_FIELD: &str = "webhook_url";

pub struct WebhookExecutor {
    client: Client,
    url: Option<String>,
    timeout_secs: AtomicU64,
}

impl WebhookExecutor {
    /// Create an executor.
    ///
    /// # Arguments
    /// * `url` - Fallback URL for signals without a `webhook_url` field
    /// * `timeout` - Per-request timeout
    pub fn new(url: Option<String>, timeout: Duration) -> Result<Self, ExecutionError> {
        let client = Client::builder()
            .build()
            .map_err(|e| ExecutionError::Http(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            url,
            timeout_secs: AtomicU64::new(timeout.as_secs()),
        })
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.load(Ordering::Relaxed))
    }

    fn target_url(&self, signal: &Signal) -> Result<String, ExecutionError> {
        signal
            .payload
            .get(URL_FIELD)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| self.url.clone())
            .ok_or(ExecutionError::MissingUrl)
    }
}

impl SignalExecutor for WebhookExecutor {
    fn execute<'a>(&'a self, signal: &'a Signal) -> BoxFuture<'a, Result<(), ExecutionError>> {
        Box::pin(async move {
            let url = self.target_url(signal)?;
            info!(signal_id = %signal.id, strategy = %signal.strategy_id, url = %url, "Executing webhook");

            let response = self
                .client
                .post(&url)
                .timeout(self.timeout())
                .json(&signal.payload)
                .send()
                .await
                .map_err(|e| ExecutionError::Http(e.to_string()))?;

            let status = response.status();
            if status == StatusCode::OK || status == StatusCode::CREATED {
                debug!(signal_id = %signal.id, status = status.as_u16(), "Webhook accepted");
                return Ok(());
            }

            let body = response.text().await.unwrap_or_default();
            warn!(signal_id = %signal.id, status = status.as_u16(), body = %body, "Webhook rejected");
            Err(ExecutionError::Status {
                status: status.as_u16(),
                body,
            })
        })
    }

    fn apply_settings(&self, settings: &ExecutionSettings) {
        self.timeout_secs
            .store(settings.webhook_timeout_seconds, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::SignalId;
    use chrono::Utc;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// One-shot HTTP server answering with `status_line`. Returns its URL and
    /// a handle yielding the raw request.
    async fn serve_once(status_line: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let mut request = Vec::new();
            // Read until headers and the JSON body have arrived
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if n == 0 || (text.contains("\r\n\r\n") && text.trim_end().ends_with('}')) {
                    break;
                }
            }
            let response = format!("HTTP/1.1 {status_line}\r\nContent-Length: 2\r\nConnection: close\r\n\r\nno");
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });
        (format!("http://{addr}/hook"), handle)
    }

    fn signal(payload: serde_json::Value) -> Signal {
        Signal::new_pending(SignalId(1), "rotation_etf".into(), Utc::now(), payload)
    }

    #[tokio::test]
    async fn test_created_is_success() {
        let (url, server) = serve_once("201 Created").await;
        let exec = WebhookExecutor::new(Some(url), Duration::from_secs(5)).unwrap();

        exec.execute(&signal(json!({"symbol": "NIFTYBEES"}))).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /hook"));
        assert!(request.contains("NIFTYBEES"));
    }

    #[tokio::test]
    async fn test_payload_url_overrides_config_and_errors_surface() {
        let (url, server) = serve_once("500 Internal Server Error").await;
        let exec = WebhookExecutor::new(Some("http://127.0.0.1:9/unused".into()), Duration::from_secs(5))
            .unwrap();

        let err = exec
            .execute(&signal(json!({"webhook_url": url})))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Status { status: 500, .. }));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_url() {
        let exec = WebhookExecutor::new(None, Duration::from_secs(5)).unwrap();
        assert!(matches!(
            exec.execute(&signal(json!({}))).await,
            Err(ExecutionError::MissingUrl)
        ));
    }

    #[test]
    fn test_apply_settings_updates_timeout() {
        let exec = WebhookExecutor::new(None, Duration::from_secs(30)).unwrap();
        let settings = ExecutionSettings {
            webhook_timeout_seconds: 7,
            ..ExecutionSettings::default()
        };
        exec.apply_settings(&settings);
        assert_eq!(exec.timeout(), Duration::from_secs(7));
    }
}

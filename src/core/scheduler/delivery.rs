use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info, warn};

pub const DEFAULT_RETRY: u32 = 3;
pub const DEFAULT_BACKOFF: u32 = 2;

fn default_retry() -> u32 {
    DEFAULT_RETRY
}

fn default_backoff() -> u32 {
    DEFAULT_BACKOFF
}

/// Keyword arguments every scheduled job is registered with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobKwargs {
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default = "default_retry")]
    pub retry: u32,
    #[serde(default = "default_backoff")]
    pub backoff: u32,
}

/// Unit of work the execution engine runs on each fire.
#[async_trait]
pub trait SchedulerTask: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` is a handled, non-fatal outcome (delivery gave up).
    async fn job_func(&self, args: Value, kwargs: JobKwargs) -> Result<Option<Value>>;
}

/// POSTs the job payload to the tenant's webhook with exponential backoff.
pub struct CallWebhook {
    client: reqwest::Client,
    backoff_unit: Duration,
}

impl CallWebhook {
    pub fn new(backoff_unit: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            backoff_unit,
        })
    }

    fn delay_for(&self, backoff: u32, attempt: u32) -> Duration {
        self.backoff_unit.saturating_mul(backoff.saturating_pow(attempt))
    }

    async fn call_webhook_with_retries(
        &self,
        url: &str,
        payload: &Value,
        retries: u32,
        backoff: u32,
    ) -> Option<Value> {
        let mut attempt: u32 = 0;
        while attempt < retries {
            match self.client.post(url).json(payload).send().await {
                Ok(response) if response.status().is_success() => {
                    info!("Webhook {} accepted the payload ({})", url, response.status());
                    return Some(read_body(response).await);
                }
                Ok(response) if response.status().as_u16() < 500 => {
                    error!(
                        "Webhook {} rejected the payload with {}; not retrying",
                        url,
                        response.status()
                    );
                    break;
                }
                Ok(response) => {
                    warn!(
                        "Webhook {} failed with {} (attempt {}/{})",
                        url,
                        response.status(),
                        attempt + 1,
                        retries
                    );
                }
                Err(e) => {
                    warn!(
                        "Webhook {} unreachable (attempt {}/{}): {}",
                        url,
                        attempt + 1,
                        retries,
                        e
                    );
                }
            }
            attempt += 1;
            if attempt < retries {
                tokio::time::sleep(self.delay_for(backoff, attempt)).await;
            }
        }
        error!("Giving up on webhook {} after {} attempt(s)", url, attempt.max(1));
        None
    }
}

async fn read_body(response: reqwest::Response) -> Value {
    let text = response.text().await.unwrap_or_default();
    if text.trim().is_empty() {
        return Value::Null;
    }
    match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(_) => Value::String(text),
    }
}

#[async_trait]
impl SchedulerTask for CallWebhook {
    fn name(&self) -> &str {
        "call_webhook"
    }

    async fn job_func(&self, _args: Value, kwargs: JobKwargs) -> Result<Option<Value>> {
        let url = kwargs
            .webhook_url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| anyhow!("webhook_url is required"))?;
        Ok(self
            .call_webhook_with_retries(&url, &kwargs.payload, kwargs.retry, kwargs.backoff)
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[derive(Clone)]
    struct Hook {
        status: StatusCode,
        hits: Arc<Mutex<Vec<(Instant, Value)>>>,
    }

    async fn receive(State(hook): State<Hook>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        hook.hits.lock().unwrap().push((Instant::now(), body));
        (hook.status, Json(json!({ "received": true })))
    }

    async fn spawn_hook(status: StatusCode) -> (String, Arc<Mutex<Vec<(Instant, Value)>>>) {
        let hits = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new().route("/hook", post(receive)).with_state(Hook {
            status,
            hits: hits.clone(),
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/hook", addr), hits)
    }

    fn kwargs(url: Option<String>) -> JobKwargs {
        JobKwargs {
            webhook_url: url,
            payload: json!({ "event": "weekly_report" }),
            retry: 3,
            backoff: 2,
        }
    }

    #[tokio::test]
    async fn success_returns_the_response_body() {
        let (url, hits) = spawn_hook(StatusCode::OK).await;
        let task = CallWebhook::new(Duration::from_millis(10)).unwrap();

        let result = task.job_func(Value::Null, kwargs(Some(url))).await.unwrap();
        assert_eq!(result, Some(json!({ "received": true })));
        let hits = hits.lock().unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1, json!({ "event": "weekly_report" }));
    }

    #[tokio::test]
    async fn client_error_is_attempted_once() {
        let (url, hits) = spawn_hook(StatusCode::NOT_FOUND).await;
        let task = CallWebhook::new(Duration::from_millis(10)).unwrap();

        let result = task.job_func(Value::Null, kwargs(Some(url))).await.unwrap();
        assert_eq!(result, None);
        assert_eq!(hits.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn server_error_retries_with_growing_delays() {
        let (url, hits) = spawn_hook(StatusCode::INTERNAL_SERVER_ERROR).await;
        let task = CallWebhook::new(Duration::from_millis(25)).unwrap();

        let result = task.job_func(Value::Null, kwargs(Some(url))).await.unwrap();
        assert_eq!(result, None);

        let hits = hits.lock().unwrap();
        assert_eq!(hits.len(), 3);
        let first_gap = hits[1].0 - hits[0].0;
        let second_gap = hits[2].0 - hits[1].0;
        assert!(first_gap >= Duration::from_millis(50), "first gap {:?}", first_gap);
        assert!(second_gap >= Duration::from_millis(100), "second gap {:?}", second_gap);
        assert!(second_gap > first_gap);
    }

    #[tokio::test]
    async fn transport_errors_are_retried() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let task = CallWebhook::new(Duration::from_millis(1)).unwrap();

        let started = Instant::now();
        let result = task
            .job_func(Value::Null, kwargs(Some(format!("http://{}/hook", addr))))
            .await
            .unwrap();
        assert_eq!(result, None);
        // Two sleeps of 2ms and 4ms separate the three attempts.
        assert!(started.elapsed() >= Duration::from_millis(6));
    }

    #[tokio::test]
    async fn missing_webhook_url_fails_immediately() {
        let task = CallWebhook::new(Duration::from_millis(1)).unwrap();
        assert!(task.job_func(Value::Null, kwargs(None)).await.is_err());
        assert!(
            task.job_func(Value::Null, kwargs(Some("  ".into())))
                .await
                .is_err()
        );
    }

    #[test]
    fn kwargs_default_retry_policy() {
        let parsed: JobKwargs =
            serde_json::from_value(json!({ "webhook_url": "https://x.test/h" })).unwrap();
        assert_eq!((parsed.retry, parsed.backoff), (3, 2));
        assert_eq!(parsed.payload, Value::Null);
    }
}

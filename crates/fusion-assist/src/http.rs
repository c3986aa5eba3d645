//! Shared plumbing for the HTTP provider backends.
//!
//! Transient failures (HTTP 429, 5xx, transport errors) are retried with
//! exponential backoff up to `max_retries` times: 1s, 2s, 4s, ... capped at
//! 32s. Other statuses fail immediately. With the default of zero retries
//! each provider call is single-shot.

use anyhow::{anyhow, bail, Context, Result};
use std::future::Future;
use std::time::Duration;

use fusion_core::Error;

use crate::config::ProvidersConfig;

pub fn build_client(providers: &ProvidersConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(providers.timeout())
        .build()
        .context("Failed to build HTTP client")
}

/// Read an API key from `configured` or the provider's conventional variable.
pub fn api_key(configured: Option<&str>, default_env: &str) -> Result<String> {
    let var = configured.unwrap_or(default_env);
    match std::env::var(var) {
        Ok(key) if !key.is_empty() => Ok(key),
        _ => bail!("{} environment variable not set", var),
    }
}

/// Send a JSON request built by `request`, retrying transient failures.
///
/// `label` names the backend in error messages.
pub async fn send_json<F>(label: &str, max_retries: u32, request: F) -> Result<serde_json::Value>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(label, attempt, ?delay, "retrying provider request");
            tokio::time::sleep(delay).await;
        }

        match request().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json()
                        .await
                        .with_context(|| format!("{} returned invalid JSON", label));
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow!("{} API error {}: {}", label, status, body_text));
                    continue;
                }
                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::Error::new(e).context(format!("{} request failed", label)));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} request failed after retries", label)))
}

/// Bound a provider call by `after`, classifying the outcome.
pub async fn bounded<T, Fut>(
    operation: &'static str,
    after: Duration,
    call: Fut,
) -> fusion_core::Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Error::provider(e)),
        Err(_) => Err(Error::TimedOut { operation, after }),
    }
}

/// Strip a trailing slash so paths can be appended with `format!`.
pub fn base_url(configured: Option<&str>, default: &str) -> String {
    configured.unwrap_or(default).trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: fusion_core::Result<()> = bounded("embed", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Error::TimedOut { operation: "embed", .. })));
    }

    #[tokio::test]
    async fn test_bounded_classifies_failure() {
        let result: fusion_core::Result<()> =
            bounded("complete", Duration::from_secs(1), async { Err(anyhow!("boom")) }).await;
        match result {
            Err(Error::Provider(msg)) => assert!(msg.contains("boom")),
            other => panic!("unexpected: {:?}", other.err()),
        }
    }

    #[test]
    fn test_base_url_trims() {
        assert_eq!(base_url(Some("http://x:1/"), "http://d"), "http://x:1");
        assert_eq!(base_url(None, "http://d"), "http://d");
    }
}

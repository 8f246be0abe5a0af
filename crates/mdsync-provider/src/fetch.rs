//! Shared retry, backoff and response classification for provider calls.
//!
//! Every provider GET goes through [`FetchWrapper::get`], which never returns
//! an error: callers receive a [`FetchOutcome`] and decide what "empty" means
//! for them.

use crate::error::{ProviderError, ProviderResult};
use crate::governor::RateGovernor;
use mdsync_telemetry::Metrics;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Retry tuning for one provider.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Sleep after attempt `n` is `base_delay * 2^n`.
    pub base_delay: Duration,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Classified result of a provider GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// 2xx with a body that is not a throttle notice.
    Body(String),
    /// 404: the provider does not know the resource.
    NotFound,
    /// 401/403: credentials rejected.
    Unauthorized,
    /// Every attempt was throttled or failed.
    Exhausted,
}

impl FetchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Body(_) => "success",
            Self::NotFound => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::Exhausted => "exhausted",
        }
    }

    pub fn into_body(self) -> Option<String> {
        match self {
            Self::Body(body) => Some(body),
            _ => None,
        }
    }
}

enum Attempt {
    Done(FetchOutcome),
    Throttled,
    Failed(String),
}

/// Retrying HTTP GET bound to one provider's governor.
#[derive(Debug, Clone)]
pub struct FetchWrapper {
    client: Client,
    governor: Arc<RateGovernor>,
    policy: RetryPolicy,
    /// Substrings that mark a 2xx body as a throttle notice.
    throttle_markers: Vec<String>,
}

impl FetchWrapper {
    pub fn new(governor: Arc<RateGovernor>, policy: RetryPolicy) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(policy.timeout)
            .build()
            .map_err(|e| ProviderError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            governor,
            policy,
            throttle_markers: Vec::new(),
        })
    }

    pub fn with_throttle_markers(mut self, markers: &[&str]) -> Self {
        self.throttle_markers = markers.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn governor(&self) -> &Arc<RateGovernor> {
        &self.governor
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// GET `url` with `query`, retrying transient failures.
    ///
    /// `query` may carry the API key; only `url` is ever logged.
    pub async fn get(&self, url: &str, query: &[(&str, String)]) -> FetchOutcome {
        let provider = self.governor.provider();
        let max_retries = self.policy.max_retries.max(1);

        for attempt in 0..max_retries {
            let result = match self.governor.acquire().await {
                Ok(permit) => {
                    let started = Instant::now();
                    let result = self.attempt(url, query).await;
                    self.governor.record_latency(started.elapsed());
                    drop(permit);
                    result
                }
                Err(e) => {
                    warn!(provider = %provider, error = %e, "Could not acquire governor permit");
                    return FetchOutcome::Exhausted;
                }
            };

            match result {
                Attempt::Done(outcome) => {
                    match &outcome {
                        FetchOutcome::Body(_) => self.governor.report_success(),
                        FetchOutcome::NotFound => self.governor.report_not_found(),
                        FetchOutcome::Unauthorized => {
                            self.governor.report_unauthorized();
                            warn!(provider = %provider, url, "Provider rejected credentials");
                        }
                        FetchOutcome::Exhausted => {}
                    }
                    Metrics::provider_call(provider.as_str(), outcome.label());
                    return outcome;
                }
                Attempt::Throttled => {
                    self.governor.report_throttled();
                    Metrics::provider_call(provider.as_str(), "throttled");
                    debug!(provider = %provider, url, attempt, "Throttled");
                }
                Attempt::Failed(reason) => {
                    self.governor.report_error();
                    Metrics::provider_call(provider.as_str(), "error");
                    warn!(provider = %provider, url, attempt, reason = %reason, "Provider call failed");
                }
            }

            if attempt + 1 < max_retries {
                tokio::time::sleep(self.policy.delay_for(attempt)).await;
            }
        }

        warn!(provider = %provider, url, attempts = max_retries, "Retries exhausted");
        Metrics::provider_call(provider.as_str(), FetchOutcome::Exhausted.label());
        FetchOutcome::Exhausted
    }

    async fn attempt(&self, url: &str, query: &[(&str, String)]) -> Attempt {
        let response = match self.client.get(url).query(query).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Attempt::Failed("timeout".to_string()),
            Err(e) => return Attempt::Failed(format!("transport: {}", e.without_url())),
        };

        let status = response.status();
        match status {
            s if s.is_success() => match response.text().await {
                Ok(body) if self.is_throttle_notice(&body) => Attempt::Throttled,
                Ok(body) => Attempt::Done(FetchOutcome::Body(body)),
                Err(e) => Attempt::Failed(format!("body read: {}", e.without_url())),
            },
            StatusCode::TOO_MANY_REQUESTS => Attempt::Throttled,
            StatusCode::NOT_FOUND => Attempt::Done(FetchOutcome::NotFound),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Attempt::Done(FetchOutcome::Unauthorized)
            }
            other => Attempt::Failed(format!("HTTP {other}")),
        }
    }

    fn is_throttle_notice(&self, body: &str) -> bool {
        // Throttle notices are short JSON objects; skip scanning large payloads.
        body.len() < 4096 && self.throttle_markers.iter().any(|m| body.contains(m.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governor::GovernorConfig;
    use mdsync_core::ProviderId;

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
    }

    #[test]
    fn test_throttle_marker_detection() {
        let governor = Arc::new(RateGovernor::new(
            ProviderId::ALPHA_VANTAGE,
            GovernorConfig::default(),
        ));
        let wrapper = FetchWrapper::new(governor, RetryPolicy::default())
            .unwrap()
            .with_throttle_markers(&["\"Note\""]);
        assert!(wrapper.is_throttle_notice(r#"{"Note": "Thank you for using Alpha Vantage!"}"#));
        assert!(!wrapper.is_throttle_notice("timestamp,open,high\n"));
    }

    #[test]
    fn test_outcome_into_body() {
        assert_eq!(
            FetchOutcome::Body("x".into()).into_body().as_deref(),
            Some("x")
        );
        assert_eq!(FetchOutcome::NotFound.into_body(), None);
    }
}

//! Shared fixtures for provider integration tests.
#![allow(dead_code)]

pub mod mock_http;

use mdsync_core::ProviderId;
use mdsync_provider::{FetchWrapper, GovernorConfig, RateGovernor, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;

/// Governor with millisecond backoffs so retry paths run fast.
pub fn fast_governor(provider: ProviderId) -> Arc<RateGovernor> {
    Arc::new(RateGovernor::new(
        provider,
        GovernorConfig {
            concurrency: 2,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            backoff_floor: Duration::from_millis(1),
            ..Default::default()
        },
    ))
}

pub fn fast_wrapper(provider: ProviderId) -> FetchWrapper {
    FetchWrapper::new(
        fast_governor(provider),
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        },
    )
    .unwrap()
}

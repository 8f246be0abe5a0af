//! Per-provider concurrency and adaptive backoff.
//!
//! Two independent throttles compose here:
//! - a semaphore bounding simultaneous in-flight calls, and
//! - a backoff delay every caller sleeps before acquiring a permit.
//!
//! Throttling signals double the backoff (1s start, capped); a streak of
//! successes halves it until it falls below the floor and snaps to zero.

use crate::error::{ProviderError, ProviderResult};
use dashmap::DashMap;
use mdsync_core::ProviderId;
use mdsync_telemetry::{Metrics, ProviderCallSnapshot};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Governor tuning.
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Maximum simultaneous in-flight calls.
    pub concurrency: usize,
    /// Consecutive successes required before the backoff is halved.
    pub success_streak: u32,
    /// Backoff applied on the first throttle.
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Halved backoffs below this value become zero.
    pub backoff_floor: Duration,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            success_streak: 10,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            backoff_floor: Duration::from_millis(125),
        }
    }
}

#[derive(Debug, Default)]
struct GovernorState {
    backoff: Duration,
    success_streak: u32,
    failure_streak: u32,
}

#[derive(Debug, Default)]
struct CallCounters {
    calls: AtomicU64,
    successes: AtomicU64,
    throttled: AtomicU64,
    errors: AtomicU64,
    not_found: AtomicU64,
    unauthorized: AtomicU64,
    latency_total_us: AtomicU64,
    latency_samples: AtomicU64,
}

/// Permit for one in-flight call. Returned to the governor on drop.
#[derive(Debug)]
pub struct GovernorPermit {
    _permit: OwnedSemaphorePermit,
    provider: ProviderId,
}

impl Drop for GovernorPermit {
    fn drop(&mut self) {
        Metrics::governor_inflight_dec(self.provider.as_str());
    }
}

/// Concurrency and backoff governor for one provider.
#[derive(Debug)]
pub struct RateGovernor {
    provider: ProviderId,
    config: GovernorConfig,
    semaphore: Arc<Semaphore>,
    state: Mutex<GovernorState>,
    counters: CallCounters,
}

impl RateGovernor {
    pub fn new(provider: ProviderId, config: GovernorConfig) -> Self {
        let permits = config.concurrency.max(1);
        Self {
            provider,
            config,
            semaphore: Arc::new(Semaphore::new(permits)),
            state: Mutex::new(GovernorState::default()),
            counters: CallCounters::default(),
        }
    }

    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    /// Configured concurrency; also used as the worker-pool width.
    pub fn concurrency(&self) -> usize {
        self.config.concurrency.max(1)
    }

    /// Sleep off the current backoff, then wait for a free permit.
    pub async fn acquire(&self) -> ProviderResult<GovernorPermit> {
        let backoff = self.backoff();
        if !backoff.is_zero() {
            debug!(
                provider = %self.provider,
                backoff_ms = backoff.as_millis() as u64,
                "Sleeping governor backoff before acquire"
            );
            tokio::time::sleep(backoff).await;
        }

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ProviderError::GovernorClosed(self.provider.as_str()))?;
        Metrics::governor_inflight_inc(self.provider.as_str());

        Ok(GovernorPermit {
            _permit: permit,
            provider: self.provider,
        })
    }

    /// Return a permit explicitly. Dropping it has the same effect.
    pub fn release(&self, permit: GovernorPermit) {
        drop(permit);
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn backoff(&self) -> Duration {
        self.state.lock().backoff
    }

    pub fn report_success(&self) {
        self.counters.calls.fetch_add(1, Ordering::Relaxed);
        self.counters.successes.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock();
        state.failure_streak = 0;
        state.success_streak += 1;
        if state.success_streak >= self.config.success_streak {
            state.success_streak = 0;
            if !state.backoff.is_zero() {
                let halved = state.backoff / 2;
                state.backoff = if halved < self.config.backoff_floor {
                    Duration::ZERO
                } else {
                    halved
                };
                debug!(
                    provider = %self.provider,
                    backoff_ms = state.backoff.as_millis() as u64,
                    "Backoff decreased after success streak"
                );
                Metrics::governor_backoff(self.provider.as_str(), state.backoff.as_millis() as f64);
            }
        }
    }

    pub fn report_throttled(&self) {
        self.counters.calls.fetch_add(1, Ordering::Relaxed);
        self.counters.throttled.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock();
        state.success_streak = 0;
        state.failure_streak += 1;
        let next = if state.backoff.is_zero() {
            self.config.initial_backoff
        } else {
            state.backoff.saturating_mul(2)
        };
        state.backoff = next.min(self.config.max_backoff);
        warn!(
            provider = %self.provider,
            backoff_ms = state.backoff.as_millis() as u64,
            failure_streak = state.failure_streak,
            "Provider throttled, backoff increased"
        );
        Metrics::governor_backoff(self.provider.as_str(), state.backoff.as_millis() as f64);
    }

    /// Transport failure, timeout or 5xx. Breaks the success streak only.
    pub fn report_error(&self) {
        self.counters.calls.fetch_add(1, Ordering::Relaxed);
        self.counters.errors.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock();
        state.success_streak = 0;
        state.failure_streak += 1;
    }

    pub fn report_not_found(&self) {
        self.counters.calls.fetch_add(1, Ordering::Relaxed);
        self.counters.not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report_unauthorized(&self) {
        self.counters.calls.fetch_add(1, Ordering::Relaxed);
        self.counters.unauthorized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latency(&self, latency: Duration) {
        self.counters
            .latency_total_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        self.counters.latency_samples.fetch_add(1, Ordering::Relaxed);
        Metrics::provider_latency(self.provider.as_str(), latency.as_secs_f64() * 1000.0);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().failure_streak
    }

    pub fn snapshot(&self) -> ProviderCallSnapshot {
        let c = &self.counters;
        let samples = c.latency_samples.load(Ordering::Relaxed);
        let mean_latency_ms = if samples > 0 {
            c.latency_total_us.load(Ordering::Relaxed) as f64 / samples as f64 / 1000.0
        } else {
            0.0
        };
        ProviderCallSnapshot {
            provider: self.provider.to_string(),
            calls: c.calls.load(Ordering::Relaxed),
            successes: c.successes.load(Ordering::Relaxed),
            throttled: c.throttled.load(Ordering::Relaxed),
            errors: c.errors.load(Ordering::Relaxed),
            not_found: c.not_found.load(Ordering::Relaxed),
            unauthorized: c.unauthorized.load(Ordering::Relaxed),
            mean_latency_ms,
            final_backoff_ms: self.backoff().as_millis() as u64,
        }
    }
}

/// One governor per provider, built once at startup and shared by reference.
#[derive(Debug, Default)]
pub struct GovernorRegistry {
    governors: DashMap<ProviderId, Arc<RateGovernor>>,
}

impl GovernorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a governor for `provider`, or return the existing one.
    pub fn register(&self, provider: ProviderId, config: GovernorConfig) -> Arc<RateGovernor> {
        self.governors
            .entry(provider)
            .or_insert_with(|| Arc::new(RateGovernor::new(provider, config)))
            .clone()
    }

    pub fn get(&self, provider: ProviderId) -> Option<Arc<RateGovernor>> {
        self.governors.get(&provider).map(|g| g.clone())
    }

    pub fn len(&self) -> usize {
        self.governors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.governors.is_empty()
    }

    /// Call snapshots for every registered provider, sorted by name.
    pub fn snapshots(&self) -> Vec<ProviderCallSnapshot> {
        let mut snapshots: Vec<_> = self.governors.iter().map(|g| g.snapshot()).collect();
        snapshots.sort_by(|a, b| a.provider.cmp(&b.provider));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST: ProviderId = ProviderId::new("governor_test");

    fn governor(max_backoff_secs: u64) -> RateGovernor {
        RateGovernor::new(
            TEST,
            GovernorConfig {
                concurrency: 2,
                max_backoff: Duration::from_secs(max_backoff_secs),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_throttle_doubles_up_to_cap() {
        let g = governor(30);
        assert_eq!(g.backoff(), Duration::ZERO);

        let mut previous = g.backoff();
        for _ in 0..5 {
            g.report_throttled();
            assert!(g.backoff() > previous);
            previous = g.backoff();
        }
        assert_eq!(g.backoff(), Duration::from_secs(16));

        g.report_throttled();
        assert_eq!(g.backoff(), Duration::from_secs(30));
        g.report_throttled();
        assert_eq!(g.backoff(), Duration::from_secs(30));
    }

    #[test]
    fn test_success_streak_halves_backoff() {
        let g = governor(60);
        g.report_throttled();
        g.report_throttled();
        assert_eq!(g.backoff(), Duration::from_secs(2));

        for _ in 0..9 {
            g.report_success();
        }
        assert_eq!(g.backoff(), Duration::from_secs(2));
        g.report_success();
        assert_eq!(g.backoff(), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_snaps_to_zero_below_floor() {
        let g = governor(60);
        g.report_throttled();
        let mut previous = g.backoff();
        while !g.backoff().is_zero() {
            for _ in 0..10 {
                g.report_success();
            }
            assert!(g.backoff() < previous);
            previous = g.backoff();
        }
        for _ in 0..10 {
            g.report_success();
        }
        assert_eq!(g.backoff(), Duration::ZERO);
    }

    #[test]
    fn test_throttle_resets_success_streak() {
        let g = governor(60);
        g.report_throttled();
        g.report_throttled();
        for _ in 0..9 {
            g.report_success();
        }
        g.report_throttled();
        assert_eq!(g.backoff(), Duration::from_secs(4));
        for _ in 0..9 {
            g.report_success();
        }
        assert_eq!(g.backoff(), Duration::from_secs(4));
    }

    #[test]
    fn test_error_breaks_streak_without_backoff_change() {
        let g = governor(60);
        g.report_throttled();
        for _ in 0..5 {
            g.report_success();
        }
        g.report_error();
        assert_eq!(g.backoff(), Duration::from_secs(1));
        assert_eq!(g.consecutive_failures(), 1);
        for _ in 0..5 {
            g.report_success();
        }
        assert_eq!(g.backoff(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_permits_bound_concurrency() {
        let g = governor(60);
        let a = g.acquire().await.unwrap();
        let _b = g.acquire().await.unwrap();
        assert_eq!(g.available_permits(), 0);

        let pending = tokio::time::timeout(Duration::from_millis(20), g.acquire()).await;
        assert!(pending.is_err());

        g.release(a);
        assert_eq!(g.available_permits(), 1);
        let _c = g.acquire().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_sleeps_backoff_first() {
        let g = governor(60);
        g.report_throttled();
        let start = tokio::time::Instant::now();
        let _permit = g.acquire().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[test]
    fn test_snapshot_counts() {
        let g = governor(60);
        g.report_success();
        g.report_not_found();
        g.report_unauthorized();
        g.report_error();
        g.record_latency(Duration::from_millis(10));
        g.record_latency(Duration::from_millis(30));

        let s = g.snapshot();
        assert_eq!(s.provider, "governor_test");
        assert_eq!(s.calls, 4);
        assert_eq!(s.successes, 1);
        assert_eq!(s.not_found, 1);
        assert_eq!(s.unauthorized, 1);
        assert_eq!(s.errors, 1);
        assert!((s.mean_latency_ms - 20.0).abs() < 0.01);
    }

    #[test]
    fn test_registry_returns_shared_instance() {
        let registry = GovernorRegistry::new();
        let a = registry.register(ProviderId::TIINGO, GovernorConfig::default());
        let b = registry.register(ProviderId::TIINGO, GovernorConfig::default());
        assert!(Arc::ptr_eq(&a, &b));
        a.report_throttled();
        assert_eq!(
            registry.get(ProviderId::TIINGO).unwrap().backoff(),
            Duration::from_secs(1)
        );
        assert!(registry.get(ProviderId::POLYGON).is_none());
        registry.register(ProviderId::POLYGON, GovernorConfig::default());
        let names: Vec<_> = registry.snapshots().into_iter().map(|s| s.provider).collect();
        assert_eq!(names, vec!["polygon", "tiingo"]);
    }
}

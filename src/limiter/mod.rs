// src/limiter/mod.rs
//! Per-service admission control.
//!
//! Three independent quota dimensions per service: request count over the
//! main window, payload characters over the same window, and a short burst
//! sub-window. A request is admitted only when all configured dimensions
//! pass. Quota exhaustion is flow control, not an error: callers get
//! `{allowed, wait}` and decide whether to sleep and retry.
//!
//! `admit` is a pure check and `record` a pure mutation; concurrent callers
//! should use `acquire`, which does check-then-reserve under one per-service
//! lock so two callers can never both win the last unit of quota.

pub mod persist;
pub mod report;

use crate::clock::TimeSource;
use crate::config::ServiceLimits;
use crate::metrics::ensure_metrics_described;
use metrics::counter;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

pub use report::{ServiceUsage, UsageStatus};

/// Upper bound on a single retry sleep inside `acquire`, so callers stay
/// responsive to their own timeout even when the window suggests hours.
const MAX_RETRY_SLEEP: Duration = Duration::from_secs(300);

/// Outcome of an admission check. `wait` is a hint: the minimum remaining
/// time across the quota windows that failed (zero when allowed).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdmitDecision {
    pub allowed: bool,
    pub wait: Duration,
}

impl AdmitDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            wait: Duration::ZERO,
        }
    }

    fn deny(wait: Duration) -> Self {
        Self {
            allowed: false,
            wait,
        }
    }
}

/// Mutable quota state for one service. Guarded by its own mutex so
/// services never contend with each other.
#[derive(Debug, Default)]
pub(crate) struct ServiceQuota {
    pub(crate) window_start: Duration,
    pub(crate) requests_made: u32,
    pub(crate) characters_used: u64,
    pub(crate) burst_start: Duration,
    pub(crate) burst_count: u32,
}

impl ServiceQuota {
    fn new(now: Duration) -> Self {
        Self {
            window_start: now,
            burst_start: now,
            ..Default::default()
        }
    }

    /// Lazily zero expired windows. Main window and burst sub-window reset
    /// independently.
    fn reset_expired(&mut self, limits: &ServiceLimits, now: Duration) {
        if now.saturating_sub(self.window_start) >= Duration::from_secs(limits.window_secs) {
            self.window_start = now;
            self.requests_made = 0;
            self.characters_used = 0;
        }
        if now.saturating_sub(self.burst_start) >= Duration::from_secs(limits.burst_window_secs) {
            self.burst_start = now;
            self.burst_count = 0;
        }
    }

    fn evaluate(&self, limits: &ServiceLimits, now: Duration, needed: u64) -> AdmitDecision {
        let mut wait: Option<Duration> = None;
        let mut track = |remaining: Duration| {
            wait = Some(match wait {
                Some(w) => w.min(remaining),
                None => remaining,
            });
        };

        let window = Duration::from_secs(limits.window_secs);
        let window_remaining = window.saturating_sub(now.saturating_sub(self.window_start));

        if self.requests_made >= limits.max_requests {
            track(window_remaining);
        }
        if let Some(max_chars) = limits.max_characters {
            if self.characters_used + needed > max_chars {
                track(window_remaining);
            }
        }
        if let Some(burst_limit) = limits.burst_limit {
            if self.burst_count >= burst_limit {
                let burst_window = Duration::from_secs(limits.burst_window_secs);
                track(burst_window.saturating_sub(now.saturating_sub(self.burst_start)));
            }
        }

        match wait {
            Some(w) => AdmitDecision::deny(w),
            None => AdmitDecision::allow(),
        }
    }

    fn consume(&mut self, characters: u64) {
        self.requests_made += 1;
        self.burst_count += 1;
        self.characters_used += characters;
    }
}

/// Multi-dimensional per-service rate limiter.
pub struct RateLimiter {
    clock: Arc<dyn TimeSource>,
    limits: HashMap<String, ServiceLimits>,
    states: Mutex<HashMap<String, Arc<Mutex<ServiceQuota>>>>,
}

impl RateLimiter {
    pub fn new(limits: HashMap<String, ServiceLimits>, clock: Arc<dyn TimeSource>) -> Self {
        ensure_metrics_described();
        Self {
            clock,
            limits,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Static limits for a service, if configured. Lets callers compare a
    /// payload against `max_characters` to tell "wait and retry" apart from
    /// "unsplittable oversized request".
    pub fn limits(&self, service: &str) -> Option<&ServiceLimits> {
        self.limits.get(service)
    }

    fn quota_for(&self, service: &str) -> Arc<Mutex<ServiceQuota>> {
        let mut states = self.states.lock().expect("limiter state mutex poisoned");
        states
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ServiceQuota::new(self.clock.now()))))
            .clone()
    }

    /// Pure admission check. Does not reserve quota.
    pub fn admit(&self, service: &str, characters_needed: u64) -> AdmitDecision {
        let Some(limits) = self.limits.get(service) else {
            // Unconfigured services are not throttled.
            debug!(target: "limiter", service, "no limits configured; admitting");
            return AdmitDecision::allow();
        };
        let quota = self.quota_for(service);
        let mut q = quota.lock().expect("service quota mutex poisoned");
        let now = self.clock.now();
        q.reset_expired(limits, now);
        let decision = q.evaluate(limits, now, characters_needed);
        if decision.allowed {
            counter!("limiter_admitted_total", "service" => service.to_string()).increment(1);
        } else {
            counter!("limiter_denied_total", "service" => service.to_string()).increment(1);
        }
        decision
    }

    /// Consume one request plus `characters_used` from the budget.
    pub fn record(&self, service: &str, characters_used: u64) {
        let Some(limits) = self.limits.get(service) else {
            return;
        };
        let quota = self.quota_for(service);
        let mut q = quota.lock().expect("service quota mutex poisoned");
        q.reset_expired(limits, self.clock.now());
        q.consume(characters_used);
    }

    /// Atomic check-then-reserve with a bounded retry loop.
    ///
    /// Holds the per-service lock across the check and the reservation, so
    /// concurrent callers are serialized per service. Between retries the
    /// lock is released and the task sleeps for the limiter's wait hint,
    /// capped at 300 s and at the caller's remaining `timeout`. Always
    /// returns a definitive decision; never hangs.
    pub async fn acquire(
        &self,
        service: &str,
        characters_needed: u64,
        timeout: Duration,
    ) -> AdmitDecision {
        let Some(limits) = self.limits.get(service) else {
            debug!(target: "limiter", service, "no limits configured; admitting");
            return AdmitDecision::allow();
        };

        // Larger than the whole budget: permanent rejection, retrying is
        // pointless. The caller must split or skip the payload.
        if let Some(max_chars) = limits.max_characters {
            if characters_needed > max_chars {
                tracing::warn!(
                    target: "limiter",
                    service,
                    characters_needed,
                    max_characters = max_chars,
                    "payload exceeds entire character budget"
                );
                counter!("limiter_denied_total", "service" => service.to_string()).increment(1);
                return AdmitDecision::deny(Duration::from_secs(limits.window_secs));
            }
        }

        let quota = self.quota_for(service);
        let started = self.clock.now();

        loop {
            let decision = {
                let mut q = quota.lock().expect("service quota mutex poisoned");
                let now = self.clock.now();
                q.reset_expired(limits, now);
                let decision = q.evaluate(limits, now, characters_needed);
                if decision.allowed {
                    q.consume(characters_needed);
                }
                decision
            };

            if decision.allowed {
                counter!("limiter_admitted_total", "service" => service.to_string()).increment(1);
                return decision;
            }

            let elapsed = self.clock.now().saturating_sub(started);
            let remaining = timeout.saturating_sub(elapsed);
            if remaining.is_zero() {
                counter!("limiter_denied_total", "service" => service.to_string()).increment(1);
                return decision;
            }

            let sleep_for = decision
                .wait
                .max(Duration::from_millis(10))
                .min(MAX_RETRY_SLEEP)
                .min(remaining);
            debug!(
                target: "limiter",
                service,
                wait_secs = decision.wait.as_secs_f64(),
                sleep_secs = sleep_for.as_secs_f64(),
                "quota unavailable; backing off"
            );
            counter!("limiter_waits_total", "service" => service.to_string()).increment(1);
            tokio::time::sleep(sleep_for).await;
        }
    }

    /// Usage snapshot for one service. `None` for unconfigured names.
    pub fn usage(&self, service: &str) -> Option<ServiceUsage> {
        let limits = self.limits.get(service)?;
        let quota = self.quota_for(service);
        let mut q = quota.lock().expect("service quota mutex poisoned");
        q.reset_expired(limits, self.clock.now());
        Some(ServiceUsage::from_quota(service, limits, &q))
    }

    /// Usage snapshots for every configured service, sorted by name.
    pub fn usage_all(&self) -> Vec<ServiceUsage> {
        let mut names: Vec<&String> = self.limits.keys().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| self.usage(name))
            .collect()
    }

    pub(crate) fn clock(&self) -> &Arc<dyn TimeSource> {
        &self.clock
    }

    pub(crate) fn with_quota<T>(
        &self,
        service: &str,
        f: impl FnOnce(&mut ServiceQuota, &ServiceLimits) -> T,
    ) -> Option<T> {
        let limits = self.limits.get(service)?;
        let quota = self.quota_for(service);
        let mut q = quota.lock().expect("service quota mutex poisoned");
        Some(f(&mut q, limits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTimeSource;

    fn limits(max_requests: u32, window_secs: u64) -> ServiceLimits {
        ServiceLimits {
            max_requests,
            window_secs,
            max_characters: None,
            burst_limit: None,
            burst_window_secs: 60,
        }
    }

    fn limiter_with(service: &str, l: ServiceLimits) -> (RateLimiter, Arc<ManualTimeSource>) {
        let clock = Arc::new(ManualTimeSource::new());
        let mut map = HashMap::new();
        map.insert(service.to_string(), l);
        (RateLimiter::new(map, clock.clone()), clock)
    }

    #[test]
    fn requests_cap_within_window_then_reset() {
        let (rl, clock) = limiter_with("newsapi", limits(3, 100));

        for _ in 0..3 {
            assert!(rl.admit("newsapi", 0).allowed);
            rl.record("newsapi", 0);
        }
        let denied = rl.admit("newsapi", 0);
        assert!(!denied.allowed);
        assert!(denied.wait > Duration::ZERO && denied.wait <= Duration::from_secs(100));

        clock.advance_secs(100);
        assert!(rl.admit("newsapi", 0).allowed);
    }

    #[test]
    fn character_budget_is_cumulative() {
        let mut l = limits(1000, 86_400);
        l.max_characters = Some(1000);
        let (rl, _clock) = limiter_with("translate", l);

        rl.record("translate", 600);
        assert!(!rl.admit("translate", 500).allowed); // 600 + 500 > 1000
        assert!(rl.admit("translate", 400).allowed);
    }

    #[test]
    fn burst_window_is_independent_of_main_window() {
        let mut l = limits(1000, 86_400);
        l.burst_limit = Some(5);
        l.burst_window_secs = 60;
        let (rl, clock) = limiter_with("newsapi", l);

        for _ in 0..5 {
            assert!(rl.admit("newsapi", 0).allowed);
            rl.record("newsapi", 0);
        }
        let denied = rl.admit("newsapi", 0);
        assert!(!denied.allowed);
        assert!(denied.wait <= Duration::from_secs(60));

        clock.advance_secs(60);
        assert!(rl.admit("newsapi", 0).allowed);
    }

    #[test]
    fn unconfigured_service_is_not_throttled() {
        let (rl, _clock) = limiter_with("newsapi", limits(1, 60));
        assert!(rl.admit("unknown", 10_000).allowed);
    }

    #[tokio::test]
    async fn acquire_reserves_atomically_and_times_out() {
        let (rl, _clock) = limiter_with("newsapi", limits(2, 3600));

        assert!(rl.acquire("newsapi", 0, Duration::ZERO).await.allowed);
        assert!(rl.acquire("newsapi", 0, Duration::ZERO).await.allowed);

        // Quota gone and zero timeout: immediate definitive deny with hint.
        let denied = rl.acquire("newsapi", 0, Duration::ZERO).await;
        assert!(!denied.allowed);
        assert!(denied.wait > Duration::ZERO);
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected_without_retry() {
        let mut l = limits(10, 60);
        l.max_characters = Some(100);
        let (rl, _clock) = limiter_with("translate", l);

        let denied = rl.acquire("translate", 500, Duration::from_secs(30)).await;
        assert!(!denied.allowed);
        // Nothing was reserved.
        assert_eq!(rl.usage("translate").unwrap().characters_used, 0);
    }
}

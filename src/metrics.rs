// src/metrics.rs
//! Metric registration and the Prometheus recorder.

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metric descriptions (so series show up in the exposition).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("limiter_admitted_total", "Requests admitted per service.");
        describe_counter!("limiter_denied_total", "Requests denied per service.");
        describe_counter!(
            "limiter_waits_total",
            "Back-off sleeps taken while waiting for quota."
        );
        describe_counter!("pool_sessions_created_total", "Sessions created per service.");
        describe_counter!("pool_sessions_reused_total", "Sessions reused per service.");
        describe_counter!("pool_sessions_closed_total", "Sessions closed by release or reaper.");
        describe_counter!(
            "pool_acquire_degraded_total",
            "Acquires that fell back to the LRU session after timeout."
        );
        describe_counter!("pool_acquire_failed_total", "Acquires with no session to return.");
        describe_counter!(
            "pool_reaper_skipped_total",
            "Cleanup cycles skipped because the pool lock was contended."
        );
        describe_counter!("dedup_runs_total", "Deduplication batches processed.");
        describe_counter!("dedup_url_matched_total", "Articles folded by URL identity.");
        describe_counter!(
            "dedup_content_matched_total",
            "Group merges by content similarity."
        );
        describe_counter!(
            "dedup_in_batch_dropped_total",
            "Articles recorded as in-batch duplicates."
        );
        describe_counter!(
            "dedup_historical_dropped_total",
            "Articles dropped by the cross-run fingerprint cache."
        );
        describe_gauge!("collector_last_run_ts", "Unix ts of the last collection run.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder. Call once at startup, before any
    /// component emits.
    pub fn init() -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("prometheus: install recorder");
        ensure_metrics_described();
        Self { handle }
    }

    /// Current exposition text, for whatever surface the host exposes.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

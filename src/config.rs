// src/config.rs
//! Collector configuration: per-service quotas, pool tuning, dedup thresholds.
//!
//! Loading order:
//! 1) $COLLECTOR_CONFIG_PATH
//! 2) config/collector.toml
//! 3) built-in defaults
//!
//! Every numeric knob is overridable from the file; nothing requires a code
//! change to retune.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_CONFIG_PATH: &str = "COLLECTOR_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/collector.toml";

/// Quota dimensions for one named service (e.g. "newsapi", "translate").
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServiceLimits {
    pub max_requests: u32,
    pub window_secs: u64,
    /// Character budget for services billed by payload size.
    #[serde(default)]
    pub max_characters: Option<u64>,
    /// Short-window burst cap, independent of the main window.
    #[serde(default)]
    pub burst_limit: Option<u32>,
    #[serde(default = "default_burst_window_secs")]
    pub burst_window_secs: u64,
}

fn default_burst_window_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    pub max_sessions_per_service: usize,
    pub idle_timeout_secs: u64,
    pub cleanup_interval_secs: u64,
    /// Overall bound on one acquire call before the degraded fallback.
    pub acquire_max_wait_secs: u64,
    /// Sleep between re-checks while waiting for a free session.
    pub acquire_poll_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sessions_per_service: 3,
            idle_timeout_secs: 300,
            cleanup_interval_secs: 60,
            acquire_max_wait_secs: 30,
            acquire_poll_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DedupConfig {
    /// Near-exact URL match threshold (normalized Levenshtein).
    pub url_similarity: f64,
    pub title_similarity: f64,
    pub content_similarity: f64,
    /// Excerpt cap for body comparison, in characters.
    pub excerpt_chars: usize,
    /// Minimum shared keywords for the same-source/time-window rule.
    pub keyword_overlap_min: usize,
    /// "Published close together" window for the same-source rule.
    pub time_window_secs: i64,
    pub historical_ttl_days: u64,
    /// Sources whose articles get a canonical-selection bonus.
    pub trusted_sources: Vec<String>,
    /// Fingerprint cache location; empty string disables persistence.
    pub cache_path: String,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            url_similarity: 0.8,
            title_similarity: 0.8,
            content_similarity: 0.7,
            excerpt_chars: 500,
            keyword_overlap_min: 3,
            time_window_secs: 3600,
            historical_ttl_days: 30,
            trusted_sources: vec![
                "Reuters".to_string(),
                "AP".to_string(),
                "BBC".to_string(),
                "Bloomberg".to_string(),
            ],
            cache_path: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct CollectorConfig {
    /// `[limits.<service>]` tables, keyed by service name.
    #[serde(default)]
    pub limits: HashMap<String, ServiceLimits>,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
}

impl CollectorConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading collector config from {}", path.display()))?;
        let mut cfg: CollectorConfig = toml::from_str(&content)
            .with_context(|| format!("parsing collector config {}", path.display()))?;
        cfg.sanitize();
        Ok(cfg)
    }

    /// Env var path first, then the conventional file, then defaults.
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::from_path(&pb);
            }
            return Err(anyhow!("COLLECTOR_CONFIG_PATH points to non-existent path"));
        }
        let conventional = PathBuf::from(DEFAULT_CONFIG_PATH);
        if conventional.exists() {
            return Self::from_path(&conventional);
        }
        Ok(Self::default())
    }

    /// Parameter hygiene: clamp similarity thresholds, floor zero intervals.
    fn sanitize(&mut self) {
        self.dedup.url_similarity = self.dedup.url_similarity.clamp(0.0, 1.0);
        self.dedup.title_similarity = self.dedup.title_similarity.clamp(0.0, 1.0);
        self.dedup.content_similarity = self.dedup.content_similarity.clamp(0.0, 1.0);
        if self.pool.max_sessions_per_service == 0 {
            self.pool.max_sessions_per_service = 1;
        }
        if self.pool.acquire_poll_ms == 0 {
            self.pool.acquire_poll_ms = 50;
        }
        for limits in self.limits.values_mut() {
            if limits.window_secs == 0 {
                limits.window_secs = 1;
            }
            if limits.burst_window_secs == 0 {
                limits.burst_window_secs = 1;
            }
        }
    }
}

// src/limiter/persist.rs
//! Optional character-budget persistence across process restarts.
//!
//! Only character fields are carried over; request counts start fresh every
//! process, matching how provider billing works (characters accrue against a
//! daily budget, request pacing restarts for free).

use crate::limiter::RateLimiter;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedCharacters {
    characters_used: u64,
    /// Wall-clock second the window started, so a restart can tell whether
    /// the window already elapsed.
    window_started_unix: u64,
}

impl RateLimiter {
    /// Write character usage for every configured service as JSON.
    pub fn save_usage(&self, path: &Path) -> Result<()> {
        let unix_now = self.clock().unix_now();
        let mut out: HashMap<String, PersistedCharacters> = HashMap::new();

        for usage in self.usage_all() {
            if usage.max_characters.is_none() {
                continue;
            }
            let service = usage.service.clone();
            if let Some(entry) = self.with_quota(&service, |q, _limits| {
                let window_age = self
                    .clock()
                    .now()
                    .saturating_sub(q.window_start)
                    .as_secs();
                PersistedCharacters {
                    characters_used: q.characters_used,
                    window_started_unix: unix_now.saturating_sub(window_age),
                }
            }) {
                out.insert(service, entry);
            }
        }

        let json = serde_json::to_string_pretty(&out)?;
        fs::write(path, json)
            .with_context(|| format!("writing limiter usage to {}", path.display()))?;
        Ok(())
    }

    /// Restore character usage saved by a previous process. Windows that
    /// already elapsed in wall-clock terms are ignored.
    pub fn load_usage(&self, path: &Path) -> Result<()> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading limiter usage from {}", path.display()))?;
        let saved: HashMap<String, PersistedCharacters> =
            serde_json::from_str(&content).context("parsing limiter usage json")?;

        let unix_now = self.clock().unix_now();
        let mut restored = 0usize;

        for (service, entry) in saved {
            let elapsed = unix_now.saturating_sub(entry.window_started_unix);
            let applied = self.with_quota(&service, |q, limits| {
                if limits.max_characters.is_none() || elapsed >= limits.window_secs {
                    return false;
                }
                q.characters_used = entry.characters_used;
                // Re-anchor the window so it expires at the original time.
                q.window_start = self
                    .clock()
                    .now()
                    .saturating_sub(Duration::from_secs(elapsed));
                true
            });
            if applied == Some(true) {
                restored += 1;
            }
        }

        info!(target: "limiter", restored, "restored character budgets");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::clock::{ManualTimeSource, TimeSource};
    use crate::config::ServiceLimits;
    use crate::limiter::RateLimiter;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn char_limits() -> HashMap<String, ServiceLimits> {
        let mut map = HashMap::new();
        map.insert(
            "translate".to_string(),
            ServiceLimits {
                max_requests: 1000,
                window_secs: 86_400,
                max_characters: Some(10_000),
                burst_limit: None,
                burst_window_secs: 60,
            },
        );
        map
    }

    #[test]
    fn round_trips_characters_within_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.json");

        let clock = Arc::new(ManualTimeSource::new());
        let rl = RateLimiter::new(char_limits(), clock.clone());
        rl.record("translate", 4_000);
        rl.save_usage(&path).unwrap();

        // Fresh process an hour later, same wall clock lineage.
        let clock2 = Arc::new(ManualTimeSource::starting_at(clock.unix_now() + 3_600));
        let rl2 = RateLimiter::new(char_limits(), clock2);
        rl2.load_usage(&path).unwrap();

        let usage = rl2.usage("translate").unwrap();
        assert_eq!(usage.characters_used, 4_000);
        // Request counts are never carried over.
        assert_eq!(usage.requests_made, 0);
    }

    #[test]
    fn elapsed_windows_are_not_restored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.json");

        let clock = Arc::new(ManualTimeSource::new());
        let rl = RateLimiter::new(char_limits(), clock.clone());
        rl.record("translate", 9_999);
        rl.save_usage(&path).unwrap();

        // Two days later the daily window is long gone.
        let clock2 = Arc::new(ManualTimeSource::starting_at(clock.unix_now() + 2 * 86_400));
        let rl2 = RateLimiter::new(char_limits(), clock2);
        rl2.load_usage(&path).unwrap();

        assert_eq!(rl2.usage("translate").unwrap().characters_used, 0);
    }
}

// src/limiter/report.rs
//! Usage snapshots for dashboards and logs.

use crate::config::ServiceLimits;
use crate::limiter::ServiceQuota;
use serde::Serialize;

/// Health of one service's quota, by worst usage percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UsageStatus {
    Ok,
    Moderate,
    Warning,
    Critical,
    RateLimited,
}

impl UsageStatus {
    /// Thresholds: 50 / 80 / 90 / 100 percent.
    pub fn from_percent(pct: f64) -> Self {
        if pct >= 100.0 {
            UsageStatus::RateLimited
        } else if pct >= 90.0 {
            UsageStatus::Critical
        } else if pct >= 80.0 {
            UsageStatus::Warning
        } else if pct >= 50.0 {
            UsageStatus::Moderate
        } else {
            UsageStatus::Ok
        }
    }
}

/// Point-in-time view of one service's quota consumption.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceUsage {
    pub service: String,
    pub requests_made: u32,
    pub max_requests: u32,
    pub remaining_requests: u32,
    pub characters_used: u64,
    pub max_characters: Option<u64>,
    pub remaining_characters: Option<u64>,
    pub burst_usage_percent: Option<f64>,
    pub status: UsageStatus,
}

impl ServiceUsage {
    pub(crate) fn from_quota(service: &str, limits: &ServiceLimits, q: &ServiceQuota) -> Self {
        let request_pct = if limits.max_requests > 0 {
            q.requests_made as f64 / limits.max_requests as f64 * 100.0
        } else {
            0.0
        };

        let (remaining_characters, char_pct) = match limits.max_characters {
            Some(max) if max > 0 => (
                Some(max.saturating_sub(q.characters_used)),
                q.characters_used as f64 / max as f64 * 100.0,
            ),
            Some(max) => (Some(max), 0.0),
            None => (None, 0.0),
        };

        let burst_usage_percent = limits.burst_limit.map(|limit| {
            if limit > 0 {
                q.burst_count as f64 / limit as f64 * 100.0
            } else {
                0.0
            }
        });

        let worst = request_pct
            .max(char_pct)
            .max(burst_usage_percent.unwrap_or(0.0));

        Self {
            service: service.to_string(),
            requests_made: q.requests_made,
            max_requests: limits.max_requests,
            remaining_requests: limits.max_requests.saturating_sub(q.requests_made),
            characters_used: q.characters_used,
            max_characters: limits.max_characters,
            remaining_characters,
            burst_usage_percent,
            status: UsageStatus::from_percent(worst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_thresholds() {
        assert_eq!(UsageStatus::from_percent(0.0), UsageStatus::Ok);
        assert_eq!(UsageStatus::from_percent(49.9), UsageStatus::Ok);
        assert_eq!(UsageStatus::from_percent(50.0), UsageStatus::Moderate);
        assert_eq!(UsageStatus::from_percent(80.0), UsageStatus::Warning);
        assert_eq!(UsageStatus::from_percent(90.0), UsageStatus::Critical);
        assert_eq!(UsageStatus::from_percent(100.0), UsageStatus::RateLimited);
    }

    #[test]
    fn worst_dimension_drives_status() {
        let limits = ServiceLimits {
            max_requests: 100,
            window_secs: 86_400,
            max_characters: Some(1_000),
            burst_limit: Some(10),
            burst_window_secs: 60,
        };
        let q = ServiceQuota {
            requests_made: 10,      // 10 %
            characters_used: 950,   // 95 %
            burst_count: 1,         // 10 %
            ..Default::default()
        };
        let usage = ServiceUsage::from_quota("translate", &limits, &q);
        assert_eq!(usage.status, UsageStatus::Critical);
        assert_eq!(usage.remaining_requests, 90);
        assert_eq!(usage.remaining_characters, Some(50));
    }
}

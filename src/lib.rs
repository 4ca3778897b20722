// src/lib.rs
// Public library surface for integration tests (and the orchestrator).

pub mod clock;
pub mod config;
pub mod dedup;
pub mod limiter;
pub mod metrics;
pub mod pool;

// ---- Re-exports for stable public API ----
pub use crate::clock::{ManualTimeSource, SystemTimeSource, TimeSource};
pub use crate::config::{CollectorConfig, DedupConfig, PoolConfig, ServiceLimits};
pub use crate::dedup::{DedupResult, Deduplicator, FingerprintCache, RawArticle};
pub use crate::limiter::{AdmitDecision, RateLimiter, ServiceUsage, UsageStatus};
pub use crate::pool::{HttpSessionFactory, PoolStats, SessionHandle, SessionPool};

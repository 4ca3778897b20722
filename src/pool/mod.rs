// src/pool/mod.rs
//! Bounded per-service session pool with an idle reaper.
//!
//! Acquire order: reuse an idle open session, create one while under the
//! per-service cap, otherwise poll in a bounded loop. When the wait budget
//! runs out the pool hands back the least-recently-used session even if it
//! is marginal, and logs that it did. Availability over strict isolation:
//! downstream retry logic expects *some* session rather than an error, so
//! the degraded path is intentional.
//!
//! One pool-wide mutex guards the session map. The acquire loop releases it
//! between polls and the reaper only ever `try_lock`s, so a slow caller can
//! delay cleanup by at most one cycle, never deadlock it.

pub mod factory;

use crate::clock::TimeSource;
use crate::config::PoolConfig;
use crate::metrics::ensure_metrics_described;
use anyhow::{anyhow, Result};
use metrics::counter;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use factory::{HttpSessionFactory, SessionFactory, SessionTransport};

/// One pooled session. Metadata sits behind its own small mutex so a handle
/// drop never has to take the pool-wide lock.
pub struct PooledSession {
    id: u64,
    service: String,
    created_at: Duration,
    transport: Arc<dyn SessionTransport>,
    meta: Mutex<SessionMeta>,
}

#[derive(Debug, Clone, Copy)]
struct SessionMeta {
    last_used_at: Duration,
    in_use: bool,
    closed: bool,
}

impl PooledSession {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn created_at(&self) -> Duration {
        self.created_at
    }

    pub fn transport(&self) -> &Arc<dyn SessionTransport> {
        &self.transport
    }

    fn meta(&self) -> SessionMeta {
        *self.meta.lock().expect("session meta mutex poisoned")
    }

    fn set_meta(&self, f: impl FnOnce(&mut SessionMeta)) {
        let mut m = self.meta.lock().expect("session meta mutex poisoned");
        f(&mut m);
    }
}

/// RAII borrow of a pooled session; returns it on drop, on every exit path.
pub struct SessionHandle {
    session: Arc<PooledSession>,
    clock: Arc<dyn TimeSource>,
    /// Degraded handles borrowed a session that may still be in use or
    /// closed; dropping them must not clear someone else's in_use flag.
    degraded: bool,
}

impl SessionHandle {
    pub fn session(&self) -> &PooledSession {
        &self.session
    }

    /// Convenience accessor for HTTP call sites.
    pub fn http(&self) -> Option<&reqwest::Client> {
        self.session.transport.http()
    }

    /// True when this handle came from the post-timeout LRU fallback.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        let now = self.clock.now();
        let degraded = self.degraded;
        self.session.set_meta(|m| {
            m.last_used_at = now;
            if !degraded {
                m.in_use = false;
            }
        });
    }
}

/// Aggregate pool statistics.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub created: u64,
    pub reused: u64,
    pub closed: u64,
    pub degraded: u64,
    pub failed: u64,
    pub attempts: u64,
    pub active_per_service: HashMap<String, usize>,
}

impl PoolStats {
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            return 1.0;
        }
        (self.attempts - self.failed) as f64 / self.attempts as f64
    }

    pub fn reuse_rate(&self) -> f64 {
        let handed_out = self.created + self.reused;
        if handed_out == 0 {
            return 0.0;
        }
        self.reused as f64 / handed_out as f64
    }
}

#[derive(Default)]
struct PoolState {
    sessions: HashMap<String, Vec<Arc<PooledSession>>>,
    /// Creations in flight per service, counted against the cap while the
    /// factory call runs outside the lock.
    pending: HashMap<String, usize>,
}

pub struct SessionPool {
    cfg: PoolConfig,
    clock: Arc<dyn TimeSource>,
    factory: Arc<dyn SessionFactory>,
    state: Mutex<PoolState>,
    next_id: AtomicU64,
    created: AtomicU64,
    reused: AtomicU64,
    closed: AtomicU64,
    degraded: AtomicU64,
    failed: AtomicU64,
    attempts: AtomicU64,
}

impl SessionPool {
    pub fn new(
        cfg: PoolConfig,
        factory: Arc<dyn SessionFactory>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        ensure_metrics_described();
        Self {
            cfg,
            clock,
            factory,
            state: Mutex::new(PoolState::default()),
            next_id: AtomicU64::new(1),
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            closed: AtomicU64::new(0),
            degraded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
        }
    }

    /// Borrow a session using the configured wait budget.
    pub async fn acquire(&self, service: &str) -> Result<SessionHandle> {
        self.acquire_with_timeout(service, Duration::from_secs(self.cfg.acquire_max_wait_secs))
            .await
    }

    /// Borrow a session, waiting at most `max_wait` before the degraded
    /// LRU fallback kicks in. Fails only when the service has no sessions
    /// at all and none could be created.
    pub async fn acquire_with_timeout(
        &self,
        service: &str,
        max_wait: Duration,
    ) -> Result<SessionHandle> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let started = self.clock.now();

        loop {
            enum Plan {
                Reuse(Arc<PooledSession>),
                Create,
                Wait,
            }

            let plan = {
                let mut state = self.state.lock().expect("pool mutex poisoned");
                let slots = state.sessions.entry(service.to_string()).or_default();

                let mut found = None;
                for slot in slots.iter() {
                    let meta = slot.meta();
                    if !meta.in_use && !meta.closed && !slot.transport.is_closed() {
                        found = Some(slot.clone());
                        break;
                    }
                }

                if let Some(slot) = found {
                    let now = self.clock.now();
                    slot.set_meta(|m| {
                        m.in_use = true;
                        m.last_used_at = now;
                    });
                    Plan::Reuse(slot)
                } else {
                    let pending = state.pending.get(service).copied().unwrap_or(0);
                    let total = state.sessions.get(service).map_or(0, |v| v.len()) + pending;
                    if total < self.cfg.max_sessions_per_service {
                        *state.pending.entry(service.to_string()).or_default() += 1;
                        Plan::Create
                    } else {
                        Plan::Wait
                    }
                }
            };

            match plan {
                Plan::Reuse(slot) => {
                    self.reused.fetch_add(1, Ordering::Relaxed);
                    counter!("pool_sessions_reused_total", "service" => service.to_string())
                        .increment(1);
                    debug!(target: "pool", service, id = slot.id, "reusing session");
                    return Ok(self.handle(slot, false));
                }
                Plan::Create => match self.factory.connect(service).await {
                    Ok(transport) => {
                        let now = self.clock.now();
                        let slot = Arc::new(PooledSession {
                            id: self.next_id.fetch_add(1, Ordering::Relaxed),
                            service: service.to_string(),
                            created_at: now,
                            transport,
                            meta: Mutex::new(SessionMeta {
                                last_used_at: now,
                                in_use: true,
                                closed: false,
                            }),
                        });
                        {
                            let mut state = self.state.lock().expect("pool mutex poisoned");
                            decrement_pending(&mut state, service);
                            state
                                .sessions
                                .entry(service.to_string())
                                .or_default()
                                .push(slot.clone());
                        }
                        self.created.fetch_add(1, Ordering::Relaxed);
                        counter!("pool_sessions_created_total", "service" => service.to_string())
                            .increment(1);
                        debug!(target: "pool", service, id = slot.id, "created session");
                        return Ok(self.handle(slot, false));
                    }
                    Err(e) => {
                        let mut state = self.state.lock().expect("pool mutex poisoned");
                        decrement_pending(&mut state, service);
                        drop(state);
                        warn!(target: "pool", service, error = ?e, "session create failed");
                    }
                },
                Plan::Wait => {}
            }

            let elapsed = self.clock.now().saturating_sub(started);
            if elapsed >= max_wait {
                return self.degraded_fallback(service);
            }
            tokio::time::sleep(Duration::from_millis(self.cfg.acquire_poll_ms)).await;
        }
    }

    /// Post-timeout path: hand back the least-recently-used session even if
    /// it is busy or closed, rather than failing the caller.
    fn degraded_fallback(&self, service: &str) -> Result<SessionHandle> {
        let state = self.state.lock().expect("pool mutex poisoned");
        let slot = state
            .sessions
            .get(service)
            .and_then(|slots| {
                slots
                    .iter()
                    .min_by_key(|s| s.meta().last_used_at)
                    .cloned()
            });
        drop(state);

        match slot {
            Some(slot) => {
                self.degraded.fetch_add(1, Ordering::Relaxed);
                counter!("pool_acquire_degraded_total", "service" => service.to_string())
                    .increment(1);
                warn!(
                    target: "pool",
                    service,
                    id = slot.id,
                    "acquire timed out; returning least-recently-used session"
                );
                Ok(self.handle(slot, true))
            }
            None => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                counter!("pool_acquire_failed_total", "service" => service.to_string())
                    .increment(1);
                Err(anyhow!(
                    "no session available for service {service} within wait budget"
                ))
            }
        }
    }

    fn handle(&self, session: Arc<PooledSession>, degraded: bool) -> SessionHandle {
        SessionHandle {
            session,
            clock: self.clock.clone(),
            degraded,
        }
    }

    /// Close and drop sessions for one service, or for all when `None`.
    pub fn release_all(&self, service: Option<&str>) {
        let mut state = self.state.lock().expect("pool mutex poisoned");
        let services: Vec<String> = match service {
            Some(s) => vec![s.to_string()],
            None => state.sessions.keys().cloned().collect(),
        };
        let mut dropped = 0u64;
        for name in services {
            if let Some(slots) = state.sessions.remove(&name) {
                for slot in &slots {
                    slot.set_meta(|m| m.closed = true);
                }
                dropped += slots.len() as u64;
            }
        }
        drop(state);
        if dropped > 0 {
            self.closed.fetch_add(dropped, Ordering::Relaxed);
            counter!("pool_sessions_closed_total").increment(dropped);
            info!(target: "pool", dropped, "released sessions");
        }
    }

    pub fn shutdown(&self) {
        self.release_all(None);
    }

    /// One reaper pass. Skips (and says so) when the pool lock is
    /// contended, so foreground acquire/release can never starve cleanup
    /// into a deadlock.
    pub fn reap_idle(&self) {
        let Ok(mut state) = self.state.try_lock() else {
            counter!("pool_reaper_skipped_total").increment(1);
            debug!(target: "pool", "pool busy; skipping cleanup cycle");
            return;
        };

        let now = self.clock.now();
        let idle_after = Duration::from_secs(self.cfg.idle_timeout_secs);
        let mut dropped = 0u64;

        for (service, slots) in state.sessions.iter_mut() {
            let newest = slots
                .iter()
                .map(|s| s.meta().last_used_at)
                .max()
                .unwrap_or(now);
            let service_idle = now.saturating_sub(newest) >= idle_after;

            if service_idle {
                for slot in slots.iter() {
                    slot.set_meta(|m| m.closed = true);
                }
            }

            let before = slots.len();
            slots.retain(|slot| {
                let meta = slot.meta();
                let dead = (meta.closed || slot.transport.is_closed()) && !meta.in_use;
                !dead
            });
            let removed = (before - slots.len()) as u64;
            if removed > 0 {
                dropped += removed;
                debug!(target: "pool", service, removed, "reaped idle sessions");
            }
        }
        state.sessions.retain(|_, slots| !slots.is_empty());
        drop(state);

        if dropped > 0 {
            self.closed.fetch_add(dropped, Ordering::Relaxed);
            counter!("pool_sessions_closed_total").increment(dropped);
        }
    }

    /// Background reaper on the configured interval. Abort the handle on
    /// shutdown.
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = self.clone();
        let interval = Duration::from_secs(self.cfg.cleanup_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // immediate first tick is a no-op
            loop {
                ticker.tick().await;
                pool.reap_idle();
            }
        })
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock().expect("pool mutex poisoned");
        let active_per_service = state
            .sessions
            .iter()
            .map(|(service, slots)| {
                let active = slots.iter().filter(|s| s.meta().in_use).count();
                (service.clone(), active)
            })
            .collect();
        drop(state);

        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            active_per_service,
        }
    }
}

fn decrement_pending(state: &mut PoolState, service: &str) {
    if let Some(p) = state.pending.get_mut(service) {
        *p = p.saturating_sub(1);
        if *p == 0 {
            state.pending.remove(service);
        }
    }
}

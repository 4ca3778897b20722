// src/pool/factory.rs
//! Transport seam for the session pool.
//!
//! The pool never talks to the network itself; it owns transports produced
//! by a `SessionFactory`. Production uses reqwest clients with explicit
//! timeouts, tests inject stubs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// One live network session. `is_closed` reflects the underlying transport;
/// the pool sweeps closed sessions during cleanup.
pub trait SessionTransport: Send + Sync {
    fn is_closed(&self) -> bool;

    /// HTTP client for call sites that fetch over HTTP. Stub transports
    /// return `None`.
    fn http(&self) -> Option<&reqwest::Client> {
        None
    }
}

#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(&self, service: &str) -> Result<Arc<dyn SessionTransport>>;
}

/// Reqwest-backed transport. The client keeps its own connection pool, so
/// reusing one session amortizes TCP/TLS setup across calls.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl SessionTransport for HttpTransport {
    fn is_closed(&self) -> bool {
        // reqwest clients do not report closure; the idle reaper handles
        // retirement by age instead.
        false
    }

    fn http(&self) -> Option<&reqwest::Client> {
        Some(&self.client)
    }
}

/// Default factory: one reqwest client per session with explicit connect
/// and request timeouts so nothing hangs indefinitely.
pub struct HttpSessionFactory {
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl HttpSessionFactory {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }
}

impl Default for HttpSessionFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(30))
    }
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    async fn connect(&self, service: &str) -> Result<Arc<dyn SessionTransport>> {
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .build()
            .with_context(|| format!("building http client for service {service}"))?;
        Ok(Arc::new(HttpTransport { client }))
    }
}

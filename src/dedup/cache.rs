// src/dedup/cache.rs
//! Cross-run fingerprint cache with TTL expiry.
//!
//! Exact-key store: `url:<hash>` and `content:<hash>` map to an expiry in
//! unix seconds. Persisted as JSON so a nightly collection run rejects
//! articles already delivered in earlier runs. Single-writer assumption;
//! concurrent process instances are out of scope.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, warn};

pub struct FingerprintCache {
    entries: Mutex<HashMap<String, u64>>,
    ttl_secs: u64,
    path: Option<PathBuf>,
}

impl FingerprintCache {
    /// In-memory cache; nothing survives the process.
    pub fn in_memory(ttl_days: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl_secs: ttl_days.saturating_mul(86_400),
            path: None,
        }
    }

    /// File-backed cache. A missing or corrupt file starts empty with a
    /// warning; the cache never fails construction.
    pub fn at_path(ttl_days: u64, path: PathBuf) -> Self {
        let entries = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<HashMap<String, u64>>(&content) {
                Ok(map) => {
                    debug!(target: "dedup", entries = map.len(), "loaded fingerprint cache");
                    map
                }
                Err(e) => {
                    warn!(target: "dedup", error = ?e, "corrupt fingerprint cache; starting empty");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self {
            entries: Mutex::new(entries),
            ttl_secs: ttl_days.saturating_mul(86_400),
            path: Some(path),
        }
    }

    /// True when the key exists and has not expired. Expired entries are
    /// dropped on sight.
    pub fn contains(&self, key: &str, now_unix: u64) -> bool {
        let mut entries = self.entries.lock().expect("fingerprint cache mutex poisoned");
        match entries.get(key) {
            Some(&expiry) if expiry > now_unix => true,
            Some(_) => {
                entries.remove(key);
                false
            }
            None => false,
        }
    }

    pub fn insert(&self, key: String, now_unix: u64) {
        let mut entries = self.entries.lock().expect("fingerprint cache mutex poisoned");
        entries.insert(key, now_unix + self.ttl_secs);
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self, now_unix: u64) -> usize {
        let mut entries = self.entries.lock().expect("fingerprint cache mutex poisoned");
        let before = entries.len();
        entries.retain(|_, &mut expiry| expiry > now_unix);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("fingerprint cache mutex poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist to the configured path; no-op for in-memory caches.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let entries = self.entries.lock().expect("fingerprint cache mutex poisoned");
        let json = serde_json::to_string(&*entries)?;
        drop(entries);
        fs::write(path, json)
            .with_context(|| format!("writing fingerprint cache to {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_expiry_is_enforced() {
        let cache = FingerprintCache::in_memory(30);
        let now = 1_000_000;
        cache.insert("url:abc".into(), now);

        assert!(cache.contains("url:abc", now + 1));
        assert!(cache.contains("url:abc", now + 29 * 86_400));
        assert!(!cache.contains("url:abc", now + 31 * 86_400));
        // Expired entry was dropped by the lookup.
        assert!(cache.is_empty());
    }

    #[test]
    fn purge_removes_only_expired() {
        let cache = FingerprintCache::in_memory(1);
        cache.insert("old".into(), 0);
        cache.insert("new".into(), 100_000);

        let removed = cache.purge_expired(90_000);
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("new", 90_000));
    }

    #[test]
    fn survives_a_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fingerprints.json");

        let cache = FingerprintCache::at_path(30, path.clone());
        cache.insert("url:abc".into(), 1_000);
        cache.save().unwrap();

        let reloaded = FingerprintCache::at_path(30, path);
        assert!(reloaded.contains("url:abc", 2_000));
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fingerprints.json");
        fs::write(&path, "not json").unwrap();

        let cache = FingerprintCache::at_path(30, path);
        assert!(cache.is_empty());
    }
}

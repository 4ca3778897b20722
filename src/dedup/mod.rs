// src/dedup/mod.rs
//! Three-stage article deduplication.
//!
//! Stage 1 collapses URL-identical and near-identical links. Stage 2 groups
//! the survivors by fuzzy content similarity and picks one canonical
//! representative per group. Stage 3 drops canonicals whose fingerprint a
//! prior run already recorded.
//!
//! The pipeline is deterministic for a given input and cache state, and it
//! never loses articles on error: a failed run returns the input unchanged
//! with `duplicate_count = 0`.

pub mod cache;
pub mod content;
pub mod types;
pub mod url;

use crate::clock::TimeSource;
use crate::config::DedupConfig;
use crate::metrics::ensure_metrics_described;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use metrics::counter;
use std::path::PathBuf;
use std::sync::Arc;
use strsim::normalized_levenshtein;
use tracing::{info, warn};

pub use cache::FingerprintCache;
pub use types::{DedupResult, RawArticle};

pub struct Deduplicator {
    cfg: DedupConfig,
    cache: FingerprintCache,
    clock: Arc<dyn TimeSource>,
}

impl Deduplicator {
    /// Cache location comes from config; an empty `cache_path` keeps the
    /// historical stage in memory only.
    pub fn new(cfg: DedupConfig, clock: Arc<dyn TimeSource>) -> Self {
        let cache = if cfg.cache_path.is_empty() {
            FingerprintCache::in_memory(cfg.historical_ttl_days)
        } else {
            FingerprintCache::at_path(cfg.historical_ttl_days, PathBuf::from(&cfg.cache_path))
        };
        Self::with_cache(cfg, cache, clock)
    }

    pub fn with_cache(cfg: DedupConfig, cache: FingerprintCache, clock: Arc<dyn TimeSource>) -> Self {
        ensure_metrics_described();
        Self { cfg, cache, clock }
    }

    pub fn cache(&self) -> &FingerprintCache {
        &self.cache
    }

    /// Deduplicate one batch. Never drops input silently: on internal
    /// failure the original list comes back unmodified.
    pub fn deduplicate(&self, articles: Vec<RawArticle>) -> DedupResult {
        counter!("dedup_runs_total").increment(1);
        let input_len = articles.len();

        match self.run(&articles) {
            Ok(result) => {
                info!(
                    target: "dedup",
                    input = input_len,
                    unique = result.unique.len(),
                    groups = result.duplicate_groups.len(),
                    historical = result.historical.len(),
                    "deduplication finished"
                );
                result
            }
            Err(e) => {
                warn!(target: "dedup", error = ?e, "pipeline failed; returning input unchanged");
                DedupResult {
                    unique: articles,
                    duplicate_groups: Vec::new(),
                    historical: Vec::new(),
                    duplicate_count: 0,
                }
            }
        }
    }

    fn run(&self, articles: &[RawArticle]) -> Result<DedupResult> {
        let now_unix = self.clock.unix_now();
        // The only Err in the pipeline: a wall clock chrono cannot represent.
        // Everything downstream absorbs its own failures (bad URLs fall back
        // to raw keys, cache-save is a soft warning).
        let now: DateTime<Utc> = DateTime::<Utc>::from_timestamp(now_unix as i64, 0)
            .ok_or_else(|| anyhow!("wall clock second {now_unix} is out of range"))?;

        let expired = self.cache.purge_expired(now_unix);
        if expired > 0 {
            info!(target: "dedup", expired, "purged expired fingerprints");
        }

        let groups = self.group_by_url(articles);
        let groups = self.merge_by_content(articles, groups);

        // Canonical per group, then the historical gate on canonicals only.
        let mut unique = Vec::new();
        let mut historical = Vec::new();
        let mut duplicate_groups = Vec::new();

        for members in groups {
            let canonical = content::select_canonical(&members, articles, &self.cfg, now);
            let article = &articles[canonical];

            // Two fingerprints per canonical: the URL key catches reruns of
            // the same link, the content hash catches the same story
            // re-syndicated under a fresh URL.
            let url_fp = format!("url:{}", url::fingerprint(&url_key_of(article)));
            let content_fp = format!("content:{}", content_fingerprint(article, &self.cfg));
            if self.cache.contains(&url_fp, now_unix) || self.cache.contains(&content_fp, now_unix)
            {
                counter!("dedup_historical_dropped_total").increment(1);
                historical.push(article.clone());
            } else {
                self.cache.insert(url_fp, now_unix);
                self.cache.insert(content_fp, now_unix);
                unique.push(article.clone());
            }

            if members.len() > 1 {
                counter!("dedup_in_batch_dropped_total").increment((members.len() - 1) as u64);
                let mut group = Vec::with_capacity(members.len());
                group.push(article.clone());
                for &idx in &members {
                    if idx != canonical {
                        group.push(articles[idx].clone());
                    }
                }
                duplicate_groups.push(group);
            }
        }

        if let Err(e) = self.cache.save() {
            warn!(target: "dedup", error = ?e, "fingerprint cache save failed");
        }

        let duplicate_count = articles.len() - unique.len();
        Ok(DedupResult {
            unique,
            duplicate_groups,
            historical,
            duplicate_count,
        })
    }

    /// Stage 1: bucket by canonical URL, folding exact and near-exact
    /// (edit-similar) links into the first-seen article's group.
    fn group_by_url(&self, articles: &[RawArticle]) -> Vec<Vec<usize>> {
        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut keys: Vec<String> = Vec::new();

        'next: for (idx, article) in articles.iter().enumerate() {
            let key = url::url_key(&article.url);

            for (g, existing) in keys.iter().enumerate() {
                let exact = *existing == key;
                if exact || normalized_levenshtein(existing, &key) >= self.cfg.url_similarity {
                    counter!("dedup_url_matched_total").increment(1);
                    groups[g].push(idx);
                    continue 'next;
                }
            }

            keys.push(key);
            groups.push(vec![idx]);
        }

        groups
    }

    /// Stage 2: merge URL groups whose representatives read like the same
    /// story. The representative is the group's first-seen member.
    fn merge_by_content(
        &self,
        articles: &[RawArticle],
        groups: Vec<Vec<usize>>,
    ) -> Vec<Vec<usize>> {
        let mut merged: Vec<Vec<usize>> = Vec::new();

        for group in groups {
            let rep = group[0];
            let target = merged.iter().position(|existing| {
                content::are_duplicates(&articles[existing[0]], &articles[rep], &self.cfg)
            });
            match target {
                Some(i) => {
                    counter!("dedup_content_matched_total").increment(1);
                    merged[i].extend(group);
                    merged[i].sort_unstable();
                }
                None => merged.push(group),
            }
        }

        merged
    }
}

fn url_key_of(article: &RawArticle) -> String {
    url::url_key(&article.url)
}

fn content_fingerprint(article: &RawArticle, cfg: &DedupConfig) -> String {
    let text = article.body().unwrap_or(&article.title);
    url::fingerprint(&content::normalize_excerpt(text, cfg.excerpt_chars))
}

//! Demo orchestrator: walks a stub collection run through the limiter, the
//! session pool, and the deduplicator (log/stdout only, no real fetches).

use newsdesk_collector::{
    CollectorConfig, Deduplicator, HttpSessionFactory, RawArticle, RateLimiter, ServiceLimits,
    SessionPool, SystemTimeSource,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn stub_articles() -> Vec<RawArticle> {
    let base = RawArticle {
        url: String::new(),
        title: String::new(),
        description: None,
        content: None,
        source: String::new(),
        published_at: Some(chrono::Utc::now()),
        translated_title: None,
        translated_summary: None,
        importance: 0.0,
    };
    vec![
        RawArticle {
            url: "https://ex.com/ecb-rates?utm_source=feed".into(),
            title: "ECB raises rates by 25 basis points".into(),
            source: "Reuters".into(),
            ..base.clone()
        },
        RawArticle {
            url: "https://ex.com/ecb-rates/".into(),
            title: "ECB raises rates by 25 basis points".into(),
            source: "AP".into(),
            ..base.clone()
        },
        RawArticle {
            url: "https://other.org/harvest-season-delayed".into(),
            title: "Harvest season delayed by weather".into(),
            source: "CTK".into(),
            ..base
        },
    ]
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    let mut cfg = CollectorConfig::load_default().unwrap_or_default();
    cfg.limits.entry("newsapi".to_string()).or_insert(ServiceLimits {
        max_requests: 100,
        window_secs: 86_400,
        max_characters: None,
        burst_limit: Some(5),
        burst_window_secs: 60,
    });

    let clock = Arc::new(SystemTimeSource::new());
    let limiter = RateLimiter::new(cfg.limits.clone(), clock.clone());
    let pool = Arc::new(SessionPool::new(
        cfg.pool.clone(),
        Arc::new(HttpSessionFactory::default()),
        clock.clone(),
    ));
    let reaper = pool.spawn_reaper();
    let dedup = Deduplicator::new(cfg.dedup.clone(), clock);

    let mut collected = Vec::new();
    for article in stub_articles() {
        let decision = limiter.acquire("newsapi", 0, Duration::from_secs(5)).await;
        if !decision.allowed {
            tracing::warn!(wait = ?decision.wait, "quota denied; skipping fetch");
            continue;
        }
        let session = pool.acquire("newsapi").await.expect("pool acquire");
        tracing::info!(
            session = session.session().id(),
            url = %article.url,
            "fetched (stub)"
        );
        collected.push(article);
    }

    let result = dedup.deduplicate(collected);
    println!(
        "unique={} groups={} historical={} duplicates={}",
        result.unique.len(),
        result.duplicate_groups.len(),
        result.historical.len(),
        result.duplicate_count
    );

    for usage in limiter.usage_all() {
        println!(
            "{}: {}/{} requests, status {:?}",
            usage.service, usage.requests_made, usage.max_requests, usage.status
        );
    }
    let stats = pool.stats();
    println!(
        "pool: created={} reused={} reuse_rate={:.2}",
        stats.created,
        stats.reused,
        stats.reuse_rate()
    );

    reaper.abort();
    pool.shutdown();
    println!("collect-demo done");
}

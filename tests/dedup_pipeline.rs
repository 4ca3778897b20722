// tests/dedup_pipeline.rs
use chrono::{Duration, Utc};
use newsdesk_collector::{DedupConfig, Deduplicator, ManualTimeSource, RawArticle};
use std::sync::Arc;

fn article(url: &str, title: &str, source: &str) -> RawArticle {
    RawArticle {
        url: url.into(),
        title: title.into(),
        description: None,
        content: None,
        source: source.into(),
        published_at: None,
        translated_title: None,
        translated_summary: None,
        importance: 0.0,
    }
}

fn dedup() -> Deduplicator {
    Deduplicator::new(DedupConfig::default(), Arc::new(ManualTimeSource::new()))
}

#[test]
fn tracking_params_and_trailing_slash_collapse_in_both_orders() {
    let a = article("https://ex.com/a?utm_source=x", "First variant of headline", "A");
    let b = article("https://ex.com/a/", "Second variant of headline", "B");

    for input in [vec![a.clone(), b.clone()], vec![b, a]] {
        let result = dedup().deduplicate(input);
        assert_eq!(result.unique.len(), 1);
        assert_eq!(result.duplicate_count, 1);
        assert_eq!(result.duplicate_groups.len(), 1);
        assert_eq!(result.duplicate_groups[0].len(), 2);
    }
}

#[test]
fn idempotent_on_duplicate_free_input() {
    let input = vec![
        article("https://ex.com/markets/rates-decision", "Central bank raises key rate", "Reuters"),
        article("https://other.org/politics/budget-vote-passes", "Parliament passes budget in late vote", "CTK"),
        article("https://third.net/tech/chip-plant-opens", "New chip plant opens in the north", "AP"),
    ];
    let d = dedup();
    let result = d.deduplicate(input.clone());
    assert_eq!(result.unique, input);
    assert_eq!(result.duplicate_count, 0);
    assert!(result.duplicate_groups.is_empty());
}

#[test]
fn every_article_lands_in_exactly_one_bucket() {
    let now = Utc::now();
    let mut syndicated_a = article(
        "https://ex.com/rates",
        "ECB raises interest rates by 25 basis points",
        "Reuters",
    );
    syndicated_a.published_at = Some(now);
    let mut syndicated_b = article(
        "https://mirror.net/world/ecb",
        "ECB raises interest rates by 25 basis points",
        "Blog",
    );
    syndicated_b.published_at = Some(now - Duration::minutes(10));

    let input = vec![
        syndicated_a,
        syndicated_b,
        article("https://ex.com/rates/", "Link duplicate of the first", "AP"),
        article("https://unrelated.org/completely/different/story", "Completely different story here", "CTK"),
    ];
    let input_len = input.len();

    let result = dedup().deduplicate(input);

    let dup_members: usize = result.duplicate_groups.iter().map(|g| g.len() - 1).sum();
    assert_eq!(
        result.unique.len() + dup_members + result.historical.len(),
        input_len
    );
    assert_eq!(result.duplicate_count, input_len - result.unique.len());

    // No article may appear twice across buckets (canonicals excepted:
    // they lead their group and sit in the unique list).
    for group in &result.duplicate_groups {
        assert!(result.unique.contains(&group[0]));
        for member in &group[1..] {
            assert!(!result.unique.contains(member));
        }
    }
}

#[test]
fn canonical_is_the_richer_trusted_copy() {
    let now = Utc::now();

    let mut thin = article("https://blog.example/retold", "ECB raises interest rates", "Some Blog");
    thin.content = Some("Rates went up.".into());

    let mut rich = article("https://ex.com/rates-analysis", "ECB raises interest rates", "Reuters");
    rich.content = Some(
        "The European Central Bank raised its key interest rate on Thursday, \
         the third increase this year, citing stubborn inflation across the bloc."
            .into(),
    );
    rich.translated_summary = Some("Souhrn rozhodnutí o sazbách".into());
    rich.published_at = Some(now - Duration::hours(3));

    let result = dedup().deduplicate(vec![thin.clone(), rich.clone()]);
    assert_eq!(result.unique, vec![rich.clone()]);
    assert_eq!(result.duplicate_groups[0][0], rich);
    assert_eq!(result.duplicate_groups[0][1], thin);
}

#[test]
fn same_source_burst_groups_by_keyword_overlap() {
    let now = Utc::now();
    let mut a = article(
        "https://ctk.example/budget-1",
        "Parliament approves national budget amendment",
        "CTK",
    );
    a.published_at = Some(now);
    let mut b = article(
        "https://ctk.example/budget-2",
        "Budget amendment approved by parliament vote",
        "CTK",
    );
    b.published_at = Some(now + Duration::minutes(20));

    let result = dedup().deduplicate(vec![a, b]);
    assert_eq!(result.unique.len(), 1);
    assert_eq!(result.duplicate_groups.len(), 1);
}

#[test]
fn malformed_urls_do_not_break_the_batch() {
    let input = vec![
        article("::::not a url::::", "Strange feed entry with odd link", "X"),
        article("https://ex.com/fine", "Perfectly ordinary article", "Reuters"),
    ];
    let result = dedup().deduplicate(input);
    assert_eq!(result.unique.len(), 2);
    assert_eq!(result.duplicate_count, 0);
}

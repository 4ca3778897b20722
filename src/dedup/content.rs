// src/dedup/content.rs
//! Content-similarity stage: fuzzy matching and canonical selection.
//!
//! Two articles are duplicates when any one of these holds:
//! - titles are near-identical (case-insensitive edit-distance ratio),
//! - normalized body excerpts are near-identical,
//! - same source, published within a short window, sharing enough
//!   non-trivial keywords.

use crate::config::DedupConfig;
use crate::dedup::types::RawArticle;
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use std::collections::HashSet;
use strsim::normalized_levenshtein;

static STOP_WORDS: OnceCell<HashSet<&'static str>> = OnceCell::new();

fn stop_words() -> &'static HashSet<&'static str> {
    STOP_WORDS.get_or_init(|| {
        [
            "the", "and", "for", "that", "this", "with", "from", "have", "has", "was", "were",
            "are", "will", "been", "its", "but", "not", "they", "their", "after", "over", "into",
            "about", "more", "than", "when", "what", "who", "how", "why", "where", "which", "says",
            "said", "new", "news", "also", "could", "would", "should", "his", "her", "out",
        ]
        .into_iter()
        .collect()
    })
}

/// Normalize text for comparison: decode entities, strip tags, collapse
/// whitespace, lowercase, cap length.
pub fn normalize_excerpt(s: &str, cap: usize) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();

    out = out.trim().to_lowercase();
    if out.chars().count() > cap {
        out = out.chars().take(cap).collect();
    }
    out
}

/// Non-stop-word keywords of at least 3 characters.
pub fn keywords(s: &str) -> HashSet<String> {
    static RE_WORD: OnceCell<Regex> = OnceCell::new();
    let re = RE_WORD.get_or_init(|| Regex::new(r"[a-z0-9]{3,}").unwrap());
    let lowered = s.to_lowercase();
    re.find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .filter(|w| !stop_words().contains(w.as_str()))
        .collect()
}

fn titles_similar(a: &RawArticle, b: &RawArticle, threshold: f64) -> bool {
    let ta = a.title.trim().to_lowercase();
    let tb = b.title.trim().to_lowercase();
    if ta.is_empty() || tb.is_empty() {
        return false;
    }
    normalized_levenshtein(&ta, &tb) >= threshold
}

fn excerpts_similar(a: &RawArticle, b: &RawArticle, cfg: &DedupConfig) -> bool {
    let (Some(ba), Some(bb)) = (a.body(), b.body()) else {
        return false;
    };
    let ea = normalize_excerpt(ba, cfg.excerpt_chars);
    let eb = normalize_excerpt(bb, cfg.excerpt_chars);
    if ea.is_empty() || eb.is_empty() {
        return false;
    }
    normalized_levenshtein(&ea, &eb) >= cfg.content_similarity
}

fn same_source_close_in_time(a: &RawArticle, b: &RawArticle, cfg: &DedupConfig) -> bool {
    if !a.source.eq_ignore_ascii_case(&b.source) {
        return false;
    }
    let (Some(pa), Some(pb)) = (a.published_at, b.published_at) else {
        return false;
    };
    if (pa - pb).num_seconds().abs() > cfg.time_window_secs {
        return false;
    }
    let ka = keywords(&a.title);
    let kb = keywords(&b.title);
    ka.intersection(&kb).count() >= cfg.keyword_overlap_min
}

/// Any single condition is sufficient to treat two articles as duplicates.
pub fn are_duplicates(a: &RawArticle, b: &RawArticle, cfg: &DedupConfig) -> bool {
    titles_similar(a, b, cfg.title_similarity)
        || excerpts_similar(a, b, cfg)
        || same_source_close_in_time(a, b, cfg)
}

/// Weighted quality score used to pick a group's canonical representative.
/// Higher wins; ties go to the earlier input position.
pub fn canonical_score(article: &RawArticle, cfg: &DedupConfig, now: DateTime<Utc>) -> f64 {
    let mut score = 0.0;

    // Longer body is better, with a cap so one huge dump does not dominate.
    let body_len = article.body().map_or(0, |b| b.chars().count());
    score += (body_len.min(2_000) as f64) / 100.0;

    if article.has_translation() {
        score += 10.0;
    }

    score += article.importance as f64;

    if let Some(published) = article.published_at {
        let age_hours = (now - published).num_hours();
        if (0..24).contains(&age_hours) {
            score += 15.0;
        } else if (24..72).contains(&age_hours) {
            score += 7.0;
        }
    }

    if cfg
        .trusted_sources
        .iter()
        .any(|s| s.eq_ignore_ascii_case(&article.source))
    {
        score += 10.0;
    }

    score
}

/// Index of the canonical member within `members` (indices into `articles`).
/// Deterministic: strict improvement required, so earlier input wins ties.
pub fn select_canonical(
    members: &[usize],
    articles: &[RawArticle],
    cfg: &DedupConfig,
    now: DateTime<Utc>,
) -> usize {
    let mut best = members[0];
    let mut best_score = canonical_score(&articles[best], cfg, now);
    for &idx in &members[1..] {
        let score = canonical_score(&articles[idx], cfg, now);
        if score > best_score {
            best = idx;
            best_score = score;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn article(title: &str, source: &str) -> RawArticle {
        RawArticle {
            url: format!("https://ex.com/{}", title.replace(' ', "-")),
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

    #[test]
    fn near_identical_titles_match() {
        let cfg = DedupConfig::default();
        let a = article("ECB raises interest rates by 25 basis points", "Reuters");
        let b = article("ECB raises interest rates by 25 basis points!", "AP");
        assert!(are_duplicates(&a, &b, &cfg));

        let c = article("Oil prices fall on demand fears", "AP");
        assert!(!are_duplicates(&a, &c, &cfg));
    }

    #[test]
    fn excerpt_similarity_matches_across_titles() {
        let cfg = DedupConfig::default();
        let mut a = article("Central bank decision", "Reuters");
        let mut b = article("Rates: what happened today", "AP");
        a.content = Some("<p>The central bank raised its key rate to 4.5 percent on Thursday, citing persistent inflation pressure.</p>".into());
        b.content = Some("The central bank raised its key rate to 4.5 percent on Thursday, citing persistent inflation  pressure.".into());
        assert!(are_duplicates(&a, &b, &cfg));
    }

    #[test]
    fn same_source_time_window_needs_keyword_overlap() {
        let cfg = DedupConfig::default();
        let now = Utc::now();
        let mut a = article("Parliament approves national budget amendment", "CTK");
        let mut b = article("Budget amendment approved by parliament vote", "CTK");
        a.published_at = Some(now);
        b.published_at = Some(now + Duration::minutes(30));
        assert!(are_duplicates(&a, &b, &cfg));

        // Outside the window the same pair no longer groups.
        b.published_at = Some(now + Duration::hours(2));
        assert!(!are_duplicates(&a, &b, &cfg));
    }

    #[test]
    fn keywords_drop_stop_words_and_short_tokens() {
        let kw = keywords("The bank and the rate of EU inflation");
        assert!(kw.contains("bank"));
        assert!(kw.contains("rate"));
        assert!(kw.contains("inflation"));
        assert!(!kw.contains("the"));
        assert!(!kw.contains("eu")); // under 3 chars
    }

    #[test]
    fn canonical_prefers_translated_trusted_recent() {
        let cfg = DedupConfig::default();
        let now = Utc::now();

        let mut plain = article("Story", "Blog X");
        plain.content = Some("short".into());

        let mut strong = article("Story", "Reuters");
        strong.content = Some("A much longer article body with actual detail in it.".into());
        strong.translated_summary = Some("summary".into());
        strong.published_at = Some(now - Duration::hours(2));

        let articles = vec![plain, strong];
        let picked = select_canonical(&[0, 1], &articles, &cfg, now);
        assert_eq!(picked, 1);
    }

    #[test]
    fn canonical_tie_breaks_to_earliest_input() {
        let cfg = DedupConfig::default();
        let now = Utc::now();
        let a = article("Same story", "Blog X");
        let b = article("Same story", "Blog Y");
        let articles = vec![a, b];
        assert_eq!(select_canonical(&[0, 1], &articles, &cfg, now), 0);
    }
}

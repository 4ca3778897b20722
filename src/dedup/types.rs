// src/dedup/types.rs
use chrono::{DateTime, Utc};

/// One collected article, as handed over by whichever source fetched it.
/// Normalization happens once inside the pipeline; fields stay raw here.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RawArticle {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    pub source: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub translated_title: Option<String>,
    #[serde(default)]
    pub translated_summary: Option<String>,
    #[serde(default)]
    pub importance: f32,
}

impl RawArticle {
    /// Body text preferring full content over the teaser description.
    pub fn body(&self) -> Option<&str> {
        self.content
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.description.as_deref().filter(|s| !s.is_empty()))
    }

    pub fn has_translation(&self) -> bool {
        self.translated_title.as_deref().is_some_and(|s| !s.is_empty())
            || self
                .translated_summary
                .as_deref()
                .is_some_and(|s| !s.is_empty())
    }
}

/// Outcome of one deduplication run.
///
/// Buckets: `unique` holds canonical survivors, each `duplicate_groups`
/// entry lists a canonical first followed by its in-batch duplicates, and
/// `historical` holds articles dropped because a prior run already saw
/// them. Groups are kept for observability, never discarded.
#[derive(Debug, Clone, Default)]
pub struct DedupResult {
    pub unique: Vec<RawArticle>,
    pub duplicate_groups: Vec<Vec<RawArticle>>,
    pub historical: Vec<RawArticle>,
    pub duplicate_count: usize,
}

// src/dedup/url.rs
//! URL-identity primitives: canonical form and fingerprint hashing.
//!
//! The same story syndicated through two sources usually differs only in
//! scheme, `www.`, a trailing slash, or tracking parameters. Canonicalizing
//! before hashing collapses those variants to one key.

use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

/// Query parameters that identify campaigns, not content.
const TRACKING_PARAMS: &[&str] = &["ref", "source", "fbclid", "gclid", "mc_cid", "mc_eid"];

fn is_tracking_param(name: &str) -> bool {
    name.starts_with("utm_") || TRACKING_PARAMS.contains(&name)
}

/// Canonical form of a URL: https, no `www.`, no trailing slash, no
/// tracking params, no fragment, all lowercase. `None` when unparseable.
pub fn normalize_url(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw.trim()).ok()?;
    let host = parsed.host_str()?;
    let host = host.strip_prefix("www.").unwrap_or(host);

    let path = parsed.path().trim_end_matches('/');

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(name, _)| !is_tracking_param(&name.to_ascii_lowercase()))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    let mut out = format!("https://{host}{path}");
    if !kept.is_empty() {
        let query: Vec<String> = kept
            .into_iter()
            .map(|(name, value)| {
                if value.is_empty() {
                    name
                } else {
                    format!("{name}={value}")
                }
            })
            .collect();
        out.push('?');
        out.push_str(&query.join("&"));
    }
    Some(out.to_lowercase())
}

/// Dedup key for a raw URL string. Falls back to the trimmed lowercase
/// original when parsing fails, so malformed links still dedup exactly.
pub fn url_key(raw: &str) -> String {
    match normalize_url(raw) {
        Some(normalized) => normalized,
        None => {
            debug!(target: "dedup", url = raw, "unparseable url; using raw key");
            raw.trim().to_lowercase()
        }
    }
}

/// Stable hex fingerprint of a canonical key.
pub fn fingerprint(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for b in digest.iter().take(16) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// A raw news item proposed by a fetcher, not yet confirmed as new.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub title: String,
    pub link: String,
    /// Short body/excerpt from the feed, used as a summarization fallback.
    pub body: String,
    pub source_id: String,
    pub tags: Vec<String>,
    pub published_at: DateTime<Utc>,
}

impl Candidate {
    /// Dedup identity key: SHA-256 over normalized title + canonical link.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.title, &self.link)
    }
}

/// Normalize a title for fingerprinting and similarity comparison:
/// lowercase, punctuation and whitespace runs collapsed to single spaces.
/// Idempotent: normalizing an already-normalized title is a no-op.
pub fn normalize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut pending_space = false;
    for c in title.chars() {
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            // Lowercasing can expand into combining marks ('İ' becomes
            // "i\u{307}"); keep only the alphanumeric part so a second
            // normalization pass sees the same string
            out.extend(c.to_lowercase().filter(|lc| lc.is_alphanumeric()));
            pending_space = false;
        } else {
            // Punctuation, whitespace, and symbols all act as separators
            pending_space = true;
        }
    }
    out
}

/// Canonicalize a link for fingerprinting. URL parsing lowercases the
/// scheme and host; fragments never identify a distinct story.
pub fn canonicalize_link(link: &str) -> String {
    match Url::parse(link.trim()) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => link.trim().to_string(),
    }
}

pub fn fingerprint(title: &str, link: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_title(title).as_bytes());
    hasher.update(b"|");
    hasher.update(canonicalize_link(link).as_bytes());
    format!("{:x}", hasher.finalize())
}

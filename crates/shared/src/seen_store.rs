use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::models::{normalize_title, Candidate};

/// Records which news items have already been processed. Items are matched
/// by content fingerprint, with a title-similarity fallback for re-titled
/// syndication of the same story, and expire after a fixed retention window
/// so a resurfacing story can be posted again.
pub struct SeenStore {
    conn: Connection,
    ttl: Duration,
    similarity_threshold: f64,
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS seen_items (
    fingerprint TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    first_seen_at TEXT NOT NULL,
    source_id TEXT NOT NULL
)";

/// Fixed-width UTC timestamp so string comparison in SQL matches
/// chronological order.
fn to_db_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

impl SeenStore {
    /// Open (or create) the store at `path`. Failure here is fatal for the
    /// run: without dedup state we would re-publish old items.
    pub fn open(path: &Path, ttl: Duration, similarity_threshold: f64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).context("Failed to create dedup store directory")?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open dedup store at {}", path.display()))?;
        Self::with_connection(conn, ttl, similarity_threshold)
    }

    /// In-memory store, for tests and dry runs against a clean slate.
    pub fn open_in_memory(ttl: Duration, similarity_threshold: f64) -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory dedup store")?;
        Self::with_connection(conn, ttl, similarity_threshold)
    }

    fn with_connection(conn: Connection, ttl: Duration, similarity_threshold: f64) -> Result<Self> {
        conn.execute(SCHEMA, [])
            .context("Failed to create seen_items table")?;
        Ok(Self {
            conn,
            ttl,
            similarity_threshold: similarity_threshold.clamp(0.0, 1.0),
        })
    }

    /// True when a matching *active* record exists: either an exact
    /// fingerprint hit, or an active record whose normalized title is within
    /// the similarity threshold. Expired records never match.
    pub fn is_duplicate(&self, candidate: &Candidate, now: DateTime<Utc>) -> Result<bool> {
        let fingerprint = candidate.fingerprint();

        let exact: Option<String> = self
            .conn
            .query_row(
                "SELECT first_seen_at FROM seen_items WHERE fingerprint = ?1",
                params![fingerprint],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query dedup store by fingerprint")?;
        if let Some(first_seen_at) = exact {
            if self.is_active(&first_seen_at, now) {
                return Ok(true);
            }
        }

        let incoming = normalize_title(&candidate.title);
        if incoming.is_empty() {
            return Ok(false);
        }

        let mut stmt = self
            .conn
            .prepare("SELECT title, first_seen_at FROM seen_items WHERE fingerprint != ?1")
            .context("Failed to query dedup store titles")?;
        let rows = stmt.query_map(params![fingerprint], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        for row in rows {
            let (title, first_seen_at) = match row {
                Ok(pair) => pair,
                Err(e) => {
                    // Corrupt row: skip it, keep checking the rest
                    eprintln!("⚠ Skipping corrupt seen_items row: {}", e);
                    continue;
                }
            };
            if !self.is_active(&first_seen_at, now) {
                continue;
            }
            let similarity = strsim::normalized_levenshtein(&incoming, &normalize_title(&title));
            if similarity >= self.similarity_threshold {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Insert or refresh the record for `candidate`, stamping `first_seen_at`
    /// with `now`. Idempotent: an active record with the same fingerprint is
    /// left untouched; only an expired one gets a fresh timestamp.
    pub fn record(&self, candidate: &Candidate, now: DateTime<Utc>) -> Result<()> {
        let cutoff = to_db_timestamp(now - self.ttl);
        self.conn
            .execute(
                "INSERT INTO seen_items (fingerprint, title, first_seen_at, source_id)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(fingerprint) DO UPDATE SET
                     title = excluded.title,
                     first_seen_at = excluded.first_seen_at,
                     source_id = excluded.source_id
                 WHERE seen_items.first_seen_at <= ?5",
                params![
                    candidate.fingerprint(),
                    candidate.title,
                    to_db_timestamp(now),
                    candidate.source_id,
                    cutoff
                ],
            )
            .context("Failed to record seen item")?;
        Ok(())
    }

    /// Delete records older than the retention window. Returns the number of
    /// rows removed. Callers treat failure as non-fatal; expired rows are
    /// already excluded from dedup checks, so a missed purge only costs disk.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = to_db_timestamp(now - self.ttl);
        let removed = self
            .conn
            .execute(
                "DELETE FROM seen_items WHERE first_seen_at <= ?1",
                params![cutoff],
            )
            .context("Failed to purge expired seen items")?;
        Ok(removed)
    }

    /// Total rows currently stored, active or not.
    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM seen_items", [], |row| row.get(0))
            .context("Failed to count seen items")?;
        Ok(count as usize)
    }

    fn is_active(&self, first_seen_at: &str, now: DateTime<Utc>) -> bool {
        match DateTime::parse_from_rfc3339(first_seen_at) {
            Ok(ts) => now.signed_duration_since(ts.with_timezone(&Utc)) < self.ttl,
            // Unparseable timestamp: treat the record as inactive
            Err(_) => false,
        }
    }
}

/// Screens candidates accepted within a single run, with the same
/// fingerprint and title-similarity rules as the store. The store only
/// learns about items once the batch is recorded, so without this two
/// syndicated copies arriving in the same fetch would both get posted.
pub struct BatchDedup {
    similarity_threshold: f64,
    fingerprints: HashSet<String>,
    titles: Vec<String>,
}

impl BatchDedup {
    pub fn new(similarity_threshold: f64) -> Self {
        Self {
            similarity_threshold: similarity_threshold.clamp(0.0, 1.0),
            fingerprints: HashSet::new(),
            titles: Vec::new(),
        }
    }

    /// True when the candidate is new to this batch; admitted items are
    /// remembered for the rest of the run.
    pub fn admit(&mut self, candidate: &Candidate) -> bool {
        let fingerprint = candidate.fingerprint();
        if self.fingerprints.contains(&fingerprint) {
            return false;
        }

        let normalized = normalize_title(&candidate.title);
        if !normalized.is_empty() {
            for title in &self.titles {
                if strsim::normalized_levenshtein(&normalized, title) >= self.similarity_threshold {
                    return false;
                }
            }
        }

        self.fingerprints.insert(fingerprint);
        self.titles.push(normalized);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candidate(title: &str, link: &str) -> Candidate {
        Candidate {
            title: title.to_string(),
            link: link.to_string(),
            body: String::new(),
            source_id: "test-rss".to_string(),
            tags: Vec::new(),
            published_at: Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap(),
        }
    }

    fn store() -> SeenStore {
        SeenStore::open_in_memory(Duration::hours(24), 0.9).unwrap()
    }

    #[test]
    fn corrupt_timestamp_rows_are_ignored() {
        let store = store();
        store
            .conn
            .execute(
                "INSERT INTO seen_items (fingerprint, title, first_seen_at, source_id)
                 VALUES ('deadbeef', 'Senate Passes Budget Bill', 'not-a-timestamp', 'x')",
                [],
            )
            .unwrap();

        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let near_dup = candidate("Senate passes budget bill!", "https://gov.example/other");
        assert!(!store.is_duplicate(&near_dup, now).unwrap());
    }

    #[test]
    fn threshold_is_clamped_into_unit_range() {
        let store = SeenStore::open_in_memory(Duration::hours(24), 3.5).unwrap();
        assert_eq!(store.similarity_threshold, 1.0);
        let store = SeenStore::open_in_memory(Duration::hours(24), -0.1).unwrap();
        assert_eq!(store.similarity_threshold, 0.0);
    }

    #[test]
    fn db_timestamps_sort_lexicographically() {
        let early = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let later = early + Duration::milliseconds(1);
        assert!(to_db_timestamp(early) < to_db_timestamp(later));
    }
}

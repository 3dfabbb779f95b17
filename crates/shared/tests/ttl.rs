use chrono::{DateTime, Duration, TimeZone, Utc};
use shared::{Candidate, SeenStore};

fn candidate(title: &str, link: &str) -> Candidate {
    Candidate {
        title: title.to_string(),
        link: link.to_string(),
        body: String::new(),
        source_id: "gov-rss".to_string(),
        tags: Vec::new(),
        published_at: t0(),
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap()
}

fn store() -> SeenStore {
    SeenStore::open_in_memory(Duration::hours(24), 0.9).unwrap()
}

#[test]
fn record_expires_after_ttl() {
    let store = store();
    let item = candidate("Senate Passes Budget Bill", "https://gov.example/bill123");
    store.record(&item, t0()).unwrap();

    // Still active just inside the window
    assert!(store
        .is_duplicate(&item, t0() + Duration::hours(23))
        .unwrap());
    // Expired just past it
    assert!(!store
        .is_duplicate(&item, t0() + Duration::hours(25))
        .unwrap());
}

#[test]
fn expired_record_no_longer_matches_by_similarity() {
    let store = store();
    store
        .record(
            &candidate("Senate Passes Budget Bill", "https://gov.example/bill123"),
            t0(),
        )
        .unwrap();

    let syndicated = candidate(
        "Senate passes budget bill!!",
        "https://gov.example/bill123-copy",
    );
    assert!(!store
        .is_duplicate(&syndicated, t0() + Duration::hours(25))
        .unwrap());
}

#[test]
fn recording_twice_keeps_a_single_row() {
    let store = store();
    let item = candidate("Senate Passes Budget Bill", "https://gov.example/bill123");
    store.record(&item, t0()).unwrap();
    store.record(&item, t0() + Duration::minutes(5)).unwrap();

    assert_eq!(store.count().unwrap(), 1);
}

#[test]
fn re_recording_an_active_item_does_not_extend_its_lifetime() {
    let store = store();
    let item = candidate("Senate Passes Budget Bill", "https://gov.example/bill123");
    store.record(&item, t0()).unwrap();
    // Second record while the first is still active is a no-op
    store.record(&item, t0() + Duration::hours(23)).unwrap();

    // Expiry is still measured from the first sighting
    assert!(!store
        .is_duplicate(&item, t0() + Duration::hours(25))
        .unwrap());
}

#[test]
fn re_recording_an_expired_item_refreshes_it() {
    let store = store();
    let item = candidate("Senate Passes Budget Bill", "https://gov.example/bill123");
    store.record(&item, t0()).unwrap();

    // The story resurfaces after expiry and gets published again
    let resurface = t0() + Duration::hours(25);
    assert!(!store.is_duplicate(&item, resurface).unwrap());
    store.record(&item, resurface).unwrap();

    assert_eq!(store.count().unwrap(), 1);
    assert!(store
        .is_duplicate(&item, resurface + Duration::hours(1))
        .unwrap());
}

#[test]
fn purge_removes_only_expired_rows() {
    let store = store();
    let old = candidate("Old story", "https://gov.example/old");
    let new = candidate("New story", "https://gov.example/new");
    store.record(&old, t0()).unwrap();
    store.record(&new, t0() + Duration::hours(20)).unwrap();

    let removed = store.purge_expired(t0() + Duration::hours(25)).unwrap();
    assert_eq!(removed, 1);
    assert_eq!(store.count().unwrap(), 1);

    // The surviving row still matches
    assert!(store
        .is_duplicate(&new, t0() + Duration::hours(25))
        .unwrap());
}

#[test]
fn purge_on_empty_store_is_a_noop() {
    let store = store();
    assert_eq!(store.purge_expired(t0()).unwrap(), 0);
}

#[test]
fn dedup_works_without_an_explicit_purge() {
    // Expiry is lazy: even if purge never ran, stale rows are invisible
    let store = store();
    let item = candidate("Senate Passes Budget Bill", "https://gov.example/bill123");
    store.record(&item, t0()).unwrap();

    assert_eq!(store.count().unwrap(), 1);
    assert!(!store
        .is_duplicate(&item, t0() + Duration::hours(48))
        .unwrap());
}

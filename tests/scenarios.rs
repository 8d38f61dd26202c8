use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use ulid::Ulid;

use waitlist::model::*;
use waitlist::{Engine, FixedClock, LocalStore};

// ── Test infrastructure ──────────────────────────────────────

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn midnight(y: i32, m: u32, d: u32) -> Timestamp {
    start_of_day(date(y, m, d))
}

fn engine_at(now: Timestamp) -> (Engine, Arc<FixedClock>, Arc<LocalStore>) {
    let clock = Arc::new(FixedClock::new(now));
    let store = Arc::new(LocalStore::in_memory());
    (Engine::new(store.clone(), clock.clone()), clock, store)
}

fn new_entry(site_id: SiteId, raw: RawRule, expiration_date: Timestamp) -> NewEntry {
    NewEntry {
        site_id,
        client_id: Ulid::new(),
        rule: Rule::try_from(raw).unwrap(),
        expiration_date,
        notes: None,
    }
}

fn days_of_week(days: &[i64]) -> RawRule {
    RawRule {
        rule_type: "DAY_OF_WEEK".into(),
        days_of_week: Some(days.to_vec()),
        ..Default::default()
    }
}

fn specific_dates(dates: &[NaiveDate]) -> RawRule {
    RawRule {
        rule_type: "SPECIFIC_DATES".into(),
        specific_dates: Some(dates.to_vec()),
        ..Default::default()
    }
}

// ── Scenarios ────────────────────────────────────────────────

#[tokio::test]
async fn fridays_in_january() {
    let (engine, _, _) = engine_at(midnight(2024, 12, 20));
    let site = Ulid::new();
    engine
        .create_entry(new_entry(site, days_of_week(&[5]), midnight(2025, 6, 1)))
        .await
        .unwrap();

    let result = engine
        .match_range(site, Some(date(2025, 1, 1)), Some(date(2025, 1, 31)))
        .await
        .unwrap();

    assert_eq!(result.matches.len(), 1);
    assert_eq!(
        result.matches[0].matching_dates,
        vec![
            date(2025, 1, 3),
            date(2025, 1, 10),
            date(2025, 1, 17),
            date(2025, 1, 24),
            date(2025, 1, 31),
        ]
    );
    assert_eq!(result.matches[0].earliest_match, date(2025, 1, 3));
    assert!(result.conflicts.is_empty());
}

#[tokio::test]
async fn earlier_request_ranks_first() {
    let (engine, clock, _) = engine_at(midnight(2025, 3, 1));
    let site = Ulid::new();
    let a = engine
        .create_entry(new_entry(site, specific_dates(&[date(2025, 3, 15)]), midnight(2025, 4, 1)))
        .await
        .unwrap();
    clock.advance(Duration::days(1));
    let b = engine
        .create_entry(new_entry(site, specific_dates(&[date(2025, 3, 15)]), midnight(2025, 4, 1)))
        .await
        .unwrap();

    let result = engine
        .match_range(site, Some(date(2025, 3, 1)), Some(date(2025, 3, 31)))
        .await
        .unwrap();

    assert_eq!(result.conflicts.len(), 1);
    let conflict = &result.conflicts[0];
    assert_eq!(conflict.date, date(2025, 3, 15));
    assert_eq!(conflict.contenders[0].entry.id, a.id);
    assert_eq!(conflict.contenders[0].priority, 1);
    assert_eq!(conflict.contenders[1].entry.id, b.id);
    assert_eq!(conflict.contenders[1].priority, 2);
    assert_eq!(result.summary.dates_with_conflicts, 1);
}

#[tokio::test]
async fn cancelled_booking_leaves_date_open() {
    let (engine, _, store) = engine_at(midnight(2025, 1, 15));
    let site = Ulid::new();
    let raw = RawRule {
        rule_type: "DATE_RANGE".into(),
        date_range_start: Some(date(2025, 2, 1)),
        date_range_end: Some(date(2025, 2, 10)),
        ..Default::default()
    };
    engine
        .create_entry(new_entry(site, raw, midnight(2025, 3, 1)))
        .await
        .unwrap();

    let booking = Ulid::new();
    store
        .record_booking(CommittedBooking {
            id: booking,
            site_id: site,
            start: midnight(2025, 2, 5) + Duration::hours(14),
            end: Some(midnight(2025, 2, 5) + Duration::hours(18)),
            status: BookingStatus::Confirmed,
        })
        .await
        .unwrap();

    let window = (Some(date(2025, 2, 1)), Some(date(2025, 2, 28)));
    let blocked = engine.match_range(site, window.0, window.1).await.unwrap();
    assert!(!blocked.matches[0].matching_dates.contains(&date(2025, 2, 5)));
    assert_eq!(blocked.matches[0].match_count, 9);

    store
        .set_booking_status(booking, BookingStatus::Cancelled)
        .await
        .unwrap();
    let open = engine.match_range(site, window.0, window.1).await.unwrap();
    assert!(open.matches[0].matching_dates.contains(&date(2025, 2, 5)));
    assert_eq!(open.matches[0].match_count, 10);
}

#[tokio::test]
async fn expired_entry_drops_out_before_its_date() {
    let (engine, clock, _) = engine_at(midnight(2025, 1, 1));
    let site = Ulid::new();
    let entry = engine
        .create_entry(new_entry(site, specific_dates(&[date(2025, 1, 10)]), midnight(2025, 1, 5)))
        .await
        .unwrap();

    clock.set(midnight(2025, 1, 6));
    assert_eq!(engine.sweep_expired(site).await.unwrap().expired_count, 1);

    let stored = engine.get_entry(site, entry.id).await.unwrap();
    assert_eq!(stored.status, EntryStatus::Expired);
    let result = engine
        .match_range(site, Some(date(2025, 1, 6)), Some(date(2025, 1, 31)))
        .await
        .unwrap();
    assert!(result.matches.is_empty());
    assert!(result.conflicts.is_empty());
    assert!(engine
        .match_single_date(site, date(2025, 1, 10))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn year_long_request_clamped() {
    let (engine, _, _) = engine_at(midnight(2024, 12, 1));
    let site = Ulid::new();

    let result = engine
        .match_range(site, Some(date(2025, 1, 1)), Some(date(2025, 12, 31)))
        .await
        .unwrap();

    assert!(result.clamped);
    assert_eq!(result.window.from(), date(2025, 1, 1));
    assert_eq!(result.window.to(), date(2025, 4, 1));
    assert_eq!(result.summary, MatchSummary::default());
}

// ── Wire shape ───────────────────────────────────────────────

#[tokio::test]
async fn range_match_serializes_camel_case() {
    let (engine, _, _) = engine_at(midnight(2025, 1, 1));
    let site = Ulid::new();
    engine
        .create_entry(new_entry(site, days_of_week(&[5]), midnight(2025, 6, 1)))
        .await
        .unwrap();

    let result = engine.match_range(site, None, None).await.unwrap();
    let json = serde_json::to_value(&result).unwrap();

    assert_eq!(json["window"]["from"], "2025-01-01");
    assert_eq!(json["window"]["to"], "2025-01-31");
    assert_eq!(json["clamped"], false);
    assert_eq!(json["matches"][0]["matchCount"], 5);
    assert_eq!(json["matches"][0]["earliestMatch"], "2025-01-03");
    assert_eq!(json["matches"][0]["entry"]["siteId"], site.to_string());
    assert_eq!(json["summary"]["totalPendingEntries"], 1);
    assert_eq!(json["summary"]["entriesWithMatches"], 1);
    assert_eq!(json["summary"]["totalAvailableDates"], 5);
    assert_eq!(json["summary"]["datesWithConflicts"], 0);
}

#[test]
fn raw_rule_accepts_camel_case_json() {
    let raw: RawRule = serde_json::from_str(
        r#"{"ruleType":"DAY_OF_WEEK","daysOfWeek":[1,3,5]}"#,
    )
    .unwrap();
    let rule = Rule::try_from(raw).unwrap();
    assert!(rule.includes(date(2025, 1, 6))); // Monday
    assert!(!rule.includes(date(2025, 1, 7))); // Tuesday

    let mismatched: RawRule = serde_json::from_str(
        r#"{"ruleType":"SPECIFIC_DATES","daysOfWeek":[1]}"#,
    )
    .unwrap();
    assert!(Rule::try_from(mismatched).is_err());
}

// ── Persistence ──────────────────────────────────────────────

#[tokio::test]
async fn entries_survive_restart() {
    let dir = std::env::temp_dir().join(format!("waitlist_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("waitlist.wal");
    let clock = Arc::new(FixedClock::new(midnight(2025, 1, 1)));
    let site = Ulid::new();

    let entry = {
        let engine = Engine::new(Arc::new(LocalStore::open(&path).unwrap()), clock.clone());
        let entry = engine
            .create_entry(new_entry(site, days_of_week(&[5]), midnight(2025, 1, 20)))
            .await
            .unwrap();
        clock.set(midnight(2025, 1, 21));
        assert_eq!(engine.sweep_expired(site).await.unwrap().expired_count, 1);
        entry
    };

    let engine = Engine::new(Arc::new(LocalStore::open(&path).unwrap()), clock);
    let restored = engine.get_entry(site, entry.id).await.unwrap();
    assert_eq!(restored.status, EntryStatus::Expired);
    assert_eq!(restored.created_at, entry.created_at);
    assert_eq!(engine.sweep_expired(site).await.unwrap().expired_count, 0);

    let _ = std::fs::remove_dir_all(&dir);
}

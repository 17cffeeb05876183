//! Integration tests for EventLog against a temporary directory.

use agentos_events::{Event, EventLog, PersistedEvent};
use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::json;

fn record_on(date: NaiveDate, name: &str) -> PersistedEvent {
    let ts = Utc.from_utc_datetime(&date.and_hms_opt(12, 0, 0).unwrap());
    PersistedEvent {
        name: name.to_string(),
        data: json!({"n": name}),
        timestamp: ts,
        source: "test".to_string(),
    }
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

// =========================================================================
// Basic behavior
// =========================================================================

#[tokio::test]
async fn append_writes_into_daily_partition() {
    let tmp = tempfile::tempdir().unwrap();
    let log = EventLog::new(tmp.path());

    let path = log.append(&record_on(day(2026, 3, 1), "a.one")).await.unwrap();

    assert_eq!(path, tmp.path().join("2026-03-01").join("events.jsonl"));
    let events = log.read_date(day(2026, 3, 1)).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name, "a.one");
}

#[tokio::test]
async fn reads_preserve_append_order() {
    let tmp = tempfile::tempdir().unwrap();
    let log = EventLog::new(tmp.path());

    for name in ["first", "second", "third"] {
        log.append(&record_on(day(2026, 3, 1), name)).await.unwrap();
    }

    let names: Vec<String> = log
        .read_date(day(2026, 3, 1))
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn missing_partition_reads_as_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let log = EventLog::new(tmp.path().join("never-created"));

    assert!(log.read_date(day(2026, 1, 1)).await.unwrap().is_empty());
    assert!(log.list_partitions().await.unwrap().is_empty());
    assert_eq!(log.count(None).await.unwrap(), 0);
}

#[tokio::test]
async fn malformed_lines_are_skipped_not_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let log = EventLog::new(tmp.path());
    log.append(&record_on(day(2026, 3, 1), "good.one")).await.unwrap();

    let file = tmp.path().join("2026-03-01").join("events.jsonl");
    let mut content = std::fs::read_to_string(&file).unwrap();
    content.push_str("{not json\n");
    content.push_str("{\"name\": \"missing.fields\"}\n");
    content.push('\n');
    std::fs::write(&file, content).unwrap();
    log.append(&record_on(day(2026, 3, 1), "good.two")).await.unwrap();

    let names: Vec<String> = log
        .read_date(day(2026, 3, 1))
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["good.one", "good.two"]);
}

// =========================================================================
// Ranges and partitions
// =========================================================================

#[tokio::test]
async fn range_and_recent_reads_span_partitions() {
    let tmp = tempfile::tempdir().unwrap();
    let log = EventLog::new(tmp.path());
    log.append(&record_on(day(2026, 3, 1), "d1")).await.unwrap();
    log.append(&record_on(day(2026, 3, 2), "d2")).await.unwrap();
    log.append(&record_on(day(2026, 3, 4), "d4")).await.unwrap();

    let range = log.read_range(day(2026, 3, 1), day(2026, 3, 2)).await.unwrap();
    assert_eq!(range.len(), 2);

    let recent = log.read_recent(3, day(2026, 3, 4)).await.unwrap();
    let names: Vec<&str> = recent.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["d2", "d4"]);

    assert_eq!(
        log.list_partitions().await.unwrap(),
        vec![day(2026, 3, 1), day(2026, 3, 2), day(2026, 3, 4)]
    );
    assert_eq!(log.count(None).await.unwrap(), 3);
    assert_eq!(log.count(Some(day(2026, 3, 2))).await.unwrap(), 1);
}

#[tokio::test]
async fn unpartitioned_log_filters_by_date() {
    let tmp = tempfile::tempdir().unwrap();
    let log = EventLog::new(tmp.path()).with_daily_partitions(false);
    log.append(&record_on(day(2026, 3, 1), "d1")).await.unwrap();
    log.append(&record_on(day(2026, 3, 2), "d2")).await.unwrap();

    assert!(tmp.path().join("events.jsonl").exists());
    assert_eq!(log.read_date(day(2026, 3, 2)).await.unwrap()[0].name, "d2");
    assert_eq!(
        log.list_partitions().await.unwrap(),
        vec![day(2026, 3, 1), day(2026, 3, 2)]
    );
}

#[tokio::test]
async fn cleanup_removes_only_expired_partitions() {
    let tmp = tempfile::tempdir().unwrap();
    let log = EventLog::new(tmp.path()).with_retention_days(Some(7));
    log.append(&record_on(day(2026, 3, 1), "old")).await.unwrap();
    log.append(&record_on(day(2026, 3, 20), "fresh")).await.unwrap();

    let removed = log.cleanup(day(2026, 3, 21)).await.unwrap();

    assert_eq!(removed, vec![day(2026, 3, 1)]);
    assert_eq!(log.list_partitions().await.unwrap(), vec![day(2026, 3, 20)]);
}

#[tokio::test]
async fn cleanup_without_retention_keeps_everything() {
    let tmp = tempfile::tempdir().unwrap();
    let log = EventLog::new(tmp.path()).with_retention_days(None);
    log.append(&record_on(day(2000, 1, 1), "ancient")).await.unwrap();

    assert!(log.cleanup(day(2026, 3, 21)).await.unwrap().is_empty());
    assert_eq!(log.count(None).await.unwrap(), 1);
}

#[tokio::test]
async fn stats_summarise_the_log() {
    let tmp = tempfile::tempdir().unwrap();
    let log = EventLog::new(tmp.path());
    log.append(&record_on(day(2026, 3, 1), "a")).await.unwrap();
    log.append(&record_on(day(2026, 3, 3), "b")).await.unwrap();
    log.append(&Event::new("live.event", json!({})).to_record())
        .await
        .unwrap();

    let stats = log.stats().await.unwrap();
    assert_eq!(stats.total_events, 3);
    assert_eq!(stats.oldest_partition, Some(day(2026, 3, 1)));
    assert!(stats.partitions >= 2);
    assert!(stats.total_size_bytes > 0);
}

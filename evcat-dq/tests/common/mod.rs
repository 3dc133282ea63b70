//! Shared fixtures for evcat-dq integration tests
#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use evcat_common::db::{init_memory_database, EventRecord, Series, SeriesType, Source, SourceKind};
use evcat_dq::ingest::{EventCandidate, Ingestor, MemoryFeed};
use evcat_dq::stats::IngestStats;
use evcat_dq::store::{CatalogStore, EventWindow, NewEvent, NewSeries, NewSource, SqliteCatalog};
use evcat_dq::JobOptions;
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_FINGERPRINT: AtomicUsize = AtomicUsize::new(1);

/// Fixed "today" for every scenario (a Tuesday)
pub fn today() -> NaiveDate {
    date(2026, 3, 10)
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, minute, 0).unwrap()
}

pub async fn catalog() -> SqliteCatalog {
    SqliteCatalog::new(init_memory_database().await.unwrap())
}

pub async fn add_source(store: &SqliteCatalog, slug: &str, kind: SourceKind) -> Source {
    add_source_with(store, slug, kind, None, false).await
}

pub async fn add_source_with(
    store: &SqliteCatalog,
    slug: &str,
    kind: SourceKind,
    owner_channel_id: Option<i64>,
    is_sensitive: bool,
) -> Source {
    store
        .upsert_source(&NewSource {
            name: format!("{} site", slug),
            slug: slug.to_string(),
            kind,
            priority: None,
            is_active: true,
            owner_channel_id,
            is_sensitive,
        })
        .await
        .unwrap()
}

pub fn candidate(source: &str, title: &str, venue: &str, start_date: NaiveDate) -> EventCandidate {
    EventCandidate {
        source: source.to_string(),
        title: title.to_string(),
        venue: Some(venue.to_string()),
        start_date: start_date.format("%Y-%m-%d").to_string(),
        start_time: Some("20:00".to_string()),
        ..Default::default()
    }
}

/// `count` one-off talks with distinct titles, enough to push later rows onto another page
pub fn one_off_talks(source: &str, count: usize, start_date: NaiveDate) -> Vec<EventCandidate> {
    (1..=count)
        .map(|n| candidate(source, &format!("Guest Talk {}", n), "Side Room", start_date))
        .collect()
}

pub async fn ingest(store: &SqliteCatalog, candidates: Vec<EventCandidate>) -> IngestStats {
    let mut feed = MemoryFeed::new(candidates);
    Ingestor::new(store)
        .ingest(&mut feed, &JobOptions::live())
        .await
        .unwrap()
}

/// Insert an event directly, bypassing ingestion
pub async fn insert_event(
    store: &SqliteCatalog,
    source_id: i64,
    venue_id: Option<i64>,
    title: &str,
    start_date: NaiveDate,
) -> i64 {
    let fingerprint = format!("fixture-{}", NEXT_FINGERPRINT.fetch_add(1, Ordering::Relaxed));
    store
        .insert_event(&NewEvent {
            source_id,
            venue_id,
            title: title.to_string(),
            start_date,
            start_time: None,
            end_date: None,
            end_time: None,
            description: None,
            image_url: None,
            ticket_url: None,
            tags: Vec::new(),
            fingerprint,
            created_at: at(0),
        })
        .await
        .unwrap()
}

pub async fn add_program_series(
    store: &SqliteCatalog,
    title: &str,
    slug: &str,
    festival_id: Option<i64>,
) -> i64 {
    store
        .insert_series(&NewSeries {
            series_type: SeriesType::FestivalProgram,
            title: title.to_string(),
            slug: slug.to_string(),
            festival_id,
            venue_id: None,
            external_id: None,
        })
        .await
        .unwrap()
}

/// Insert `count` events on consecutive days and link them to a series
pub async fn add_linked_events(
    store: &SqliteCatalog,
    source_id: i64,
    series_id: i64,
    title: &str,
    first: NaiveDate,
    count: u32,
) -> Vec<i64> {
    let mut ids = Vec::new();
    for offset in 0..count {
        let start = first + chrono::Duration::days(offset as i64);
        let id = insert_event(store, source_id, None, title, start).await;
        store.link_event(id, series_id).await.unwrap();
        ids.push(id);
    }
    ids
}

/// Withdraw an event without deleting it
pub async fn deactivate(store: &SqliteCatalog, event_id: i64) {
    sqlx::query("UPDATE events SET is_active = 0 WHERE id = ?")
        .bind(event_id)
        .execute(store.pool())
        .await
        .unwrap();
}

pub async fn all_events(store: &SqliteCatalog) -> Vec<EventRecord> {
    store
        .events_page(&EventWindow::default(), 0, 10_000)
        .await
        .unwrap()
}

pub async fn all_series(store: &SqliteCatalog) -> Vec<(Series, i64)> {
    let mut all = Vec::new();
    for series_type in [SeriesType::RecurringShow, SeriesType::Film, SeriesType::FestivalProgram] {
        for summary in store.series_summaries(series_type).await.unwrap() {
            all.push((summary.series, summary.event_count));
        }
    }
    all.sort_by_key(|(series, _)| series.id);
    all
}

//! Candidate ingestion against an in-memory catalog

mod common;

use common::*;
use evcat_common::db::{SeriesType, SourceKind};
use evcat_dq::ingest::{EventCandidate, Ingestor, MemoryFeed};
use evcat_dq::store::{CatalogStore, NewSource};
use evcat_dq::JobOptions;

#[tokio::test]
async fn test_reingest_is_unchanged() {
    let store = catalog().await;
    add_source(&store, "listings", SourceKind::Aggregator).await;
    let candidates = vec![
        candidate("listings", "Live Jazz", "Blue Note", date(2026, 3, 12)),
        candidate("listings", "Trivia Night", "The Local", date(2026, 3, 11)),
    ];

    let first = ingest(&store, candidates.clone()).await;
    assert_eq!(first.inserted, 2);
    let snapshot = all_events(&store).await;

    let second = ingest(&store, candidates).await;
    assert_eq!(second.inserted, 0);
    assert_eq!(second.unchanged, 2);
    assert_eq!(all_events(&store).await, snapshot);
}

#[tokio::test]
async fn test_changed_content_updates_in_place() {
    let store = catalog().await;
    add_source(&store, "listings", SourceKind::Aggregator).await;
    ingest(&store, vec![candidate("listings", "Live Jazz", "Blue Note", date(2026, 3, 12))]).await;
    let original = all_events(&store).await.remove(0);

    let revised = EventCandidate {
        description: Some("Now with a string section".to_string()),
        tags: vec!["21+".to_string()],
        ..candidate("listings", "live  jazz", "Blue Note", date(2026, 3, 12))
    };
    let stats = ingest(&store, vec![revised]).await;
    assert_eq!(stats.updated, 1);

    let events = all_events(&store).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, original.id);
    assert_eq!(events[0].title, "Live Jazz");
    assert_eq!(events[0].description.as_deref(), Some("Now with a string section"));
    assert_eq!(events[0].tags, vec!["21+".to_string()]);
}

#[tokio::test]
async fn test_unknown_and_inactive_sources_are_skipped() {
    let store = catalog().await;
    store
        .upsert_source(&NewSource {
            name: "Old site".to_string(),
            slug: "old-site".to_string(),
            kind: SourceKind::Venue,
            priority: None,
            is_active: false,
            owner_channel_id: None,
            is_sensitive: false,
        })
        .await
        .unwrap();

    let stats = ingest(
        &store,
        vec![
            candidate("old-site", "Live Jazz", "Blue Note", date(2026, 3, 12)),
            candidate("nobody", "Live Jazz", "Blue Note", date(2026, 3, 12)),
        ],
    )
    .await;

    assert_eq!(stats.skipped_inactive_source, 1);
    assert_eq!(stats.skipped_unknown_source, 1);
    assert_eq!(stats.skipped(), 2);
    assert!(all_events(&store).await.is_empty());
}

#[tokio::test]
async fn test_invalid_candidate_is_counted_and_skipped() {
    let store = catalog().await;
    add_source(&store, "listings", SourceKind::Aggregator).await;
    let bad_date = EventCandidate {
        start_date: "next friday".to_string(),
        ..candidate("listings", "Live Jazz", "Blue Note", date(2026, 3, 12))
    };
    let good = candidate("listings", "Trivia Night", "The Local", date(2026, 3, 11));

    let stats = ingest(&store, vec![bad_date, good]).await;
    assert_eq!(stats.candidates_seen, 2);
    assert_eq!(stats.inserted, 1);
    assert_eq!(stats.failures.len(), 1);
}

#[tokio::test]
async fn test_venue_is_created_once() {
    let store = catalog().await;
    add_source(&store, "listings", SourceKind::Aggregator).await;
    add_source(&store, "blue-note", SourceKind::Venue).await;

    ingest(
        &store,
        vec![
            candidate("listings", "Live Jazz", "Blue Note", date(2026, 3, 12)),
            candidate("blue-note", "Live Jazz", "Blue Note", date(2026, 3, 12)),
        ],
    )
    .await;

    let events = all_events(&store).await;
    assert_eq!(events.len(), 2);
    assert!(events[0].venue_id.is_some());
    assert_eq!(events[0].venue_id, events[1].venue_id);
    assert_eq!(events[0].fingerprint, events[1].fingerprint);
}

#[tokio::test]
async fn test_festival_program_candidates_share_a_strand() {
    let store = catalog().await;
    add_source(&store, "harbor-fest", SourceKind::Festival).await;
    let program = |title: &str, day: u32| EventCandidate {
        festival: Some("Harbor Film Fest".to_string()),
        program: Some("Late Night Shorts".to_string()),
        ..candidate("harbor-fest", title, "Harbor Cinema", date(2026, 4, day))
    };

    let stats = ingest(&store, vec![program("Shorts Block A", 2), program("Shorts Block B", 3)]).await;
    assert_eq!(stats.inserted, 2);
    assert_eq!(stats.series_links, 2);

    let series = all_series(&store).await;
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].0.series_type, SeriesType::FestivalProgram);
    assert_eq!(series[0].0.title.as_deref(), Some("Late Night Shorts"));
    assert_eq!(series[0].1, 2);

    let festival = store.find_festival_by_name("Harbor Film Fest").await.unwrap().unwrap();
    assert_eq!(series[0].0.festival_id, Some(festival.id));
}

#[tokio::test]
async fn test_film_screenings_link_by_external_id() {
    let store = catalog().await;
    add_source(&store, "grand", SourceKind::Venue).await;
    let screening = |title: &str, day: u32| EventCandidate {
        film_id: Some("tt0118715".to_string()),
        ..candidate("grand", title, "The Grand", date(2026, 3, day))
    };

    ingest(
        &store,
        vec![
            screening("The Big Lebowski", 13),
            screening("Big Lebowski (1998) 35mm", 14),
        ],
    )
    .await;

    let series = all_series(&store).await;
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].0.series_type, SeriesType::Film);
    assert_eq!(series[0].0.external_id.as_deref(), Some("tt0118715"));
    assert_eq!(series[0].1, 2);
}

#[tokio::test]
async fn test_dry_run_ingest_writes_nothing() {
    let store = catalog().await;
    add_source(&store, "listings", SourceKind::Aggregator).await;
    let mut feed = MemoryFeed::new(vec![EventCandidate {
        festival: Some("Harbor Film Fest".to_string()),
        program: Some("Late Night Shorts".to_string()),
        ..candidate("listings", "Shorts Block A", "Harbor Cinema", date(2026, 4, 2))
    }]);

    let stats = Ingestor::new(&store)
        .ingest(&mut feed, &JobOptions::dry_run())
        .await
        .unwrap();

    assert_eq!(stats.inserted, 1);
    assert_eq!(stats.series_links, 1);
    assert!(all_events(&store).await.is_empty());
    assert!(all_series(&store).await.is_empty());
    assert!(store.find_venue_by_name("Harbor Cinema").await.unwrap().is_none());
}

//! Catalog storage abstraction
//!
//! The engine never issues SQL directly. It reads and mutates the event,
//! series, festival and source tables through [`CatalogStore`], so the
//! heuristics stay independent of the store's query dialect.
//!
//! Every mutating method is one self-contained unit: multi-statement changes
//! run inside a single transaction, and each method is a no-op when its
//! change is already in place. Re-running a job after a partial failure is
//! therefore safe.

mod sqlite;

pub use sqlite::SqliteCatalog;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use evcat_common::db::{
    EventRecord, Festival, Frequency, Series, SeriesType, Source, SourceKind, StoredSignals, Venue,
};
use evcat_common::Result;

/// Filter for paged event scans
#[derive(Debug, Clone, Default)]
pub struct EventWindow {
    /// Earliest start date (inclusive)
    pub from: Option<NaiveDate>,
    /// Latest start date (inclusive)
    pub to: Option<NaiveDate>,
    /// Only events without a series
    pub unlinked_only: bool,
    /// Only canonical roots
    pub roots_only: bool,
    /// Only live (active) events
    pub active_only: bool,
}

/// New event row produced by ingestion
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub source_id: i64,
    pub venue_id: Option<i64>,
    pub title: String,
    pub start_date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_date: Option<NaiveDate>,
    pub end_time: Option<NaiveTime>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub ticket_url: Option<String>,
    pub tags: Vec<String>,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}

/// Crawler-owned fields refreshed on re-crawl
#[derive(Debug, Clone, PartialEq)]
pub struct EventContent {
    pub start_time: Option<NaiveTime>,
    pub end_date: Option<NaiveDate>,
    pub end_time: Option<NaiveTime>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub ticket_url: Option<String>,
    pub tags: Vec<String>,
}

impl EventContent {
    /// Content currently stored on an event
    pub fn of(event: &EventRecord) -> Self {
        Self {
            start_time: event.start_time,
            end_date: event.end_date,
            end_time: event.end_time,
            description: event.description.clone(),
            image_url: event.image_url.clone(),
            ticket_url: event.ticket_url.clone(),
            tags: event.tags.clone(),
        }
    }
}

/// Source attributes copied onto a canonical root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePromotion {
    pub source_id: i64,
    /// Set only when the winning source declares an owning channel
    pub channel_id: Option<i64>,
    /// Only ever raises the flag
    pub mark_sensitive: bool,
}

/// Source registry entry to create or update
#[derive(Debug, Clone)]
pub struct NewSource {
    pub name: String,
    pub slug: String,
    pub kind: SourceKind,
    pub priority: Option<i64>,
    pub is_active: bool,
    pub owner_channel_id: Option<i64>,
    pub is_sensitive: bool,
}

/// New series row
#[derive(Debug, Clone)]
pub struct NewSeries {
    pub series_type: SeriesType,
    pub title: String,
    pub slug: String,
    pub festival_id: Option<i64>,
    pub venue_id: Option<i64>,
    pub external_id: Option<String>,
}

/// Fields offered to [`CatalogStore::backfill_series`]; only unset columns are written
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesBackfill {
    pub description: Option<String>,
    pub frequency: Option<Frequency>,
    pub day_of_week: Option<Weekday>,
    pub festival_id: Option<i64>,
    pub venue_id: Option<i64>,
    pub external_id: Option<String>,
    pub image_url: Option<String>,
}

impl SeriesBackfill {
    /// Number of offered fields that would fill an unset column of `series`
    pub fn fillable_count(&self, series: &Series) -> usize {
        [
            self.description.is_some() && series.description.is_none(),
            self.frequency.is_some() && series.frequency.is_none(),
            self.day_of_week.is_some() && series.day_of_week.is_none(),
            self.festival_id.is_some() && series.festival_id.is_none(),
            self.venue_id.is_some() && series.venue_id.is_none(),
            self.external_id.is_some() && series.external_id.is_none(),
            self.image_url.is_some() && series.image_url.is_none(),
        ]
        .iter()
        .filter(|fill| **fill)
        .count()
    }
}

/// Series with its linked-event count
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSummary {
    pub series: Series,
    /// Linked live events
    pub event_count: i64,
}

/// Result of consolidating fragments into a primary series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Live events re-pointed; inactive rows move too but are not counted
    pub events_moved: i64,
    pub series_deleted: usize,
}

/// Repository over the event catalog tables
#[async_trait]
pub trait CatalogStore: Send + Sync {
    // ---- sources, venues, festivals ----

    async fn sources(&self) -> Result<Vec<Source>>;

    async fn source_by_slug(&self, slug: &str) -> Result<Option<Source>>;

    async fn upsert_source(&self, source: &NewSource) -> Result<Source>;

    async fn venue(&self, id: i64) -> Result<Option<Venue>>;

    async fn find_venue_by_name(&self, name: &str) -> Result<Option<Venue>>;

    async fn create_venue(&self, name: &str) -> Result<Venue>;

    async fn festival(&self, id: i64) -> Result<Option<Festival>>;

    async fn find_festival_by_name(&self, name: &str) -> Result<Option<Festival>>;

    async fn create_festival(&self, name: &str) -> Result<Festival>;

    /// Fill announced dates that are currently NULL; returns whether anything changed
    async fn set_festival_dates_if_null(
        &self,
        festival_id: i64,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<bool>;

    // ---- events ----

    /// Events matching `window` with `id > after_id`, ordered by id
    async fn events_page(
        &self,
        window: &EventWindow,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<EventRecord>>;

    async fn event(&self, id: i64) -> Result<Option<EventRecord>>;

    async fn event_by_fingerprint(
        &self,
        source_id: i64,
        fingerprint: &str,
    ) -> Result<Option<EventRecord>>;

    async fn insert_event(&self, event: &NewEvent) -> Result<i64>;

    /// Replace crawler-owned fields; returns whether the row changed
    async fn update_event_content(&self, event_id: i64, content: &EventContent) -> Result<bool>;

    /// Write normalized signal columns; returns whether the row changed
    async fn update_event_signals(&self, event_id: i64, signals: &StoredSignals) -> Result<bool>;

    /// Move a root onto a better source; never clears a channel or the sensitive flag
    async fn promote_event_source(&self, event_id: i64, promotion: &SourcePromotion) -> Result<bool>;

    /// Point `event_id` at `root_id`, re-pointing any events that pointed at `event_id`
    ///
    /// Returns the number of rows changed.
    async fn set_canonical(&self, event_id: i64, root_id: i64) -> Result<u64>;

    // ---- series ----

    async fn series(&self, id: i64) -> Result<Option<Series>>;

    /// Series of a type with exactly this title; `festival_id` restricts the match to one festival.
    /// `venue_id` restricts it to series of that venue or series with no venue yet, preferring
    /// the former.
    async fn find_series_by_title(
        &self,
        series_type: SeriesType,
        title: &str,
        festival_id: Option<i64>,
        venue_id: Option<i64>,
    ) -> Result<Option<Series>>;

    async fn find_series_by_slug(
        &self,
        series_type: SeriesType,
        slug: &str,
        festival_id: Option<i64>,
        venue_id: Option<i64>,
    ) -> Result<Option<Series>>;

    async fn find_film_series_by_external_id(&self, external_id: &str) -> Result<Option<Series>>;

    /// Whether any series of any type uses `slug`
    async fn slug_exists(&self, slug: &str) -> Result<bool>;

    async fn insert_series(&self, series: &NewSeries) -> Result<i64>;

    /// Write offered fields into NULL columns only; returns fields written
    async fn backfill_series(&self, series_id: i64, fields: &SeriesBackfill) -> Result<usize>;

    /// Replace the title only while it still equals `expected`
    async fn replace_series_title(
        &self,
        series_id: i64,
        expected: Option<&str>,
        title: &str,
    ) -> Result<bool>;

    /// Set an event's series; returns false when already linked
    async fn link_event(&self, event_id: i64, series_id: i64) -> Result<bool>;

    /// All series of a type with their live event counts, ordered by id
    async fn series_summaries(&self, series_type: SeriesType) -> Result<Vec<SeriesSummary>>;

    /// Titles of live events linked to any of `series_ids`
    async fn linked_event_titles(&self, series_ids: &[i64]) -> Result<Vec<String>>;

    /// Min/max start date of live events linked to any of `series_ids`
    async fn linked_event_date_range(
        &self,
        series_ids: &[i64],
    ) -> Result<Option<(NaiveDate, NaiveDate)>>;

    /// Clear every event reference to the series and delete it, atomically
    ///
    /// Returns the number of events unlinked.
    async fn delete_series(&self, series_id: i64) -> Result<u64>;

    /// Re-point fragment events to `primary` and delete the fragments, atomically
    ///
    /// Rolls back and fails when the linked-event total would change.
    async fn merge_series(&self, primary: i64, fragments: &[i64]) -> std::result::Result<MergeOutcome, crate::ClusterError>;
}

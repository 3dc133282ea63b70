//! Database models
//!
//! Plain row types shared by the catalog store and the data-quality engine.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

/// Kind of organisation behind a data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// First-party venue website
    Venue,
    /// Festival's own website
    Festival,
    /// Promoter or presenter
    Promoter,
    /// Ticketing platform
    Ticketing,
    /// Generic listings aggregator
    Aggregator,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Venue => "venue",
            SourceKind::Festival => "festival",
            SourceKind::Promoter => "promoter",
            SourceKind::Ticketing => "ticketing",
            SourceKind::Aggregator => "aggregator",
        }
    }

    /// Parse a stored kind; unknown kinds are treated as aggregators
    pub fn parse(value: &str) -> Self {
        match value {
            "venue" => SourceKind::Venue,
            "festival" => SourceKind::Festival,
            "promoter" => SourceKind::Promoter,
            "ticketing" => SourceKind::Ticketing,
            _ => SourceKind::Aggregator,
        }
    }
}

/// Data source (crawler target)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub kind: SourceKind,
    /// Curated rank; lower is more authoritative. `None` falls back to the kind's default.
    pub priority: Option<i64>,
    pub is_active: bool,
    /// Distribution channel that owns content from this source
    pub owner_channel_id: Option<i64>,
    /// Content from this source needs sensitive-content handling
    pub is_sensitive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    pub id: i64,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Festival {
    pub id: i64,
    pub name: Option<String>,
    pub slug: String,
    pub announced_start: Option<NaiveDate>,
    pub announced_end: Option<NaiveDate>,
}

/// Series grouping type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesType {
    RecurringShow,
    Film,
    FestivalProgram,
}

impl SeriesType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeriesType::RecurringShow => "recurring_show",
            SeriesType::Film => "film",
            SeriesType::FestivalProgram => "festival_program",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "recurring_show" => Some(SeriesType::RecurringShow),
            "film" => Some(SeriesType::Film),
            "festival_program" => Some(SeriesType::FestivalProgram),
            _ => None,
        }
    }
}

/// Recurrence cadence of a series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Weekly,
    Irregular,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Weekly => "weekly",
            Frequency::Irregular => "irregular",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "weekly" => Some(Frequency::Weekly),
            "irregular" => Some(Frequency::Irregular),
            _ => None,
        }
    }
}

/// Stored weekday name ("Monday" .. "Sunday")
pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Parse a stored weekday name, case-insensitively
pub fn parse_weekday_name(value: &str) -> Option<Weekday> {
    match value.to_ascii_lowercase().as_str() {
        "monday" => Some(Weekday::Mon),
        "tuesday" => Some(Weekday::Tue),
        "wednesday" => Some(Weekday::Wed),
        "thursday" => Some(Weekday::Thu),
        "friday" => Some(Weekday::Fri),
        "saturday" => Some(Weekday::Sat),
        "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub id: i64,
    pub series_type: SeriesType,
    pub title: Option<String>,
    pub slug: String,
    /// Curator-provided description
    pub description: Option<String>,
    pub frequency: Option<Frequency>,
    pub day_of_week: Option<Weekday>,
    pub festival_id: Option<i64>,
    /// Home venue (`recurring_show` series)
    pub venue_id: Option<i64>,
    /// External catalog identifier (film database id for `film` series)
    pub external_id: Option<String>,
    pub image_url: Option<String>,
}

impl Series {
    /// Whether the series carries curator-entered text
    pub fn has_description(&self) -> bool {
        self.description
            .as_deref()
            .is_some_and(|d| !d.trim().is_empty())
    }
}

/// Normalized display signals stored on an event row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSignals {
    pub doors_time: Option<String>,
    pub age_policy: Option<String>,
    pub ticket_status: Option<String>,
    pub reentry_policy: Option<String>,
    pub set_times_mentioned: bool,
}

/// Stored event row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    /// Source whose crawler wrote the row; with the fingerprint, the upsert key
    pub origin_source_id: i64,
    /// Attributed source; promoted to a better source by duplicate resolution
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
    pub series_id: Option<i64>,
    pub canonical_event_id: Option<i64>,
    pub channel_id: Option<i64>,
    pub is_sensitive: bool,
    pub is_active: bool,
    pub signals: StoredSignals,
    pub created_at: DateTime<Utc>,
}

impl EventRecord {
    /// Length of the description in characters (0 when absent)
    pub fn description_len(&self) -> usize {
        self.description
            .as_deref()
            .map(|d| d.trim().chars().count())
            .unwrap_or(0)
    }

    pub fn has_image(&self) -> bool {
        self.image_url.as_deref().is_some_and(|u| !u.trim().is_empty())
    }

    pub fn has_ticket_url(&self) -> bool {
        self.ticket_url.as_deref().is_some_and(|u| !u.trim().is_empty())
    }
}

/// One batch-job execution recorded in `dq_runs`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: uuid::Uuid,
    pub job: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub report: serde_json::Value,
}

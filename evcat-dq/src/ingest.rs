//! Candidate ingestion
//!
//! Upserts crawler candidates into the catalog. The crawling source and the
//! content fingerprint together identify a row, so re-crawling the same page
//! inserts nothing new: changed content updates the row in place and
//! unchanged content is left alone.
//!
//! Candidates naming a festival program or a film catalog id are linked to
//! the matching series when first inserted.

use crate::fingerprint::{canonical_date, fingerprint};
use crate::series_matcher::{SeriesHint, SeriesMatcher};
use crate::stats::{IngestStats, UnitFailure};
use crate::store::{CatalogStore, EventContent, NewEvent};
use crate::JobOptions;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use evcat_common::db::{SeriesType, Source};
use evcat_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::{debug, info, warn};

/// Raw event record produced by a crawler
///
/// Only `source`, `title` and `start_date` are required. Malformed optional
/// values are dropped rather than rejecting the candidate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventCandidate {
    /// Slug of the registered source
    pub source: String,
    pub title: String,
    #[serde(default)]
    pub venue: Option<String>,
    /// `YYYY-MM-DD`
    pub start_date: String,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub ticket_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Parent festival of a festival-program event
    #[serde(default)]
    pub festival: Option<String>,
    /// Program strand within the festival
    #[serde(default)]
    pub program: Option<String>,
    /// External film catalog id
    #[serde(default)]
    pub film_id: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

/// Accepts "20:00", "20:00:00" and "8:00 PM"
fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    ["%H:%M:%S", "%H:%M", "%I:%M %p", "%I:%M%p"]
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(raw, format).ok())
}

impl EventCandidate {
    /// Crawler-owned fields in stored form
    fn content(&self) -> EventContent {
        EventContent {
            start_time: non_empty(&self.start_time).and_then(parse_time),
            end_date: non_empty(&self.end_date).and_then(parse_date),
            end_time: non_empty(&self.end_time).and_then(parse_time),
            description: non_empty(&self.description).map(str::to_string),
            image_url: non_empty(&self.image_url).map(str::to_string),
            ticket_url: non_empty(&self.ticket_url).map(str::to_string),
            tags: self
                .tags
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }
}

/// Source of candidates for one ingestion run
#[async_trait]
pub trait CandidateFeed: Send {
    /// Next candidate, or `None` when exhausted
    ///
    /// `Error::InvalidInput` marks one malformed record; ingestion counts it
    /// and continues. Any other error aborts the run.
    async fn next_candidate(&mut self) -> Result<Option<EventCandidate>>;
}

/// In-memory feed
#[derive(Debug, Default)]
pub struct MemoryFeed {
    candidates: VecDeque<EventCandidate>,
}

impl MemoryFeed {
    pub fn new(candidates: impl IntoIterator<Item = EventCandidate>) -> Self {
        Self {
            candidates: candidates.into_iter().collect(),
        }
    }
}

#[async_trait]
impl CandidateFeed for MemoryFeed {
    async fn next_candidate(&mut self) -> Result<Option<EventCandidate>> {
        Ok(self.candidates.pop_front())
    }
}

/// One JSON object per line; blank lines are skipped
pub struct JsonLinesFeed {
    path: PathBuf,
    lines: Lines<BufReader<tokio::fs::File>>,
    line_number: usize,
}

impl JsonLinesFeed {
    pub async fn open(path: &Path) -> Result<Self> {
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to open candidate file {}: {}", path.display(), e),
            ))
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            lines: BufReader::new(file).lines(),
            line_number: 0,
        })
    }
}

#[async_trait]
impl CandidateFeed for JsonLinesFeed {
    async fn next_candidate(&mut self) -> Result<Option<EventCandidate>> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            return serde_json::from_str(&line).map(Some).map_err(|e| {
                Error::InvalidInput(format!(
                    "{}:{}: {}",
                    self.path.display(),
                    self.line_number,
                    e
                ))
            });
        }
        Ok(None)
    }
}

/// What happened to one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted { series_links: usize },
    Updated,
    Unchanged,
    SkippedUnknownSource,
    SkippedInactiveSource,
}

pub struct Ingestor<'a> {
    store: &'a dyn CatalogStore,
}

impl<'a> Ingestor<'a> {
    pub fn new(store: &'a dyn CatalogStore) -> Self {
        Self { store }
    }

    /// Drain a feed into the catalog
    pub async fn ingest(&self, feed: &mut dyn CandidateFeed, opts: &JobOptions) -> Result<IngestStats> {
        let mut stats = IngestStats::default();
        let sources: HashMap<String, Source> = self
            .store
            .sources()
            .await?
            .into_iter()
            .map(|s| (s.slug.clone(), s))
            .collect();

        loop {
            if opts.is_cancelled() {
                stats.cancelled = true;
                break;
            }
            let candidate = match feed.next_candidate().await {
                Ok(Some(candidate)) => candidate,
                Ok(None) => break,
                Err(Error::InvalidInput(msg)) => {
                    warn!(error = %msg, "Skipping malformed candidate");
                    stats.candidates_seen += 1;
                    stats.failures.push(UnitFailure::new("feed", msg));
                    continue;
                }
                Err(e) => return Err(e),
            };
            stats.candidates_seen += 1;

            match self.ingest_one(&candidate, &sources, opts.dry_run).await {
                Ok(IngestOutcome::Inserted { series_links }) => {
                    stats.inserted += 1;
                    stats.series_links += series_links;
                }
                Ok(IngestOutcome::Updated) => stats.updated += 1,
                Ok(IngestOutcome::Unchanged) => stats.unchanged += 1,
                Ok(IngestOutcome::SkippedUnknownSource) => stats.skipped_unknown_source += 1,
                Ok(IngestOutcome::SkippedInactiveSource) => stats.skipped_inactive_source += 1,
                Err(e) => {
                    warn!(source = %candidate.source, title = %candidate.title, error = %e, "Candidate failed");
                    stats.failures.push(UnitFailure::new(
                        format!("{} / {} / {}", candidate.source, candidate.title, candidate.start_date),
                        e,
                    ));
                }
            }
        }

        info!(dry_run = opts.dry_run, "Ingestion: {}", stats.display_string());
        Ok(stats)
    }

    /// Upsert a single candidate
    pub async fn ingest_one(
        &self,
        candidate: &EventCandidate,
        sources: &HashMap<String, Source>,
        dry_run: bool,
    ) -> Result<IngestOutcome> {
        let Some(source) = sources.get(candidate.source.trim()) else {
            debug!(source = %candidate.source, "Unknown source");
            return Ok(IngestOutcome::SkippedUnknownSource);
        };
        if !source.is_active {
            debug!(source = %source.slug, "Inactive source");
            return Ok(IngestOutcome::SkippedInactiveSource);
        }

        let title = candidate.title.trim();
        if title.is_empty() {
            return Err(Error::InvalidInput("Candidate has no title".to_string()));
        }
        let start_date = parse_date(&candidate.start_date).ok_or_else(|| {
            Error::InvalidInput(format!("Invalid start date '{}'", candidate.start_date))
        })?;

        let venue_name = non_empty(&candidate.venue);
        let anchor = venue_name.unwrap_or(source.name.as_str());
        let fp = fingerprint(title, anchor, &canonical_date(start_date));
        let content = candidate.content();

        if let Some(existing) = self.store.event_by_fingerprint(source.id, fp.as_str()).await? {
            if EventContent::of(&existing) == content {
                return Ok(IngestOutcome::Unchanged);
            }
            if !dry_run {
                self.store.update_event_content(existing.id, &content).await?;
            }
            debug!(event_id = existing.id, "Updated event content");
            return Ok(IngestOutcome::Updated);
        }

        let venue_id = match venue_name {
            Some(name) => match self.store.find_venue_by_name(name).await? {
                Some(venue) => Some(venue.id),
                None if dry_run => None,
                None => Some(self.store.create_venue(name).await?.id),
            },
            None => None,
        };

        if dry_run {
            let series_links = self.planned_series_links(candidate);
            return Ok(IngestOutcome::Inserted { series_links });
        }

        let event_id = self
            .store
            .insert_event(&NewEvent {
                source_id: source.id,
                venue_id,
                title: title.to_string(),
                start_date,
                start_time: content.start_time,
                end_date: content.end_date,
                end_time: content.end_time,
                description: content.description,
                image_url: content.image_url,
                ticket_url: content.ticket_url,
                tags: content.tags,
                fingerprint: fp.to_string(),
                created_at: candidate.created_at.unwrap_or_else(Utc::now),
            })
            .await?;
        debug!(event_id, source = %source.slug, fingerprint = %fp, "Inserted event");

        let series_links = self.link_series(candidate, title, event_id).await?;
        Ok(IngestOutcome::Inserted { series_links })
    }

    fn planned_series_links(&self, candidate: &EventCandidate) -> usize {
        let program = non_empty(&candidate.festival).is_some() && non_empty(&candidate.program).is_some();
        let film = non_empty(&candidate.film_id).is_some();
        program as usize + film as usize
    }

    /// Link a new event to its festival-program and film series
    async fn link_series(&self, candidate: &EventCandidate, title: &str, event_id: i64) -> Result<usize> {
        let matcher = SeriesMatcher::new(self.store);
        let mut linked = 0;

        if let (Some(festival_name), Some(program)) =
            (non_empty(&candidate.festival), non_empty(&candidate.program))
        {
            let festival = match self.store.find_festival_by_name(festival_name).await? {
                Some(festival) => festival,
                None => self.store.create_festival(festival_name).await?,
            };
            let hint = SeriesHint::new(SeriesType::FestivalProgram, program).with_festival(festival.id);
            if let Some(series_id) = matcher.get_or_create_series(&hint, false).await?.series_id() {
                if matcher.link_event(event_id, None, series_id, false).await? {
                    linked += 1;
                }
            }
        }

        // A festival strand takes precedence over the film grouping
        if linked == 0 {
            if let Some(film_id) = non_empty(&candidate.film_id) {
                let hint = SeriesHint::new(SeriesType::Film, title).with_external_id(film_id);
                if let Some(series_id) = matcher.get_or_create_series(&hint, false).await?.series_id() {
                    if matcher.link_event(event_id, None, series_id, false).await? {
                        linked += 1;
                    }
                }
            }
        }

        Ok(linked)
    }
}

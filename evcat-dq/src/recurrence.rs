//! Recurring-show detection
//!
//! Scans unlinked live events from a fixed lookback through the open-ended
//! future, groups them by (venue, normalized title) and turns every group that
//! is large enough and still has an upcoming date into a `recurring_show`
//! series. A group whose busiest weekday holds at least 70% of its events is
//! weekly on that day; anything else is irregular.

use crate::fingerprint::normalize_title;
use crate::params::DqParams;
use crate::series_matcher::{SeriesHint, SeriesMatcher};
use crate::stats::{GroupOutcome, RecurrenceStats, UnitFailure};
use crate::store::{CatalogStore, EventWindow, SeriesBackfill};
use crate::JobOptions;
use chrono::{Datelike, NaiveDate, Weekday};
use evcat_common::db::{weekday_name, EventRecord, Frequency, SeriesType};
use evcat_common::Result;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Minimum share of the busiest weekday, in percent, for a weekly cadence
pub const WEEKLY_SHARE_PERCENT: u64 = 70;

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Classified cadence of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Weekly(Weekday),
    Irregular,
}

impl Cadence {
    pub fn frequency(&self) -> Frequency {
        match self {
            Cadence::Weekly(_) => Frequency::Weekly,
            Cadence::Irregular => Frequency::Irregular,
        }
    }

    pub fn weekday(&self) -> Option<Weekday> {
        match self {
            Cadence::Weekly(day) => Some(*day),
            Cadence::Irregular => None,
        }
    }
}

/// Monday-first counts of events per weekday
pub fn weekday_histogram<I>(dates: I) -> [u64; 7]
where
    I: IntoIterator<Item = NaiveDate>,
{
    let mut buckets = [0u64; 7];
    for date in dates {
        buckets[date.weekday().num_days_from_monday() as usize] += 1;
    }
    buckets
}

/// Weekly when the busiest weekday reaches the share threshold
///
/// Ties between equally busy weekdays go to the earliest in the week.
pub fn classify_cadence(histogram: &[u64; 7]) -> Cadence {
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return Cadence::Irregular;
    }

    let mut top = 0;
    for (index, count) in histogram.iter().enumerate() {
        if *count > histogram[top] {
            top = index;
        }
    }

    if histogram[top] * 100 >= total * WEEKLY_SHARE_PERCENT {
        Cadence::Weekly(WEEKDAYS[top])
    } else {
        Cadence::Irregular
    }
}

/// Events sharing a venue and normalized title
#[derive(Debug)]
struct EventGroup {
    venue_id: i64,
    events: Vec<EventRecord>,
}

impl EventGroup {
    fn has_upcoming(&self, today: NaiveDate) -> bool {
        self.events.iter().any(|e| e.start_date >= today)
    }

    /// Most common raw title; ties go to the earliest event
    fn display_title(&self) -> String {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for event in &self.events {
            *counts.entry(event.title.trim()).or_default() += 1;
        }
        let mut best: Option<(&str, usize)> = None;
        for event in &self.events {
            let title = event.title.trim();
            let count = counts.get(title).copied().unwrap_or(0);
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((title, count));
            }
        }
        best.map(|(title, _)| title.to_string()).unwrap_or_default()
    }
}

pub struct RecurrencePatternDetector<'a> {
    store: &'a dyn CatalogStore,
    params: &'a DqParams,
}

impl<'a> RecurrencePatternDetector<'a> {
    pub fn new(store: &'a dyn CatalogStore, params: &'a DqParams) -> Self {
        Self { store, params }
    }

    /// Detect recurring groups and materialize them as series
    pub async fn run(&self, today: NaiveDate, opts: &JobOptions) -> Result<RecurrenceStats> {
        let mut stats = RecurrenceStats::default();
        let window = EventWindow {
            from: Some(self.params.recurrence_from(today)),
            to: None,
            unlinked_only: true,
            roots_only: true,
            active_only: true,
        };

        let mut groups: BTreeMap<(i64, String), EventGroup> = BTreeMap::new();
        let mut after_id = 0;
        loop {
            if opts.is_cancelled() {
                stats.cancelled = true;
                return Ok(stats);
            }
            let page = self
                .store
                .events_page(&window, after_id, self.params.page_size)
                .await?;
            let Some(last) = page.last() else { break };
            after_id = last.id;
            stats.events_scanned += page.len();

            for event in page {
                let Some(venue_id) = event.venue_id else { continue };
                let key = normalize_title(&event.title);
                if key.is_empty() {
                    continue;
                }
                groups
                    .entry((venue_id, key))
                    .or_insert_with(|| EventGroup { venue_id, events: Vec::new() })
                    .events
                    .push(event);
            }
        }
        stats.groups_considered = groups.len();

        let matcher = SeriesMatcher::new(self.store);
        for ((venue_id, key), group) in &groups {
            if group.events.len() < self.params.recurrence_min_count || !group.has_upcoming(today) {
                continue;
            }
            if opts.is_cancelled() {
                stats.cancelled = true;
                break;
            }

            stats.candidates += 1;
            match self.materialize(&matcher, group, opts.dry_run).await {
                Ok((outcome, created)) => {
                    match outcome.day_of_week {
                        Some(_) => stats.weekly += 1,
                        None => stats.irregular += 1,
                    }
                    if created {
                        stats.series_created += 1;
                    } else {
                        stats.series_reused += 1;
                    }
                    stats.events_linked += outcome.events_linked;
                    stats.groups.push(outcome);
                }
                Err(e) => {
                    warn!(venue_id, title = %key, error = %e, "Recurring group failed");
                    stats
                        .failures
                        .push(UnitFailure::new(format!("venue {} / {}", venue_id, key), e));
                }
            }
        }

        info!(
            dry_run = opts.dry_run,
            "Recurrence detection: {}",
            stats.display_string()
        );
        Ok(stats)
    }

    async fn materialize(
        &self,
        matcher: &SeriesMatcher<'_>,
        group: &EventGroup,
        dry_run: bool,
    ) -> Result<(GroupOutcome, bool)> {
        let cadence = classify_cadence(&weekday_histogram(group.events.iter().map(|e| e.start_date)));
        let title = group.display_title();

        let hint = SeriesHint::new(SeriesType::RecurringShow, title.clone()).with_venue(group.venue_id);
        let resolution = matcher.get_or_create_series(&hint, dry_run).await?;

        let mut events_linked = 0;
        if let Some(series_id) = resolution.series_id() {
            let fields = SeriesBackfill {
                frequency: Some(cadence.frequency()),
                day_of_week: cadence.weekday(),
                venue_id: Some(group.venue_id),
                ..Default::default()
            };
            matcher.backfill_if_null(series_id, &fields, dry_run).await?;

            for event in &group.events {
                if matcher
                    .link_event(event.id, event.series_id, series_id, dry_run)
                    .await?
                {
                    events_linked += 1;
                }
            }
        } else {
            // Dry run of a new series: every event would be linked
            events_linked = group.events.len();
        }

        debug!(
            venue_id = group.venue_id,
            title = %title,
            events = group.events.len(),
            cadence = ?cadence,
            "Materialized recurring group"
        );

        Ok((
            GroupOutcome {
                title,
                venue_id: group.venue_id,
                event_count: group.events.len(),
                frequency: cadence.frequency().as_str().to_string(),
                day_of_week: cadence.weekday().map(|d| weekday_name(d).to_string()),
                series_id: resolution.series_id(),
                events_linked,
            },
            resolution.is_new(),
        ))
    }
}

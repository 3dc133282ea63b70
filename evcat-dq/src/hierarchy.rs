//! Festival / series hierarchy audit
//!
//! Repairs structural defects among `festival_program` series in four phases
//! that always run in this order:
//!
//! 1. **Ghosts**: no linked live events and no curator description. Deleted.
//! 2. **Singles**: exactly one linked event. The event is unlinked and the
//!    series deleted.
//! 3. **Fragments**: within one festival, every strand with events is merged
//!    into the strand with the most events (lowest id on ties). The
//!    festival's linked-event total is verified unchanged before commit.
//! 4. **Backfill**: placeholder titles are replaced by the festival name or a
//!    repeated event title; unset festival dates are filled from the span of
//!    linked events.
//!
//! Series deleted in an earlier phase are never touched by a later one. Each
//! store call is self-contained, so an interrupted audit can simply be rerun.
//! On a healthy catalog the audit performs no writes.

use crate::error::ClusterError;
use crate::stats::{AuditStats, UnitFailure};
use crate::store::{CatalogStore, SeriesSummary};
use crate::JobOptions;
use evcat_common::db::{Festival, SeriesType};
use evcat_common::Result;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

/// Titles treated as missing
const PLACEHOLDER_TITLES: &[&str] = &[
    "untitled",
    "tbd",
    "tba",
    "tbc",
    "to be announced",
    "to be determined",
    "program",
    "programme",
    "festival program",
    "n/a",
];

/// Whether a series title is absent or a placeholder
pub fn is_placeholder_title(title: Option<&str>) -> bool {
    match title.map(str::trim) {
        None => true,
        Some(t) if t.is_empty() => true,
        Some(t) => PLACEHOLDER_TITLES.contains(&t.to_lowercase().as_str()),
    }
}

/// Most frequent title among linked events
///
/// Accepted only when it repeats, or when the series has exactly one event.
/// Ties go to the title seen first.
pub fn dominant_event_title(titles: &[String]) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for title in titles {
        let title = title.trim();
        if !title.is_empty() {
            *counts.entry(title).or_default() += 1;
        }
    }

    let mut best: Option<(&str, usize)> = None;
    for title in titles {
        let title = title.trim();
        if let Some(count) = counts.get(title).copied() {
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((title, count));
            }
        }
    }

    let (title, count) = best?;
    if count > 1 || titles.len() == 1 {
        Some(title.to_string())
    } else {
        None
    }
}

/// Working view of one series while phases run
#[derive(Debug, Clone)]
struct Strand {
    summary: SeriesSummary,
    /// Series whose events now live in this one (itself first)
    members: Vec<i64>,
}

impl Strand {
    fn id(&self) -> i64 {
        self.summary.series.id
    }

    fn event_count(&self) -> i64 {
        self.summary.event_count
    }
}

pub struct HierarchyHealthAuditor<'a> {
    store: &'a dyn CatalogStore,
}

impl<'a> HierarchyHealthAuditor<'a> {
    pub fn new(store: &'a dyn CatalogStore) -> Self {
        Self { store }
    }

    /// Run all four phases over every festival-program series
    pub async fn run(&self, opts: &JobOptions) -> Result<AuditStats> {
        let mut stats = AuditStats::default();
        let summaries = self.store.series_summaries(SeriesType::FestivalProgram).await?;
        stats.series_scanned = summaries.len();

        let mut strands: BTreeMap<i64, Strand> = summaries
            .into_iter()
            .map(|summary| {
                let id = summary.series.id;
                (id, Strand { summary, members: vec![id] })
            })
            .collect();
        let mut deleted: HashSet<i64> = HashSet::new();

        let mut complete = self.delete_ghosts(&strands, &mut deleted, &mut stats, opts).await;
        if complete {
            complete = self.unlink_singles(&strands, &mut deleted, &mut stats, opts).await;
        }
        if complete {
            complete = self
                .consolidate_fragments(&mut strands, &mut deleted, &mut stats, opts)
                .await;
        }
        strands.retain(|id, _| !deleted.contains(id));

        if complete {
            self.backfill(&strands, &mut stats, opts).await?;
        }

        info!(dry_run = opts.dry_run, "Hierarchy audit: {}", stats.display_string());
        Ok(stats)
    }

    /// Phase 1; returns false when cancelled
    async fn delete_ghosts(
        &self,
        strands: &BTreeMap<i64, Strand>,
        deleted: &mut HashSet<i64>,
        stats: &mut AuditStats,
        opts: &JobOptions,
    ) -> bool {
        for strand in strands.values() {
            if deleted.contains(&strand.id()) {
                continue;
            }
            if strand.event_count() != 0 || strand.summary.series.has_description() {
                continue;
            }
            if opts.is_cancelled() {
                stats.cancelled = true;
                return false;
            }

            match self.delete(strand.id(), opts.dry_run).await {
                Ok(_) => {
                    debug!(series_id = strand.id(), "Deleted ghost series");
                    deleted.insert(strand.id());
                    stats.ghosts_deleted += 1;
                }
                Err(e) => {
                    warn!(series_id = strand.id(), error = %e, "Failed to delete ghost series");
                    stats.failures.push(UnitFailure::new(format!("series {}", strand.id()), e));
                }
            }
        }
        true
    }

    /// Phase 2; returns false when cancelled
    async fn unlink_singles(
        &self,
        strands: &BTreeMap<i64, Strand>,
        deleted: &mut HashSet<i64>,
        stats: &mut AuditStats,
        opts: &JobOptions,
    ) -> bool {
        for strand in strands.values() {
            if deleted.contains(&strand.id()) || strand.event_count() != 1 {
                continue;
            }
            if opts.is_cancelled() {
                stats.cancelled = true;
                return false;
            }

            match self.delete(strand.id(), opts.dry_run).await {
                Ok(unlinked) => {
                    debug!(series_id = strand.id(), unlinked, "Unlinked single-event series");
                    deleted.insert(strand.id());
                    stats.singles_unlinked += 1;
                }
                Err(e) => {
                    warn!(series_id = strand.id(), error = %e, "Failed to unlink single-event series");
                    stats.failures.push(UnitFailure::new(format!("series {}", strand.id()), e));
                }
            }
        }
        true
    }

    /// Phase 3; returns false when cancelled
    async fn consolidate_fragments(
        &self,
        strands: &mut BTreeMap<i64, Strand>,
        deleted: &mut HashSet<i64>,
        stats: &mut AuditStats,
        opts: &JobOptions,
    ) -> bool {
        let mut by_festival: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for strand in strands.values() {
            if deleted.contains(&strand.id()) || strand.event_count() < 1 {
                continue;
            }
            if let Some(festival_id) = strand.summary.series.festival_id {
                by_festival.entry(festival_id).or_default().push(strand.id());
            }
        }

        for (festival_id, ids) in by_festival {
            if ids.len() < 2 {
                continue;
            }
            if opts.is_cancelled() {
                stats.cancelled = true;
                return false;
            }

            // Most events wins; ids are ascending so the first maximum is the lowest id
            let mut primary = ids[0];
            for id in &ids {
                if strands[id].event_count() > strands[&primary].event_count() {
                    primary = *id;
                }
            }
            let fragments: Vec<i64> = ids.iter().copied().filter(|id| *id != primary).collect();
            let moved: i64 = fragments.iter().map(|id| strands[id].event_count()).sum();

            let result = if opts.dry_run {
                Ok(moved)
            } else {
                self.store
                    .merge_series(primary, &fragments)
                    .await
                    .map(|outcome| outcome.events_moved)
            };

            match result {
                Ok(events_moved) => {
                    debug!(festival_id, primary, fragments = ?fragments, events_moved, "Consolidated festival strands");
                    stats.fragments_merged += fragments.len();
                    stats.events_repointed += events_moved as usize;
                    deleted.extend(fragments.iter().copied());
                    if let Some(strand) = strands.get_mut(&primary) {
                        strand.summary.event_count += moved;
                        strand.members.extend(fragments.iter().copied());
                    }
                }
                Err(e) => {
                    if matches!(e, ClusterError::EventCountMismatch { .. }) {
                        warn!(festival_id, primary, error = %e, "Consolidation rolled back");
                    } else {
                        warn!(festival_id, primary, error = %e, "Consolidation failed");
                    }
                    stats
                        .failures
                        .push(UnitFailure::new(format!("festival {}", festival_id), e));
                }
            }
        }
        true
    }

    /// Phase 4
    async fn backfill(
        &self,
        strands: &BTreeMap<i64, Strand>,
        stats: &mut AuditStats,
        opts: &JobOptions,
    ) -> Result<()> {
        let mut festivals: BTreeMap<i64, Option<Festival>> = BTreeMap::new();
        let mut festival_members: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for strand in strands.values() {
            if let Some(festival_id) = strand.summary.series.festival_id {
                if !festivals.contains_key(&festival_id) {
                    festivals.insert(festival_id, self.store.festival(festival_id).await?);
                }
                festival_members
                    .entry(festival_id)
                    .or_default()
                    .extend(strand.members.iter().copied());
            }
        }

        for strand in strands.values() {
            if opts.is_cancelled() {
                stats.cancelled = true;
                return Ok(());
            }
            let festival = strand
                .summary
                .series
                .festival_id
                .and_then(|id| festivals.get(&id).cloned().flatten());

            match self.backfill_title(strand, festival.as_ref(), opts.dry_run).await {
                Ok(true) => stats.titles_backfilled += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(series_id = strand.id(), error = %e, "Title backfill failed");
                    stats.failures.push(UnitFailure::new(format!("series {}", strand.id()), e));
                }
            }
        }

        for (festival_id, members) in festival_members {
            if opts.is_cancelled() {
                stats.cancelled = true;
                return Ok(());
            }
            let Some(Some(festival)) = festivals.get(&festival_id) else { continue };
            match self.backfill_festival_dates(festival, &members, opts.dry_run).await {
                Ok(true) => stats.festival_dates_backfilled += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(festival_id, error = %e, "Festival date backfill failed");
                    stats
                        .failures
                        .push(UnitFailure::new(format!("festival {}", festival_id), e));
                }
            }
        }
        Ok(())
    }

    async fn backfill_title(
        &self,
        strand: &Strand,
        festival: Option<&Festival>,
        dry_run: bool,
    ) -> Result<bool> {
        let current = strand.summary.series.title.as_deref();
        if !is_placeholder_title(current) {
            return Ok(false);
        }

        let from_festival = festival
            .and_then(|f| f.name.as_deref())
            .map(str::trim)
            .filter(|name| !is_placeholder_title(Some(name)))
            .map(str::to_string);

        let title = match from_festival {
            Some(name) => Some(name),
            None => {
                let titles = self.store.linked_event_titles(&strand.members).await?;
                dominant_event_title(&titles)
            }
        };
        let Some(title) = title else { return Ok(false) };

        if dry_run {
            return Ok(true);
        }
        let written = self
            .store
            .replace_series_title(strand.id(), current, &title)
            .await?;
        if written {
            debug!(series_id = strand.id(), title = %title, "Backfilled series title");
        }
        Ok(written)
    }

    async fn backfill_festival_dates(
        &self,
        festival: &Festival,
        members: &[i64],
        dry_run: bool,
    ) -> Result<bool> {
        if festival.announced_start.is_some() && festival.announced_end.is_some() {
            return Ok(false);
        }
        let Some((first, last)) = self.store.linked_event_date_range(members).await? else {
            return Ok(false);
        };

        if dry_run {
            return Ok(true);
        }
        let written = self
            .store
            .set_festival_dates_if_null(festival.id, Some(first), Some(last))
            .await?;
        if written {
            debug!(festival_id = festival.id, %first, %last, "Backfilled festival dates");
        }
        Ok(written)
    }

    /// Delete a series, unlinking its events; no-op in dry run
    async fn delete(&self, series_id: i64, dry_run: bool) -> Result<u64> {
        if dry_run {
            return Ok(0);
        }
        self.store.delete_series(series_id).await
    }
}

//! Cross-source duplicate resolution
//!
//! Live events in the dedup window are grouped by (venue, date, time,
//! normalized title). A group with more than one member from more than one
//! crawling source is a duplicate cluster. For each cluster:
//!
//! 1. **Root**: the member with no canonical pointer and the earliest
//!    creation time (lowest id on ties). Its id is the public identity.
//! 2. **Winner**: the best-sourced member, ordered by source priority, then
//!    richer description, image, ticket URL, creation time and id.
//! 3. **Promotion**: when the winner's source ranks strictly better than the
//!    root's, the root takes over the winner's source attribution in place.
//! 4. **Linking**: every other member points at the root.
//!
//! All steps are no-ops on an already resolved cluster.

use crate::error::ClusterError;
use crate::fingerprint::normalize_title;
use crate::params::DqParams;
use crate::ranking::SourceRanking;
use crate::stats::{DedupStats, UnitFailure};
use crate::store::{CatalogStore, EventWindow, SourcePromotion};
use crate::JobOptions;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use evcat_common::db::EventRecord;
use evcat_common::Result;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

/// Grouping key of a duplicate cluster
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClusterKey {
    pub venue_id: i64,
    pub start_date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub title: String,
}

impl ClusterKey {
    /// Key of an event; events without a venue never cluster
    pub fn of(event: &EventRecord) -> Option<Self> {
        Some(Self {
            venue_id: event.venue_id?,
            start_date: event.start_date,
            start_time: event.start_time,
            title: normalize_title(&event.title),
        })
    }
}

impl std::fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "venue {} / {}", self.venue_id, self.start_date)?;
        if let Some(time) = self.start_time {
            write!(f, " {}", time.format("%H:%M"))?;
        }
        write!(f, " / {}", self.title)
    }
}

/// Canonical root of a cluster
pub fn pick_root(members: &[EventRecord]) -> Option<&EventRecord> {
    members
        .iter()
        .filter(|e| e.canonical_event_id.is_none())
        .min_by_key(|e| (e.created_at, e.id))
}

/// Ordering key of a winner candidate; the smallest key wins
pub type WinnerKey = (i64, Reverse<usize>, Reverse<bool>, Reverse<bool>, DateTime<Utc>, i64);

pub fn winner_key(event: &EventRecord, ranking: &SourceRanking) -> WinnerKey {
    (
        ranking.priority_of(event.source_id),
        Reverse(event.description_len()),
        Reverse(event.has_image()),
        Reverse(event.has_ticket_url()),
        event.created_at,
        event.id,
    )
}

/// Best-sourced member of a cluster
pub fn pick_winner<'e>(members: &'e [EventRecord], ranking: &SourceRanking) -> Option<&'e EventRecord> {
    members.iter().min_by_key(|e| winner_key(e, ranking))
}

/// Whether a group is a cross-source duplicate cluster
fn is_cluster(members: &[EventRecord]) -> bool {
    members.len() > 1
        && members
            .iter()
            .map(|e| e.origin_source_id)
            .collect::<HashSet<_>>()
            .len()
            > 1
}

#[derive(Debug, Default)]
struct ClusterOutcome {
    promoted: bool,
    linked: usize,
}

pub struct DuplicateResolver<'a> {
    store: &'a dyn CatalogStore,
    params: &'a DqParams,
}

impl<'a> DuplicateResolver<'a> {
    pub fn new(store: &'a dyn CatalogStore, params: &'a DqParams) -> Self {
        Self { store, params }
    }

    /// Resolve every duplicate cluster in the window around `today`
    pub async fn run(&self, today: NaiveDate, opts: &JobOptions) -> Result<DedupStats> {
        let mut stats = DedupStats::default();
        let (from, to) = self.params.dedup_window(today);
        let window = EventWindow {
            from: Some(from),
            to: Some(to),
            active_only: true,
            ..Default::default()
        };

        let mut groups: BTreeMap<ClusterKey, Vec<EventRecord>> = BTreeMap::new();
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
                if let Some(key) = ClusterKey::of(&event) {
                    groups.entry(key).or_default().push(event);
                }
            }
        }

        let ranking = SourceRanking::new(self.store.sources().await?);

        for (key, members) in &groups {
            if !is_cluster(members) {
                continue;
            }
            if opts.is_cancelled() {
                stats.cancelled = true;
                break;
            }
            stats.clusters_found += 1;

            match self.resolve_cluster(key, members, &ranking, opts.dry_run).await {
                Ok(outcome) => {
                    if outcome.promoted {
                        stats.roots_promoted += 1;
                    }
                    stats.members_linked += outcome.linked;
                    if !outcome.promoted && outcome.linked == 0 {
                        stats.clusters_unchanged += 1;
                    }
                }
                Err(ClusterError::NoRoot { key }) => {
                    warn!(cluster = %key, members = members.len(), "Skipping cluster without a root member");
                    stats.clusters_skipped += 1;
                }
                Err(e) => {
                    warn!(cluster = %key, error = %e, "Duplicate cluster failed");
                    stats.failures.push(UnitFailure::new(key.to_string(), e));
                }
            }
        }

        info!(dry_run = opts.dry_run, "Duplicate resolution: {}", stats.display_string());
        Ok(stats)
    }

    async fn resolve_cluster(
        &self,
        key: &ClusterKey,
        members: &[EventRecord],
        ranking: &SourceRanking,
        dry_run: bool,
    ) -> std::result::Result<ClusterOutcome, ClusterError> {
        let root = pick_root(members).ok_or_else(|| ClusterError::NoRoot { key: key.to_string() })?;
        let mut outcome = ClusterOutcome::default();

        if let Some(winner) = pick_winner(members, ranking) {
            let winner_priority = ranking.priority_of(winner.source_id);
            if winner_priority < ranking.priority_of(root.source_id) {
                let declared = ranking.get(winner.source_id);
                let promotion = SourcePromotion {
                    source_id: winner.source_id,
                    channel_id: declared.and_then(|s| s.owner_channel_id),
                    mark_sensitive: declared.is_some_and(|s| s.is_sensitive),
                };
                outcome.promoted = dry_run || self.store.promote_event_source(root.id, &promotion).await?;
                debug!(
                    root_id = root.id,
                    winner_id = winner.id,
                    source_id = winner.source_id,
                    "Promoted cluster root to winning source"
                );
            }
        }

        for member in members.iter().filter(|m| m.id != root.id) {
            if member.canonical_event_id == Some(root.id) {
                continue;
            }
            if dry_run {
                outcome.linked += 1;
            } else {
                outcome.linked += self.store.set_canonical(member.id, root.id).await? as usize;
            }
            debug!(event_id = member.id, root_id = root.id, "Linked duplicate to canonical root");
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use evcat_common::db::{Source, SourceKind, StoredSignals};

    fn event(id: i64, source_id: i64, created_minute: u32) -> EventRecord {
        EventRecord {
            id,
            origin_source_id: source_id,
            source_id,
            venue_id: Some(1),
            title: "Live Jazz".to_string(),
            start_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            start_time: NaiveTime::from_hms_opt(20, 0, 0),
            end_date: None,
            end_time: None,
            description: None,
            image_url: None,
            ticket_url: None,
            tags: Vec::new(),
            fingerprint: format!("fp{}", id),
            series_id: None,
            canonical_event_id: None,
            channel_id: None,
            is_sensitive: false,
            is_active: true,
            signals: StoredSignals::default(),
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 12, created_minute, 0).unwrap(),
        }
    }

    fn source(id: i64, kind: SourceKind) -> Source {
        Source {
            id,
            name: format!("source {}", id),
            slug: format!("source-{}", id),
            kind,
            priority: None,
            is_active: true,
            owner_channel_id: None,
            is_sensitive: false,
        }
    }

    #[test]
    fn test_root_is_earliest_unpointed_member() {
        let mut members = vec![event(3, 1, 5), event(2, 2, 1), event(1, 1, 9)];
        assert_eq!(pick_root(&members).map(|e| e.id), Some(2));

        members[1].canonical_event_id = Some(3);
        assert_eq!(pick_root(&members).map(|e| e.id), Some(3));
    }

    #[test]
    fn test_root_tie_breaks_on_lowest_id() {
        let members = vec![event(7, 1, 0), event(4, 2, 0)];
        assert_eq!(pick_root(&members).map(|e| e.id), Some(4));
    }

    #[test]
    fn test_no_root_when_all_members_point_elsewhere() {
        let mut members = vec![event(1, 1, 0), event(2, 2, 0)];
        members[0].canonical_event_id = Some(99);
        members[1].canonical_event_id = Some(99);
        assert!(pick_root(&members).is_none());
    }

    #[test]
    fn test_winner_prefers_source_priority_then_richness() {
        let ranking = SourceRanking::new(vec![
            source(1, SourceKind::Aggregator),
            source(2, SourceKind::Venue),
        ]);
        let mut rich_aggregator = event(1, 1, 0);
        rich_aggregator.description = Some("A long and detailed description".to_string());
        let bare_venue = event(2, 2, 5);
        let members = vec![rich_aggregator, bare_venue];
        assert_eq!(pick_winner(&members, &ranking).map(|e| e.id), Some(2));

        let mut with_image = event(3, 2, 9);
        with_image.image_url = Some("https://img.example/a.jpg".to_string());
        let members = vec![event(2, 2, 5), with_image];
        assert_eq!(pick_winner(&members, &ranking).map(|e| e.id), Some(3));
    }

    #[test]
    fn test_winner_order_is_total() {
        let ranking = SourceRanking::new(vec![source(1, SourceKind::Venue)]);
        let a = event(10, 1, 0);
        let b = event(11, 1, 0);
        assert_ne!(winner_key(&a, &ranking), winner_key(&b, &ranking));

        let forward = vec![a.clone(), b.clone()];
        let backward = vec![b, a];
        assert_eq!(
            pick_winner(&forward, &ranking).map(|e| e.id),
            pick_winner(&backward, &ranking).map(|e| e.id)
        );
    }

    #[test]
    fn test_cluster_requires_two_sources() {
        assert!(!is_cluster(&[event(1, 1, 0), event(2, 1, 0)]));
        assert!(is_cluster(&[event(1, 1, 0), event(2, 2, 0)]));
        assert!(!is_cluster(&[event(1, 1, 0)]));
    }

    #[test]
    fn test_cluster_key_normalizes_title() {
        let mut a = event(1, 1, 0);
        a.title = "The Live Jazz (2026)".to_string();
        let b = event(2, 2, 0);
        assert_eq!(ClusterKey::of(&a), ClusterKey::of(&b));

        let mut no_venue = event(3, 1, 0);
        no_venue.venue_id = None;
        assert!(ClusterKey::of(&no_venue).is_none());
    }
}

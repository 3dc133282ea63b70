//! Job report counters
//!
//! Every batch job returns one of these. In dry-run mode the counters describe
//! what a live run would have done. Reports are persisted to `dq_runs` as JSON
//! and printed by the binary via `display_string`.

use serde::{Deserialize, Serialize};

/// One unit (cluster, group, series) that failed without aborting the job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFailure {
    /// Identifying key of the unit
    pub key: String,
    pub error: String,
}

impl UnitFailure {
    pub fn new(key: impl Into<String>, error: impl ToString) -> Self {
        Self {
            key: key.into(),
            error: error.to_string(),
        }
    }
}

/// **Ingestion**
///
/// Display: "N candidates: I inserted, U updated, C unchanged, S skipped, F failed"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    pub candidates_seen: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Source slug not in the registry
    pub skipped_unknown_source: usize,
    /// Source registered but inactive
    pub skipped_inactive_source: usize,
    /// Events newly linked to a festival-program or film series
    pub series_links: usize,
    pub failures: Vec<UnitFailure>,
    pub cancelled: bool,
}

impl IngestStats {
    pub fn skipped(&self) -> usize {
        self.skipped_unknown_source + self.skipped_inactive_source
    }

    pub fn display_string(&self) -> String {
        format!(
            "{} candidates: {} inserted, {} updated, {} unchanged, {} skipped, {} failed",
            self.candidates_seen,
            self.inserted,
            self.updated,
            self.unchanged,
            self.skipped(),
            self.failures.len()
        )
    }
}

/// **Duplicate resolution**
///
/// Display: "N events, C clusters: P promoted, L linked, S skipped, F failed"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupStats {
    pub events_scanned: usize,
    /// Groups with more than one member spanning more than one source
    pub clusters_found: usize,
    /// Roots moved onto a better source
    pub roots_promoted: usize,
    /// Canonical pointers written (members and re-pointed children)
    pub members_linked: usize,
    /// Clusters already fully resolved
    pub clusters_unchanged: usize,
    /// Clusters skipped for a structural violation
    pub clusters_skipped: usize,
    pub failures: Vec<UnitFailure>,
    pub cancelled: bool,
}

impl DedupStats {
    pub fn display_string(&self) -> String {
        format!(
            "{} events, {} clusters: {} promoted, {} linked, {} skipped, {} failed",
            self.events_scanned,
            self.clusters_found,
            self.roots_promoted,
            self.members_linked,
            self.clusters_skipped,
            self.failures.len()
        )
    }
}

/// Outcome of one recurring-show candidate group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupOutcome {
    pub title: String,
    pub venue_id: i64,
    pub event_count: usize,
    /// `weekly` or `irregular`
    pub frequency: String,
    pub day_of_week: Option<String>,
    pub series_id: Option<i64>,
    pub events_linked: usize,
}

/// **Recurrence detection**
///
/// Display: "N events, G groups, C candidates (W weekly, I irregular): S series created, L linked"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceStats {
    pub events_scanned: usize,
    pub groups_considered: usize,
    pub candidates: usize,
    pub weekly: usize,
    pub irregular: usize,
    pub series_created: usize,
    pub series_reused: usize,
    pub events_linked: usize,
    pub groups: Vec<GroupOutcome>,
    pub failures: Vec<UnitFailure>,
    pub cancelled: bool,
}

impl RecurrenceStats {
    pub fn display_string(&self) -> String {
        format!(
            "{} events, {} groups, {} candidates ({} weekly, {} irregular): {} series created, {} linked",
            self.events_scanned,
            self.groups_considered,
            self.candidates,
            self.weekly,
            self.irregular,
            self.series_created,
            self.events_linked
        )
    }
}

/// **Signal normalization**
///
/// Display: "N events: U updated, C unchanged, F failed"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalStats {
    pub events_scanned: usize,
    pub events_updated: usize,
    pub unchanged: usize,
    pub failures: Vec<UnitFailure>,
    pub cancelled: bool,
}

impl SignalStats {
    pub fn display_string(&self) -> String {
        format!(
            "{} events: {} updated, {} unchanged, {} failed",
            self.events_scanned,
            self.events_updated,
            self.unchanged,
            self.failures.len()
        )
    }
}

/// **Hierarchy audit**
///
/// Display: "N series: G ghosts, S singles, M fragments merged, T titles, D festival dates"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStats {
    pub series_scanned: usize,
    /// Phase 1
    pub ghosts_deleted: usize,
    /// Phase 2
    pub singles_unlinked: usize,
    /// Phase 3
    pub fragments_merged: usize,
    pub events_repointed: usize,
    /// Phase 4
    pub titles_backfilled: usize,
    pub festival_dates_backfilled: usize,
    pub failures: Vec<UnitFailure>,
    pub cancelled: bool,
}

impl AuditStats {
    /// Total mutations performed (or planned, in dry-run)
    pub fn writes(&self) -> usize {
        self.ghosts_deleted
            + self.singles_unlinked
            + self.fragments_merged
            + self.titles_backfilled
            + self.festival_dates_backfilled
    }

    pub fn display_string(&self) -> String {
        format!(
            "{} series: {} ghosts, {} singles, {} fragments merged, {} titles, {} festival dates",
            self.series_scanned,
            self.ghosts_deleted,
            self.singles_unlinked,
            self.fragments_merged,
            self.titles_backfilled,
            self.festival_dates_backfilled
        )
    }
}

/// Reports of a full pipeline run, in execution order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub ingest: Option<IngestStats>,
    pub recurrence: Option<RecurrenceStats>,
    pub signals: Option<SignalStats>,
    pub dedup: Option<DedupStats>,
    pub audit: Option<AuditStats>,
    pub cancelled: bool,
}

impl PipelineStats {
    pub fn display_string(&self) -> String {
        let mut parts = Vec::new();
        if let Some(ingest) = &self.ingest {
            parts.push(format!("ingest: {}", ingest.display_string()));
        }
        if let Some(recurrence) = &self.recurrence {
            parts.push(format!("recurrence: {}", recurrence.display_string()));
        }
        if let Some(signals) = &self.signals {
            parts.push(format!("normalize: {}", signals.display_string()));
        }
        if let Some(dedup) = &self.dedup {
            parts.push(format!("dedupe: {}", dedup.display_string()));
        }
        if let Some(audit) = &self.audit {
            parts.push(format!("audit: {}", audit.display_string()));
        }
        if self.cancelled {
            parts.push("cancelled".to_string());
        }
        parts.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_display_string() {
        let stats = IngestStats {
            candidates_seen: 10,
            inserted: 6,
            updated: 1,
            unchanged: 1,
            skipped_unknown_source: 1,
            skipped_inactive_source: 1,
            ..Default::default()
        };
        assert_eq!(
            stats.display_string(),
            "10 candidates: 6 inserted, 1 updated, 1 unchanged, 2 skipped, 0 failed"
        );
    }

    #[test]
    fn test_audit_writes() {
        let stats = AuditStats {
            ghosts_deleted: 1,
            singles_unlinked: 1,
            titles_backfilled: 2,
            ..Default::default()
        };
        assert_eq!(stats.writes(), 4);
    }

    #[test]
    fn test_pipeline_display_skips_missing_jobs() {
        let stats = PipelineStats {
            signals: Some(SignalStats::default()),
            cancelled: true,
            ..Default::default()
        };
        assert_eq!(
            stats.display_string(),
            "normalize: 0 events: 0 updated, 0 unchanged, 0 failed; cancelled"
        );
    }
}

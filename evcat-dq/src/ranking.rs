//! Source priority ranking
//!
//! Lower rank is more authoritative. A curated `priority` on the source wins;
//! otherwise the rank comes from the source kind, so a first-party venue site
//! outranks a generic aggregator.

use evcat_common::db::{Source, SourceKind};
use std::collections::HashMap;

/// Rank given to events whose source is missing from the registry
pub const UNKNOWN_SOURCE_PRIORITY: i64 = 1_000;

/// Default rank for a source kind
pub fn default_priority(kind: SourceKind) -> i64 {
    match kind {
        SourceKind::Venue => 1,
        SourceKind::Festival => 2,
        SourceKind::Promoter => 3,
        SourceKind::Ticketing => 4,
        SourceKind::Aggregator => 5,
    }
}

/// Effective priority rank of a source
pub fn source_priority(source: &Source) -> i64 {
    source.priority.unwrap_or_else(|| default_priority(source.kind))
}

/// Registry snapshot used to rank many events without per-row lookups
#[derive(Debug, Clone, Default)]
pub struct SourceRanking {
    sources: HashMap<i64, Source>,
}

impl SourceRanking {
    pub fn new(sources: impl IntoIterator<Item = Source>) -> Self {
        Self {
            sources: sources.into_iter().map(|s| (s.id, s)).collect(),
        }
    }

    pub fn get(&self, source_id: i64) -> Option<&Source> {
        self.sources.get(&source_id)
    }

    /// Rank of a source id; unknown ids rank last
    pub fn priority_of(&self, source_id: i64) -> i64 {
        self.sources
            .get(&source_id)
            .map(source_priority)
            .unwrap_or(UNKNOWN_SOURCE_PRIORITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(id: i64, kind: SourceKind, priority: Option<i64>) -> Source {
        Source {
            id,
            name: format!("source {}", id),
            slug: format!("source-{}", id),
            kind,
            priority,
            is_active: true,
            owner_channel_id: None,
            is_sensitive: false,
        }
    }

    #[test]
    fn test_curated_priority_wins_over_kind() {
        let aggregator = source(1, SourceKind::Aggregator, Some(0));
        assert_eq!(source_priority(&aggregator), 0);
    }

    #[test]
    fn test_venue_outranks_aggregator_by_default() {
        let venue = source(1, SourceKind::Venue, None);
        let aggregator = source(2, SourceKind::Aggregator, None);
        assert!(source_priority(&venue) < source_priority(&aggregator));
    }

    #[test]
    fn test_unknown_source_ranks_last() {
        let ranking = SourceRanking::new(vec![source(1, SourceKind::Aggregator, Some(50))]);
        assert_eq!(ranking.priority_of(1), 50);
        assert_eq!(ranking.priority_of(99), UNKNOWN_SOURCE_PRIORITY);
    }
}

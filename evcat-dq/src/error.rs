//! Error types for evcat-dq
//!
//! Storage and configuration failures use [`evcat_common::Error`]. The types
//! here describe failures scoped to a single unit of work, which are logged
//! and counted without aborting the batch.

use thiserror::Error;

/// Failure confined to one duplicate cluster or consolidation group
#[derive(Debug, Error)]
pub enum ClusterError {
    /// No member of the cluster is a canonical root
    #[error("cluster {key} has no root member")]
    NoRoot { key: String },

    /// A consolidation would change the festival's linked-event count
    #[error("consolidation into series {primary} would change linked events from {before} to {after}")]
    EventCountMismatch { primary: i64, before: i64, after: i64 },

    /// Storage failure while applying the unit
    #[error(transparent)]
    Store(#[from] evcat_common::Error),
}

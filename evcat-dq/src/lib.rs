//! evcat-dq: canonicalization and data-quality engine for the event catalog
//!
//! Batch jobs that keep a shared event catalog consistent while many
//! independent crawlers write into it:
//! - [`fingerprint`]: deterministic content identity for event candidates
//! - [`ingest`]: idempotent upsert of crawler candidates
//! - [`series_matcher`]: find-or-create series and link events
//! - [`recurrence`]: detect recurring shows among unlinked events
//! - [`signals`] / [`signal_sweep`]: normalized show attributes
//! - [`duplicates`]: cross-source duplicate resolution
//! - [`hierarchy`]: festival/series structural repair
//!
//! Every component talks to storage through [`store::CatalogStore`].

pub mod duplicates;
pub mod error;
pub mod fingerprint;
pub mod hierarchy;
pub mod ingest;
pub mod params;
pub mod ranking;
pub mod recurrence;
pub mod runner;
pub mod series_matcher;
pub mod signal_sweep;
pub mod signals;
pub mod stats;
pub mod store;

pub use crate::error::ClusterError;
pub use crate::params::DqParams;
pub use crate::store::{CatalogStore, SqliteCatalog};

use tokio_util::sync::CancellationToken;

/// Options shared by every batch job
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Compute and report, but perform zero writes
    pub dry_run: bool,
    /// Checked between logical units (cluster, series, group)
    pub cancel: CancellationToken,
}

impl JobOptions {
    pub fn live() -> Self {
        Self {
            dry_run: false,
            cancel: CancellationToken::new(),
        }
    }

    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

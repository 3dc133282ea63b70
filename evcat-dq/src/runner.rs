//! Job runner
//!
//! Wires the engines to a SQLite catalog, runs them singly or as the full
//! pipeline (ingest, recurrence, normalize, dedupe, audit) and records each
//! live run in `dq_runs`. Dry runs leave no trace in the database.

use crate::duplicates::DuplicateResolver;
use crate::hierarchy::HierarchyHealthAuditor;
use crate::ingest::{CandidateFeed, Ingestor};
use crate::params::DqParams;
use crate::recurrence::RecurrencePatternDetector;
use crate::signal_sweep::SignalSweep;
use crate::stats::{AuditStats, DedupStats, IngestStats, PipelineStats, RecurrenceStats, SignalStats};
use crate::store::SqliteCatalog;
use crate::JobOptions;
use chrono::{DateTime, NaiveDate, Utc};
use evcat_common::db::runs::save_run;
use evcat_common::db::RunRecord;
use evcat_common::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::fmt;
use tracing::info;
use uuid::Uuid;

/// Named batch job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    Ingest,
    Recurrence,
    Normalize,
    Dedupe,
    Audit,
    RunAll,
}

impl Job {
    pub fn as_str(&self) -> &'static str {
        match self {
            Job::Ingest => "ingest",
            Job::Recurrence => "recurrence",
            Job::Normalize => "normalize",
            Job::Dedupe => "dedupe",
            Job::Audit => "audit",
            Job::RunAll => "run-all",
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct DqRunner {
    pool: SqlitePool,
    store: SqliteCatalog,
    params: DqParams,
}

impl DqRunner {
    pub fn new(pool: SqlitePool, params: DqParams) -> Self {
        let store = SqliteCatalog::new(pool.clone());
        Self { pool, store, params }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn store(&self) -> &SqliteCatalog {
        &self.store
    }

    pub fn params(&self) -> &DqParams {
        &self.params
    }

    pub async fn ingest(&self, feed: &mut dyn CandidateFeed, opts: &JobOptions) -> Result<IngestStats> {
        let started_at = Utc::now();
        let stats = Ingestor::new(&self.store).ingest(feed, opts).await?;
        self.record(Job::Ingest, opts, started_at, &stats).await?;
        Ok(stats)
    }

    pub async fn recurrence(&self, today: NaiveDate, opts: &JobOptions) -> Result<RecurrenceStats> {
        let started_at = Utc::now();
        let stats = RecurrencePatternDetector::new(&self.store, &self.params)
            .run(today, opts)
            .await?;
        self.record(Job::Recurrence, opts, started_at, &stats).await?;
        Ok(stats)
    }

    pub async fn normalize(&self, today: NaiveDate, opts: &JobOptions) -> Result<SignalStats> {
        let started_at = Utc::now();
        let stats = SignalSweep::new(&self.store, &self.params).run(today, opts).await?;
        self.record(Job::Normalize, opts, started_at, &stats).await?;
        Ok(stats)
    }

    pub async fn dedupe(&self, today: NaiveDate, opts: &JobOptions) -> Result<DedupStats> {
        let started_at = Utc::now();
        let stats = DuplicateResolver::new(&self.store, &self.params)
            .run(today, opts)
            .await?;
        self.record(Job::Dedupe, opts, started_at, &stats).await?;
        Ok(stats)
    }

    pub async fn audit(&self, opts: &JobOptions) -> Result<AuditStats> {
        let started_at = Utc::now();
        let stats = HierarchyHealthAuditor::new(&self.store).run(opts).await?;
        self.record(Job::Audit, opts, started_at, &stats).await?;
        Ok(stats)
    }

    /// Every job in data-flow order; stops after the first cancelled job
    pub async fn run_all(
        &self,
        feed: Option<&mut dyn CandidateFeed>,
        today: NaiveDate,
        opts: &JobOptions,
    ) -> Result<PipelineStats> {
        let started_at = Utc::now();
        let mut stats = PipelineStats::default();

        if let Some(feed) = feed {
            let ingest = Ingestor::new(&self.store).ingest(feed, opts).await?;
            stats.cancelled = ingest.cancelled;
            stats.ingest = Some(ingest);
        }

        if !stats.cancelled {
            let recurrence = RecurrencePatternDetector::new(&self.store, &self.params)
                .run(today, opts)
                .await?;
            stats.cancelled = recurrence.cancelled;
            stats.recurrence = Some(recurrence);
        }

        if !stats.cancelled {
            let signals = SignalSweep::new(&self.store, &self.params).run(today, opts).await?;
            stats.cancelled = signals.cancelled;
            stats.signals = Some(signals);
        }

        if !stats.cancelled {
            let dedup = DuplicateResolver::new(&self.store, &self.params)
                .run(today, opts)
                .await?;
            stats.cancelled = dedup.cancelled;
            stats.dedup = Some(dedup);
        }

        if !stats.cancelled {
            let audit = HierarchyHealthAuditor::new(&self.store).run(opts).await?;
            stats.cancelled = audit.cancelled;
            stats.audit = Some(audit);
        }

        self.record(Job::RunAll, opts, started_at, &stats).await?;
        Ok(stats)
    }

    /// Persist a live run; returns its id, or `None` for a dry run
    async fn record<T: Serialize>(
        &self,
        job: Job,
        opts: &JobOptions,
        started_at: DateTime<Utc>,
        report: &T,
    ) -> Result<Option<Uuid>> {
        if opts.dry_run {
            return Ok(None);
        }

        let report = serde_json::to_value(report)
            .map_err(|e| Error::Internal(format!("Failed to serialize {} report: {}", job, e)))?;
        let run = RunRecord {
            run_id: Uuid::new_v4(),
            job: job.to_string(),
            dry_run: false,
            started_at,
            ended_at: Some(Utc::now()),
            report,
        };
        save_run(&self.pool, &run).await?;

        info!(run_id = %run.run_id, job = %job, "Recorded run");
        Ok(Some(run.run_id))
    }
}

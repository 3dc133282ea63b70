//! Batch signal normalization
//!
//! Applies [`derive_signals`] to every live event in the dedup window and
//! writes the normalized columns only where they differ from what is stored.

use crate::params::DqParams;
use crate::signals::derive_signals;
use crate::stats::{SignalStats, UnitFailure};
use crate::store::{CatalogStore, EventWindow};
use crate::JobOptions;
use chrono::NaiveDate;
use evcat_common::db::{EventRecord, StoredSignals};
use evcat_common::Result;
use tracing::{debug, info, warn};

/// Free text scanned for signals: title and description
pub fn event_text(event: &EventRecord) -> String {
    match event.description.as_deref() {
        Some(description) => format!("{}\n{}", event.title, description),
        None => event.title.clone(),
    }
}

/// Normalized signals for a stored event
pub fn normalized_signals(event: &EventRecord, preserve_existing: bool) -> StoredSignals {
    derive_signals(&event_text(event), &event.tags, &event.signals, preserve_existing).to_stored()
}

pub struct SignalSweep<'a> {
    store: &'a dyn CatalogStore,
    params: &'a DqParams,
}

impl<'a> SignalSweep<'a> {
    pub fn new(store: &'a dyn CatalogStore, params: &'a DqParams) -> Self {
        Self { store, params }
    }

    pub async fn run(&self, today: NaiveDate, opts: &JobOptions) -> Result<SignalStats> {
        let mut stats = SignalStats::default();
        let (from, to) = self.params.dedup_window(today);
        let window = EventWindow {
            from: Some(from),
            to: Some(to),
            active_only: true,
            ..Default::default()
        };

        let mut after_id = 0;
        'pages: loop {
            let page = self
                .store
                .events_page(&window, after_id, self.params.page_size)
                .await?;
            let Some(last) = page.last() else { break };
            after_id = last.id;

            for event in &page {
                if opts.is_cancelled() {
                    stats.cancelled = true;
                    break 'pages;
                }
                stats.events_scanned += 1;

                let signals = normalized_signals(event, self.params.preserve_existing_signals);
                if signals == event.signals {
                    stats.unchanged += 1;
                    continue;
                }
                if opts.dry_run {
                    stats.events_updated += 1;
                    continue;
                }

                match self.store.update_event_signals(event.id, &signals).await {
                    Ok(true) => {
                        debug!(event_id = event.id, signals = ?signals, "Updated event signals");
                        stats.events_updated += 1;
                    }
                    Ok(false) => stats.unchanged += 1,
                    Err(e) => {
                        warn!(event_id = event.id, error = %e, "Signal update failed");
                        stats.failures.push(UnitFailure::new(format!("event {}", event.id), e));
                    }
                }
            }
        }

        info!(dry_run = opts.dry_run, "Signal normalization: {}", stats.display_string());
        Ok(stats)
    }
}

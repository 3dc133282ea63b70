//! Tunable job parameters
//!
//! Each parameter resolves from the `settings` table (authoritative), then the
//! `[dq]` section of the TOML config, then the compiled default. A value that
//! fails validation is logged and the next tier is consulted.

use chrono::{Duration, NaiveDate};
use evcat_common::config::TomlConfig;
use evcat_common::db::settings::get_setting;
use evcat_common::Result;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use std::fmt::Display;
use std::str::FromStr;
use tracing::{debug, warn};

pub const MIN_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 1000;

/// Longest lookback or horizon accepted, in days
const MAX_WINDOW_DAYS: i64 = 3650;

/// Resolved parameters for one job run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DqParams {
    /// Days before today included in the duplicate window
    pub dedup_lookback_days: i64,
    /// Days after today included in the duplicate window
    pub dedup_horizon_days: i64,
    /// Days before today included in recurrence detection
    pub recurrence_lookback_days: i64,
    /// Minimum group size for a recurring-show candidate
    pub recurrence_min_count: usize,
    /// Rows per storage page
    pub page_size: usize,
    /// Keep signal values already stored on an event
    pub preserve_existing_signals: bool,
}

impl Default for DqParams {
    fn default() -> Self {
        Self {
            dedup_lookback_days: 7,
            dedup_horizon_days: 180,
            recurrence_lookback_days: 30,
            recurrence_min_count: 3,
            page_size: 500,
            preserve_existing_signals: true,
        }
    }
}

impl DqParams {
    /// Resolve every parameter from settings table, TOML, then defaults
    pub async fn resolve(db: &Pool<Sqlite>, toml_config: &TomlConfig) -> Result<Self> {
        let defaults = Self::default();
        let toml = &toml_config.dq;

        let params = Self {
            dedup_lookback_days: resolve_one(
                db,
                "dq_dedup_lookback_days",
                toml.dedup_lookback_days,
                defaults.dedup_lookback_days,
                valid_days,
            )
            .await?,
            dedup_horizon_days: resolve_one(
                db,
                "dq_dedup_horizon_days",
                toml.dedup_horizon_days,
                defaults.dedup_horizon_days,
                valid_days,
            )
            .await?,
            recurrence_lookback_days: resolve_one(
                db,
                "dq_recurrence_lookback_days",
                toml.recurrence_lookback_days,
                defaults.recurrence_lookback_days,
                valid_days,
            )
            .await?,
            recurrence_min_count: resolve_one(
                db,
                "dq_recurrence_min_count",
                toml.recurrence_min_count,
                defaults.recurrence_min_count,
                |n: &usize| *n >= 2,
            )
            .await?,
            page_size: clamp_page_size(
                resolve_one(
                    db,
                    "dq_page_size",
                    toml.page_size,
                    defaults.page_size,
                    |n: &usize| *n > 0,
                )
                .await?,
            ),
            preserve_existing_signals: resolve_one(
                db,
                "dq_preserve_existing_signals",
                toml.preserve_existing_signals,
                defaults.preserve_existing_signals,
                |_: &bool| true,
            )
            .await?,
        };

        debug!(?params, "Resolved data-quality parameters");
        Ok(params)
    }

    /// Inclusive duplicate window around `today`
    pub fn dedup_window(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        (
            today - Duration::days(self.dedup_lookback_days),
            today + Duration::days(self.dedup_horizon_days),
        )
    }

    /// Earliest start date considered by recurrence detection
    pub fn recurrence_from(&self, today: NaiveDate) -> NaiveDate {
        today - Duration::days(self.recurrence_lookback_days)
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = clamp_page_size(page_size);
        self
    }
}

/// Clamp a page size into the supported range
pub fn clamp_page_size(page_size: usize) -> usize {
    page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE)
}

fn valid_days(days: &i64) -> bool {
    (0..=MAX_WINDOW_DAYS).contains(days)
}

async fn resolve_one<T, F>(
    db: &Pool<Sqlite>,
    key: &str,
    toml_value: Option<T>,
    default: T,
    is_valid: F,
) -> Result<T>
where
    T: FromStr + Display + Copy,
    T::Err: Display,
    F: Fn(&T) -> bool,
{
    // Tier 1: settings table
    match get_setting::<T>(db, key).await {
        Ok(Some(value)) if is_valid(&value) => return Ok(value),
        Ok(Some(value)) => warn!(key, %value, "Setting out of range, ignoring"),
        Ok(None) => {}
        Err(evcat_common::Error::Config(msg)) => warn!(key, error = %msg, "Unparseable setting, ignoring"),
        Err(e) => return Err(e),
    }

    // Tier 2: TOML [dq] section
    if let Some(value) = toml_value {
        if is_valid(&value) {
            return Ok(value);
        }
        warn!(key, %value, "TOML value out of range, ignoring");
    }

    // Tier 3: compiled default
    Ok(default)
}

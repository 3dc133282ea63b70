//! Series find-or-create and event linking
//!
//! Lookup order for a hint:
//! 1. exact title within the series type
//! 2. slug of the normalized title within the series type
//! 3. `film` only: external catalog id
//!
//! When nothing matches, a series is created with a slug derived from the
//! normalized title, suffixed `-2`, `-3`, ... until it is unique across all
//! series. Festival-program hints are scoped to their festival.

use crate::fingerprint::{normalize_title, slugify};
use crate::store::{CatalogStore, NewSeries, SeriesBackfill};
use evcat_common::db::{Series, SeriesType};
use evcat_common::{Error, Result};
use tracing::debug;

/// Slug used when a title has no usable characters
const FALLBACK_SLUG: &str = "series";

/// Upper bound on numeric slug suffixes tried before giving up
const MAX_SLUG_SUFFIX: u32 = 10_000;

/// What to look for or create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesHint {
    pub series_type: SeriesType,
    pub title: String,
    /// Parent festival (`festival_program` series)
    pub festival_id: Option<i64>,
    /// Home venue (`recurring_show` series)
    pub venue_id: Option<i64>,
    /// External catalog id (`film` series)
    pub external_id: Option<String>,
}

impl SeriesHint {
    pub fn new(series_type: SeriesType, title: impl Into<String>) -> Self {
        Self {
            series_type,
            title: title.into(),
            festival_id: None,
            venue_id: None,
            external_id: None,
        }
    }

    pub fn with_festival(mut self, festival_id: i64) -> Self {
        self.festival_id = Some(festival_id);
        self
    }

    pub fn with_venue(mut self, venue_id: i64) -> Self {
        self.venue_id = Some(venue_id);
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }
}

/// Result of [`SeriesMatcher::get_or_create_series`]
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesResolution {
    /// An existing series matched
    Found(Series),
    /// A new series was inserted
    Created { id: i64, slug: String },
    /// Dry run: a series with this slug would be inserted
    WouldCreate { slug: String },
}

impl SeriesResolution {
    /// Id of the matched or created series; `None` for a dry-run creation
    pub fn series_id(&self) -> Option<i64> {
        match self {
            SeriesResolution::Found(series) => Some(series.id),
            SeriesResolution::Created { id, .. } => Some(*id),
            SeriesResolution::WouldCreate { .. } => None,
        }
    }

    pub fn is_new(&self) -> bool {
        !matches!(self, SeriesResolution::Found(_))
    }
}

/// Base slug for a series title
pub fn series_slug(title: &str) -> String {
    let slug = slugify(&normalize_title(title));
    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}

pub struct SeriesMatcher<'a> {
    store: &'a dyn CatalogStore,
}

impl<'a> SeriesMatcher<'a> {
    pub fn new(store: &'a dyn CatalogStore) -> Self {
        Self { store }
    }

    /// Find the series described by `hint`, creating it when absent
    pub async fn get_or_create_series(
        &self,
        hint: &SeriesHint,
        dry_run: bool,
    ) -> Result<SeriesResolution> {
        if let Some(series) = self.find(hint).await? {
            debug!(series_id = series.id, title = %hint.title, "Matched existing series");
            return Ok(SeriesResolution::Found(series));
        }

        let slug = self.unique_slug(&series_slug(&hint.title)).await?;
        if dry_run {
            return Ok(SeriesResolution::WouldCreate { slug });
        }

        let id = self
            .store
            .insert_series(&NewSeries {
                series_type: hint.series_type,
                title: hint.title.trim().to_string(),
                slug: slug.clone(),
                festival_id: hint.festival_id,
                venue_id: hint.venue_id,
                external_id: hint.external_id.clone(),
            })
            .await?;

        debug!(series_id = id, slug = %slug, series_type = hint.series_type.as_str(), "Created series");
        Ok(SeriesResolution::Created { id, slug })
    }

    /// Lookup without creating
    pub async fn find(&self, hint: &SeriesHint) -> Result<Option<Series>> {
        let title = hint.title.trim();

        if !title.is_empty() {
            if let Some(series) = self
                .store
                .find_series_by_title(hint.series_type, title, hint.festival_id, hint.venue_id)
                .await?
            {
                return Ok(Some(series));
            }
        }

        if let Some(series) = self
            .store
            .find_series_by_slug(hint.series_type, &series_slug(title), hint.festival_id, hint.venue_id)
            .await?
        {
            return Ok(Some(series));
        }

        if hint.series_type == SeriesType::Film {
            if let Some(external_id) = hint.external_id.as_deref().filter(|id| !id.trim().is_empty()) {
                return self.store.find_film_series_by_external_id(external_id.trim()).await;
            }
        }

        Ok(None)
    }

    /// Link an event to a series; returns whether a link was (or would be) written
    pub async fn link_event(
        &self,
        event_id: i64,
        current_series_id: Option<i64>,
        series_id: i64,
        dry_run: bool,
    ) -> Result<bool> {
        if current_series_id == Some(series_id) {
            return Ok(false);
        }
        if dry_run {
            return Ok(true);
        }
        self.store.link_event(event_id, series_id).await
    }

    /// Fill unset series fields; returns fields written (or that would be written)
    pub async fn backfill_if_null(
        &self,
        series_id: i64,
        fields: &SeriesBackfill,
        dry_run: bool,
    ) -> Result<usize> {
        if dry_run {
            let series = self
                .store
                .series(series_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("Series {}", series_id)))?;
            return Ok(fields.fillable_count(&series));
        }
        self.store.backfill_series(series_id, fields).await
    }

    async fn unique_slug(&self, base: &str) -> Result<String> {
        if !self.store.slug_exists(base).await? {
            return Ok(base.to_string());
        }
        for suffix in 2..=MAX_SLUG_SUFFIX {
            let candidate = format!("{}-{}", base, suffix);
            if !self.store.slug_exists(&candidate).await? {
                return Ok(candidate);
            }
        }
        Err(Error::Internal(format!("No free slug for '{}'", base)))
    }
}

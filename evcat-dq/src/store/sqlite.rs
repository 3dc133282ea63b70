//! SQLite implementation of [`CatalogStore`]

use super::{
    CatalogStore, EventContent, EventWindow, MergeOutcome, NewEvent, NewSeries, NewSource,
    SeriesBackfill, SeriesSummary, SourcePromotion,
};
use crate::fingerprint::slugify;
use crate::ClusterError;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use evcat_common::db::{
    parse_weekday_name, weekday_name, EventRecord, Festival, Frequency, Series, SeriesType,
    Source, SourceKind, StoredSignals, Venue,
};
use evcat_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};

const EVENT_COLUMNS: &str = "id, origin_source_id, source_id, venue_id, title, start_date, \
    start_time, end_date, end_time, description, image_url, ticket_url, tags, fingerprint, \
    series_id, canonical_event_id, channel_id, is_sensitive, is_active, doors_time, age_policy, \
    ticket_status, reentry_policy, set_times_mentioned, created_at";

const SERIES_COLUMNS: &str = "id, series_type, title, slug, description, frequency, \
    day_of_week, festival_id, venue_id, external_id, image_url";

const SOURCE_COLUMNS: &str =
    "id, name, slug, kind, priority, is_active, owner_channel_id, is_sensitive";

/// Catalog store backed by a SQLite pool
#[derive(Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn source_from_row(row: &SqliteRow) -> Result<Source> {
    let kind: String = row.try_get("kind")?;
    Ok(Source {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        kind: SourceKind::parse(&kind),
        priority: row.try_get("priority")?,
        is_active: row.try_get("is_active")?,
        owner_channel_id: row.try_get("owner_channel_id")?,
        is_sensitive: row.try_get("is_sensitive")?,
    })
}

fn festival_from_row(row: &SqliteRow) -> Result<Festival> {
    Ok(Festival {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        announced_start: row.try_get("announced_start")?,
        announced_end: row.try_get("announced_end")?,
    })
}

fn series_from_row(row: &SqliteRow) -> Result<Series> {
    let series_type: String = row.try_get("series_type")?;
    let series_type = SeriesType::parse(&series_type)
        .ok_or_else(|| Error::Internal(format!("Unknown series type in database: {}", series_type)))?;
    let frequency: Option<String> = row.try_get("frequency")?;
    let day_of_week: Option<String> = row.try_get("day_of_week")?;

    Ok(Series {
        id: row.try_get("id")?,
        series_type,
        title: row.try_get("title")?,
        slug: row.try_get("slug")?,
        description: row.try_get("description")?,
        frequency: frequency.as_deref().and_then(Frequency::parse),
        day_of_week: day_of_week.as_deref().and_then(parse_weekday_name),
        festival_id: row.try_get("festival_id")?,
        venue_id: row.try_get("venue_id")?,
        external_id: row.try_get("external_id")?,
        image_url: row.try_get("image_url")?,
    })
}

fn event_from_row(row: &SqliteRow) -> Result<EventRecord> {
    let id: i64 = row.try_get("id")?;
    let tags_json: String = row.try_get("tags")?;
    let tags: Vec<String> = serde_json::from_str(&tags_json)
        .map_err(|e| Error::Internal(format!("Corrupt tags on event {}: {}", id, e)))?;

    Ok(EventRecord {
        id,
        origin_source_id: row.try_get("origin_source_id")?,
        source_id: row.try_get("source_id")?,
        venue_id: row.try_get("venue_id")?,
        title: row.try_get("title")?,
        start_date: row.try_get("start_date")?,
        start_time: row.try_get("start_time")?,
        end_date: row.try_get("end_date")?,
        end_time: row.try_get("end_time")?,
        description: row.try_get("description")?,
        image_url: row.try_get("image_url")?,
        ticket_url: row.try_get("ticket_url")?,
        tags,
        fingerprint: row.try_get("fingerprint")?,
        series_id: row.try_get("series_id")?,
        canonical_event_id: row.try_get("canonical_event_id")?,
        channel_id: row.try_get("channel_id")?,
        is_sensitive: row.try_get("is_sensitive")?,
        is_active: row.try_get("is_active")?,
        signals: StoredSignals {
            doors_time: row.try_get("doors_time")?,
            age_policy: row.try_get("age_policy")?,
            ticket_status: row.try_get("ticket_status")?,
            reentry_policy: row.try_get("reentry_policy")?,
            set_times_mentioned: row.try_get("set_times_mentioned")?,
        },
        created_at: row.try_get("created_at")?,
    })
}

fn encode_tags(tags: &[String]) -> Result<String> {
    serde_json::to_string(tags).map_err(|e| Error::Internal(format!("Failed to encode tags: {}", e)))
}

fn parse_stored_date(value: Option<String>) -> Result<Option<NaiveDate>> {
    value
        .map(|v| {
            NaiveDate::parse_from_str(&v, "%Y-%m-%d")
                .map_err(|e| Error::Internal(format!("Invalid date in database '{}': {}", v, e)))
        })
        .transpose()
}

/// `?, ?, ?` placeholder list for an IN clause
fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Events linked to any of `series_ids`, active or not
async fn count_linked(conn: &mut SqliteConnection, series_ids: &[i64]) -> Result<i64> {
    let sql = format!(
        "SELECT COUNT(*) FROM events WHERE series_id IN ({})",
        placeholders(series_ids.len())
    );
    let mut query = sqlx::query_scalar::<_, i64>(&sql);
    for id in series_ids {
        query = query.bind(*id);
    }
    Ok(query.fetch_one(conn).await?)
}

#[async_trait]
impl CatalogStore for SqliteCatalog {
    async fn sources(&self) -> Result<Vec<Source>> {
        let sql = format!("SELECT {} FROM sources ORDER BY id", SOURCE_COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(source_from_row).collect()
    }

    async fn source_by_slug(&self, slug: &str) -> Result<Option<Source>> {
        let sql = format!("SELECT {} FROM sources WHERE slug = ?", SOURCE_COLUMNS);
        let row = sqlx::query(&sql).bind(slug).fetch_optional(&self.pool).await?;
        row.as_ref().map(source_from_row).transpose()
    }

    async fn upsert_source(&self, source: &NewSource) -> Result<Source> {
        sqlx::query(
            r#"
            INSERT INTO sources (name, slug, kind, priority, is_active, owner_channel_id, is_sensitive)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(slug) DO UPDATE SET
                name = excluded.name,
                kind = excluded.kind,
                priority = excluded.priority,
                is_active = excluded.is_active,
                owner_channel_id = excluded.owner_channel_id,
                is_sensitive = excluded.is_sensitive
            "#,
        )
        .bind(&source.name)
        .bind(&source.slug)
        .bind(source.kind.as_str())
        .bind(source.priority)
        .bind(source.is_active)
        .bind(source.owner_channel_id)
        .bind(source.is_sensitive)
        .execute(&self.pool)
        .await?;

        self.source_by_slug(&source.slug)
            .await?
            .ok_or_else(|| Error::Internal(format!("Source {} missing after upsert", source.slug)))
    }

    async fn venue(&self, id: i64) -> Result<Option<Venue>> {
        let row: Option<(i64, String, String)> =
            sqlx::query_as("SELECT id, name, slug FROM venues WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, name, slug)| Venue { id, name, slug }))
    }

    async fn find_venue_by_name(&self, name: &str) -> Result<Option<Venue>> {
        let row: Option<(i64, String, String)> =
            sqlx::query_as("SELECT id, name, slug FROM venues WHERE slug = ?")
                .bind(slugify(name))
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, name, slug)| Venue { id, name, slug }))
    }

    async fn create_venue(&self, name: &str) -> Result<Venue> {
        let slug = slugify(name);
        if slug.is_empty() {
            return Err(Error::InvalidInput(format!("Venue name '{}' has no usable characters", name)));
        }
        sqlx::query("INSERT INTO venues (name, slug) VALUES (?, ?) ON CONFLICT(slug) DO NOTHING")
            .bind(name.trim())
            .bind(&slug)
            .execute(&self.pool)
            .await?;

        self.find_venue_by_name(name)
            .await?
            .ok_or_else(|| Error::Internal(format!("Venue {} missing after insert", slug)))
    }

    async fn festival(&self, id: i64) -> Result<Option<Festival>> {
        let row = sqlx::query(
            "SELECT id, name, slug, announced_start, announced_end FROM festivals WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(festival_from_row).transpose()
    }

    async fn find_festival_by_name(&self, name: &str) -> Result<Option<Festival>> {
        let row = sqlx::query(
            "SELECT id, name, slug, announced_start, announced_end FROM festivals WHERE slug = ?",
        )
        .bind(slugify(name))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(festival_from_row).transpose()
    }

    async fn create_festival(&self, name: &str) -> Result<Festival> {
        let slug = slugify(name);
        if slug.is_empty() {
            return Err(Error::InvalidInput(format!("Festival name '{}' has no usable characters", name)));
        }
        sqlx::query("INSERT INTO festivals (name, slug) VALUES (?, ?) ON CONFLICT(slug) DO NOTHING")
            .bind(name.trim())
            .bind(&slug)
            .execute(&self.pool)
            .await?;

        self.find_festival_by_name(name)
            .await?
            .ok_or_else(|| Error::Internal(format!("Festival {} missing after insert", slug)))
    }

    async fn set_festival_dates_if_null(
        &self,
        festival_id: i64,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE festivals SET
                announced_start = COALESCE(announced_start, ?),
                announced_end = COALESCE(announced_end, ?)
            WHERE id = ?
              AND ((announced_start IS NULL AND ? IS NOT NULL)
                OR (announced_end IS NULL AND ? IS NOT NULL))
            "#,
        )
        .bind(start)
        .bind(end)
        .bind(festival_id)
        .bind(start)
        .bind(end)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn events_page(
        &self,
        window: &EventWindow,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<EventRecord>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM events WHERE id > ", EVENT_COLUMNS));
        qb.push_bind(after_id);
        if let Some(from) = window.from {
            qb.push(" AND start_date >= ").push_bind(from);
        }
        if let Some(to) = window.to {
            qb.push(" AND start_date <= ").push_bind(to);
        }
        if window.unlinked_only {
            qb.push(" AND series_id IS NULL");
        }
        if window.roots_only {
            qb.push(" AND canonical_event_id IS NULL");
        }
        if window.active_only {
            qb.push(" AND is_active = 1");
        }
        qb.push(" ORDER BY id LIMIT ").push_bind(limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(event_from_row).collect()
    }

    async fn event(&self, id: i64) -> Result<Option<EventRecord>> {
        let sql = format!("SELECT {} FROM events WHERE id = ?", EVENT_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(event_from_row).transpose()
    }

    async fn event_by_fingerprint(
        &self,
        source_id: i64,
        fingerprint: &str,
    ) -> Result<Option<EventRecord>> {
        let sql = format!(
            "SELECT {} FROM events WHERE origin_source_id = ? AND fingerprint = ?",
            EVENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(source_id)
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(event_from_row).transpose()
    }

    async fn insert_event(&self, event: &NewEvent) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO events (
                origin_source_id, source_id, venue_id, title, start_date, start_time,
                end_date, end_time, description, image_url, ticket_url, tags,
                fingerprint, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.source_id)
        .bind(event.source_id)
        .bind(event.venue_id)
        .bind(&event.title)
        .bind(event.start_date)
        .bind(event.start_time)
        .bind(event.end_date)
        .bind(event.end_time)
        .bind(&event.description)
        .bind(&event.image_url)
        .bind(&event.ticket_url)
        .bind(encode_tags(&event.tags)?)
        .bind(&event.fingerprint)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn update_event_content(&self, event_id: i64, content: &EventContent) -> Result<bool> {
        let tags = encode_tags(&content.tags)?;
        let result = sqlx::query(
            r#"
            UPDATE events SET
                start_time = ?, end_date = ?, end_time = ?, description = ?,
                image_url = ?, ticket_url = ?, tags = ?, updated_at = ?
            WHERE id = ?
              AND (start_time IS NOT ? OR end_date IS NOT ? OR end_time IS NOT ?
                OR description IS NOT ? OR image_url IS NOT ? OR ticket_url IS NOT ?
                OR tags IS NOT ?)
            "#,
        )
        .bind(content.start_time)
        .bind(content.end_date)
        .bind(content.end_time)
        .bind(&content.description)
        .bind(&content.image_url)
        .bind(&content.ticket_url)
        .bind(&tags)
        .bind(Utc::now())
        .bind(event_id)
        .bind(content.start_time)
        .bind(content.end_date)
        .bind(content.end_time)
        .bind(&content.description)
        .bind(&content.image_url)
        .bind(&content.ticket_url)
        .bind(&tags)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_event_signals(&self, event_id: i64, signals: &StoredSignals) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE events SET
                doors_time = ?, age_policy = ?, ticket_status = ?, reentry_policy = ?,
                set_times_mentioned = ?, updated_at = ?
            WHERE id = ?
              AND (doors_time IS NOT ? OR age_policy IS NOT ? OR ticket_status IS NOT ?
                OR reentry_policy IS NOT ? OR set_times_mentioned IS NOT ?)
            "#,
        )
        .bind(&signals.doors_time)
        .bind(&signals.age_policy)
        .bind(&signals.ticket_status)
        .bind(&signals.reentry_policy)
        .bind(signals.set_times_mentioned)
        .bind(Utc::now())
        .bind(event_id)
        .bind(&signals.doors_time)
        .bind(&signals.age_policy)
        .bind(&signals.ticket_status)
        .bind(&signals.reentry_policy)
        .bind(signals.set_times_mentioned)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn promote_event_source(&self, event_id: i64, promotion: &SourcePromotion) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE events SET
                source_id = ?,
                channel_id = COALESCE(?, channel_id),
                is_sensitive = MAX(is_sensitive, ?),
                updated_at = ?
            WHERE id = ?
              AND (source_id != ?
                OR (? IS NOT NULL AND channel_id IS NOT ?)
                OR (? = 1 AND is_sensitive = 0))
            "#,
        )
        .bind(promotion.source_id)
        .bind(promotion.channel_id)
        .bind(promotion.mark_sensitive)
        .bind(Utc::now())
        .bind(event_id)
        .bind(promotion.source_id)
        .bind(promotion.channel_id)
        .bind(promotion.channel_id)
        .bind(promotion.mark_sensitive)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_canonical(&self, event_id: i64, root_id: i64) -> Result<u64> {
        if event_id == root_id {
            return Err(Error::InvalidInput(format!("Event {} cannot be its own root", event_id)));
        }

        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let children = sqlx::query(
            "UPDATE events SET canonical_event_id = ?, updated_at = ? \
             WHERE canonical_event_id = ? AND id != ?",
        )
        .bind(root_id)
        .bind(now)
        .bind(event_id)
        .bind(root_id)
        .execute(&mut *tx)
        .await?;

        let member = sqlx::query(
            "UPDATE events SET canonical_event_id = ?, updated_at = ? \
             WHERE id = ? AND canonical_event_id IS NOT ?",
        )
        .bind(root_id)
        .bind(now)
        .bind(event_id)
        .bind(root_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(children.rows_affected() + member.rows_affected())
    }

    async fn series(&self, id: i64) -> Result<Option<Series>> {
        let sql = format!("SELECT {} FROM series WHERE id = ?", SERIES_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(series_from_row).transpose()
    }

    async fn find_series_by_title(
        &self,
        series_type: SeriesType,
        title: &str,
        festival_id: Option<i64>,
        venue_id: Option<i64>,
    ) -> Result<Option<Series>> {
        let sql = format!(
            "SELECT {} FROM series WHERE series_type = ? AND title = ? \
             AND (? IS NULL OR festival_id = ?) \
             AND (? IS NULL OR venue_id = ? OR venue_id IS NULL) \
             ORDER BY venue_id IS NULL, id LIMIT 1",
            SERIES_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(series_type.as_str())
            .bind(title)
            .bind(festival_id)
            .bind(festival_id)
            .bind(venue_id)
            .bind(venue_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(series_from_row).transpose()
    }

    async fn find_series_by_slug(
        &self,
        series_type: SeriesType,
        slug: &str,
        festival_id: Option<i64>,
        venue_id: Option<i64>,
    ) -> Result<Option<Series>> {
        let sql = format!(
            "SELECT {} FROM series WHERE series_type = ? AND slug = ? \
             AND (? IS NULL OR festival_id = ?) \
             AND (? IS NULL OR venue_id = ? OR venue_id IS NULL)",
            SERIES_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(series_type.as_str())
            .bind(slug)
            .bind(festival_id)
            .bind(festival_id)
            .bind(venue_id)
            .bind(venue_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(series_from_row).transpose()
    }

    async fn find_film_series_by_external_id(&self, external_id: &str) -> Result<Option<Series>> {
        let sql = format!(
            "SELECT {} FROM series WHERE series_type = 'film' AND external_id = ? ORDER BY id LIMIT 1",
            SERIES_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(series_from_row).transpose()
    }

    async fn slug_exists(&self, slug: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM series WHERE slug = ?")
            .bind(slug)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn insert_series(&self, series: &NewSeries) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO series (series_type, title, slug, festival_id, venue_id, external_id) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(series.series_type.as_str())
        .bind(&series.title)
        .bind(&series.slug)
        .bind(series.festival_id)
        .bind(series.venue_id)
        .bind(&series.external_id)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn backfill_series(&self, series_id: i64, fields: &SeriesBackfill) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {} FROM series WHERE id = ?", SERIES_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(series_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Series {}", series_id)))?;
        let current = series_from_row(&row)?;

        let filled = fields.fillable_count(&current);
        if filled == 0 {
            return Ok(0);
        }

        sqlx::query(
            r#"
            UPDATE series SET
                description = COALESCE(description, ?),
                frequency = COALESCE(frequency, ?),
                day_of_week = COALESCE(day_of_week, ?),
                festival_id = COALESCE(festival_id, ?),
                venue_id = COALESCE(venue_id, ?),
                external_id = COALESCE(external_id, ?),
                image_url = COALESCE(image_url, ?)
            WHERE id = ?
            "#,
        )
        .bind(&fields.description)
        .bind(fields.frequency.map(|f| f.as_str()))
        .bind(fields.day_of_week.map(weekday_name))
        .bind(fields.festival_id)
        .bind(fields.venue_id)
        .bind(&fields.external_id)
        .bind(&fields.image_url)
        .bind(series_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(filled)
    }

    async fn replace_series_title(
        &self,
        series_id: i64,
        expected: Option<&str>,
        title: &str,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE series SET title = ? WHERE id = ? AND title IS ?")
            .bind(title)
            .bind(series_id)
            .bind(expected)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn link_event(&self, event_id: i64, series_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE events SET series_id = ?, updated_at = ? WHERE id = ? AND series_id IS NOT ?",
        )
        .bind(series_id)
        .bind(Utc::now())
        .bind(event_id)
        .bind(series_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn series_summaries(&self, series_type: SeriesType) -> Result<Vec<SeriesSummary>> {
        let sql = format!(
            "SELECT {}, \
             (SELECT COUNT(*) FROM events e WHERE e.series_id = series.id AND e.is_active = 1) AS event_count \
             FROM series WHERE series_type = ? ORDER BY id",
            SERIES_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(series_type.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(SeriesSummary {
                    series: series_from_row(row)?,
                    event_count: row.try_get("event_count")?,
                })
            })
            .collect()
    }

    async fn linked_event_titles(&self, series_ids: &[i64]) -> Result<Vec<String>> {
        if series_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT title FROM events WHERE is_active = 1 AND series_id IN ({}) ORDER BY id",
            placeholders(series_ids.len())
        );
        let mut query = sqlx::query_scalar::<_, String>(&sql);
        for id in series_ids {
            query = query.bind(*id);
        }
        Ok(query.fetch_all(&self.pool).await?)
    }

    async fn linked_event_date_range(
        &self,
        series_ids: &[i64],
    ) -> Result<Option<(NaiveDate, NaiveDate)>> {
        if series_ids.is_empty() {
            return Ok(None);
        }
        let sql = format!(
            "SELECT MIN(start_date), MAX(start_date) FROM events WHERE is_active = 1 AND series_id IN ({})",
            placeholders(series_ids.len())
        );
        let mut query = sqlx::query_as::<_, (Option<String>, Option<String>)>(&sql);
        for id in series_ids {
            query = query.bind(*id);
        }
        let (min, max) = query.fetch_one(&self.pool).await?;

        match (parse_stored_date(min)?, parse_stored_date(max)?) {
            (Some(min), Some(max)) => Ok(Some((min, max))),
            _ => Ok(None),
        }
    }

    async fn delete_series(&self, series_id: i64) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let unlinked = sqlx::query("UPDATE events SET series_id = NULL, updated_at = ? WHERE series_id = ?")
            .bind(Utc::now())
            .bind(series_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query("DELETE FROM series WHERE id = ?")
            .bind(series_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(unlinked)
    }

    async fn merge_series(
        &self,
        primary: i64,
        fragments: &[i64],
    ) -> std::result::Result<MergeOutcome, ClusterError> {
        let mut tx = self.pool.begin().await.map_err(Error::from)?;

        let mut all_ids = Vec::with_capacity(fragments.len() + 1);
        all_ids.push(primary);
        all_ids.extend(fragments.iter().copied().filter(|id| *id != primary));
        let before = count_linked(&mut *tx, &all_ids).await?;

        let now = Utc::now();
        let mut events_moved = 0i64;
        let mut series_deleted = 0usize;
        for fragment in all_ids.iter().skip(1) {
            let live: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM events WHERE series_id = ? AND is_active = 1",
            )
            .bind(*fragment)
            .fetch_one(&mut *tx)
            .await
            .map_err(Error::from)?;
            events_moved += live;

            sqlx::query("UPDATE events SET series_id = ?, updated_at = ? WHERE series_id = ?")
                .bind(primary)
                .bind(now)
                .bind(*fragment)
                .execute(&mut *tx)
                .await
                .map_err(Error::from)?;

            let deleted = sqlx::query("DELETE FROM series WHERE id = ?")
                .bind(*fragment)
                .execute(&mut *tx)
                .await
                .map_err(Error::from)?
                .rows_affected();
            series_deleted += deleted as usize;
        }

        let after = count_linked(&mut *tx, &[primary]).await?;
        if after != before {
            tx.rollback().await.map_err(Error::from)?;
            return Err(ClusterError::EventCountMismatch { primary, before, after });
        }

        tx.commit().await.map_err(Error::from)?;
        Ok(MergeOutcome { events_moved, series_deleted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};
    use evcat_common::db::init_memory_database;

    async fn setup() -> SqliteCatalog {
        let pool = init_memory_database().await.expect("memory database");
        SqliteCatalog::new(pool)
    }

    async fn add_source(store: &SqliteCatalog, slug: &str, kind: SourceKind) -> Source {
        store
            .upsert_source(&NewSource {
                name: slug.to_string(),
                slug: slug.to_string(),
                kind,
                priority: None,
                is_active: true,
                owner_channel_id: None,
                is_sensitive: false,
            })
            .await
            .unwrap()
    }

    fn new_event(source_id: i64, title: &str, date: NaiveDate, fingerprint: &str) -> NewEvent {
        NewEvent {
            source_id,
            venue_id: None,
            title: title.to_string(),
            start_date: date,
            start_time: NaiveTime::from_hms_opt(20, 0, 0),
            end_date: None,
            end_time: None,
            description: None,
            image_url: None,
            ticket_url: None,
            tags: vec!["music".to_string()],
            fingerprint: fingerprint.to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
        }
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    async fn add_series(store: &SqliteCatalog, slug: &str) -> i64 {
        store
            .insert_series(&NewSeries {
                series_type: SeriesType::FestivalProgram,
                title: slug.to_string(),
                slug: slug.to_string(),
                festival_id: None,
                venue_id: None,
                external_id: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_event_roundtrip() {
        let store = setup().await;
        let source = add_source(&store, "agg", SourceKind::Aggregator).await;
        let id = store.insert_event(&new_event(source.id, "Show", date(1), "fp1")).await.unwrap();

        let event = store.event(id).await.unwrap().unwrap();
        assert_eq!(event.title, "Show");
        assert_eq!(event.start_date, date(1));
        assert_eq!(event.start_time, NaiveTime::from_hms_opt(20, 0, 0));
        assert_eq!(event.tags, vec!["music".to_string()]);
        assert_eq!(event.origin_source_id, source.id);
        assert!(event.is_active);
        assert!(event.canonical_event_id.is_none());

        let by_fp = store.event_by_fingerprint(source.id, "fp1").await.unwrap();
        assert_eq!(by_fp.map(|e| e.id), Some(id));
    }

    #[tokio::test]
    async fn test_corrupt_tags_are_an_error() {
        let store = setup().await;
        let source = add_source(&store, "agg", SourceKind::Aggregator).await;
        let id = store.insert_event(&new_event(source.id, "Show", date(1), "fp1")).await.unwrap();
        sqlx::query("UPDATE events SET tags = 'music, jazz' WHERE id = ?")
            .bind(id)
            .execute(store.pool())
            .await
            .unwrap();

        match store.event(id).await {
            Err(Error::Internal(msg)) => assert!(msg.contains(&format!("event {}", id)), "{}", msg),
            other => panic!("expected an internal error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_events_page_filters_and_pages() {
        let store = setup().await;
        let source = add_source(&store, "agg", SourceKind::Aggregator).await;
        for d in 1..=5 {
            store
                .insert_event(&new_event(source.id, "Show", date(d), &format!("fp{}", d)))
                .await
                .unwrap();
        }

        let window = EventWindow {
            from: Some(date(2)),
            to: Some(date(4)),
            ..Default::default()
        };
        let first = store.events_page(&window, 0, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        let rest = store.events_page(&window, first[1].id, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].start_date, date(4));
    }

    #[tokio::test]
    async fn test_update_content_reports_change_once() {
        let store = setup().await;
        let source = add_source(&store, "agg", SourceKind::Aggregator).await;
        let id = store.insert_event(&new_event(source.id, "Show", date(1), "fp")).await.unwrap();
        let mut content = EventContent::of(&store.event(id).await.unwrap().unwrap());

        assert!(!store.update_event_content(id, &content).await.unwrap());
        content.description = Some("Now with details".to_string());
        assert!(store.update_event_content(id, &content).await.unwrap());
        assert!(!store.update_event_content(id, &content).await.unwrap());
    }

    #[tokio::test]
    async fn test_promotion_never_downgrades() {
        let store = setup().await;
        let agg = add_source(&store, "agg", SourceKind::Aggregator).await;
        let venue = add_source(&store, "venue", SourceKind::Venue).await;
        let id = store.insert_event(&new_event(agg.id, "Show", date(1), "fp")).await.unwrap();

        let first = SourcePromotion { source_id: venue.id, channel_id: Some(7), mark_sensitive: true };
        assert!(store.promote_event_source(id, &first).await.unwrap());
        assert!(!store.promote_event_source(id, &first).await.unwrap());

        let weaker = SourcePromotion { source_id: venue.id, channel_id: None, mark_sensitive: false };
        assert!(!store.promote_event_source(id, &weaker).await.unwrap());

        let event = store.event(id).await.unwrap().unwrap();
        assert_eq!(event.source_id, venue.id);
        assert_eq!(event.origin_source_id, agg.id);
        assert_eq!(event.channel_id, Some(7));
        assert!(event.is_sensitive);
    }

    #[tokio::test]
    async fn test_set_canonical_repoints_children() {
        let store = setup().await;
        let source = add_source(&store, "agg", SourceKind::Aggregator).await;
        let a = store.insert_event(&new_event(source.id, "A", date(1), "a")).await.unwrap();
        let b = store.insert_event(&new_event(source.id, "B", date(1), "b")).await.unwrap();
        let c = store.insert_event(&new_event(source.id, "C", date(1), "c")).await.unwrap();

        store.set_canonical(c, b).await.unwrap();
        assert_eq!(store.set_canonical(b, a).await.unwrap(), 2);
        assert_eq!(store.set_canonical(b, a).await.unwrap(), 0);

        assert_eq!(store.event(b).await.unwrap().unwrap().canonical_event_id, Some(a));
        assert_eq!(store.event(c).await.unwrap().unwrap().canonical_event_id, Some(a));
        assert!(store.set_canonical(a, a).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_series_unlinks_events() {
        let store = setup().await;
        let source = add_source(&store, "agg", SourceKind::Aggregator).await;
        let series_id = add_series(&store, "strand").await;
        let id = store.insert_event(&new_event(source.id, "Show", date(1), "fp")).await.unwrap();
        assert!(store.link_event(id, series_id).await.unwrap());
        assert!(!store.link_event(id, series_id).await.unwrap());

        assert_eq!(store.delete_series(series_id).await.unwrap(), 1);
        assert!(store.series(series_id).await.unwrap().is_none());
        assert!(store.event(id).await.unwrap().unwrap().series_id.is_none());
    }

    #[tokio::test]
    async fn test_merge_series_conserves_events() {
        let store = setup().await;
        let source = add_source(&store, "agg", SourceKind::Aggregator).await;
        let primary = add_series(&store, "primary").await;
        let fragment = add_series(&store, "fragment").await;
        for (i, series_id) in [primary, primary, fragment].iter().enumerate() {
            let id = store
                .insert_event(&new_event(source.id, "Show", date(1), &format!("fp{}", i)))
                .await
                .unwrap();
            store.link_event(id, *series_id).await.unwrap();
        }

        let outcome = store.merge_series(primary, &[fragment]).await.unwrap();
        assert_eq!(outcome, MergeOutcome { events_moved: 1, series_deleted: 1 });

        let summaries = store.series_summaries(SeriesType::FestivalProgram).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].event_count, 3);
    }

    #[tokio::test]
    async fn test_merge_series_moves_inactive_rows_but_counts_live_ones() {
        let store = setup().await;
        let source = add_source(&store, "agg", SourceKind::Aggregator).await;
        let primary = add_series(&store, "primary").await;
        let fragment = add_series(&store, "fragment").await;
        let mut fragment_events = Vec::new();
        for i in 0..3 {
            let id = store
                .insert_event(&new_event(source.id, "Show", date(1), &format!("fp{}", i)))
                .await
                .unwrap();
            store.link_event(id, fragment).await.unwrap();
            fragment_events.push(id);
        }
        sqlx::query("UPDATE events SET is_active = 0 WHERE id = ?")
            .bind(fragment_events[0])
            .execute(store.pool())
            .await
            .unwrap();

        let outcome = store.merge_series(primary, &[fragment]).await.unwrap();
        assert_eq!(outcome.events_moved, 2);

        let withdrawn = store.event(fragment_events[0]).await.unwrap().unwrap();
        assert_eq!(withdrawn.series_id, Some(primary));
    }

    #[tokio::test]
    async fn test_backfill_only_fills_unset_fields() {
        let store = setup().await;
        let series_id = add_series(&store, "strand").await;
        let fields = SeriesBackfill {
            frequency: Some(Frequency::Weekly),
            day_of_week: Some(chrono::Weekday::Wed),
            ..Default::default()
        };
        assert_eq!(store.backfill_series(series_id, &fields).await.unwrap(), 2);

        let other = SeriesBackfill {
            frequency: Some(Frequency::Irregular),
            ..Default::default()
        };
        assert_eq!(store.backfill_series(series_id, &other).await.unwrap(), 0);

        let series = store.series(series_id).await.unwrap().unwrap();
        assert_eq!(series.frequency, Some(Frequency::Weekly));
        assert_eq!(series.day_of_week, Some(chrono::Weekday::Wed));
    }

    #[tokio::test]
    async fn test_festival_dates_never_overwritten() {
        let store = setup().await;
        let festival = store.create_festival("Jazz Fest").await.unwrap();
        assert!(store
            .set_festival_dates_if_null(festival.id, Some(date(1)), None)
            .await
            .unwrap());
        assert!(store
            .set_festival_dates_if_null(festival.id, Some(date(9)), Some(date(10)))
            .await
            .unwrap());
        assert!(!store
            .set_festival_dates_if_null(festival.id, Some(date(2)), Some(date(11)))
            .await
            .unwrap());

        let stored = store.festival(festival.id).await.unwrap().unwrap();
        assert_eq!(stored.announced_start, Some(date(1)));
        assert_eq!(stored.announced_end, Some(date(10)));
    }
}

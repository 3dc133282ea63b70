//! Batch run history (`dq_runs`)

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::models::RunRecord;
use crate::{Error, Result};

/// Insert or update a run record
pub async fn save_run(pool: &SqlitePool, run: &RunRecord) -> Result<()> {
    let report = serde_json::to_string(&run.report)
        .map_err(|e| Error::Internal(format!("Failed to serialize report: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO dq_runs (run_id, job, dry_run, started_at, ended_at, report)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(run_id) DO UPDATE SET
            ended_at = excluded.ended_at,
            report = excluded.report
        "#,
    )
    .bind(run.run_id.to_string())
    .bind(&run.job)
    .bind(run.dry_run)
    .bind(run.started_at.to_rfc3339())
    .bind(run.ended_at.map(|dt| dt.to_rfc3339()))
    .bind(report)
    .execute(pool)
    .await?;

    Ok(())
}

/// Most recent runs, newest first
pub async fn recent_runs(pool: &SqlitePool, limit: i64) -> Result<Vec<RunRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT run_id, job, dry_run, started_at, ended_at, report
        FROM dq_runs
        ORDER BY started_at DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let run_id: String = row.get("run_id");
            let started_at: String = row.get("started_at");
            let ended_at: Option<String> = row.get("ended_at");
            let report: String = row.get("report");

            Ok(RunRecord {
                run_id: Uuid::parse_str(&run_id)
                    .map_err(|e| Error::Internal(format!("Invalid run id in database: {}", e)))?,
                job: row.get("job"),
                dry_run: row.get("dry_run"),
                started_at: parse_timestamp(&started_at)?,
                ended_at: ended_at.as_deref().map(parse_timestamp).transpose()?,
                report: serde_json::from_str(&report)
                    .map_err(|e| Error::Internal(format!("Failed to deserialize report: {}", e)))?,
            })
        })
        .collect()
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse timestamp '{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_memory_database;

    #[tokio::test]
    async fn test_save_and_list_runs() {
        let pool = init_memory_database().await.unwrap();

        let mut run = RunRecord {
            run_id: Uuid::new_v4(),
            job: "dedupe".to_string(),
            dry_run: false,
            started_at: Utc::now(),
            ended_at: None,
            report: serde_json::json!({}),
        };
        save_run(&pool, &run).await.unwrap();

        run.ended_at = Some(Utc::now());
        run.report = serde_json::json!({ "clusters": 2 });
        save_run(&pool, &run).await.unwrap();

        let runs = recent_runs(&pool, 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, run.run_id);
        assert_eq!(runs[0].report["clusters"], 2);
        assert!(runs[0].ended_at.is_some());
    }
}

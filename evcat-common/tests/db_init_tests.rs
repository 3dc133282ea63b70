//! Database initialization tests

use evcat_common::db::init::init_database;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("evcat.db");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("evcat.db");

    let pool1 = init_database(&db_path).await.unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());
}

#[tokio::test]
async fn test_schema_tables_exist() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("evcat.db")).await.unwrap();

    for table in ["sources", "venues", "festivals", "series", "events", "settings", "dq_runs"] {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
        )
        .bind(table)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(exists, "Table {} missing", table);
    }
}

#[tokio::test]
async fn test_series_type_is_constrained() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("evcat.db")).await.unwrap();

    let result = sqlx::query("INSERT INTO series (series_type, title, slug) VALUES ('podcast', 'X', 'x')")
        .execute(&pool)
        .await;

    assert!(result.is_err(), "Unknown series type should be rejected");
}

use anyhow::Result;
use sqlx::SqlitePool;

/// Create all metadata tables. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_configs (
            source_id TEXT PRIMARY KEY,
            source_type TEXT NOT NULL,
            source_name TEXT NOT NULL,
            connection_json TEXT NOT NULL DEFAULT '{}',
            sync_mode TEXT NOT NULL DEFAULT 'incremental',
            batch_size INTEGER NOT NULL,
            table_filter_json TEXT NOT NULL DEFAULT '[]',
            conflict_policy TEXT NOT NULL DEFAULT 'prefer_remote',
            enabled INTEGER NOT NULL DEFAULT 1,
            health TEXT NOT NULL DEFAULT 'unknown',
            health_checked_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schedules (
            source_id TEXT PRIMARY KEY,
            trigger_kind TEXT NOT NULL,
            interval_minutes INTEGER,
            cron_expr TEXT,
            enabled INTEGER NOT NULL DEFAULT 1,
            last_run INTEGER,
            next_run INTEGER,
            run_count INTEGER NOT NULL DEFAULT 0,
            success_count INTEGER NOT NULL DEFAULT 0,
            failure_count INTEGER NOT NULL DEFAULT 0,
            consecutive_failures INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 3,
            timeout_minutes INTEGER NOT NULL DEFAULT 30,
            manual_requested INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (source_id) REFERENCES source_configs(source_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only run history
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_runs (
            run_id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            status TEXT NOT NULL,
            sync_mode TEXT NOT NULL,
            records_processed INTEGER NOT NULL DEFAULT 0,
            records_skipped INTEGER NOT NULL DEFAULT 0,
            records_failed INTEGER NOT NULL DEFAULT 0,
            started_at INTEGER,
            completed_at INTEGER,
            duration_ms INTEGER,
            last_watermark TEXT,
            data_quality_score REAL NOT NULL DEFAULT 1.0,
            schema_changes_detected INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            FOREIGN KEY (source_id) REFERENCES source_configs(source_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_snapshots (
            snapshot_id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            table_name TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            schema_version INTEGER NOT NULL,
            columns_json TEXT NOT NULL DEFAULT '[]',
            diff_json TEXT NOT NULL DEFAULT '{}',
            captured_at INTEGER NOT NULL,
            UNIQUE(source_id, table_name, schema_version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conflicts (
            conflict_id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            record_key TEXT NOT NULL,
            conflict_type TEXT NOT NULL,
            local_json TEXT NOT NULL DEFAULT 'null',
            remote_json TEXT NOT NULL DEFAULT 'null',
            resolution_status TEXT NOT NULL DEFAULT 'pending',
            resolution_method TEXT,
            detected_at INTEGER NOT NULL,
            resolved_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            record_key TEXT NOT NULL,
            title TEXT,
            body TEXT NOT NULL,
            fields_json TEXT NOT NULL DEFAULT '{}',
            content_hash TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            last_run_id TEXT NOT NULL,
            UNIQUE(source_id, record_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One watermark per source, advanced only inside batch-commit transactions
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checkpoints (
            source_id TEXT PRIMARY KEY,
            watermark TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sync_runs_source ON sync_runs(source_id, started_at DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_conflicts_source ON conflicts(source_id, resolution_status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(source_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_snapshots_table ON schema_snapshots(source_id, table_name, schema_version DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

//! Metadata store operations.
//!
//! Everything the engine persists goes through here: source configs and
//! schedules, append-only run history, schema snapshots, conflicts,
//! normalized documents, and per-source watermarks. The one invariant that
//! matters for crash safety lives in [`Store::commit_batch`]: a batch of
//! documents and the watermark advance are committed in a single
//! transaction, so a restarted incremental run resumes from the last
//! committed batch.

use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::config::Config;
use crate::models::{
    Conflict, ConflictPolicy, ConflictType, HealthStatus, ResolutionMethod, ResolutionStatus,
    RunStatus, Schedule, SchemaSnapshot, SourceConfig, SourceType, StoredDocument, SyncMode,
    SyncRun, Trigger,
};

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Mirror the TOML-authored sources and schedules into the store.
    ///
    /// Config-authored fields are overwritten; runtime state (health,
    /// counters, queued manual triggers) is preserved. `next_run` is
    /// preserved too, except when the trigger definition itself changed,
    /// in which case it is recomputed so the edited schedule actually
    /// fires.
    pub async fn seed_sources(&self, config: &Config, now: DateTime<Utc>) -> Result<()> {
        for (source_id, entry) in &config.sources {
            let sc = entry.to_source_config(source_id, config.engine.default_batch_size);
            sqlx::query(
                r#"
                INSERT INTO source_configs
                    (source_id, source_type, source_name, connection_json, sync_mode,
                     batch_size, table_filter_json, conflict_policy, enabled, health)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'unknown')
                ON CONFLICT(source_id) DO UPDATE SET
                    source_type = excluded.source_type,
                    source_name = excluded.source_name,
                    connection_json = excluded.connection_json,
                    sync_mode = excluded.sync_mode,
                    batch_size = excluded.batch_size,
                    table_filter_json = excluded.table_filter_json,
                    conflict_policy = excluded.conflict_policy,
                    enabled = excluded.enabled
                "#,
            )
            .bind(&sc.source_id)
            .bind(sc.source_type.as_str())
            .bind(&sc.source_name)
            .bind(sc.connection.to_string())
            .bind(sc.sync_mode.as_str())
            .bind(sc.batch_size as i64)
            .bind(serde_json::to_string(&sc.table_filter)?)
            .bind(conflict_policy_str(sc.conflict_policy))
            .bind(sc.enabled as i64)
            .execute(&self.pool)
            .await?;

            let trigger = entry.trigger();
            let (kind, interval, cron_expr) = match &trigger {
                Trigger::IntervalMinutes(m) => ("interval", Some(*m), None),
                Trigger::Cron(expr) => ("cron", None, Some(expr.clone())),
                Trigger::Manual => ("manual", None, None),
            };
            let initial_next = initial_next_run(&trigger, now);

            sqlx::query(
                r#"
                INSERT INTO schedules
                    (source_id, trigger_kind, interval_minutes, cron_expr, enabled,
                     next_run, max_retries, timeout_minutes)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(source_id) DO UPDATE SET
                    trigger_kind = excluded.trigger_kind,
                    interval_minutes = excluded.interval_minutes,
                    cron_expr = excluded.cron_expr,
                    enabled = excluded.enabled,
                    next_run = CASE
                        WHEN schedules.trigger_kind != excluded.trigger_kind
                          OR ifnull(schedules.interval_minutes, -1) != ifnull(excluded.interval_minutes, -1)
                          OR ifnull(schedules.cron_expr, '') != ifnull(excluded.cron_expr, '')
                        THEN excluded.next_run
                        ELSE schedules.next_run
                    END,
                    max_retries = excluded.max_retries,
                    timeout_minutes = excluded.timeout_minutes
                "#,
            )
            .bind(source_id)
            .bind(kind)
            .bind(interval)
            .bind(cron_expr)
            .bind(entry.enabled as i64)
            .bind(initial_next.map(|t| t.timestamp()))
            .bind(entry.max_retries as i64)
            .bind(entry.timeout_minutes)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn list_sources(&self) -> Result<Vec<(SourceConfig, Schedule)>> {
        let rows = sqlx::query(
            r#"
            SELECT c.source_id, c.source_type, c.source_name, c.connection_json,
                   c.sync_mode, c.batch_size, c.table_filter_json, c.conflict_policy,
                   c.enabled, c.health, c.health_checked_at,
                   s.trigger_kind, s.interval_minutes, s.cron_expr, s.enabled AS sched_enabled,
                   s.last_run, s.next_run, s.run_count, s.success_count, s.failure_count,
                   s.consecutive_failures, s.max_retries, s.timeout_minutes, s.manual_requested
            FROM source_configs c
            JOIN schedules s ON s.source_id = c.source_id
            ORDER BY c.source_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_source_and_schedule).collect()
    }

    pub async fn get_source(&self, source_id: &str) -> Result<Option<(SourceConfig, Schedule)>> {
        Ok(self
            .list_sources()
            .await?
            .into_iter()
            .find(|(c, _)| c.source_id == source_id))
    }

    pub async fn set_health(
        &self,
        source_id: &str,
        health: HealthStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE source_configs SET health = ?, health_checked_at = ? WHERE source_id = ?")
            .bind(health.as_str())
            .bind(now.timestamp())
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Queue a manual trigger. Returns false when the source is unknown.
    pub async fn request_manual(&self, source_id: &str) -> Result<bool> {
        let res = sqlx::query("UPDATE schedules SET manual_requested = 1 WHERE source_id = ?")
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    // ── Run lifecycle ────────────────────────────────────────────────

    pub async fn create_run(&self, run: &SyncRun) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_runs (run_id, source_id, status, sync_mode) VALUES (?, ?, ?, ?)",
        )
        .bind(&run.run_id)
        .bind(&run.source_id)
        .bind(run.status.as_str())
        .bind(run.sync_mode.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_running(&self, run_id: &str, started_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE sync_runs SET status = 'running', started_at = ? WHERE run_id = ? AND status = 'pending'",
        )
        .bind(started_at.timestamp())
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Write the terminal state of a run. The guard on the current status
    /// makes the terminal transition single-shot; run history is append-only
    /// after this.
    pub async fn finish_run(&self, run: &SyncRun) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_runs SET
                status = ?, records_processed = ?, records_skipped = ?, records_failed = ?,
                completed_at = ?, duration_ms = ?, last_watermark = ?,
                data_quality_score = ?, schema_changes_detected = ?, error = ?
            WHERE run_id = ? AND status IN ('pending', 'running')
            "#,
        )
        .bind(run.status.as_str())
        .bind(run.records_processed as i64)
        .bind(run.records_skipped as i64)
        .bind(run.records_failed as i64)
        .bind(run.completed_at.map(|t| t.timestamp()))
        .bind(run.duration_ms)
        .bind(&run.last_watermark)
        .bind(run.data_quality_score)
        .bind(run.schema_changes_detected as i64)
        .bind(&run.error)
        .bind(&run.run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent_runs(&self, source_id: Option<&str>, limit: i64) -> Result<Vec<SyncRun>> {
        let rows = match source_id {
            Some(id) => {
                sqlx::query(
                    "SELECT * FROM sync_runs WHERE source_id = ? ORDER BY started_at DESC, run_id LIMIT ?",
                )
                .bind(id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM sync_runs ORDER BY started_at DESC, run_id LIMIT ?")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(row_to_run).collect()
    }

    // ── Watermarks and batch commits ─────────────────────────────────

    pub async fn get_watermark(&self, source_id: &str) -> Result<Option<String>> {
        let wm: Option<String> =
            sqlx::query_scalar("SELECT watermark FROM checkpoints WHERE source_id = ?")
                .bind(source_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(wm)
    }

    pub async fn get_document(
        &self,
        source_id: &str,
        record_key: &str,
    ) -> Result<Option<StoredDocument>> {
        let row = sqlx::query(
            "SELECT id, source_id, record_key, title, body, fields_json, content_hash, updated_at
             FROM documents WHERE source_id = ? AND record_key = ?",
        )
        .bind(source_id)
        .bind(record_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_document(&r)).transpose()
    }

    pub async fn documents_for_source(&self, source_id: &str) -> Result<Vec<StoredDocument>> {
        let rows = sqlx::query(
            "SELECT id, source_id, record_key, title, body, fields_json, content_hash, updated_at
             FROM documents WHERE source_id = ? ORDER BY record_key",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_document).collect()
    }

    /// Commit one processed batch: upsert documents, record conflicts, and
    /// advance the source watermark — all in one transaction. This is the
    /// crash-safe checkpoint: either the batch and the new watermark are both
    /// durable or neither is.
    pub async fn commit_batch(
        &self,
        source_id: &str,
        run_id: &str,
        docs: &[crate::models::NormalizedDocument],
        conflicts: &[Conflict],
        touched_keys: &[String],
        watermark: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for doc in docs {
            sqlx::query(
                r#"
                INSERT INTO documents
                    (id, source_id, record_key, title, body, fields_json, content_hash,
                     updated_at, last_run_id)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(source_id, record_key) DO UPDATE SET
                    title = excluded.title,
                    body = excluded.body,
                    fields_json = excluded.fields_json,
                    content_hash = excluded.content_hash,
                    updated_at = excluded.updated_at,
                    last_run_id = excluded.last_run_id
                "#,
            )
            .bind(&doc.document_id)
            .bind(&doc.source_id)
            .bind(&doc.record_key)
            .bind(&doc.title)
            .bind(&doc.body)
            .bind(doc.fields.to_string())
            .bind(&doc.content_hash)
            .bind(doc.updated_at.timestamp())
            .bind(run_id)
            .execute(&mut *tx)
            .await?;
        }

        for conflict in conflicts {
            insert_conflict_tx(&mut tx, conflict).await?;
        }

        // Records observed but deliberately left at their local value
        // (manual-policy conflicts) must still survive a full-mode replace.
        for key in touched_keys {
            sqlx::query(
                "UPDATE documents SET last_run_id = ? WHERE source_id = ? AND record_key = ?",
            )
            .bind(run_id)
            .bind(source_id)
            .bind(key)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO checkpoints (source_id, watermark, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(source_id) DO UPDATE SET
                watermark = excluded.watermark, updated_at = excluded.updated_at
            "#,
        )
        .bind(source_id)
        .bind(watermark)
        .bind(now.timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Full-mode replace: delete every document of this source that the
    /// given run did not touch. Returns the ids of the deleted documents so
    /// the caller can issue sink deletes.
    pub async fn delete_stale(&self, source_id: &str, run_id: &str) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM documents WHERE source_id = ? AND last_run_id != ?",
        )
        .bind(source_id)
        .bind(run_id)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM documents WHERE source_id = ? AND last_run_id != ?")
            .bind(source_id)
            .bind(run_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(ids)
    }

    // ── Schema snapshots ─────────────────────────────────────────────

    /// Most recent snapshot for one table: fingerprint, version, and the
    /// column set it was computed from.
    pub async fn latest_snapshot(
        &self,
        source_id: &str,
        table_name: &str,
    ) -> Result<Option<(String, i64, Vec<crate::models::ColumnDef>)>> {
        let row = sqlx::query(
            "SELECT fingerprint, schema_version, columns_json FROM schema_snapshots
             WHERE source_id = ? AND table_name = ?
             ORDER BY schema_version DESC LIMIT 1",
        )
        .bind(source_id)
        .bind(table_name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let columns = serde_json::from_str(&r.get::<String, _>("columns_json"))?;
            Ok((
                r.get::<String, _>("fingerprint"),
                r.get::<i64, _>("schema_version"),
                columns,
            ))
        })
        .transpose()
    }

    pub async fn insert_snapshot(&self, snapshot: &SchemaSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schema_snapshots
                (snapshot_id, source_id, table_name, fingerprint, schema_version,
                 columns_json, diff_json, captured_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&snapshot.source_id)
        .bind(&snapshot.table_name)
        .bind(&snapshot.fingerprint)
        .bind(snapshot.schema_version)
        .bind(serde_json::to_string(&snapshot.columns)?)
        .bind(serde_json::to_string(&snapshot.diff)?)
        .bind(snapshot.captured_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ── Conflicts ────────────────────────────────────────────────────

    pub async fn insert_conflict(&self, conflict: &Conflict) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_conflict_tx(&mut tx, conflict).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn conflicts_for_source(&self, source_id: &str) -> Result<Vec<Conflict>> {
        let rows = sqlx::query(
            "SELECT * FROM conflicts WHERE source_id = ? ORDER BY detected_at, conflict_id",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_conflict).collect()
    }

    // ── Schedules ────────────────────────────────────────────────────

    /// Single read-modify-write of a schedule after a run reaches a
    /// terminal state. `schedule.manual_requested` carries the
    /// dispatch-time snapshot: the queued manual trigger is cleared only
    /// when that dispatch consumed it, so a request queued while the run
    /// was in flight stays queued for the next tick.
    pub async fn update_schedule_after_run(&self, schedule: &Schedule) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE schedules SET
                last_run = ?, next_run = ?, run_count = ?, success_count = ?,
                failure_count = ?, consecutive_failures = ?,
                manual_requested = CASE WHEN ? THEN 0 ELSE manual_requested END
            WHERE source_id = ?
            "#,
        )
        .bind(schedule.last_run.map(|t| t.timestamp()))
        .bind(schedule.next_run.map(|t| t.timestamp()))
        .bind(schedule.run_count)
        .bind(schedule.success_count)
        .bind(schedule.failure_count)
        .bind(schedule.consecutive_failures as i64)
        .bind(schedule.manual_requested as i64)
        .bind(&schedule.source_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// First `next_run` for a freshly seeded schedule: due immediately for
/// interval triggers, next occurrence for cron, undefined for manual-only.
fn initial_next_run(trigger: &Trigger, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match trigger {
        Trigger::IntervalMinutes(_) => Some(now),
        Trigger::Cron(expr) => cron::Schedule::from_str(expr)
            .ok()
            .and_then(|s| s.after(&now).next()),
        Trigger::Manual => None,
    }
}

async fn insert_conflict_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    conflict: &Conflict,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO conflicts
            (conflict_id, run_id, source_id, record_key, conflict_type,
             local_json, remote_json, resolution_status, resolution_method,
             detected_at, resolved_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&conflict.conflict_id)
    .bind(&conflict.run_id)
    .bind(&conflict.source_id)
    .bind(&conflict.record_key)
    .bind(conflict.conflict_type.as_str())
    .bind(conflict.local.to_string())
    .bind(conflict.remote.to_string())
    .bind(conflict.resolution_status.as_str())
    .bind(conflict.resolution_method.map(|m| m.as_str()))
    .bind(conflict.detected_at.timestamp())
    .bind(conflict.resolved_at.map(|t| t.timestamp()))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// ── Row mapping ──────────────────────────────────────────────────────

fn ts(val: Option<i64>) -> Option<DateTime<Utc>> {
    val.and_then(|v| Utc.timestamp_opt(v, 0).single())
}

fn parse_source_type(s: &str) -> Result<SourceType> {
    match s {
        "issue_tracker" => Ok(SourceType::IssueTracker),
        "wiki" => Ok(SourceType::Wiki),
        "code_host" => Ok(SourceType::CodeHost),
        "filesystem" => Ok(SourceType::Filesystem),
        "analytical_db" => Ok(SourceType::AnalyticalDb),
        other => Err(anyhow!("unknown source type in store: '{}'", other)),
    }
}

fn parse_sync_mode(s: &str) -> Result<SyncMode> {
    match s {
        "full" => Ok(SyncMode::Full),
        "incremental" => Ok(SyncMode::Incremental),
        other => Err(anyhow!("unknown sync mode in store: '{}'", other)),
    }
}

fn parse_health(s: &str) -> HealthStatus {
    match s {
        "healthy" => HealthStatus::Healthy,
        "unhealthy" => HealthStatus::Unhealthy,
        _ => HealthStatus::Unknown,
    }
}

fn parse_run_status(s: &str) -> Result<RunStatus> {
    match s {
        "pending" => Ok(RunStatus::Pending),
        "running" => Ok(RunStatus::Running),
        "completed" => Ok(RunStatus::Completed),
        "failed" => Ok(RunStatus::Failed),
        "cancelled" => Ok(RunStatus::Cancelled),
        other => Err(anyhow!("unknown run status in store: '{}'", other)),
    }
}

fn conflict_policy_str(p: ConflictPolicy) -> &'static str {
    match p {
        ConflictPolicy::PreferRemote => "prefer_remote",
        ConflictPolicy::PreferLocal => "prefer_local",
        ConflictPolicy::AutoMerge => "auto_merge",
        ConflictPolicy::Manual => "manual",
    }
}

fn parse_conflict_policy(s: &str) -> Result<ConflictPolicy> {
    match s {
        "prefer_remote" => Ok(ConflictPolicy::PreferRemote),
        "prefer_local" => Ok(ConflictPolicy::PreferLocal),
        "auto_merge" => Ok(ConflictPolicy::AutoMerge),
        "manual" => Ok(ConflictPolicy::Manual),
        other => Err(anyhow!("unknown conflict policy in store: '{}'", other)),
    }
}

fn parse_conflict_type(s: &str) -> Result<ConflictType> {
    match s {
        "schema_change" => Ok(ConflictType::SchemaChange),
        "data_conflict" => Ok(ConflictType::DataConflict),
        "duplicate_key" => Ok(ConflictType::DuplicateKey),
        other => Err(anyhow!("unknown conflict type in store: '{}'", other)),
    }
}

fn parse_resolution_status(s: &str) -> Result<ResolutionStatus> {
    match s {
        "pending" => Ok(ResolutionStatus::Pending),
        "resolved" => Ok(ResolutionStatus::Resolved),
        "ignored" => Ok(ResolutionStatus::Ignored),
        other => Err(anyhow!("unknown resolution status in store: '{}'", other)),
    }
}

fn parse_resolution_method(s: &str) -> Result<ResolutionMethod> {
    match s {
        "auto_merge" => Ok(ResolutionMethod::AutoMerge),
        "prefer_local" => Ok(ResolutionMethod::PreferLocal),
        "prefer_remote" => Ok(ResolutionMethod::PreferRemote),
        "manual" => Ok(ResolutionMethod::Manual),
        other => Err(anyhow!("unknown resolution method in store: '{}'", other)),
    }
}

fn row_to_source_and_schedule(row: &sqlx::sqlite::SqliteRow) -> Result<(SourceConfig, Schedule)> {
    let source_id: String = row.get("source_id");

    let trigger = match row.get::<String, _>("trigger_kind").as_str() {
        "interval" => Trigger::IntervalMinutes(row.get::<Option<i64>, _>("interval_minutes").unwrap_or(60)),
        "cron" => Trigger::Cron(row.get::<Option<String>, _>("cron_expr").unwrap_or_default()),
        _ => Trigger::Manual,
    };

    let config = SourceConfig {
        source_id: source_id.clone(),
        source_type: parse_source_type(&row.get::<String, _>("source_type"))?,
        source_name: row.get("source_name"),
        connection: serde_json::from_str(&row.get::<String, _>("connection_json"))?,
        sync_mode: parse_sync_mode(&row.get::<String, _>("sync_mode"))?,
        batch_size: row.get::<i64, _>("batch_size") as usize,
        table_filter: serde_json::from_str(&row.get::<String, _>("table_filter_json"))?,
        conflict_policy: parse_conflict_policy(&row.get::<String, _>("conflict_policy"))?,
        enabled: row.get::<i64, _>("enabled") != 0,
        health: parse_health(&row.get::<String, _>("health")),
        health_checked_at: ts(row.get("health_checked_at")),
    };

    let schedule = Schedule {
        source_id,
        trigger,
        enabled: row.get::<i64, _>("sched_enabled") != 0,
        last_run: ts(row.get("last_run")),
        next_run: ts(row.get("next_run")),
        run_count: row.get("run_count"),
        success_count: row.get("success_count"),
        failure_count: row.get("failure_count"),
        consecutive_failures: row.get::<i64, _>("consecutive_failures") as u32,
        max_retries: row.get::<i64, _>("max_retries") as u32,
        timeout_minutes: row.get("timeout_minutes"),
        manual_requested: row.get::<i64, _>("manual_requested") != 0,
    };

    Ok((config, schedule))
}

fn row_to_run(row: &sqlx::sqlite::SqliteRow) -> Result<SyncRun> {
    Ok(SyncRun {
        run_id: row.get("run_id"),
        source_id: row.get("source_id"),
        status: parse_run_status(&row.get::<String, _>("status"))?,
        sync_mode: parse_sync_mode(&row.get::<String, _>("sync_mode"))?,
        records_processed: row.get::<i64, _>("records_processed") as u64,
        records_skipped: row.get::<i64, _>("records_skipped") as u64,
        records_failed: row.get::<i64, _>("records_failed") as u64,
        started_at: ts(row.get("started_at")),
        completed_at: ts(row.get("completed_at")),
        duration_ms: row.get("duration_ms"),
        last_watermark: row.get("last_watermark"),
        data_quality_score: row.get("data_quality_score"),
        schema_changes_detected: row.get::<i64, _>("schema_changes_detected") != 0,
        error: row.get("error"),
    })
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Result<StoredDocument> {
    Ok(StoredDocument {
        document_id: row.get("id"),
        source_id: row.get("source_id"),
        record_key: row.get("record_key"),
        title: row.get("title"),
        body: row.get("body"),
        fields: serde_json::from_str(&row.get::<String, _>("fields_json"))?,
        content_hash: row.get("content_hash"),
        updated_at: ts(Some(row.get::<i64, _>("updated_at"))).unwrap_or_else(Utc::now),
    })
}

fn row_to_conflict(row: &sqlx::sqlite::SqliteRow) -> Result<Conflict> {
    let method: Option<String> = row.get("resolution_method");
    Ok(Conflict {
        conflict_id: row.get("conflict_id"),
        run_id: row.get("run_id"),
        source_id: row.get("source_id"),
        record_key: row.get("record_key"),
        conflict_type: parse_conflict_type(&row.get::<String, _>("conflict_type"))?,
        local: serde_json::from_str(&row.get::<String, _>("local_json"))?,
        remote: serde_json::from_str(&row.get::<String, _>("remote_json"))?,
        resolution_status: parse_resolution_status(&row.get::<String, _>("resolution_status"))?,
        resolution_method: method.as_deref().map(parse_resolution_method).transpose()?,
        detected_at: ts(Some(row.get::<i64, _>("detected_at"))).unwrap_or_else(Utc::now),
        resolved_at: ts(row.get("resolved_at")),
    })
}

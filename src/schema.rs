//! Schema tracking.
//!
//! Before pulling data, the executor asks the connector for the live
//! structure of each table and compares a stable fingerprint against the
//! most recent stored snapshot. Drift is informational: it bumps the
//! snapshot version, records a column-level diff, and flags the run, but
//! never fails it. Sources without schema introspection are skipped with
//! a warning.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::connector::Connector;
use crate::models::{ColumnDef, SchemaDiff, SchemaSnapshot, SourceConfig, TableSchema};
use crate::store::Store;

/// Stable hash over an order-independent representation of a table's
/// columns, types, and constraints.
pub fn fingerprint(schema: &TableSchema) -> String {
    let mut lines: Vec<String> = schema
        .columns
        .iter()
        .map(|c| format!("col:{}:{}:{}", c.name, c.data_type, c.nullable))
        .collect();
    lines.extend(schema.constraints.iter().map(|c| format!("constraint:{}", c)));
    lines.sort();

    let mut hasher = Sha256::new();
    for line in &lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Column-level diff between a previous column set and the live one.
pub fn diff_columns(previous: &[ColumnDef], current: &[ColumnDef]) -> SchemaDiff {
    let mut diff = SchemaDiff::default();

    for col in current {
        match previous.iter().find(|p| p.name == col.name) {
            None => diff.added.push(col.name.clone()),
            Some(prev) if prev != col => diff.changed.push(col.name.clone()),
            Some(_) => {}
        }
    }
    for prev in previous {
        if !current.iter().any(|c| c.name == prev.name) {
            diff.removed.push(prev.name.clone());
        }
    }

    diff.added.sort();
    diff.removed.sort();
    diff.changed.sort();
    diff
}

/// Snapshot every table the connector reports and persist any changes,
/// including a resolved schema-change audit row per drifted table.
/// Returns true when at least one table drifted from its stored snapshot.
///
/// Never fails the run: introspection errors and unsupported sources
/// degrade to a logged warning.
pub async fn track(
    store: &Store,
    source: &SourceConfig,
    connector: &dyn Connector,
    run_id: &str,
    now: DateTime<Utc>,
) -> bool {
    let tables = match connector.describe(source).await {
        Ok(tables) => tables,
        Err(e) => {
            warn!(source_id = %source.source_id, error = %e, "schema introspection failed; skipping");
            return false;
        }
    };

    if tables.is_empty() {
        return false;
    }

    let mut changed = false;
    for table in &tables {
        if !source.table_filter.is_empty() && !source.table_filter.contains(&table.table) {
            continue;
        }
        match snapshot_table(store, source, table, now).await {
            Ok(Some((snapshot, prev_fingerprint))) => {
                if !snapshot.diff.is_empty() {
                    changed = true;
                    let audit = crate::conflict::schema_change(
                        &source.source_id,
                        &snapshot.table_name,
                        prev_fingerprint.as_deref(),
                        &snapshot.fingerprint,
                        run_id,
                        now,
                    );
                    if let Err(e) = store.insert_conflict(&audit).await {
                        warn!(
                            source_id = %source.source_id,
                            table = %snapshot.table_name,
                            error = %e,
                            "failed to record schema-change audit row"
                        );
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    source_id = %source.source_id,
                    table = %table.table,
                    error = %e,
                    "schema snapshot failed; skipping table"
                );
            }
        }
    }
    changed
}

/// Compare one live table against its stored snapshot. Returns the newly
/// written snapshot plus the previous fingerprint, or `None` when the
/// structure is unchanged.
pub async fn snapshot_table(
    store: &Store,
    source: &SourceConfig,
    live: &TableSchema,
    now: DateTime<Utc>,
) -> Result<Option<(SchemaSnapshot, Option<String>)>> {
    let fp = fingerprint(live);

    let (version, diff, prev_fp) = match store.latest_snapshot(&source.source_id, &live.table).await? {
        Some((prev_fp, _, _)) if prev_fp == fp => return Ok(None),
        Some((prev_fp, prev_version, prev_columns)) => (
            prev_version + 1,
            diff_columns(&prev_columns, &live.columns),
            Some(prev_fp),
        ),
        // First observation establishes the baseline; not a change.
        None => (1, SchemaDiff::default(), None),
    };

    let snapshot = SchemaSnapshot {
        source_id: source.source_id.clone(),
        table_name: live.table.clone(),
        fingerprint: fp,
        schema_version: version,
        columns: live.columns.clone(),
        diff,
        captured_at: now,
    };
    store.insert_snapshot(&snapshot).await?;
    Ok(Some((snapshot, prev_fp)))
}

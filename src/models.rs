//! Core data models for the synchronization engine.
//!
//! These types describe the configured sources, their schedules, the runs
//! executed against them, and the artifacts a run leaves behind (documents,
//! schema snapshots, conflicts).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of external system a source points at. Fixed at construction;
/// connector selection keys off this, never off runtime inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    IssueTracker,
    Wiki,
    CodeHost,
    Filesystem,
    AnalyticalDb,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::IssueTracker => "issue_tracker",
            SourceType::Wiki => "wiki",
            SourceType::CodeHost => "code_host",
            SourceType::Filesystem => "filesystem",
            SourceType::AnalyticalDb => "analytical_db",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Full,
    Incremental,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Incremental => "incremental",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }
}

/// A configured data source. Authored in the TOML config and mirrored into
/// the metadata store; read-only to the engine except for health updates.
///
/// `source_id` is globally unique and immutable once runs reference it.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub source_id: String,
    pub source_type: SourceType,
    pub source_name: String,
    /// Opaque connection parameters, interpreted only by the connector.
    pub connection: Value,
    pub sync_mode: SyncMode,
    pub batch_size: usize,
    /// Optional table/project filter passed through to the connector.
    pub table_filter: Vec<String>,
    pub conflict_policy: ConflictPolicy,
    pub enabled: bool,
    pub health: HealthStatus,
    pub health_checked_at: Option<DateTime<Utc>>,
}

/// Trigger rule for a schedule.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    IntervalMinutes(i64),
    Cron(String),
    Manual,
}

/// Per-source schedule state. Mutated only by the scheduler, through a
/// single read-modify-write after each run.
///
/// `next_run >= last_run` whenever the schedule is enabled; manual-only
/// schedules carry no `next_run`.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub source_id: String,
    pub trigger: Trigger,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub run_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub consecutive_failures: u32,
    pub max_retries: u32,
    pub timeout_minutes: i64,
    /// Set when an operator queues a manual trigger; cleared at dispatch.
    pub manual_requested: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// One execution attempt of sync for one source. Append-only history:
/// the terminal state is written exactly once and never mutated after.
#[derive(Debug, Clone)]
pub struct SyncRun {
    pub run_id: String,
    pub source_id: String,
    pub status: RunStatus,
    pub sync_mode: SyncMode,
    pub records_processed: u64,
    pub records_skipped: u64,
    pub records_failed: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    /// Watermark the run had consumed up to when it reached a terminal state.
    pub last_watermark: Option<String>,
    pub data_quality_score: f64,
    pub schema_changes_detected: bool,
    pub error: Option<String>,
}

impl SyncRun {
    pub fn new(source_id: &str, sync_mode: SyncMode) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            source_id: source_id.to_string(),
            status: RunStatus::Pending,
            sync_mode,
            records_processed: 0,
            records_skipped: 0,
            records_failed: 0,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            last_watermark: None,
            data_quality_score: 1.0,
            schema_changes_detected: false,
            error: None,
        }
    }
}

/// Raw record produced by a connector before normalization.
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// Source-native key for the logical record (issue key, page id, path).
    pub key: String,
    pub payload: Value,
    pub updated_at: DateTime<Utc>,
}

/// Canonical document shape accepted by the store and the indexing sink.
#[derive(Debug, Clone)]
pub struct NormalizedDocument {
    pub document_id: String,
    pub source_id: String,
    pub record_key: String,
    pub title: Option<String>,
    pub body: String,
    /// Structured fields retained from the raw payload (JSON object).
    pub fields: Value,
    pub content_hash: String,
    pub updated_at: DateTime<Utc>,
}

/// Local version of a document as persisted, used for conflict detection.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub document_id: String,
    pub source_id: String,
    pub record_key: String,
    pub title: Option<String>,
    pub body: String,
    pub fields: Value,
    pub content_hash: String,
    pub updated_at: DateTime<Utc>,
}

/// Column description inside a table schema reported by a connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// Structure of one source table as observed live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnDef>,
    pub constraints: Vec<String>,
}

/// Column-level difference between two schema snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Structural fingerprint of one source table at a point in time.
/// `schema_version` is monotonic per `(source_id, table_name)`.
#[derive(Debug, Clone)]
pub struct SchemaSnapshot {
    pub source_id: String,
    pub table_name: String,
    pub fingerprint: String,
    pub schema_version: i64,
    pub columns: Vec<ColumnDef>,
    pub diff: SchemaDiff,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictType {
    SchemaChange,
    DataConflict,
    DuplicateKey,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::SchemaChange => "schema_change",
            ConflictType::DataConflict => "data_conflict",
            ConflictType::DuplicateKey => "duplicate_key",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStatus {
    Pending,
    Resolved,
    Ignored,
}

impl ResolutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStatus::Pending => "pending",
            ResolutionStatus::Resolved => "resolved",
            ResolutionStatus::Ignored => "ignored",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionMethod {
    AutoMerge,
    PreferLocal,
    PreferRemote,
    Manual,
}

impl ResolutionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionMethod::AutoMerge => "auto_merge",
            ResolutionMethod::PreferLocal => "prefer_local",
            ResolutionMethod::PreferRemote => "prefer_remote",
            ResolutionMethod::Manual => "manual",
        }
    }
}

/// Configured policy for resolving local/remote disagreements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    #[default]
    PreferRemote,
    PreferLocal,
    AutoMerge,
    Manual,
}

/// A detected disagreement between local and remote versions of one record.
#[derive(Debug, Clone)]
pub struct Conflict {
    pub conflict_id: String,
    pub run_id: String,
    pub source_id: String,
    pub record_key: String,
    pub conflict_type: ConflictType,
    pub local: Value,
    pub remote: Value,
    pub resolution_status: ResolutionStatus,
    pub resolution_method: Option<ResolutionMethod>,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

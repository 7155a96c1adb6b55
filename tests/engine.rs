//! End-to-end engine tests against a scripted connector and a recording
//! sink, exercising the executor, scheduler, and pipeline over a real
//! SQLite metadata store.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use source_sync::config::{Config, DbConfig, EngineConfig, SourceEntry};
use source_sync::connector::{Connector, ConnectorRegistry, RecordStream, VecRecordStream};
use source_sync::db;
use source_sync::error::{ConnectorError, SinkError};
use source_sync::executor::{CancelFlag, RunExecutor};
use source_sync::migrate;
use source_sync::models::{
    ConflictPolicy, ConflictType, HealthStatus, NormalizedDocument, RawRecord, ResolutionMethod,
    ResolutionStatus, RunStatus, SourceConfig, SourceType, SyncMode, TableSchema, Trigger,
};
use source_sync::pipeline::{PipelineCoordinator, PipelineTrigger};
use source_sync::scheduler::Scheduler;
use source_sync::sink::IndexSink;
use source_sync::store::Store;

const BASE_TS: i64 = 1_700_000_000;

fn ts(offset: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(BASE_TS + offset, 0).single().unwrap()
}

fn rec(key: &str, body: &str, offset: i64) -> RawRecord {
    RawRecord {
        key: key.to_string(),
        payload: json!({ "title": key, "body": body }),
        updated_at: ts(offset),
    }
}

/// Connector driven entirely by test state: a mutable record set, an
/// optional schema, and injectable transient/terminal failures.
struct ScriptedConnector {
    kind: SourceType,
    records: Mutex<Vec<RawRecord>>,
    tables: Mutex<Vec<TableSchema>>,
    /// Transient errors to inject, one per `next_batch` call.
    transient_failures: Arc<AtomicU32>,
    /// Successful batches to serve before a terminal error; -1 disables.
    terminal_after: Arc<AtomicI64>,
    /// When set, `pull` itself fails terminally.
    refuse_pull: AtomicBool,
}

impl ScriptedConnector {
    fn new(kind: SourceType, records: Vec<RawRecord>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            records: Mutex::new(records),
            tables: Mutex::new(Vec::new()),
            transient_failures: Arc::new(AtomicU32::new(0)),
            terminal_after: Arc::new(AtomicI64::new(-1)),
            refuse_pull: AtomicBool::new(false),
        })
    }

    fn set_records(&self, records: Vec<RawRecord>) {
        *self.records.lock().unwrap() = records;
    }

    fn set_tables(&self, tables: Vec<TableSchema>) {
        *self.tables.lock().unwrap() = tables;
    }
}

struct ScriptedStream {
    inner: VecRecordStream,
    transient_failures: Arc<AtomicU32>,
    terminal_after: Arc<AtomicI64>,
}

#[async_trait]
impl RecordStream for ScriptedStream {
    async fn next_batch(
        &mut self,
        max: usize,
    ) -> Result<Option<source_sync::connector::RecordBatch>, ConnectorError> {
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ConnectorError::Transient("injected flake".to_string()));
        }
        if self.terminal_after.load(Ordering::SeqCst) == 0 {
            return Err(ConnectorError::Terminal("injected outage".to_string()));
        }

        let batch = self.inner.next_batch(max).await?;
        if batch.is_some() && self.terminal_after.load(Ordering::SeqCst) > 0 {
            self.terminal_after.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(batch)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    fn source_type(&self) -> SourceType {
        self.kind
    }

    async fn pull(
        &self,
        _source: &SourceConfig,
        watermark: Option<&str>,
    ) -> Result<Box<dyn RecordStream>, ConnectorError> {
        if self.refuse_pull.load(Ordering::SeqCst) {
            return Err(ConnectorError::Terminal("credentials rejected".to_string()));
        }

        let since: Option<i64> = watermark.and_then(|w| w.parse().ok());
        let all = self.records.lock().unwrap().clone();
        let max_ts = all
            .iter()
            .map(|r| r.updated_at.timestamp())
            .max()
            .or(since)
            .unwrap_or(0);

        let mut filtered: Vec<RawRecord> = all
            .into_iter()
            .filter(|r| since.map_or(true, |s| r.updated_at.timestamp() > s))
            .collect();
        filtered.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.key.cmp(&b.key)));

        Ok(Box::new(ScriptedStream {
            inner: VecRecordStream::new(filtered, max_ts.to_string()),
            transient_failures: Arc::clone(&self.transient_failures),
            terminal_after: Arc::clone(&self.terminal_after),
        }))
    }

    async fn describe(&self, _source: &SourceConfig) -> Result<Vec<TableSchema>, ConnectorError> {
        Ok(self.tables.lock().unwrap().clone())
    }

    async fn health_check(&self, _source: &SourceConfig) -> (bool, String) {
        (true, "scripted".to_string())
    }
}

#[derive(Default)]
struct RecordingSink {
    published: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    publish_failures: AtomicU32,
}

impl RecordingSink {
    fn published_keys(&self) -> Vec<String> {
        self.published.lock().unwrap().clone()
    }

    fn deleted_ids(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl IndexSink for RecordingSink {
    async fn publish(&self, doc: &NormalizedDocument) -> Result<(), SinkError> {
        if self
            .publish_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SinkError("injected sink flake".to_string()));
        }
        self.published.lock().unwrap().push(doc.record_key.clone());
        Ok(())
    }

    async fn delete(&self, document_id: &str) -> Result<(), SinkError> {
        self.deleted.lock().unwrap().push(document_id.to_string());
        Ok(())
    }
}

fn test_engine() -> EngineConfig {
    EngineConfig {
        max_concurrent_syncs: 2,
        base_backoff_secs: 60,
        max_backoff_secs: 3600,
        // Keep in-run retry sleeps negligible under test.
        retry_base_ms: 1,
        retry_max_ms: 5,
        default_batch_size: 100,
    }
}

fn entry(kind: SourceType, mode: SyncMode, policy: ConflictPolicy) -> SourceEntry {
    SourceEntry {
        source_type: kind,
        name: "scripted".to_string(),
        connection: json!({}),
        sync_mode: mode,
        batch_size: Some(2),
        table_filter: Vec::new(),
        conflict_policy: policy,
        enabled: true,
        interval_minutes: None,
        cron: None,
        max_retries: 3,
        timeout_minutes: 30,
    }
}

struct Harness {
    _tmp: TempDir,
    config: Config,
    store: Store,
    connector: Arc<ScriptedConnector>,
    sink: Arc<RecordingSink>,
    executor: Arc<RunExecutor>,
}

impl Harness {
    async fn execute(&self, source_id: &str) -> source_sync::models::SyncRun {
        self.execute_cancellable(source_id, CancelFlag::new()).await
    }

    async fn execute_cancellable(
        &self,
        source_id: &str,
        cancel: CancelFlag,
    ) -> source_sync::models::SyncRun {
        let (source, schedule) = self.store.get_source(source_id).await.unwrap().unwrap();
        self.executor.execute(&source, &schedule, cancel).await
    }
}

async fn setup(sources: BTreeMap<String, SourceEntry>, records: Vec<RawRecord>) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let kind = sources
        .values()
        .next()
        .map(|e| e.source_type)
        .unwrap_or(SourceType::IssueTracker);

    let config = Config {
        db: DbConfig {
            path: tmp.path().join("ssync.sqlite"),
        },
        engine: test_engine(),
        sources,
    };

    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    let store = Store::new(pool);
    store.seed_sources(&config, Utc::now()).await.unwrap();

    let connector = ScriptedConnector::new(kind, records);
    let mut registry = ConnectorRegistry::new();
    registry.register(Arc::clone(&connector) as Arc<dyn Connector>);

    let sink = Arc::new(RecordingSink::default());
    let executor = Arc::new(RunExecutor::new(
        store.clone(),
        Arc::new(registry),
        Arc::clone(&sink) as Arc<dyn IndexSink>,
        config.engine.clone(),
    ));

    Harness {
        _tmp: tmp,
        config,
        store,
        connector,
        sink,
        executor,
    }
}

fn one_source(kind: SourceType, mode: SyncMode, policy: ConflictPolicy) -> BTreeMap<String, SourceEntry> {
    let mut sources = BTreeMap::new();
    sources.insert("s1".to_string(), entry(kind, mode, policy));
    sources
}

#[tokio::test]
async fn test_incremental_sync_ingests_everything_once() {
    let records = vec![
        rec("A-1", "first", 1),
        rec("A-2", "second", 2),
        rec("A-3", "third", 3),
        rec("A-4", "fourth", 4),
        rec("A-5", "fifth", 5),
    ];
    let h = setup(
        one_source(SourceType::IssueTracker, SyncMode::Incremental, ConflictPolicy::PreferRemote),
        records,
    )
    .await;

    let run = h.execute("s1").await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.records_processed, 5);
    assert_eq!(run.records_failed, 0);
    assert_eq!(run.data_quality_score, 1.0);
    assert_eq!(run.last_watermark.as_deref(), Some((BASE_TS + 5).to_string().as_str()));

    let docs = h.store.documents_for_source("s1").await.unwrap();
    assert_eq!(docs.len(), 5);
    assert_eq!(h.sink.published_keys().len(), 5);

    // Nothing new: the watermark filters everything out.
    let run = h.execute("s1").await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.records_processed, 0);
    assert_eq!(h.sink.published_keys().len(), 5);
}

#[tokio::test]
async fn test_transient_errors_retry_without_losing_records() {
    let records = vec![
        rec("W-1", "a", 1),
        rec("W-2", "b", 2),
        rec("W-3", "c", 3),
        rec("W-4", "d", 4),
        rec("W-5", "e", 5),
        rec("W-6", "f", 6),
    ];
    let h = setup(
        one_source(SourceType::Wiki, SyncMode::Incremental, ConflictPolicy::PreferRemote),
        records,
    )
    .await;
    h.connector.transient_failures.store(2, Ordering::SeqCst);

    let run = h.execute("s1").await;
    assert_eq!(run.status, RunStatus::Completed, "error: {:?}", run.error);
    assert_eq!(run.records_processed, 6);

    // Retries re-pull from the committed watermark, so nothing is
    // published twice.
    let mut keys = h.sink.published_keys();
    keys.sort();
    assert_eq!(keys, vec!["W-1", "W-2", "W-3", "W-4", "W-5", "W-6"]);
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_run() {
    let mut sources = one_source(SourceType::Wiki, SyncMode::Incremental, ConflictPolicy::PreferRemote);
    sources.get_mut("s1").unwrap().max_retries = 1;
    let h = setup(sources, vec![rec("W-1", "a", 1)]).await;
    h.connector.transient_failures.store(10, Ordering::SeqCst);

    let run = h.execute("s1").await;
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.as_deref().unwrap_or("").contains("transient error persisted"));
    assert!(h.store.documents_for_source("s1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_terminal_error_fails_run_and_marks_source_unhealthy() {
    let h = setup(
        one_source(SourceType::IssueTracker, SyncMode::Incremental, ConflictPolicy::PreferRemote),
        vec![rec("A-1", "a", 1)],
    )
    .await;
    h.connector.refuse_pull.store(true, Ordering::SeqCst);

    let run = h.execute("s1").await;
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.as_deref().unwrap_or("").contains("credentials rejected"));

    let (source, _) = h.store.get_source("s1").await.unwrap().unwrap();
    assert_eq!(source.health, HealthStatus::Unhealthy);
}

#[tokio::test]
async fn test_interrupted_run_resumes_from_committed_watermark() {
    let records = vec![
        rec("A-1", "a", 1),
        rec("A-2", "b", 2),
        rec("A-3", "c", 3),
        rec("A-4", "d", 4),
        rec("A-5", "e", 5),
        rec("A-6", "f", 6),
    ];
    let h = setup(
        one_source(SourceType::IssueTracker, SyncMode::Incremental, ConflictPolicy::PreferRemote),
        records,
    )
    .await;

    // One committed batch (batch_size 2), then the source dies.
    h.connector.terminal_after.store(1, Ordering::SeqCst);
    let run = h.execute("s1").await;
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.records_processed, 2);
    assert_eq!(h.store.documents_for_source("s1").await.unwrap().len(), 2);

    // Recovery picks up where the last committed batch left off.
    h.connector.terminal_after.store(-1, Ordering::SeqCst);
    let run = h.execute("s1").await;
    assert_eq!(run.status, RunStatus::Completed, "error: {:?}", run.error);
    assert_eq!(run.records_processed, 4);

    let docs = h.store.documents_for_source("s1").await.unwrap();
    assert_eq!(docs.len(), 6);
    // No document was re-published by the recovery run.
    assert_eq!(h.sink.published_keys().len(), 6);
}

#[tokio::test]
async fn test_full_sync_removes_stale_documents() {
    let h = setup(
        one_source(SourceType::Wiki, SyncMode::Full, ConflictPolicy::PreferRemote),
        vec![rec("P-1", "a", 1), rec("P-2", "b", 2), rec("P-3", "c", 3)],
    )
    .await;

    let run = h.execute("s1").await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(h.store.documents_for_source("s1").await.unwrap().len(), 3);

    // P-2 disappears upstream; the next full sync must drop it.
    h.connector.set_records(vec![rec("P-1", "a", 1), rec("P-3", "c", 3)]);
    let run = h.execute("s1").await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.records_processed, 2);

    let docs = h.store.documents_for_source("s1").await.unwrap();
    let mut keys: Vec<&str> = docs.iter().map(|d| d.record_key.as_str()).collect();
    keys.sort();
    assert_eq!(keys, vec!["P-1", "P-3"]);
    assert_eq!(h.sink.deleted_ids().len(), 1);
}

#[tokio::test]
async fn test_prefer_remote_overwrites_without_pending_conflict() {
    let h = setup(
        one_source(SourceType::IssueTracker, SyncMode::Incremental, ConflictPolicy::PreferRemote),
        vec![rec("A-1", "version one", 1)],
    )
    .await;

    h.execute("s1").await;
    let before = h.store.documents_for_source("s1").await.unwrap();

    h.connector.set_records(vec![rec("A-1", "version two", 10)]);
    let run = h.execute("s1").await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.records_processed, 1);

    let after = h.store.documents_for_source("s1").await.unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].body, "version two");
    // The logical document survives the overwrite.
    assert_eq!(after[0].document_id, before[0].document_id);
    assert!(h.store.conflicts_for_source("s1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_manual_policy_keeps_local_and_records_pending_conflict() {
    let h = setup(
        one_source(SourceType::IssueTracker, SyncMode::Incremental, ConflictPolicy::Manual),
        vec![rec("A-1", "local truth", 1)],
    )
    .await;
    h.execute("s1").await;

    h.connector.set_records(vec![rec("A-1", "remote change", 10)]);
    let run = h.execute("s1").await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.records_processed, 1);

    let docs = h.store.documents_for_source("s1").await.unwrap();
    assert_eq!(docs[0].body, "local truth");

    let conflicts = h.store.conflicts_for_source("s1").await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].conflict_type, ConflictType::DataConflict);
    assert_eq!(conflicts[0].resolution_status, ResolutionStatus::Pending);
    assert_eq!(conflicts[0].resolution_method, Some(ResolutionMethod::Manual));
}

#[tokio::test]
async fn test_auto_merge_combines_fields_remote_wins() {
    let h = setup(
        one_source(SourceType::IssueTracker, SyncMode::Incremental, ConflictPolicy::AutoMerge),
        vec![RawRecord {
            key: "A-1".to_string(),
            payload: json!({ "title": "A-1", "body": "v1", "owner": "alice", "labels": "infra" }),
            updated_at: ts(1),
        }],
    )
    .await;
    h.execute("s1").await;

    h.connector.set_records(vec![RawRecord {
        key: "A-1".to_string(),
        payload: json!({ "title": "A-1", "body": "v2", "owner": "bob", "priority": "high" }),
        updated_at: ts(10),
    }]);
    let run = h.execute("s1").await;
    assert_eq!(run.status, RunStatus::Completed);

    let docs = h.store.documents_for_source("s1").await.unwrap();
    assert_eq!(docs[0].body, "v2");
    assert_eq!(docs[0].fields["owner"], "bob");
    assert_eq!(docs[0].fields["priority"], "high");
    // Fields only the local side had survive the merge.
    assert_eq!(docs[0].fields["labels"], "infra");

    let conflicts = h.store.conflicts_for_source("s1").await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].resolution_status, ResolutionStatus::Resolved);
    assert_eq!(conflicts[0].resolution_method, Some(ResolutionMethod::AutoMerge));
}

#[tokio::test]
async fn test_duplicate_keys_in_one_run_skip_and_flag() {
    let h = setup(
        one_source(SourceType::IssueTracker, SyncMode::Incremental, ConflictPolicy::PreferRemote),
        vec![rec("A-1", "first copy", 1), rec("A-1", "second copy", 2)],
    )
    .await;

    let run = h.execute("s1").await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.records_processed, 1);
    assert_eq!(run.records_skipped, 1);
    assert!((run.data_quality_score - 0.5).abs() < f64::EPSILON);

    let docs = h.store.documents_for_source("s1").await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].body, "first copy");

    let conflicts = h.store.conflicts_for_source("s1").await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].conflict_type, ConflictType::DuplicateKey);
    assert_eq!(conflicts[0].resolution_status, ResolutionStatus::Pending);
}

#[tokio::test]
async fn test_malformed_records_counted_not_fatal() {
    let records = vec![
        rec("A-1", "good", 1),
        RawRecord {
            key: "  ".to_string(),
            payload: json!({ "body": "no key" }),
            updated_at: ts(2),
        },
        RawRecord {
            key: "A-3".to_string(),
            payload: json!("not an object"),
            updated_at: ts(3),
        },
        rec("A-4", "also good", 4),
        rec("A-5", "fine", 5),
    ];
    let h = setup(
        one_source(SourceType::IssueTracker, SyncMode::Incremental, ConflictPolicy::PreferRemote),
        records,
    )
    .await;

    let run = h.execute("s1").await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.records_processed, 3);
    assert_eq!(run.records_failed, 2);
    assert!((run.data_quality_score - 0.6).abs() < 0.0001);
}

#[tokio::test]
async fn test_schema_drift_versions_snapshot_and_flags_run() {
    let h = setup(
        one_source(SourceType::AnalyticalDb, SyncMode::Incremental, ConflictPolicy::PreferRemote),
        vec![rec("R-1", "row", 1)],
    )
    .await;
    let col = |name: &str, data_type: &str| source_sync::models::ColumnDef {
        name: name.to_string(),
        data_type: data_type.to_string(),
        nullable: false,
    };
    h.connector.set_tables(vec![TableSchema {
        table: "events".to_string(),
        columns: vec![col("id", "integer"), col("ts", "integer")],
        constraints: vec!["pk:id".to_string()],
    }]);

    // First observation establishes the baseline.
    let run = h.execute("s1").await;
    assert_eq!(run.status, RunStatus::Completed);
    assert!(!run.schema_changes_detected);

    h.connector.set_tables(vec![TableSchema {
        table: "events".to_string(),
        columns: vec![col("id", "integer"), col("ts", "integer"), col("user", "text")],
        constraints: vec!["pk:id".to_string()],
    }]);
    h.connector.set_records(vec![rec("R-2", "row", 2)]);

    let run = h.execute("s1").await;
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.schema_changes_detected);

    let (_, version, columns) = h
        .store
        .latest_snapshot("s1", "events")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(version, 2);
    assert_eq!(columns.len(), 3);

    let audits: Vec<_> = h
        .store
        .conflicts_for_source("s1")
        .await
        .unwrap()
        .into_iter()
        .filter(|c| c.conflict_type == ConflictType::SchemaChange)
        .collect();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].resolution_status, ResolutionStatus::Resolved);
}

#[tokio::test]
async fn test_cancelled_run_ends_cancelled_without_side_effects() {
    let h = setup(
        one_source(SourceType::IssueTracker, SyncMode::Incremental, ConflictPolicy::PreferRemote),
        vec![rec("A-1", "a", 1), rec("A-2", "b", 2)],
    )
    .await;

    let cancel = CancelFlag::new();
    cancel.cancel();
    let run = h.execute_cancellable("s1", cancel).await;
    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(run.records_processed, 0);
    assert!(h.store.documents_for_source("s1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_scheduler_dispatches_due_source_and_reschedules() {
    let mut sources = one_source(
        SourceType::IssueTracker,
        SyncMode::Incremental,
        ConflictPolicy::PreferRemote,
    );
    sources.get_mut("s1").unwrap().interval_minutes = Some(60);
    let h = setup(sources, vec![rec("A-1", "a", 1)]).await;

    let scheduler = Scheduler::new(h.store.clone(), Arc::clone(&h.executor), test_engine());
    let now = Utc::now();
    let runs = scheduler.tick(now).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);

    let (_, schedule) = h.store.get_source("s1").await.unwrap().unwrap();
    assert_eq!(schedule.run_count, 1);
    assert_eq!(schedule.success_count, 1);
    assert_eq!(schedule.consecutive_failures, 0);
    assert!(schedule.next_run.unwrap() > now);

    // Not due again until the interval elapses.
    let runs = scheduler.tick(Utc::now()).await.unwrap();
    assert!(runs.is_empty());
}

#[tokio::test]
async fn test_failed_run_backs_off_reschedule() {
    let mut sources = one_source(
        SourceType::IssueTracker,
        SyncMode::Incremental,
        ConflictPolicy::PreferRemote,
    );
    sources.get_mut("s1").unwrap().interval_minutes = Some(60);
    let h = setup(sources, vec![rec("A-1", "a", 1)]).await;
    h.connector.refuse_pull.store(true, Ordering::SeqCst);

    let scheduler = Scheduler::new(h.store.clone(), Arc::clone(&h.executor), test_engine());
    let runs = scheduler.tick(Utc::now()).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);

    let (_, schedule) = h.store.get_source("s1").await.unwrap().unwrap();
    assert_eq!(schedule.consecutive_failures, 1);
    // interval 60m, base backoff 60s, one failure: retry in ~2 minutes.
    let next = schedule.next_run.unwrap();
    let delta = next - schedule.last_run.unwrap();
    assert!(delta <= chrono::Duration::minutes(2) + chrono::Duration::seconds(1));
    assert!(delta >= chrono::Duration::minutes(1));
}

#[tokio::test]
async fn test_manual_only_source_runs_on_request() {
    let h = setup(
        one_source(SourceType::IssueTracker, SyncMode::Incremental, ConflictPolicy::PreferRemote),
        vec![rec("A-1", "a", 1)],
    )
    .await;
    let scheduler = Scheduler::new(h.store.clone(), Arc::clone(&h.executor), test_engine());

    let runs = scheduler.tick(Utc::now()).await.unwrap();
    assert!(runs.is_empty(), "manual-only source must not run unprompted");

    h.store.request_manual("s1").await.unwrap();
    let runs = scheduler.tick(Utc::now()).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);

    let (_, schedule) = h.store.get_source("s1").await.unwrap().unwrap();
    assert!(!schedule.manual_requested);
}

#[tokio::test]
async fn test_pipeline_manual_all_aggregates_outcomes() {
    let h = setup(
        one_source(SourceType::IssueTracker, SyncMode::Incremental, ConflictPolicy::PreferRemote),
        vec![rec("A-1", "a", 1), rec("A-2", "b", 2)],
    )
    .await;
    let scheduler = Arc::new(Scheduler::new(
        h.store.clone(),
        Arc::clone(&h.executor),
        test_engine(),
    ));
    let coordinator = PipelineCoordinator::new(h.store.clone(), scheduler);

    let summary = coordinator
        .run(PipelineTrigger::ManualAll, Utc::now())
        .await
        .unwrap();
    assert_eq!(summary.sources_attempted, 1);
    assert_eq!(summary.sources_succeeded, 1);
    assert_eq!(summary.sources_failed, 0);
    assert_eq!(summary.records_processed, 2);
    assert!(summary.errors.is_empty());
}

#[tokio::test]
async fn test_sink_flake_retried_before_commit() {
    let h = setup(
        one_source(SourceType::IssueTracker, SyncMode::Incremental, ConflictPolicy::PreferRemote),
        vec![rec("A-1", "a", 1), rec("A-2", "b", 2)],
    )
    .await;
    h.sink.publish_failures.store(1, Ordering::SeqCst);

    let run = h.execute("s1").await;
    assert_eq!(run.status, RunStatus::Completed, "error: {:?}", run.error);
    assert_eq!(run.records_processed, 2);
    assert_eq!(h.sink.published_keys().len(), 2);
}

#[tokio::test]
async fn test_concurrent_ticks_never_double_run_a_source() {
    let mut sources = one_source(
        SourceType::IssueTracker,
        SyncMode::Incremental,
        ConflictPolicy::PreferRemote,
    );
    sources.get_mut("s1").unwrap().interval_minutes = Some(60);
    let h = setup(sources, vec![rec("A-1", "a", 1)]).await;

    let scheduler = Arc::new(Scheduler::new(
        h.store.clone(),
        Arc::clone(&h.executor),
        test_engine(),
    ));
    let now = Utc::now();

    // Two overlapping ticks racing for the same due source: per-source
    // exclusion lets exactly one of them dispatch it.
    let (a, b) = tokio::join!(scheduler.tick(now), scheduler.tick(now));
    let total = a.unwrap().len() + b.unwrap().len();
    assert_eq!(total, 1);

    let runs = h.store.recent_runs(Some("s1"), 10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);
}

#[tokio::test]
async fn test_resume_with_tied_timestamps_loses_nothing() {
    // Several records share one watermark position; a batch boundary must
    // never land inside the tie, or the resumed pull would skip the rest.
    let records = vec![
        rec("T-1", "a", 1),
        rec("T-2", "b", 2),
        rec("T-3", "c", 2),
        rec("T-4", "d", 2),
        rec("T-5", "e", 3),
    ];
    let h = setup(
        one_source(SourceType::IssueTracker, SyncMode::Incremental, ConflictPolicy::PreferRemote),
        records,
    )
    .await;

    // The source dies after the first committed batch.
    h.connector.terminal_after.store(1, Ordering::SeqCst);
    let run = h.execute("s1").await;
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.records_processed, 4);
    assert_eq!(h.store.documents_for_source("s1").await.unwrap().len(), 4);

    h.connector.terminal_after.store(-1, Ordering::SeqCst);
    let run = h.execute("s1").await;
    assert_eq!(run.status, RunStatus::Completed, "error: {:?}", run.error);
    assert_eq!(run.records_processed, 1);

    // Crash + resume processed exactly the uninterrupted set, once each.
    let docs = h.store.documents_for_source("s1").await.unwrap();
    let mut keys: Vec<&str> = docs.iter().map(|d| d.record_key.as_str()).collect();
    keys.sort();
    assert_eq!(keys, vec!["T-1", "T-2", "T-3", "T-4", "T-5"]);
    assert_eq!(h.sink.published_keys().len(), 5);
}

#[tokio::test]
async fn test_reseed_trigger_change_recomputes_next_run() {
    // Manual-only at first: no next_run.
    let h = setup(
        one_source(SourceType::IssueTracker, SyncMode::Incremental, ConflictPolicy::PreferRemote),
        vec![rec("A-1", "a", 1)],
    )
    .await;
    let (_, schedule) = h.store.get_source("s1").await.unwrap().unwrap();
    assert_eq!(schedule.trigger, Trigger::Manual);
    assert!(schedule.next_run.is_none());

    // Operator edits the config to give the source an interval.
    let mut edited = h.config.clone();
    edited.sources.get_mut("s1").unwrap().interval_minutes = Some(30);
    let seeded_at = Utc::now();
    h.store.seed_sources(&edited, seeded_at).await.unwrap();

    let (_, schedule) = h.store.get_source("s1").await.unwrap().unwrap();
    assert_eq!(schedule.trigger, Trigger::IntervalMinutes(30));
    assert!(schedule.next_run.is_some(), "edited schedule never fires");

    // Re-seeding an unchanged trigger preserves the scheduler-owned
    // next_run instead of resetting it.
    let first_next = schedule.next_run;
    h.store.seed_sources(&edited, Utc::now()).await.unwrap();
    let (_, schedule) = h.store.get_source("s1").await.unwrap().unwrap();
    assert_eq!(schedule.next_run, first_next);
}

#[tokio::test]
async fn test_manual_request_queued_mid_run_survives_outcome() {
    let h = setup(
        one_source(SourceType::IssueTracker, SyncMode::Incremental, ConflictPolicy::PreferRemote),
        vec![rec("A-1", "a", 1)],
    )
    .await;

    // Snapshot taken at dispatch, before the operator queues a request.
    let (_, snapshot) = h.store.get_source("s1").await.unwrap().unwrap();
    assert!(!snapshot.manual_requested);
    h.store.request_manual("s1").await.unwrap();

    // The in-flight run finishes and records its outcome from that stale
    // snapshot; the request queued meanwhile must stay queued.
    let mut updated = snapshot.clone();
    updated.last_run = Some(Utc::now());
    updated.run_count += 1;
    updated.success_count += 1;
    h.store.update_schedule_after_run(&updated).await.unwrap();

    let (_, after) = h.store.get_source("s1").await.unwrap().unwrap();
    assert!(after.manual_requested, "queued manual trigger was dropped");
}

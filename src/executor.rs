//! Run Executor: drives one sync run for one source end to end.
//!
//! Pull, normalize, diff, resolve, persist, report. The executor never
//! lets an error escape: per-record problems become counters, transient
//! connector and sink errors are retried with exponential backoff, and
//! only exhausted retries or terminal errors turn into a `failed` run.
//! Every committed batch is a durable checkpoint; a restarted incremental
//! run resumes from the last committed watermark.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backoff::retry_delay;
use crate::config::EngineConfig;
use crate::conflict::{self, Resolution};
use crate::connector::{ConnectorRegistry, RecordStream};
use crate::error::ConnectorError;
use crate::models::{
    Conflict, HealthStatus, NormalizedDocument, RunStatus, Schedule, SourceConfig, SyncMode,
    SyncRun,
};
use crate::normalize;
use crate::schema;
use crate::sink::IndexSink;
use crate::store::Store;

/// Cooperative cancellation flag, checked at batch boundaries only.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counters owned by the single executing task and folded into the
/// immutable run result at the end; nothing mutates them concurrently.
#[derive(Default)]
struct RunStats {
    processed: u64,
    skipped: u64,
    failed: u64,
}

pub struct RunExecutor {
    store: Store,
    registry: Arc<ConnectorRegistry>,
    sink: Arc<dyn IndexSink>,
    engine: EngineConfig,
}

impl RunExecutor {
    pub fn new(
        store: Store,
        registry: Arc<ConnectorRegistry>,
        sink: Arc<dyn IndexSink>,
        engine: EngineConfig,
    ) -> Self {
        Self {
            store,
            registry,
            sink,
            engine,
        }
    }

    /// Execute one sync run. Always returns a run in a terminal state;
    /// errors never propagate past this boundary.
    pub async fn execute(
        &self,
        source: &SourceConfig,
        schedule: &Schedule,
        cancel: CancelFlag,
    ) -> SyncRun {
        let mut run = SyncRun::new(&source.source_id, source.sync_mode);

        if let Err(e) = self.store.create_run(&run).await {
            run.status = RunStatus::Failed;
            run.error = Some(format!("failed to persist run: {}", e));
            return run;
        }

        let started = Utc::now();
        run.started_at = Some(started);
        run.status = RunStatus::Running;
        if let Err(e) = self.store.mark_running(&run.run_id, started).await {
            warn!(run_id = %run.run_id, error = %e, "failed to mark run running");
        }

        info!(
            source_id = %source.source_id,
            run_id = %run.run_id,
            mode = source.sync_mode.as_str(),
            "sync run started"
        );

        let mut stats = RunStats::default();
        let outcome = self
            .drive(source, schedule, &mut run, &mut stats, cancel, started)
            .await;

        run.records_processed = stats.processed;
        run.records_skipped = stats.skipped;
        run.records_failed = stats.failed;
        run.data_quality_score = quality_score(&stats);

        match outcome {
            Ok(status) => run.status = status,
            Err(e) => {
                run.status = RunStatus::Failed;
                run.error = Some(e.to_string());
            }
        }

        let completed = Utc::now();
        run.completed_at = Some(completed);
        run.duration_ms = Some((completed - started).num_milliseconds());

        if let Err(e) = self.store.finish_run(&run).await {
            warn!(run_id = %run.run_id, error = %e, "failed to persist terminal run state");
        }

        if run.status == RunStatus::Completed {
            if let Err(e) = self
                .store
                .set_health(&source.source_id, HealthStatus::Healthy, completed)
                .await
            {
                warn!(source_id = %source.source_id, error = %e, "failed to update health");
            }
        }

        info!(
            source_id = %source.source_id,
            run_id = %run.run_id,
            status = run.status.as_str(),
            processed = run.records_processed,
            skipped = run.records_skipped,
            failed = run.records_failed,
            "sync run finished"
        );

        run
    }

    /// The run body. Returns the terminal status, or an error that the
    /// caller converts into a failed run.
    async fn drive(
        &self,
        source: &SourceConfig,
        schedule: &Schedule,
        run: &mut SyncRun,
        stats: &mut RunStats,
        cancel: CancelFlag,
        started: DateTime<Utc>,
    ) -> Result<RunStatus> {
        let connector = self
            .registry
            .get(source.source_type)
            .ok_or_else(|| {
                anyhow!(
                    "no connector registered for source type '{}'",
                    source.source_type.as_str()
                )
            })?;

        // Schema drift is informational; recorded before any data moves.
        run.schema_changes_detected =
            schema::track(&self.store, source, connector.as_ref(), &run.run_id, started).await;

        let mut committed_watermark = match source.sync_mode {
            SyncMode::Incremental => self.store.get_watermark(&source.source_id).await?,
            SyncMode::Full => None,
        };
        run.last_watermark = committed_watermark.clone();

        let deadline = started + ChronoDuration::minutes(schedule.timeout_minutes);
        // First attempt of anything is attempt 1; retries bump this and it
        // resets after every committed batch.
        let mut attempt: u32 = 1;
        // First applied version per key this run, for duplicate-key detection.
        let mut seen: HashMap<String, NormalizedDocument> = HashMap::new();

        let mut stream: Option<Box<dyn RecordStream>> = None;

        loop {
            if cancel.is_cancelled() {
                info!(run_id = %run.run_id, "run cancelled at batch boundary");
                return Ok(RunStatus::Cancelled);
            }
            let remaining = deadline - Utc::now();
            if remaining <= ChronoDuration::zero() {
                return Err(anyhow!(
                    "run timed out after {} minutes",
                    schedule.timeout_minutes
                ));
            }
            let remaining = remaining.to_std().unwrap_or_default();

            // (Re)open the pull from the last committed watermark.
            if stream.is_none() {
                let opened = tokio::time::timeout(
                    remaining,
                    connector.pull(source, committed_watermark.as_deref()),
                )
                .await
                .map_err(|_| {
                    anyhow!("run timed out after {} minutes", schedule.timeout_minutes)
                })?;

                match opened {
                    Ok(s) => stream = Some(s),
                    Err(e) => {
                        self.handle_connector_error(source, schedule, &mut attempt, e)
                            .await?;
                        continue;
                    }
                }
            }

            let Some(open_stream) = stream.as_mut() else {
                continue;
            };

            let batch = tokio::time::timeout(remaining, open_stream.next_batch(source.batch_size))
                .await
                .map_err(|_| anyhow!("run timed out after {} minutes", schedule.timeout_minutes))?;

            let batch = match batch {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(e) => {
                    // Retry re-opens the stream from the committed watermark,
                    // so the failed batch is re-pulled, never skipped.
                    stream = None;
                    self.handle_connector_error(source, schedule, &mut attempt, e)
                        .await?;
                    continue;
                }
            };

            let now = Utc::now();
            let mut docs: Vec<NormalizedDocument> = Vec::new();
            let mut conflicts: Vec<Conflict> = Vec::new();
            let mut touched: Vec<String> = Vec::new();

            for record in &batch.records {
                let doc = match normalize::normalize(source, record) {
                    Ok(doc) => doc,
                    Err(e) => {
                        warn!(
                            source_id = %source.source_id,
                            key = %record.key,
                            error = %e,
                            "record failed normalization; skipping"
                        );
                        stats.failed += 1;
                        continue;
                    }
                };

                if let Some(first) = seen.get(&doc.record_key) {
                    conflicts.push(conflict::duplicate_key(first, &doc, &run.run_id, now));
                    stats.skipped += 1;
                    continue;
                }

                let existing = self
                    .store
                    .get_document(&source.source_id, &doc.record_key)
                    .await?;

                match existing {
                    Some(local) if local.content_hash != doc.content_hash => {
                        let (resolution, conflict) =
                            conflict::resolve(&local, &doc, source.conflict_policy, &run.run_id, now);
                        if let Some(c) = conflict {
                            conflicts.push(c);
                        }
                        match resolution {
                            Resolution::ApplyRemote => {
                                let mut applied = doc;
                                applied.document_id = local.document_id;
                                seen.insert(applied.record_key.clone(), applied.clone());
                                docs.push(applied);
                            }
                            Resolution::ApplyMerged(merged) => {
                                seen.insert(merged.record_key.clone(), (*merged).clone());
                                docs.push(*merged);
                            }
                            Resolution::KeepLocal => {
                                touched.push(doc.record_key.clone());
                                seen.insert(doc.record_key.clone(), doc);
                            }
                        }
                    }
                    Some(local) => {
                        // Unchanged content; refresh so full mode keeps it.
                        let mut applied = doc;
                        applied.document_id = local.document_id;
                        seen.insert(applied.record_key.clone(), applied.clone());
                        docs.push(applied);
                    }
                    None => {
                        seen.insert(doc.record_key.clone(), doc.clone());
                        docs.push(doc);
                    }
                }
                stats.processed += 1;
            }

            // Publish before commit so a sink failure retries the batch
            // without having advanced the watermark.
            for doc in &docs {
                self.publish_with_retry(schedule, doc).await?;
            }

            self.store
                .commit_batch(
                    &source.source_id,
                    &run.run_id,
                    &docs,
                    &conflicts,
                    &touched,
                    &batch.watermark,
                    now,
                )
                .await?;

            committed_watermark = Some(batch.watermark.clone());
            run.last_watermark = committed_watermark.clone();
            attempt = 1;

            debug!(
                source_id = %source.source_id,
                run_id = %run.run_id,
                batch_records = batch.records.len(),
                watermark = %batch.watermark,
                "batch committed"
            );
        }

        // Full mode replaces the destination set: anything this run did not
        // observe is stale and goes away, locally and in the sink.
        if source.sync_mode == SyncMode::Full {
            let stale = self.store.delete_stale(&source.source_id, &run.run_id).await?;
            for document_id in &stale {
                self.delete_with_retry(schedule, document_id).await?;
            }
            if !stale.is_empty() {
                info!(
                    source_id = %source.source_id,
                    removed = stale.len(),
                    "full sync removed stale documents"
                );
            }
        }

        Ok(RunStatus::Completed)
    }

    /// Classify a connector error: transient errors back off and return
    /// so the caller retries; terminal errors (or exhausted retries) mark
    /// the source unhealthy and abort the run.
    async fn handle_connector_error(
        &self,
        source: &SourceConfig,
        schedule: &Schedule,
        attempt: &mut u32,
        error: ConnectorError,
    ) -> Result<()> {
        match error {
            ConnectorError::Transient(msg) => {
                if *attempt > schedule.max_retries {
                    return Err(anyhow!(
                        "transient error persisted after {} retries: {}",
                        schedule.max_retries,
                        msg
                    ));
                }
                let delay = retry_delay(self.engine.retry_base(), self.engine.retry_max(), *attempt);
                warn!(
                    source_id = %source.source_id,
                    attempt = *attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %msg,
                    "transient connector error; backing off"
                );
                *attempt += 1;
                tokio::time::sleep(delay).await;
                Ok(())
            }
            ConnectorError::Terminal(msg) => {
                if let Err(e) = self
                    .store
                    .set_health(&source.source_id, HealthStatus::Unhealthy, Utc::now())
                    .await
                {
                    warn!(source_id = %source.source_id, error = %e, "failed to mark source unhealthy");
                }
                Err(anyhow!("terminal connector error: {}", msg))
            }
        }
    }

    async fn publish_with_retry(
        &self,
        schedule: &Schedule,
        doc: &NormalizedDocument,
    ) -> Result<()> {
        let mut attempt: u32 = 1;
        loop {
            match self.sink.publish(doc).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt > schedule.max_retries => {
                    return Err(anyhow!(
                        "sink publish failed after {} retries: {}",
                        schedule.max_retries,
                        e
                    ));
                }
                Err(e) => {
                    let delay =
                        retry_delay(self.engine.retry_base(), self.engine.retry_max(), attempt);
                    warn!(
                        record_key = %doc.record_key,
                        attempt,
                        error = %e,
                        "sink publish failed; backing off"
                    );
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn delete_with_retry(&self, schedule: &Schedule, document_id: &str) -> Result<()> {
        let mut attempt: u32 = 1;
        loop {
            match self.sink.delete(document_id).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt > schedule.max_retries => {
                    return Err(anyhow!(
                        "sink delete failed after {} retries: {}",
                        schedule.max_retries,
                        e
                    ));
                }
                Err(e) => {
                    let delay =
                        retry_delay(self.engine.retry_base(), self.engine.retry_max(), attempt);
                    warn!(document_id = %document_id, attempt, error = %e, "sink delete failed; backing off");
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Fraction of records processed without skip or failure; 1.0 for an
/// empty run.
fn quality_score(stats: &RunStats) -> f64 {
    let total = stats.processed + stats.skipped + stats.failed;
    if total == 0 {
        1.0
    } else {
        stats.processed as f64 / total as f64
    }
}

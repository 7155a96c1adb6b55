//! Scheduler: decides which sources are due and dispatches run executors.
//!
//! Dueness is a pure function of the clock, each source's schedule, and
//! the set of runs already in flight. Dispatch is bounded two ways: a
//! global concurrency cap (semaphore) and per-source mutual exclusion —
//! the same source never has two concurrent runs; a due source whose
//! previous run is still in flight is skipped this tick and re-evaluated
//! next tick.

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::backoff::reschedule_delay;
use crate::config::EngineConfig;
use crate::executor::{CancelFlag, RunExecutor};
use crate::models::{RunStatus, Schedule, SourceConfig, SyncMode, SyncRun, Trigger};
use crate::store::Store;

/// Pure dueness check: enabled source, enabled schedule, not in flight,
/// and either a queued manual trigger or `next_run <= now`.
pub fn due_sources(
    now: DateTime<Utc>,
    entries: &[(SourceConfig, Schedule)],
    in_flight: &HashSet<String>,
) -> Vec<(SourceConfig, Schedule)> {
    entries
        .iter()
        .filter(|(config, schedule)| {
            if !config.enabled || !schedule.enabled || in_flight.contains(&config.source_id) {
                return false;
            }
            if schedule.manual_requested {
                return true;
            }
            match &schedule.trigger {
                Trigger::Manual => false,
                Trigger::IntervalMinutes(_) | Trigger::Cron(_) => {
                    schedule.next_run.is_some_and(|next| next <= now)
                }
            }
        })
        .cloned()
        .collect()
}

/// Next scheduled run time after a run finished at `now`.
///
/// Success reschedules at the trigger's own cadence. Failure backs off:
/// `min(interval, base * 2^consecutive_failures)` bounded by the ceiling,
/// so a degraded source is not hammered. Manual-only schedules have no
/// next run.
pub fn next_run_after(
    trigger: &Trigger,
    now: DateTime<Utc>,
    consecutive_failures: u32,
    engine: &EngineConfig,
) -> Option<DateTime<Utc>> {
    let interval = match trigger {
        Trigger::Manual => return None,
        Trigger::IntervalMinutes(m) => Duration::from_secs((*m).max(1) as u64 * 60),
        Trigger::Cron(expr) => {
            let next = cron::Schedule::from_str(expr)
                .ok()
                .and_then(|s| s.after(&now).next())?;
            if consecutive_failures == 0 {
                return Some(next);
            }
            (next - now).to_std().unwrap_or(Duration::from_secs(60))
        }
    };

    if consecutive_failures == 0 {
        return Some(now + ChronoDuration::from_std(interval).unwrap_or(ChronoDuration::minutes(1)));
    }

    let delay = reschedule_delay(
        interval,
        engine.base_backoff(),
        engine.max_backoff(),
        consecutive_failures,
    );
    Some(now + ChronoDuration::from_std(delay).unwrap_or(ChronoDuration::minutes(1)))
}

pub struct Scheduler {
    store: Store,
    executor: Arc<RunExecutor>,
    engine: EngineConfig,
    in_flight: Arc<Mutex<HashSet<String>>>,
    permits: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(store: Store, executor: Arc<RunExecutor>, engine: EngineConfig) -> Self {
        let permits = Arc::new(Semaphore::new(engine.max_concurrent_syncs));
        Self {
            store,
            executor,
            engine,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            permits,
        }
    }

    /// One scheduling tick: evaluate every source against `now`, dispatch
    /// executors for the due ones under the concurrency cap, wait for all
    /// dispatched runs to reach a terminal state, and return them.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<SyncRun>> {
        let entries = self.store.list_sources().await?;

        let due = {
            let in_flight = self.in_flight.lock().expect("in_flight lock poisoned");
            due_sources(now, &entries, &in_flight)
        };

        let mut join_set: JoinSet<Option<SyncRun>> = JoinSet::new();

        for (source, schedule) in due {
            // Claim per-source exclusion before spawning; a claim that
            // fails means another tick got there first.
            let claimed = self
                .in_flight
                .lock()
                .expect("in_flight lock poisoned")
                .insert(source.source_id.clone());
            if !claimed {
                debug!(source_id = %source.source_id, "previous run still in flight; skipping");
                continue;
            }

            let store = self.store.clone();
            let executor = Arc::clone(&self.executor);
            let engine = self.engine.clone();
            let in_flight = Arc::clone(&self.in_flight);
            let permits = Arc::clone(&self.permits);

            join_set.spawn(async move {
                let _permit = match permits.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        in_flight
                            .lock()
                            .expect("in_flight lock poisoned")
                            .remove(&source.source_id);
                        return None;
                    }
                };

                let run = executor.execute(&source, &schedule, CancelFlag::new()).await;

                let dispatched_at = Utc::now();
                if let Err(e) =
                    record_outcome(&store, &schedule, &run, dispatched_at, &engine).await
                {
                    warn!(source_id = %source.source_id, error = %e, "failed to update schedule");
                }

                in_flight
                    .lock()
                    .expect("in_flight lock poisoned")
                    .remove(&source.source_id);
                Some(run)
            });
        }

        let mut runs = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Some(run)) => runs.push(run),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "sync task panicked"),
            }
        }
        Ok(runs)
    }

    /// Execute one source immediately, outside its schedule, still under
    /// the per-source exclusion and the global cap. Returns `None` when a
    /// run for this source is already in flight.
    pub async fn run_now(
        &self,
        source_id: &str,
        mode_override: Option<SyncMode>,
    ) -> Result<Option<SyncRun>> {
        let Some((mut source, schedule)) = self.store.get_source(source_id).await? else {
            anyhow::bail!("unknown source: '{}'", source_id);
        };
        if let Some(mode) = mode_override {
            source.sync_mode = mode;
        }

        let claimed = self
            .in_flight
            .lock()
            .expect("in_flight lock poisoned")
            .insert(source.source_id.clone());
        if !claimed {
            return Ok(None);
        }

        let result = async {
            let _permit = self.permits.acquire().await?;
            let run = self.executor.execute(&source, &schedule, CancelFlag::new()).await;
            record_outcome(&self.store, &schedule, &run, Utc::now(), &self.engine).await?;
            Ok::<SyncRun, anyhow::Error>(run)
        }
        .await;

        self.in_flight
            .lock()
            .expect("in_flight lock poisoned")
            .remove(source_id);

        result.map(Some)
    }

    /// Snapshot of source ids currently being synced.
    pub fn in_flight(&self) -> HashSet<String> {
        self.in_flight
            .lock()
            .expect("in_flight lock poisoned")
            .clone()
    }
}

/// Single read-modify-write of the schedule after a run: bump counters,
/// stamp `last_run`, compute `next_run`. The dispatch-time
/// `manual_requested` snapshot rides along so the store clears the flag
/// only when this dispatch consumed it.
async fn record_outcome(
    store: &Store,
    schedule: &Schedule,
    run: &SyncRun,
    now: DateTime<Utc>,
    engine: &EngineConfig,
) -> Result<()> {
    let mut updated = schedule.clone();
    updated.last_run = Some(now);
    updated.run_count += 1;

    match run.status {
        RunStatus::Completed => {
            updated.success_count += 1;
            updated.consecutive_failures = 0;
        }
        RunStatus::Failed => {
            updated.failure_count += 1;
            updated.consecutive_failures = updated.consecutive_failures.saturating_add(1);
        }
        // Cancellation is operator-driven, not a source failure.
        _ => {}
    }

    updated.next_run = next_run_after(
        &updated.trigger,
        now,
        updated.consecutive_failures,
        engine,
    );

    store.update_schedule_after_run(&updated).await
}

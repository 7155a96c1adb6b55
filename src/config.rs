use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::models::{ConflictPolicy, SourceConfig, SourceType, SyncMode, Trigger};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceEntry>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Engine-wide knobs shared by the scheduler and executor.
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Global cap on concurrently running source syncs.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_syncs: usize,
    /// Base delay for rescheduling a source after a failed run.
    #[serde(default = "default_base_backoff_secs")]
    pub base_backoff_secs: u64,
    /// Ceiling on the reschedule backoff.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    /// Base delay for in-run batch retries.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Ceiling on in-run batch retry delays.
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
    #[serde(default = "default_batch_size")]
    pub default_batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_syncs: default_max_concurrent(),
            base_backoff_secs: default_base_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
            default_batch_size: default_batch_size(),
        }
    }
}

impl EngineConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_secs(self.base_backoff_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }
}

fn default_max_concurrent() -> usize {
    4
}
fn default_base_backoff_secs() -> u64 {
    60
}
fn default_max_backoff_secs() -> u64 {
    3600
}
fn default_retry_base_ms() -> u64 {
    500
}
fn default_retry_max_ms() -> u64 {
    60_000
}
fn default_batch_size() -> usize {
    200
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_minutes() -> i64 {
    30
}

/// One `[sources.<id>]` entry in the TOML config.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceEntry {
    pub source_type: SourceType,
    pub name: String,
    #[serde(default)]
    pub connection: serde_json::Value,
    #[serde(default = "default_sync_mode")]
    pub sync_mode: SyncMode,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub table_filter: Vec<String>,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Exactly one of `interval_minutes` / `cron` may be set; neither
    /// means the source is manual-only.
    #[serde(default)]
    pub interval_minutes: Option<i64>,
    #[serde(default)]
    pub cron: Option<String>,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: i64,
}

fn default_sync_mode() -> SyncMode {
    SyncMode::Incremental
}
fn default_enabled() -> bool {
    true
}

impl SourceEntry {
    pub fn trigger(&self) -> Trigger {
        match (&self.interval_minutes, &self.cron) {
            (Some(m), _) => Trigger::IntervalMinutes(*m),
            (None, Some(expr)) => Trigger::Cron(expr.clone()),
            (None, None) => Trigger::Manual,
        }
    }

    pub fn to_source_config(&self, source_id: &str, default_batch: usize) -> SourceConfig {
        SourceConfig {
            source_id: source_id.to_string(),
            source_type: self.source_type,
            source_name: self.name.clone(),
            connection: self.connection.clone(),
            sync_mode: self.sync_mode,
            batch_size: self.batch_size.unwrap_or(default_batch),
            table_filter: self.table_filter.clone(),
            conflict_policy: self.conflict_policy,
            enabled: self.enabled,
            health: crate::models::HealthStatus::Unknown,
            health_checked_at: None,
        }
    }
}

impl Config {
    /// Minimal config for commands that can run without a config file.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/ssync.sqlite"),
            },
            engine: EngineConfig::default(),
            sources: BTreeMap::new(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.engine.max_concurrent_syncs == 0 {
        anyhow::bail!("engine.max_concurrent_syncs must be > 0");
    }

    if config.engine.default_batch_size == 0 {
        anyhow::bail!("engine.default_batch_size must be > 0");
    }

    if config.engine.base_backoff_secs > config.engine.max_backoff_secs {
        anyhow::bail!("engine.base_backoff_secs must be <= engine.max_backoff_secs");
    }

    for (source_id, entry) in &config.sources {
        if source_id.is_empty() {
            anyhow::bail!("source ids must not be empty");
        }
        if entry.interval_minutes.is_some() && entry.cron.is_some() {
            anyhow::bail!(
                "source '{}': interval_minutes and cron are mutually exclusive",
                source_id
            );
        }
        if let Some(m) = entry.interval_minutes {
            if m <= 0 {
                anyhow::bail!("source '{}': interval_minutes must be > 0", source_id);
            }
        }
        if let Some(expr) = &entry.cron {
            cron::Schedule::from_str(expr).with_context(|| {
                format!("source '{}': invalid cron expression '{}'", source_id, expr)
            })?;
        }
        if entry.batch_size == Some(0) {
            anyhow::bail!("source '{}': batch_size must be > 0", source_id);
        }
        if entry.timeout_minutes <= 0 {
            anyhow::bail!("source '{}': timeout_minutes must be > 0", source_id);
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(body: &str) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ssync.toml");
        std::fs::write(&path, body).unwrap();
        (tmp, path)
    }

    #[test]
    fn test_load_minimal_config() {
        let (_tmp, path) = write_config(
            r#"[db]
path = "./data/ssync.sqlite"
"#,
        );
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.engine.max_concurrent_syncs, 4);
        assert!(cfg.sources.is_empty());
    }

    #[test]
    fn test_source_entry_trigger_kinds() {
        let (_tmp, path) = write_config(
            r#"[db]
path = "./data/ssync.sqlite"

[sources.jira_main]
source_type = "issue_tracker"
name = "Main Jira"
interval_minutes = 60

[sources.wiki]
source_type = "wiki"
name = "Team wiki"
cron = "0 0 * * * *"

[sources.drops]
source_type = "filesystem"
name = "Local drops"
"#,
        );
        let cfg = load_config(&path).unwrap();
        assert_eq!(
            cfg.sources["jira_main"].trigger(),
            Trigger::IntervalMinutes(60)
        );
        assert!(matches!(cfg.sources["wiki"].trigger(), Trigger::Cron(_)));
        assert_eq!(cfg.sources["drops"].trigger(), Trigger::Manual);
    }

    #[test]
    fn test_interval_and_cron_mutually_exclusive() {
        let (_tmp, path) = write_config(
            r#"[db]
path = "./data/ssync.sqlite"

[sources.bad]
source_type = "wiki"
name = "Bad"
interval_minutes = 5
cron = "0 0 * * * *"
"#,
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_invalid_cron_rejected() {
        let (_tmp, path) = write_config(
            r#"[db]
path = "./data/ssync.sqlite"

[sources.bad]
source_type = "wiki"
name = "Bad"
cron = "not a cron"
"#,
        );
        assert!(load_config(&path).is_err());
    }
}

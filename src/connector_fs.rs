//! Built-in filesystem connector.
//!
//! Treats a directory tree as a source of documents: each matching file is
//! one record, keyed by its path relative to the configured root, with the
//! file mtime as the watermark axis.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::connector::{Connector, RecordStream, VecRecordStream};
use crate::error::ConnectorError;
use crate::models::{RawRecord, SourceConfig, SourceType};

/// Connection blob shape for `source_type = "filesystem"`.
#[derive(Debug, Deserialize)]
struct FsConnection {
    root: PathBuf,
    #[serde(default = "default_include_globs")]
    include_globs: Vec<String>,
    #[serde(default)]
    exclude_globs: Vec<String>,
    #[serde(default)]
    follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

pub struct FilesystemConnector;

impl FilesystemConnector {
    pub fn new() -> Self {
        Self
    }

    fn connection(source: &SourceConfig) -> Result<FsConnection, ConnectorError> {
        serde_json::from_value(source.connection.clone()).map_err(|e| {
            ConnectorError::Terminal(format!(
                "invalid filesystem connection for '{}': {}",
                source.source_id, e
            ))
        })
    }
}

impl Default for FilesystemConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for FilesystemConnector {
    fn source_type(&self) -> SourceType {
        SourceType::Filesystem
    }

    async fn pull(
        &self,
        source: &SourceConfig,
        watermark: Option<&str>,
    ) -> Result<Box<dyn RecordStream>, ConnectorError> {
        let conn = Self::connection(source)?;
        if !conn.root.exists() {
            return Err(ConnectorError::Terminal(format!(
                "filesystem root does not exist: {}",
                conn.root.display()
            )));
        }

        let since: Option<i64> = watermark.and_then(|w| w.parse::<i64>().ok());

        let include_set = build_globset(&conn.include_globs)?;
        let mut default_excludes = vec![
            "**/.git/**".to_string(),
            "**/target/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        default_excludes.extend(conn.exclude_globs.clone());
        let exclude_set = build_globset(&default_excludes)?;

        let mut records = Vec::new();
        let mut max_mtime: i64 = since.unwrap_or(0);

        let walker = WalkDir::new(&conn.root).follow_links(conn.follow_symlinks);
        for entry in walker {
            let entry = entry
                .map_err(|e| ConnectorError::Transient(format!("walk error: {}", e)))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&conn.root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_string();

            if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
                continue;
            }

            let (record, mtime) = file_to_record(path, &rel_str)
                .map_err(|e| ConnectorError::Transient(format!("read {}: {}", rel_str, e)))?;

            if mtime > max_mtime {
                max_mtime = mtime;
            }
            if let Some(cutoff) = since {
                if mtime <= cutoff {
                    continue;
                }
            }
            records.push(record);
        }

        // Strict watermark order within one source: mtime, path as tiebreak.
        records.sort_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then_with(|| a.key.cmp(&b.key))
        });

        Ok(Box::new(VecRecordStream::new(records, max_mtime.to_string())))
    }

    async fn health_check(&self, source: &SourceConfig) -> (bool, String) {
        match Self::connection(source) {
            Ok(conn) if conn.root.exists() => (true, format!("root: {}", conn.root.display())),
            Ok(conn) => (false, format!("root does not exist: {}", conn.root.display())),
            Err(e) => (false, e.to_string()),
        }
    }
}

fn file_to_record(path: &Path, relative_path: &str) -> anyhow::Result<(RawRecord, i64)> {
    let metadata = std::fs::metadata(path)?;
    let modified = metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
    let modified_secs = modified
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    let body = std::fs::read_to_string(path).unwrap_or_default();
    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let updated_at: DateTime<Utc> = Utc
        .timestamp_opt(modified_secs, 0)
        .single()
        .unwrap_or_else(Utc::now);

    let record = RawRecord {
        key: relative_path.to_string(),
        payload: json!({
            "title": title,
            "body": body,
            "path": relative_path,
            "url": format!("file://{}", path.display()),
        }),
        updated_at,
    };

    Ok((record, modified_secs))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, ConnectorError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| ConnectorError::Terminal(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| ConnectorError::Terminal(format!("glob set: {}", e)))
}

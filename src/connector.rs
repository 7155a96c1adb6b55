//! Connector seam between the engine and external systems.
//!
//! One [`Connector`] implementation exists per source type (issue tracker,
//! wiki, code host, filesystem, analytical DB). The registry binds a
//! concrete connector to each [`SourceType`] at construction time; the
//! engine never inspects source types at runtime beyond that lookup.
//!
//! A pull is a lazy, finite sequence of [`RecordBatch`]es in strict
//! watermark order. Every batch carries the watermark reached after
//! consuming it, which is what the executor commits alongside the batch.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ConnectorError;
use crate::models::{RawRecord, SourceConfig, SourceType, TableSchema};

/// One batch of raw records plus the watermark reached after it.
#[derive(Debug, Clone)]
pub struct RecordBatch {
    pub records: Vec<RawRecord>,
    pub watermark: String,
}

/// Lazy, ordered sequence of record batches for one pull.
#[async_trait]
pub trait RecordStream: Send {
    /// Next batch of records, sized by `max`, or `None` when the source is
    /// exhausted. Batches arrive in strict watermark order, and a batch may
    /// run past `max` rather than end on a watermark position that an
    /// unconsumed record still shares: the committed watermark must never
    /// tie with a record the stream has yet to yield, or a resumed pull
    /// (which filters strictly newer) would skip it.
    async fn next_batch(&mut self, max: usize) -> Result<Option<RecordBatch>, ConnectorError>;
}

/// A data source connector.
///
/// Implementations fetch raw records from one kind of external system.
/// They classify their own failures: [`ConnectorError::Transient`] for
/// conditions worth retrying (timeouts, rate limits, connection resets)
/// and [`ConnectorError::Terminal`] for conditions that cannot succeed on
/// retry (auth rejected, source not found).
#[async_trait]
pub trait Connector: Send + Sync {
    fn source_type(&self) -> SourceType;

    /// Open a pull starting just after `watermark` (`None` = from the
    /// beginning). The stream yields records strictly newer than the
    /// watermark.
    async fn pull(
        &self,
        source: &SourceConfig,
        watermark: Option<&str>,
    ) -> Result<Box<dyn RecordStream>, ConnectorError>;

    /// Live structure of the source's tables, for schema tracking.
    ///
    /// Connectors without schema introspection return an empty vec; the
    /// tracker degrades to a skip with a logged warning, never an error.
    async fn describe(&self, _source: &SourceConfig) -> Result<Vec<TableSchema>, ConnectorError> {
        Ok(Vec::new())
    }

    /// Cheap reachability probe. Returns `(healthy, details)`.
    async fn health_check(&self, source: &SourceConfig) -> (bool, String);
}

/// Registry binding connectors to source types.
pub struct ConnectorRegistry {
    connectors: HashMap<SourceType, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self {
            connectors: HashMap::new(),
        }
    }

    /// Registry pre-loaded with the built-in connectors.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::connector_fs::FilesystemConnector::new()));
        registry
    }

    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        self.connectors.insert(connector.source_type(), connector);
    }

    pub fn get(&self, source_type: SourceType) -> Option<Arc<dyn Connector>> {
        self.connectors.get(&source_type).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory stream over pre-collected records, batched on demand.
/// Connectors that scan eagerly (filesystem) wrap their results in this.
pub struct VecRecordStream {
    records: Vec<RawRecord>,
    position: usize,
    final_watermark: String,
}

impl VecRecordStream {
    /// `records` must already be sorted in watermark order.
    pub fn new(records: Vec<RawRecord>, final_watermark: String) -> Self {
        Self {
            records,
            position: 0,
            final_watermark,
        }
    }
}

#[async_trait]
impl RecordStream for VecRecordStream {
    async fn next_batch(&mut self, max: usize) -> Result<Option<RecordBatch>, ConnectorError> {
        if self.position >= self.records.len() {
            return Ok(None);
        }
        let mut end = (self.position + max.max(1)).min(self.records.len());
        // Never end a batch inside a run of equal timestamps. The batch
        // watermark is the last record's timestamp; if an unconsumed
        // record shared it, a crash-resumed pull would filter it out.
        while end < self.records.len()
            && self.records[end].updated_at == self.records[end - 1].updated_at
        {
            end += 1;
        }
        let records: Vec<RawRecord> = self.records[self.position..end].to_vec();
        self.position = end;

        // Watermark after this batch: the last record's timestamp, or the
        // stream's final watermark once everything is consumed.
        let watermark = if self.position >= self.records.len() {
            self.final_watermark.clone()
        } else {
            records
                .last()
                .map(|r| r.updated_at.timestamp().to_string())
                .unwrap_or_else(|| self.final_watermark.clone())
        };

        Ok(Some(RecordBatch { records, watermark }))
    }
}

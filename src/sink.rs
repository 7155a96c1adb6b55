//! Indexing sink seam.
//!
//! The engine publishes every applied document to a sink for downstream
//! search and generation. The sink is opaque to the core; failures are
//! retried with the same policy as transient connector errors.

use async_trait::async_trait;

use crate::error::SinkError;
use crate::models::NormalizedDocument;

#[async_trait]
pub trait IndexSink: Send + Sync {
    async fn publish(&self, doc: &NormalizedDocument) -> Result<(), SinkError>;
    async fn delete(&self, document_id: &str) -> Result<(), SinkError>;
}

/// Default sink: logs and accepts everything. Stands in until a real
/// embedding/indexing backend is wired up.
pub struct LogSink;

#[async_trait]
impl IndexSink for LogSink {
    async fn publish(&self, doc: &NormalizedDocument) -> Result<(), SinkError> {
        tracing::debug!(
            source_id = %doc.source_id,
            record_key = %doc.record_key,
            "sink publish"
        );
        Ok(())
    }

    async fn delete(&self, document_id: &str) -> Result<(), SinkError> {
        tracing::debug!(document_id = %document_id, "sink delete");
        Ok(())
    }
}

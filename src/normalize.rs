//! Normalization of raw connector records into the canonical document shape.
//!
//! Normalization failures are per-record errors: the record is skipped and
//! counted on the run, never escalated.

use sha2::{Digest, Sha256};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{NormalizedDocument, RawRecord, SourceConfig};

#[derive(Debug)]
pub struct NormalizeError(pub String);

impl std::fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Map a raw record to the canonical document shape.
pub fn normalize(source: &SourceConfig, record: &RawRecord) -> Result<NormalizedDocument, NormalizeError> {
    if record.key.trim().is_empty() {
        return Err(NormalizeError("record has an empty key".to_string()));
    }

    let fields = match &record.payload {
        Value::Object(_) => record.payload.clone(),
        other => {
            return Err(NormalizeError(format!(
                "payload is not a JSON object (got {})",
                json_type_name(other)
            )))
        }
    };

    let title = fields
        .get("title")
        .or_else(|| fields.get("name"))
        .or_else(|| fields.get("summary"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    // Body comes from a conventional field when present; otherwise the
    // record is text-less and the serialized fields stand in.
    let body = fields
        .get("body")
        .or_else(|| fields.get("content"))
        .or_else(|| fields.get("text"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| fields.to_string());

    let content_hash = content_hash(&record.key, &body, &fields);

    Ok(NormalizedDocument {
        document_id: Uuid::new_v4().to_string(),
        source_id: source.source_id.clone(),
        record_key: record.key.clone(),
        title,
        body,
        fields,
        content_hash,
        updated_at: record.updated_at,
    })
}

pub fn content_hash(key: &str, body: &str, fields: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update(body.as_bytes());
    hasher.update(fields.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

//! Conflict resolution between local and remote versions of a record.
//!
//! Resolution is pure: given both versions and a policy, it decides what
//! to apply and whether to persist a [`Conflict`] row. Automatic policies
//! resolve synchronously; `manual` leaves the local value standing and a
//! pending conflict for follow-up. Duplicate keys always escalate to
//! manual — automatic resolution there risks silent data loss.
//!
//! `auto_merge` semantics: a shallow field-level merge. Every top-level
//! field present in the remote record overwrites the local value; fields
//! only the local version has are retained. Title and body are re-derived
//! from the merged field set.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::{
    Conflict, ConflictPolicy, ConflictType, NormalizedDocument, ResolutionMethod,
    ResolutionStatus, StoredDocument,
};
use crate::normalize::content_hash;

/// What the executor should do with the remote version.
#[derive(Debug)]
pub enum Resolution {
    /// Persist the remote version as-is.
    ApplyRemote,
    /// Persist this merged document instead.
    ApplyMerged(Box<NormalizedDocument>),
    /// Leave the stored local version untouched.
    KeepLocal,
}

/// Resolve a disagreement between a stored local document and an incoming
/// remote version.
pub fn resolve(
    local: &StoredDocument,
    remote: &NormalizedDocument,
    policy: ConflictPolicy,
    run_id: &str,
    now: DateTime<Utc>,
) -> (Resolution, Option<Conflict>) {
    match policy {
        ConflictPolicy::PreferRemote => (Resolution::ApplyRemote, None),
        ConflictPolicy::PreferLocal => (Resolution::KeepLocal, None),
        ConflictPolicy::AutoMerge => {
            let merged = merge(local, remote);
            let conflict = Conflict {
                conflict_id: Uuid::new_v4().to_string(),
                run_id: run_id.to_string(),
                source_id: remote.source_id.clone(),
                record_key: remote.record_key.clone(),
                conflict_type: ConflictType::DataConflict,
                local: document_value(local),
                remote: normalized_value(remote),
                resolution_status: ResolutionStatus::Resolved,
                resolution_method: Some(ResolutionMethod::AutoMerge),
                detected_at: now,
                resolved_at: Some(now),
            };
            (Resolution::ApplyMerged(Box::new(merged)), Some(conflict))
        }
        ConflictPolicy::Manual => {
            let conflict = Conflict {
                conflict_id: Uuid::new_v4().to_string(),
                run_id: run_id.to_string(),
                source_id: remote.source_id.clone(),
                record_key: remote.record_key.clone(),
                conflict_type: ConflictType::DataConflict,
                local: document_value(local),
                remote: normalized_value(remote),
                resolution_status: ResolutionStatus::Pending,
                resolution_method: Some(ResolutionMethod::Manual),
                detected_at: now,
                resolved_at: None,
            };
            (Resolution::KeepLocal, Some(conflict))
        }
    }
}

/// Conflict for two remote records in one run mapping to the same local
/// key. Always pending/manual regardless of the configured policy.
pub fn duplicate_key(
    first: &NormalizedDocument,
    second: &NormalizedDocument,
    run_id: &str,
    now: DateTime<Utc>,
) -> Conflict {
    Conflict {
        conflict_id: Uuid::new_v4().to_string(),
        run_id: run_id.to_string(),
        source_id: second.source_id.clone(),
        record_key: second.record_key.clone(),
        conflict_type: ConflictType::DuplicateKey,
        local: normalized_value(first),
        remote: normalized_value(second),
        resolution_status: ResolutionStatus::Pending,
        resolution_method: Some(ResolutionMethod::Manual),
        detected_at: now,
        resolved_at: None,
    }
}

/// Audit row for a detected schema drift on one table.
pub fn schema_change(
    source_id: &str,
    table_name: &str,
    old_fingerprint: Option<&str>,
    new_fingerprint: &str,
    run_id: &str,
    now: DateTime<Utc>,
) -> Conflict {
    Conflict {
        conflict_id: Uuid::new_v4().to_string(),
        run_id: run_id.to_string(),
        source_id: source_id.to_string(),
        record_key: table_name.to_string(),
        conflict_type: ConflictType::SchemaChange,
        local: json!({ "fingerprint": old_fingerprint }),
        remote: json!({ "fingerprint": new_fingerprint }),
        resolution_status: ResolutionStatus::Resolved,
        resolution_method: None,
        detected_at: now,
        resolved_at: Some(now),
    }
}

fn merge(local: &StoredDocument, remote: &NormalizedDocument) -> NormalizedDocument {
    let mut fields = match &local.fields {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    if let Value::Object(remote_fields) = &remote.fields {
        for (k, v) in remote_fields {
            fields.insert(k.clone(), v.clone());
        }
    }
    let fields = Value::Object(fields);

    let title = fields
        .get("title")
        .or_else(|| fields.get("name"))
        .or_else(|| fields.get("summary"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .or_else(|| remote.title.clone())
        .or_else(|| local.title.clone());

    let body = fields
        .get("body")
        .or_else(|| fields.get("content"))
        .or_else(|| fields.get("text"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| remote.body.clone());

    let content_hash = content_hash(&remote.record_key, &body, &fields);

    NormalizedDocument {
        // Keep the existing document identity; a merge is an update.
        document_id: local.document_id.clone(),
        source_id: remote.source_id.clone(),
        record_key: remote.record_key.clone(),
        title,
        body,
        fields,
        content_hash,
        updated_at: remote.updated_at,
    }
}

fn document_value(doc: &StoredDocument) -> Value {
    json!({
        "title": doc.title,
        "body": doc.body,
        "fields": doc.fields,
        "content_hash": doc.content_hash,
    })
}

fn normalized_value(doc: &NormalizedDocument) -> Value {
    json!({
        "title": doc.title,
        "body": doc.body,
        "fields": doc.fields,
        "content_hash": doc.content_hash,
    })
}

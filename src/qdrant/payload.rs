//! Helpers for constructing Qdrant point ids and payloads.

use crate::vector_index::IndexEntry;
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use uuid::Uuid;

/// Qdrant only accepts UUIDs or integers as point ids, so chunk ids are mapped onto a
/// name-based UUID. The mapping is deterministic, which keeps upserts idempotent.
pub(crate) fn point_id(chunk_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, chunk_id.as_bytes()).to_string()
}

/// Build the payload object stored alongside each indexed chunk.
pub(crate) fn build_payload(entry: &IndexEntry, timestamp_rfc3339: &str) -> Value {
    json!({
        "chunk_id": entry.id,
        "document_id": entry.document_id,
        "ordinal": entry.ordinal,
        "text": entry.text,
        "indexed_at": timestamp_rfc3339,
    })
}

/// Serialize an entry into the point shape accepted by `PUT /points`.
pub(crate) fn build_point(entry: &IndexEntry, timestamp_rfc3339: &str) -> Value {
    json!({
        "id": point_id(&entry.id),
        "vector": entry.vector,
        "payload": build_payload(entry, timestamp_rfc3339),
    })
}

/// Filter limiting a query to the chunks of one document.
pub(crate) fn document_filter(document_id: &str) -> Value {
    json!({
        "must": [
            { "key": "document_id", "match": { "value": document_id } }
        ]
    })
}

/// Pull the chunk text, id, and ordinal back out of a stored payload.
pub(crate) fn read_payload(payload: &Map<String, Value>) -> Option<(String, String, u64)> {
    let text = payload.get("text")?.as_str()?.to_string();
    let chunk_id = payload
        .get("chunk_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let ordinal = payload
        .get("ordinal")
        .and_then(Value::as_u64)
        .unwrap_or(u64::MAX);
    Some((text, chunk_id, ordinal))
}

/// Current timestamp formatted for payload storage.
pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

//! Persisted fact rows and the fact ⇄ row codec.
//!
//! Domain facts are adjacently tagged enums (`"type"` + `"data"`); the
//! codec splits the tag into [`FactEntry::kind`] and keeps the `"data"`
//! portion as the structured payload, then reassembles the tagged object
//! on the way back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fact::FactKind;

/// A persisted fact row as the fact log stores it.
///
/// `(stream_id, version)` is globally unique; a violated insert is the
/// version race the append protocol reports back on the fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactEntry {
    /// Fact kind tag.
    pub kind: String,
    /// Logical entity this fact belongs to.
    pub stream_id: String,
    /// Position in the stream: positive, strictly increasing, gapless.
    pub version: u64,
    /// Structured field map (the `"data"` portion of the tagged fact).
    pub payload: Value,
    /// Contextual attribute map captured at persist time, when non-empty.
    pub meta: Option<Value>,
    /// When the system recorded this fact (knowledge-time axis).
    pub recorded_at: DateTime<Utc>,
    /// When the fact took effect in the modeled world (validity-time
    /// axis). Defaults to `recorded_at` when not supplied.
    pub occurred_at: DateTime<Utc>,
}

/// A row proposed for insertion; the log assigns `recorded_at`.
#[derive(Debug, Clone)]
pub struct NewFactEntry {
    /// Fact kind tag.
    pub kind: String,
    /// Logical entity this fact belongs to.
    pub stream_id: String,
    /// Version the writer computed from its cached view.
    pub version: u64,
    /// Structured field map.
    pub payload: Value,
    /// Contextual attribute map, when non-empty.
    pub meta: Option<Value>,
    /// Resolved actual time; `None` defaults to the assigned
    /// `recorded_at`.
    pub occurred_at: Option<DateTime<Utc>>,
}

/// Split a domain fact into its kind tag and payload.
///
/// Because of adjacent tagging this serializes to an object like
/// `{"type": "debt.paid", "data": {...}}` or `{"type": "..."}` for
/// fieldless variants; the payload is `Null` in the latter case.
///
/// # Errors
///
/// Returns `serde_json::Error` if the fact cannot be serialized.
pub(crate) fn encode_fact<E: FactKind>(fact: &E) -> serde_json::Result<(String, Value)> {
    let value = serde_json::to_value(fact)?;
    let obj = value
        .as_object()
        .expect("adjacently tagged enum must serialize to a JSON object");

    let kind = obj["type"]
        .as_str()
        .expect("adjacently tagged enum must have a string 'type' field")
        .to_string();

    // Data may be absent for fieldless variants.
    let payload = obj.get("data").cloned().unwrap_or(Value::Null);

    Ok((kind, payload))
}

/// Rebuild a typed domain fact from a persisted row.
///
/// Reconstructs the tagged JSON object from the entry's kind and payload
/// and deserializes it. Returns `None` when the row's kind is unknown to
/// `E` or its payload no longer matches - callers skip such rows, which
/// keeps old logs readable by newer fact enums.
pub(crate) fn decode_entry<E: FactKind>(entry: &FactEntry) -> Option<E> {
    let tagged = if entry.payload.is_null() {
        serde_json::json!({ "type": entry.kind })
    } else {
        serde_json::json!({ "type": entry.kind, "data": entry.payload })
    };

    serde_json::from_value(tagged).ok()
}

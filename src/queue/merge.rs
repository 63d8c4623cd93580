//! Type-specific merges for 409 responses under the merge policy.
//!
//! - votes: the later `timestamp` wins outright
//! - profile, match and preference edits: field-level overwrite by recency,
//!   using `fieldTimestamps` when present and `updatedAt` otherwise
//! - everything else: shallow merge of the local fields over the server copy

use chrono::DateTime;
use serde_json::{Map, Value};

use super::action::ActionKind;

/// Result of merging a rejected mutation with the server's current value.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeDecision {
    /// Send this merged payload again
    Resend(Value),
    /// Server already holds a newer value; nothing to send
    Superseded(Value),
}

pub fn merge_for_conflict(kind: ActionKind, local: &Value, server: &Value) -> MergeDecision {
    match kind {
        ActionKind::VoteSubmit => latest_timestamp_wins(local, server),
        ActionKind::ProfileUpdate | ActionKind::MatchUpdate | ActionKind::PreferenceUpdate => {
            MergeDecision::Resend(field_merge(local, server))
        }
        _ => MergeDecision::Resend(shallow_merge(server, local)),
    }
}

fn latest_timestamp_wins(local: &Value, server: &Value) -> MergeDecision {
    match (timestamp_of(local, "timestamp"), timestamp_of(server, "timestamp")) {
        (Some(l), Some(s)) if s > l => MergeDecision::Superseded(server.clone()),
        _ => MergeDecision::Resend(local.clone()),
    }
}

/// Copy `overlay`'s top-level fields over `base`. Non-objects: overlay wins.
#[must_use]
pub fn shallow_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(b), Value::Object(o)) => {
            let mut merged = b.clone();
            for (k, v) in o {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        (_, overlay) if overlay.is_null() => base.clone(),
        (_, overlay) => overlay.clone(),
    }
}

/// Per field, keep whichever side changed it last. Ties go to `local`.
#[must_use]
pub fn field_merge(local: &Value, server: &Value) -> Value {
    let (Value::Object(l), Value::Object(s)) = (local, server) else {
        return shallow_merge(server, local);
    };

    let local_record_ts = timestamp_of(local, "updatedAt");
    let server_record_ts = timestamp_of(server, "updatedAt");
    let local_fields = l.get("fieldTimestamps").and_then(Value::as_object);
    let server_fields = s.get("fieldTimestamps").and_then(Value::as_object);

    let field_ts = |fields: Option<&Map<String, Value>>, record: Option<f64>, key: &str| {
        fields
            .and_then(|f| f.get(key))
            .and_then(as_timestamp)
            .or(record)
    };

    let mut merged = s.clone();
    let mut merged_fields = server_fields.cloned().unwrap_or_default();

    for (key, value) in l {
        if key == "fieldTimestamps" || key == "updatedAt" {
            continue;
        }
        let local_ts = field_ts(local_fields, local_record_ts, key);
        let server_ts = field_ts(server_fields, server_record_ts, key);
        let local_is_newer = match (local_ts, server_ts) {
            (Some(l), Some(s)) => l >= s,
            (None, Some(_)) => !s.contains_key(key),
            _ => true,
        };
        if local_is_newer {
            merged.insert(key.clone(), value.clone());
            if let Some(ts) = local_fields.and_then(|f| f.get(key)) {
                merged_fields.insert(key.clone(), ts.clone());
            }
        }
    }

    let newest = match (local_record_ts, server_record_ts) {
        (Some(l), Some(s)) if l > s => local.get("updatedAt"),
        _ => None,
    };
    if let Some(ts) = newest {
        merged.insert("updatedAt".into(), ts.clone());
    }
    if !merged_fields.is_empty() {
        merged.insert("fieldTimestamps".into(), Value::Object(merged_fields));
    }
    Value::Object(merged)
}

fn timestamp_of(value: &Value, field: &str) -> Option<f64> {
    value.get(field).and_then(as_timestamp)
}

/// Epoch numbers (millis) as given; strings as RFC 3339, offset-aware.
/// Anything else, including unparseable strings, has no timestamp.
fn as_timestamp(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis() as f64),
        _ => None,
    }
}

//! Resource-specific conflict heuristics.
//!
//! Fetched data is compared against the cached copy before it may replace
//! it. Each resource family has its own notion of "too different":
//!
//! - votes: the same logical vote (by `id`, else `matchId` + `voterId`)
//!   carries a different `timestamp`
//! - stats: a numeric field drifts by more than a relative tolerance
//! - players: the `overall` rating drifts by more than an absolute tolerance
//!
//! Other resources never conflict. Records are matched by key; records that
//! exist on one side only are additions, not conflicts. Thresholds come from
//! [`ConflictTolerances`].

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::config::ConflictTolerances;

/// Describe the first disagreement between `cached` and `fetched`, if any.
#[must_use]
pub fn detect_conflict(
    resource_type: &str,
    cached: &Value,
    fetched: &Value,
    tolerances: &ConflictTolerances,
) -> Option<String> {
    match resource_type {
        "votes" => compare_records(cached, fetched, vote_key, |key, c, f| {
            let (ct, ft) = (c.get("timestamp"), f.get("timestamp"));
            (ct.is_some() && ft.is_some() && ct != ft)
                .then(|| format!("vote {} has diverging timestamps", key))
        }),
        "stats" => compare_records(cached, fetched, record_key, |key, c, f| {
            numeric_drift(c, f, tolerances.stats_relative, "")
                .map(|field| format!("stats {} field {} drifted beyond tolerance", key, field))
        }),
        "players" => compare_records(cached, fetched, record_key, |key, c, f| {
            let (Some(cr), Some(fr)) = (rating(c), rating(f)) else {
                return None;
            };
            ((cr - fr).abs() > tolerances.player_rating_absolute)
                .then(|| format!("player {} rating moved {} -> {}", key, cr, fr))
        }),
        _ => None,
    }
}

/// Match records on both sides and run `check` on each pair.
///
/// Arrays are matched by key; two single objects are compared directly.
fn compare_records<K, C>(cached: &Value, fetched: &Value, key_of: K, check: C) -> Option<String>
where
    K: Fn(&Map<String, Value>) -> Option<String>,
    C: Fn(&str, &Map<String, Value>, &Map<String, Value>) -> Option<String>,
{
    match (cached, fetched) {
        (Value::Array(c), Value::Array(f)) => {
            let index: HashMap<String, &Map<String, Value>> = c
                .iter()
                .filter_map(Value::as_object)
                .filter_map(|o| key_of(o).map(|k| (k, o)))
                .collect();

            f.iter()
                .filter_map(Value::as_object)
                .find_map(|fo| {
                    let key = key_of(fo)?;
                    let co = index.get(&key)?;
                    check(&key, *co, fo)
                })
        }
        (Value::Object(c), Value::Object(f)) => {
            let key = key_of(f).or_else(|| key_of(c)).unwrap_or_else(|| "record".into());
            if key_of(c).is_some() && key_of(f).is_some() && key_of(c) != key_of(f) {
                return None;
            }
            check(&key, c, f)
        }
        _ => None,
    }
}

fn vote_key(record: &Map<String, Value>) -> Option<String> {
    if let Some(id) = record.get("id").and_then(scalar) {
        return Some(id);
    }
    let match_id = record.get("matchId").and_then(scalar)?;
    let voter = record.get("voterId").and_then(scalar)?;
    Some(format!("{}:{}", match_id, voter))
}

fn record_key(record: &Map<String, Value>) -> Option<String> {
    ["id", "playerId", "email"]
        .iter()
        .find_map(|k| record.get(*k).and_then(scalar))
}

fn rating(record: &Map<String, Value>) -> Option<f64> {
    record
        .get("overall")
        .or_else(|| record.get("rating"))
        .and_then(Value::as_f64)
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First numeric field (dotted path) whose relative drift exceeds `tolerance`.
fn numeric_drift(
    cached: &Map<String, Value>,
    fetched: &Map<String, Value>,
    tolerance: f64,
    prefix: &str,
) -> Option<String> {
    for (field, cv) in cached {
        let Some(fv) = fetched.get(field) else {
            continue;
        };
        let path = if prefix.is_empty() { field.clone() } else { format!("{}.{}", prefix, field) };
        match (cv, fv) {
            (Value::Number(a), Value::Number(b)) => {
                let (a, b) = (a.as_f64()?, b.as_f64()?);
                let scale = a.abs().max(b.abs());
                if scale > 0.0 && (a - b).abs() / scale > tolerance {
                    return Some(path);
                }
            }
            (Value::Object(a), Value::Object(b)) => {
                if let Some(p) = numeric_drift(a, b, tolerance, &path) {
                    return Some(p);
                }
            }
            _ => {}
        }
    }
    None
}

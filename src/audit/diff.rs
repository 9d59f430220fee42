use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{Record, DOC_UPDATED};

/// Before/after pair of one changed field. Absent values are `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub from: Value,
    pub to: Value,
}

/// Field name → change, ordered by field name.
pub type Changes = BTreeMap<String, FieldChange>;

// ============================================================================
// Public API
// ============================================================================

/// Field-level differences between two records, envelope included.
/// `docUpdated` is volatile and never reported.
pub fn diff(old: &Record, new: &Record) -> Changes {
    match (old.to_value(), new.to_value()) {
        (Value::Object(a), Value::Object(b)) => diff_objects(&a, &b),
        _ => Changes::new(),
    }
}

/// Top-level key comparison of two JSON objects.
pub fn diff_objects(old: &Map<String, Value>, new: &Map<String, Value>) -> Changes {
    let mut changes = Changes::new();
    let keys = old.keys().chain(new.keys().filter(|k| !old.contains_key(*k)));

    for key in keys {
        if key == DOC_UPDATED {
            continue;
        }
        let from = old.get(key).unwrap_or(&Value::Null);
        let to = new.get(key).unwrap_or(&Value::Null);
        if values_differ(from, to) {
            changes.insert(
                key.clone(),
                FieldChange {
                    from: from.clone(),
                    to: to.clone(),
                },
            );
        }
    }
    changes
}

// ============================================================================
// Comparison
// ============================================================================

fn values_differ(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() != y.as_f64(),
        (Value::Array(x), Value::Array(y)) => arrays_differ(x, y),
        _ => a != b,
    }
}

/// Leading elements decide first; the rest are only inspected when those
/// agree.
fn arrays_differ(a: &[Value], b: &[Value]) -> bool {
    match (a.first(), b.first()) {
        (None, None) => false,
        (Some(x), Some(y)) if values_differ(x, y) => true,
        (Some(_), Some(_)) => {
            a.len() != b.len() || a.iter().zip(b).skip(1).any(|(x, y)| values_differ(x, y))
        }
        _ => true,
    }
}

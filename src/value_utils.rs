//! Value comparison, canonicalization, and dotted-path lookup helpers shared
//! across the query, update, sort, and index layers.

use serde_json::Value;
use std::cmp::Ordering;

/// Get nested value from JSON with dot notation support (`Document::get`'s
/// free-function counterpart, used where a bare `Value` rather than a
/// `Document` is in hand — e.g. while walking a positional-resolver
/// sub-query).
pub fn get_nested_value<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    if !path.contains('.') {
        return doc.get(path);
    }

    let mut value = doc;
    for part in path.split('.') {
        match value {
            Value::Object(map) => value = map.get(part)?,
            Value::Array(arr) => {
                let index = part.parse::<usize>().ok()?;
                value = arr.get(index)?;
            }
            _ => return None,
        }
    }
    Some(value)
}

/// Relative precedence of JSON value "types" for cross-type ordering, loosely
/// following MongoDB's BSON type order (simplified to the JSON-representable
/// subset this engine's Value model covers).
fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order over two JSON values, used for `$sort`/cursor sort keys.
/// Same-type values compare by value; cross-type values compare by
/// `type_rank`. Object-valued keys are canonicalized into a sorted entry
/// list, so differing key order never produces a spurious ordering.
pub fn compare_values_total(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(n1), Value::Number(n2)) => {
            let f1 = n1.as_f64().unwrap_or(0.0);
            let f2 = n2.as_f64().unwrap_or(0.0);
            f1.partial_cmp(&f2).unwrap_or(Ordering::Equal)
        }
        (Value::String(s1), Value::String(s2)) => s1.cmp(s2),
        (Value::Bool(b1), Value::Bool(b2)) => b1.cmp(b2),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Array(a1), Value::Array(a2)) => {
            for (x, y) in a1.iter().zip(a2.iter()) {
                let ord = compare_values_total(x, y);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            a1.len().cmp(&a2.len())
        }
        (Value::Object(_), Value::Object(_)) => {
            let ea = canonical_entries(a);
            let eb = canonical_entries(b);
            for ((ka, va), (kb, vb)) in ea.iter().zip(eb.iter()) {
                let ord = ka.cmp(kb);
                if ord != Ordering::Equal {
                    return ord;
                }
                let ord = compare_values_total(va, vb);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            ea.len().cmp(&eb.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Same-type comparison only; `None` for cross-type or otherwise
/// incomparable pairs. Used by query operators (`$gt`/`$lt`/…) where
/// MongoDB's comparison semantics require same-type operands.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(n1), Value::Number(n2)) => {
            let f1 = n1.as_f64()?;
            let f2 = n2.as_f64()?;
            f1.partial_cmp(&f2)
        }
        (Value::String(s1), Value::String(s2)) => Some(s1.cmp(s2)),
        (Value::Bool(b1), Value::Bool(b2)) => Some(b1.cmp(b2)),
        _ => None,
    }
}

/// Sort-key comparison honoring the cursor sort protocol: a missing
/// key sorts as the tuple `(0, _)`, strictly before any present key's
/// `(1, value)`, regardless of the present value's own type rank.
pub fn compare_values_with_none(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(av), Some(bv)) => compare_values_total(av, bv),
    }
}

/// Canonicalize a value's object-valued entries (recursively, sorted by key)
/// into an ordered list, for sort-key comparison and for `DocumentId`'s
/// canonical hash. Non-objects are represented as a single synthetic entry
/// so the function is total over all `Value`s.
fn canonical_entries(v: &Value) -> Vec<(String, Value)> {
    match v {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> =
                map.iter().map(|(k, v)| (k.clone(), canonicalize(v))).collect();
            entries.sort_by(|(k1, _), (k2, _)| k1.cmp(k2));
            entries
        }
        other => vec![(String::new(), canonicalize(other))],
    }
}

/// Recursively sort every nested object's keys so two values that differ
/// only in object key order produce identical canonical JSON.
fn canonicalize(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> =
                map.iter().map(|(k, v)| (k.clone(), canonicalize(v))).collect();
            entries.sort_by(|(k1, _), (k2, _)| k1.cmp(k2));
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// A string uniquely determined by a value's contents regardless of object
/// key order — the "canonical hash" `DocumentId` and unique-index tuples
/// rely on for hashing/equality.
pub fn canonical_key(v: &Value) -> String {
    serde_json::to_string(&canonicalize(v)).unwrap_or_default()
}

/// Deep (structural) equality, ignoring object key order (`serde_json`'s own
/// `Map` equality is already order-independent). Used by `$addToSet`,
/// `$pull` (value form), and `$pullAll`.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    a == b
}

//! Update-operator interpreter.
//!
//! Applies `$set`/`$unset`/`$inc`/`$max`/`$min`/`$push`/`$pull`/`$pullAll`/
//! `$addToSet`/`$rename`/`$currentDate`/`$setOnInsert` against a document,
//! plus positional `$` resolution and full-document replacement. `$slice`
//! on `$push` is not supported and is rejected explicitly.

use crate::document::Document;
use crate::error::{MongoLiteError, Result};
use crate::query::operators::{matches_filter, OPERATOR_REGISTRY};
use crate::value_utils::{compare_values_total, deep_equal};
use chrono::Utc;
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Resolves a single positional `$` placeholder per update call, by walking
/// the filter spec in parallel with the document and caching the first
/// matching array index found for a given array field ("the resolved
/// sub-document is cached and reused across operators in the same update").
#[derive(Default)]
pub struct PositionalResolver {
    cache: std::collections::HashMap<String, usize>,
}

impl PositionalResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `field.$.rest` style paths: replace the first `$` component
    /// with a concrete array index derived from `filter`, caching the
    /// result under the array's path prefix.
    pub fn resolve(&mut self, path: &str, document: &Document, filter: &Value) -> Result<String> {
        if !path.contains(".$") {
            return Ok(path.to_string());
        }
        let parts: Vec<&str> = path.splitn(2, ".$").collect();
        let array_path = parts[0];
        let rest = parts.get(1).copied().unwrap_or("");
        let rest = rest.strip_prefix('.').unwrap_or(rest);

        let index = if let Some(&cached) = self.cache.get(array_path) {
            cached
        } else {
            let idx = find_matching_index(document, array_path, filter)?;
            self.cache.insert(array_path.to_string(), idx);
            idx
        };

        if rest.is_empty() {
            Ok(format!("{}.{}", array_path, index))
        } else {
            Ok(format!("{}.{}.{}", array_path, index, rest))
        }
    }
}

/// Find the first element of the array at `array_path` that satisfies the
/// sub-filter mongo would have used to select it, by descending into
/// `$elemMatch` sub-queries when present in `filter`.
fn find_matching_index(document: &Document, array_path: &str, filter: &Value) -> Result<usize> {
    let array = match document.get(array_path) {
        Some(Value::Array(arr)) => arr,
        _ => {
            return Err(MongoLiteError::OperationFailure(format!(
                "positional operator requires an array at '{}'",
                array_path
            )))
        }
    };

    let sub_filter = extract_sub_filter(filter, array_path);

    for (i, elem) in array.iter().enumerate() {
        if value_matches_condition(elem, &sub_filter)? {
            return Ok(i);
        }
    }

    Err(MongoLiteError::OperationFailure(format!(
        "positional operator found no array element matching the query at '{}'",
        array_path
    )))
}

/// Locate the condition the original query spec used to select elements of
/// `array_path`: either `{array_path: {$elemMatch: {...}}}`, a dotted
/// `array_path.field` condition, or a direct `array_path: value` equality.
fn extract_sub_filter(filter: &Value, array_path: &str) -> Value {
    if let Some(obj) = filter.as_object() {
        if let Some(direct) = obj.get(array_path) {
            if let Some(elem_match) = direct.get("$elemMatch") {
                return elem_match.clone();
            }
            return direct.clone();
        }
        let prefix = format!("{}.", array_path);
        let mut sub = Map::new();
        for (k, v) in obj {
            if let Some(rest) = k.strip_prefix(&prefix) {
                sub.insert(rest.to_string(), v.clone());
            }
        }
        if !sub.is_empty() {
            return Value::Object(sub);
        }
    }
    Value::Object(Map::new())
}

/// Evaluate a single array element against a condition that is either a
/// scalar (deep equality), an operator expression applied directly to the
/// element (`{$gte: 6}`), or a field-based sub-query against an embedded
/// document (`{qty: 5}`).
fn value_matches_condition(elem: &Value, condition: &Value) -> Result<bool> {
    match condition {
        Value::Object(obj) if obj.is_empty() => Ok(true),
        Value::Object(obj) if obj.keys().all(|k| k.starts_with('$')) => {
            for (op, arg) in obj {
                let matcher = OPERATOR_REGISTRY
                    .get(op.as_str())
                    .ok_or_else(|| MongoLiteError::OperationFailure(format!("unknown operator '{}'", op)))?;
                if !matcher.matches(Some(elem), arg, None)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Value::Object(_) => {
            let id = crate::document::DocumentId::new_object_id();
            let fields = elem.as_object().cloned().unwrap_or_default();
            let temp = Document::new(id, fields);
            matches_filter(&temp, condition)
        }
        scalar => Ok(deep_equal(elem, scalar)),
    }
}

/// Apply an update document to `document` in place. Returns `true` if any
/// field was actually modified. `was_insert` gates `$setOnInsert`.
pub fn apply_update(
    document: &mut Document,
    update: &Value,
    filter: &Value,
    was_insert: bool,
) -> Result<bool> {
    let update_obj = update
        .as_object()
        .ok_or_else(|| MongoLiteError::Validation("update document must be an object".to_string()))?;

    if update_obj.is_empty() {
        return Err(MongoLiteError::Validation("update document must not be empty".to_string()));
    }

    let is_operator_mode = update_obj.keys().next().map(|k| k.starts_with('$')).unwrap_or(false);
    if is_operator_mode {
        if update_obj.keys().any(|k| !k.starts_with('$')) {
            return Err(MongoLiteError::Validation(
                "update document cannot mix operators and plain fields".to_string(),
            ));
        }
        let existing_id = document.id_value();
        let modified = apply_operators(document, update_obj, filter, was_insert)?;
        if document.id_value() != existing_id {
            return Err(MongoLiteError::Validation(
                "update cannot change the immutable _id field".to_string(),
            ));
        }
        Ok(modified)
    } else {
        apply_replacement(document, update_obj)
    }
}

fn apply_replacement(document: &mut Document, replacement: &Map<String, Value>) -> Result<bool> {
    if replacement.keys().any(|k| k.starts_with('$')) {
        return Err(MongoLiteError::Validation(
            "replacement document cannot contain operator keys".to_string(),
        ));
    }
    if let Some(new_id) = replacement.get("_id") {
        let existing_id = document.id_value();
        if existing_id != Value::Null && new_id != &existing_id {
            return Err(MongoLiteError::Validation(
                "replacement document cannot change _id".to_string(),
            ));
        }
    }

    let id = document.id();
    let mut fields = replacement.clone();
    fields.remove("_id");
    *document = Document::new(id, fields);
    Ok(true)
}

fn apply_operators(
    document: &mut Document,
    ops: &Map<String, Value>,
    filter: &Value,
    was_insert: bool,
) -> Result<bool> {
    let mut resolver = PositionalResolver::new();
    let mut modified = false;

    for (op, fields) in ops {
        let field_map = fields.as_object().ok_or_else(|| {
            MongoLiteError::Validation(format!("'{}' requires an object of field paths", op))
        })?;

        match op.as_str() {
            "$set" => {
                for (path, value) in field_map {
                    let resolved = resolver.resolve(path, document, filter)?;
                    document.set_nested(&resolved, value.clone());
                    modified = true;
                }
            }
            "$setOnInsert" => {
                if was_insert {
                    for (path, value) in field_map {
                        let resolved = resolver.resolve(path, document, filter)?;
                        document.set_nested(&resolved, value.clone());
                        modified = true;
                    }
                }
            }
            "$unset" => {
                for path in field_map.keys() {
                    let resolved = resolver.resolve(path, document, filter)?;
                    if document.remove_nested(&resolved).is_some() {
                        modified = true;
                    }
                }
            }
            "$inc" => {
                for (path, delta) in field_map {
                    let resolved = resolver.resolve(path, document, filter)?;
                    let current = document.get(&resolved).cloned().unwrap_or(Value::from(0));
                    let summed = add_numeric(&current, delta)?;
                    document.set_nested(&resolved, summed);
                    modified = true;
                }
            }
            "$max" | "$min" => {
                let want_greater = op == "$max";
                for (path, candidate) in field_map {
                    let resolved = resolver.resolve(path, document, filter)?;
                    let replace = match document.get(&resolved) {
                        None => true,
                        Some(current) => {
                            let ord = compare_values_total(candidate, current);
                            if want_greater { ord == Ordering::Greater } else { ord == Ordering::Less }
                        }
                    };
                    if replace {
                        document.set_nested(&resolved, candidate.clone());
                        modified = true;
                    }
                }
            }
            "$currentDate" => {
                for (path, spec) in field_map {
                    if let Some(obj) = spec.as_object() {
                        if obj.get("$type").and_then(|v| v.as_str()) == Some("timestamp") {
                            return Err(MongoLiteError::NotImplemented(
                                "$currentDate with $type: timestamp".to_string(),
                            ));
                        }
                    }
                    let resolved = resolver.resolve(path, document, filter)?;
                    document.set_nested(&resolved, Value::String(Utc::now().to_rfc3339()));
                    modified = true;
                }
            }
            "$rename" => {
                for (src, dst) in field_map {
                    if src.contains('.') || dst.as_str().map(|d| d.contains('.')).unwrap_or(false) {
                        return Err(MongoLiteError::Validation(
                            "$rename does not support dotted source or destination".to_string(),
                        ));
                    }
                    let dst = dst
                        .as_str()
                        .ok_or_else(|| MongoLiteError::Validation("$rename destination must be a string".to_string()))?;
                    if let Some(value) = document.remove(src) {
                        document.set(dst.to_string(), value);
                        modified = true;
                    }
                }
            }
            "$push" => {
                for (path, value) in field_map {
                    let resolved = resolver.resolve(path, document, filter)?;
                    if let Some(obj) = value.as_object() {
                        if obj.contains_key("$slice") {
                            return Err(MongoLiteError::NotImplemented(
                                "$push with a $slice modifier".to_string(),
                            ));
                        }
                    }
                    let items = each_items(value);
                    let mut array = take_array(document, &resolved, "$push")?;
                    array.extend(items);
                    document.set_nested(&resolved, Value::Array(array));
                    modified = true;
                }
            }
            "$addToSet" => {
                for (path, value) in field_map {
                    let resolved = resolver.resolve(path, document, filter)?;
                    let items = each_items(value);
                    let mut array = take_array(document, &resolved, "$addToSet")?;
                    for item in items {
                        if !array.iter().any(|existing| deep_equal(existing, &item)) {
                            array.push(item);
                            modified = true;
                        }
                    }
                    document.set_nested(&resolved, Value::Array(array));
                }
            }
            "$pull" => {
                for (path, condition) in field_map {
                    let resolved = resolver.resolve(path, document, filter)?;
                    let array = take_array(document, &resolved, "$pull")?;
                    let mut kept = Vec::with_capacity(array.len());
                    for item in array {
                        if value_matches_condition(&item, condition)? {
                            modified = true;
                        } else {
                            kept.push(item);
                        }
                    }
                    document.set_nested(&resolved, Value::Array(kept));
                }
            }
            "$pullAll" => {
                for (path, values) in field_map {
                    let to_remove = values.as_array().ok_or_else(|| {
                        MongoLiteError::Validation("$pullAll requires an array of values".to_string())
                    })?;
                    let resolved = resolver.resolve(path, document, filter)?;
                    let array = take_array(document, &resolved, "$pullAll")?;
                    let before = array.len();
                    let kept: Vec<Value> = array
                        .into_iter()
                        .filter(|item| !to_remove.iter().any(|v| deep_equal(item, v)))
                        .collect();
                    if kept.len() != before {
                        modified = true;
                    }
                    document.set_nested(&resolved, Value::Array(kept));
                }
            }
            _ => {
                return Err(MongoLiteError::NotImplemented(format!("update operator '{}'", op)));
            }
        }
    }

    Ok(modified)
}

fn each_items(value: &Value) -> Vec<Value> {
    if let Some(obj) = value.as_object() {
        if let Some(each) = obj.get("$each") {
            return each.as_array().cloned().unwrap_or_else(|| vec![each.clone()]);
        }
    }
    vec![value.clone()]
}

fn take_array(document: &Document, path: &str, op: &str) -> Result<Vec<Value>> {
    match document.get(path) {
        Some(Value::Array(arr)) => Ok(arr.clone()),
        Some(_) => Err(MongoLiteError::OperationFailure(format!(
            "{}: field '{}' is not an array",
            op, path
        ))),
        None => Ok(Vec::new()),
    }
}

fn add_numeric(current: &Value, delta: &Value) -> Result<Value> {
    if let (Some(a), Some(b)) = (current.as_i64(), delta.as_i64()) {
        return Ok(Value::from(a + b));
    }
    if let (Some(a), Some(b)) = (current.as_f64(), delta.as_f64()) {
        return Ok(Value::from(a + b));
    }
    Err(MongoLiteError::OperationFailure(
        "$inc requires numeric current and increment values".to_string(),
    ))
}

// src/query/operators.rs
//! Query operator trait definitions and implementations
//!
//! This module implements the Strategy pattern for MongoDB query operators.
//! Each operator is implemented as a separate type that implements the `OperatorMatcher` trait.
//!
//! # Architecture
//!
//! ```text
//! OperatorMatcher trait
//!     ↓
//! ┌────────────────┬────────────────┬────────────────┐
//! │ Comparison     │ Logical        │ Element        │
//! │ ($eq, $gt...)  │ ($and, $or...) │ ($exists...)   │
//! └────────────────┴────────────────┴────────────────┘
//! ```
//!
//! # Benefits
//!
//! - **Extensibility**: Add new operators without modifying existing code
//! - **Testability**: Each operator can be tested independently
//! - **Reduced Complexity**: Each operator has CC ~2-4 instead of one giant function
//! - **Type Safety**: Compile-time guarantees for operator implementations

use crate::document::Document;
use crate::error::{MongoLiteError, Result};
use crate::value_utils::compare_values;
use lazy_static::lazy_static;
use lru::LruCache;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;

// ============================================================================
// REGEX WITH OPTIONS SUPPORT (Full regex crate implementation)
// ============================================================================

lazy_static! {
    /// Global cache for compiled regex patterns
    /// LRU with 100 entry limit to prevent memory bloat
    /// Key format: "pattern:options"
    static ref REGEX_CACHE: Mutex<LruCache<String, Regex>> =
        Mutex::new(LruCache::new(NonZeroUsize::new(100).unwrap()));
}

/// Build regex pattern string with MongoDB-style options
///
/// Converts MongoDB options (i, m, s, x) to Rust regex inline flags
fn build_regex_pattern(pattern: &str, options: &str) -> String {
    let mut regex_str = String::new();

    // Handle options - only add prefix if there are valid options
    let valid_options: String = options
        .chars()
        .filter(|c| matches!(c, 'i' | 'm' | 's' | 'x'))
        .collect();

    if !valid_options.is_empty() {
        regex_str.push_str("(?");
        regex_str.push_str(&valid_options);
        regex_str.push(')');
    }

    regex_str.push_str(pattern);
    regex_str
}

/// Get or compile a regex pattern with caching
///
/// Uses an LRU cache to avoid recompiling the same patterns repeatedly.
/// Regex::new() is expensive, so caching provides significant performance benefits.
fn get_or_compile_regex(pattern: &str, options: &str) -> Result<Regex> {
    let cache_key = format!("{}:{}", pattern, options);

    // Try cache first
    {
        let mut cache = REGEX_CACHE.lock().unwrap();
        if let Some(regex) = cache.get(&cache_key) {
            return Ok(regex.clone());
        }
    }

    // Build and compile regex with options
    let regex_pattern = build_regex_pattern(pattern, options);
    let regex = Regex::new(&regex_pattern).map_err(|e| {
        MongoLiteError::Validation(format!("Invalid regex pattern '{}': {}", pattern, e))
    })?;

    // Store in cache
    {
        let mut cache = REGEX_CACHE.lock().unwrap();
        cache.put(cache_key, regex.clone());
    }

    Ok(regex)
}

/// Helper function for regex matching with MongoDB-style options
///
/// Supports:
/// - `i` - Case insensitive matching
/// - `m` - Multiline mode (^ and $ match line boundaries)
/// - `s` - Dotall mode (. matches newlines)
/// - `x` - Extended mode (whitespace ignored, # comments)
///
/// Uses the `regex` crate for full regex support including:
/// - Anchors: ^, $
/// - Character classes: [a-z], [0-9], \d, \w, \s
/// - Quantifiers: +, *, ?, {n}, {n,m}
/// - Alternation: |
/// - Grouping: ()
/// - Word boundaries: \b
fn regex_match_with_options(text: &str, pattern: &str, options: &str) -> Result<bool> {
    let regex = get_or_compile_regex(pattern, options)?;
    Ok(regex.is_match(text))
}

// ============================================================================
// TRAIT DEFINITION
// ============================================================================

/// Trait for all query operators
///
/// Each MongoDB query operator ($eq, $gt, $and, etc.) implements this trait.
/// The trait provides a uniform interface for matching documents against filter criteria.
///
/// # Examples
///
/// ```rust
/// use serde_json::json;
/// use mongolite::query::operators::EqOperator;
/// use mongolite::query::operators::OperatorMatcher;
///
/// let eq_op = EqOperator;
/// let matches = eq_op.matches(Some(&json!("Alice")), &json!("Alice"), None).unwrap();
/// assert!(matches);
/// ```
pub trait OperatorMatcher: Send + Sync {
    /// Returns the operator name (e.g., "$eq", "$gt", "$and")
    fn name(&self) -> &'static str;

    /// Checks if a document value matches the filter criteria
    ///
    /// # Arguments
    ///
    /// - `doc_value`: The value from the document field (None if field doesn't exist)
    /// - `filter_value`: The expected value from the query filter
    /// - `document`: Optional reference to the full document (for logical operators that recurse)
    ///
    /// # Returns
    ///
    /// - `Ok(true)` if the document matches
    /// - `Ok(false)` if the document doesn't match
    /// - `Err(...)` if there's a validation error (e.g., wrong type for operator)
    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        document: Option<&Document>,
    ) -> Result<bool>;
}

// ============================================================================
// COMPARISON OPERATORS
// ============================================================================

/// $eq operator: Matches values that are equal to a specified value
///
/// # MongoDB Spec
///
/// ```json
/// { field: { $eq: value } }
/// // Shorthand: { field: value }
/// ```
///
/// # Complexity: CC = 2
pub struct EqOperator;

impl OperatorMatcher for EqOperator {
    fn name(&self) -> &'static str {
        "$eq"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Document>,
    ) -> Result<bool> {
        match doc_value {
            None => Ok(false),
            Some(v) => {
                // Direct equality check
                if v == filter_value {
                    return Ok(true);
                }
                // MongoDB array element matching: if doc_value is an array,
                // check if any element equals filter_value
                if let Value::Array(arr) = v {
                    Ok(arr.iter().any(|elem| elem == filter_value))
                } else {
                    Ok(false)
                }
            }
        }
    }
}

/// $ne operator: Matches values that are not equal to a specified value
///
/// # MongoDB Spec
///
/// ```json
/// { field: { $ne: value } }
/// ```
///
/// **Note**: Returns true if field doesn't exist
///
/// # Complexity: CC = 2
pub struct NeOperator;

impl OperatorMatcher for NeOperator {
    fn name(&self) -> &'static str {
        "$ne"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Document>,
    ) -> Result<bool> {
        match doc_value {
            None => Ok(true), // Field doesn't exist - not equal
            Some(v) => {
                // Direct inequality check
                if v == filter_value {
                    return Ok(false);
                }
                // MongoDB array element matching: if doc_value is an array,
                // return false if ANY element equals filter_value
                if let Value::Array(arr) = v {
                    Ok(!arr.iter().any(|elem| elem == filter_value))
                } else {
                    Ok(true)
                }
            }
        }
    }
}

/// $gt operator: Matches values that are greater than a specified value
///
/// # MongoDB Spec
///
/// ```json
/// { field: { $gt: value } }
/// ```
///
/// # Complexity: CC = 3
pub struct GtOperator;

impl OperatorMatcher for GtOperator {
    fn name(&self) -> &'static str {
        "$gt"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Document>,
    ) -> Result<bool> {
        compare_with_predicate(doc_value, filter_value, |ord| {
            ord == std::cmp::Ordering::Greater
        })
    }
}

/// $gte operator: Matches values that are greater than or equal to a specified value
///
/// # Complexity: CC = 4
pub struct GteOperator;

impl OperatorMatcher for GteOperator {
    fn name(&self) -> &'static str {
        "$gte"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Document>,
    ) -> Result<bool> {
        compare_with_predicate(doc_value, filter_value, |ord| {
            matches!(ord, std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
        })
    }
}

/// $lt operator: Matches values that are less than a specified value
///
/// # Complexity: CC = 3
pub struct LtOperator;

impl OperatorMatcher for LtOperator {
    fn name(&self) -> &'static str {
        "$lt"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Document>,
    ) -> Result<bool> {
        compare_with_predicate(doc_value, filter_value, |ord| {
            ord == std::cmp::Ordering::Less
        })
    }
}

/// $lte operator: Matches values that are less than or equal to a specified value
///
/// # Complexity: CC = 4
pub struct LteOperator;

impl OperatorMatcher for LteOperator {
    fn name(&self) -> &'static str {
        "$lte"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Document>,
    ) -> Result<bool> {
        compare_with_predicate(doc_value, filter_value, |ord| {
            matches!(ord, std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
        })
    }
}

// ============================================================================
// ARRAY OPERATORS
// ============================================================================

/// $in operator: Matches any of the values specified in an array
///
/// # MongoDB Spec
///
/// ```json
/// { field: { $in: [value1, value2, ...] } }
/// ```
///
/// # Complexity: CC = 4
pub struct InOperator;

impl OperatorMatcher for InOperator {
    fn name(&self) -> &'static str {
        "$in"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Document>,
    ) -> Result<bool> {
        match doc_value {
            None => Ok(false),
            Some(v) => {
                if let Value::Array(filter_arr) = filter_value {
                    // Direct check: is doc_value in the filter array?
                    if filter_arr.contains(v) {
                        return Ok(true);
                    }
                    // MongoDB array element matching: if doc_value is an array,
                    // check if ANY element of doc_value matches ANY value in filter_arr
                    if let Value::Array(doc_arr) = v {
                        Ok(doc_arr.iter().any(|elem| filter_arr.contains(elem)))
                    } else {
                        Ok(false)
                    }
                } else {
                    Err(MongoLiteError::Validation(
                        "$in operator requires an array".to_string(),
                    ))
                }
            }
        }
    }
}

/// $nin operator: Matches none of the values specified in an array
///
/// # MongoDB Spec
///
/// ```json
/// { field: { $nin: [value1, value2, ...] } }
/// ```
///
/// **Note**: Returns true if field doesn't exist
///
/// # Complexity: CC = 4
pub struct NinOperator;

impl OperatorMatcher for NinOperator {
    fn name(&self) -> &'static str {
        "$nin"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Document>,
    ) -> Result<bool> {
        if let Value::Array(filter_arr) = filter_value {
            match doc_value {
                None => Ok(true), // Field doesn't exist - not in
                Some(v) => {
                    // Direct check: is doc_value in the filter array?
                    if filter_arr.contains(v) {
                        return Ok(false);
                    }
                    // MongoDB array element matching: if doc_value is an array,
                    // return false if ANY element of doc_value matches ANY value in filter_arr
                    if let Value::Array(doc_arr) = v {
                        Ok(!doc_arr.iter().any(|elem| filter_arr.contains(elem)))
                    } else {
                        Ok(true)
                    }
                }
            }
        } else {
            Err(MongoLiteError::Validation(
                "$nin operator requires an array".to_string(),
            ))
        }
    }
}

// ============================================================================
// ELEMENT OPERATORS
// ============================================================================

/// $exists operator: Matches documents that have the specified field
///
/// # MongoDB Spec
///
/// ```json
/// { field: { $exists: true } }  // field must exist
/// { field: { $exists: false } } // field must NOT exist
/// ```
///
/// # Complexity: CC = 4
pub struct ExistsOperator;

impl OperatorMatcher for ExistsOperator {
    fn name(&self) -> &'static str {
        "$exists"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Document>,
    ) -> Result<bool> {
        if let Value::Bool(should_exist) = filter_value {
            Ok(doc_value.is_some() == *should_exist)
        } else {
            Err(MongoLiteError::Validation(
                "$exists operator requires a boolean".to_string(),
            ))
        }
    }
}

/// $all operator: Matches arrays that contain all specified elements
///
/// # MongoDB Spec
///
/// ```json
/// { field: { $all: [value1, value2, ...] } }
/// ```
///
/// # Complexity: CC = 6
pub struct AllOperator;

impl OperatorMatcher for AllOperator {
    fn name(&self) -> &'static str {
        "$all"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Document>,
    ) -> Result<bool> {
        match doc_value {
            None => Ok(false),
            Some(Value::Array(doc_arr)) => {
                if let Value::Array(required) = filter_value {
                    // All required values must be in the document array
                    Ok(required.iter().all(|req| doc_arr.contains(req)))
                } else {
                    Err(MongoLiteError::Validation(
                        "$all operator requires an array".to_string(),
                    ))
                }
            }
            Some(_) => Ok(false), // Not an array
        }
    }
}

/// $elemMatch operator: Matches documents that contain an array field with at least one element
/// that matches all the specified query criteria
///
/// # MongoDB Spec
///
/// ```json
/// { field: { $elemMatch: { query1, query2, ... } } }
/// ```
///
/// # Complexity: CC = 6
pub struct ElemMatchOperator;

impl OperatorMatcher for ElemMatchOperator {
    fn name(&self) -> &'static str {
        "$elemMatch"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Document>,
    ) -> Result<bool> {
        match doc_value {
            None => Ok(false),
            Some(Value::Array(arr)) => {
                // At least one element in the array must match all conditions in filter_value
                for elem in arr {
                    // Create a temporary document from the array element
                    if let Value::Object(obj) = elem {
                        // Check if this element matches all conditions
                        let mut matches_all = true;

                        if let Value::Object(conditions) = filter_value {
                            for (key, value) in conditions {
                                let field_value = obj.get(key);

                                // If condition has operators, evaluate them
                                if let Value::Object(op_obj) = value {
                                    for (op_name, op_value) in op_obj {
                                        if op_name.starts_with('$') {
                                            if let Some(operator) =
                                                OPERATOR_REGISTRY.get(op_name.as_str())
                                            {
                                                if !operator.matches(field_value, op_value, None)? {
                                                    matches_all = false;
                                                    break;
                                                }
                                            }
                                        }
                                    }
                                } else {
                                    // Direct equality
                                    if field_value != Some(value) {
                                        matches_all = false;
                                        break;
                                    }
                                }
                            }
                        }

                        if matches_all {
                            return Ok(true);
                        }
                    }
                }
                Ok(false)
            }
            Some(_) => Ok(false), // Not an array
        }
    }
}

/// $size operator: Matches arrays with the specified number of elements
///
/// # MongoDB Spec
///
/// ```json
/// { field: { $size: 3 } }
/// ```
///
/// Matches documents where the array field has exactly 3 elements.
///
/// # Complexity: CC = 4
pub struct SizeOperator;

impl OperatorMatcher for SizeOperator {
    fn name(&self) -> &'static str {
        "$size"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Document>,
    ) -> Result<bool> {
        match doc_value {
            None => Ok(false),
            Some(Value::Array(arr)) => {
                if let Some(size) = filter_value.as_i64() {
                    Ok(arr.len() as i64 == size)
                } else if let Some(size) = filter_value.as_u64() {
                    Ok(arr.len() as u64 == size)
                } else {
                    Err(MongoLiteError::Validation(
                        "$size operator requires an integer".to_string(),
                    ))
                }
            }
            Some(_) => Ok(false), // Not an array
        }
    }
}

/// $regex operator: Provides regular expression capabilities for pattern matching strings
///
/// # MongoDB Spec
///
/// ```json
/// { field: { $regex: "pattern" } }
/// { field: { $regex: "pattern", $options: "i" } }
/// ```
///
/// # Supported features (via regex crate):
/// - Anchors: ^, $
/// - Character classes: [a-z], [0-9], \d, \w, \s
/// - Quantifiers: +, *, ?, {n}, {n,m}
/// - Alternation: |
/// - Grouping: ()
/// - Word boundaries: \b
///
/// # Complexity: CC = 5
pub struct RegexOperator;

impl OperatorMatcher for RegexOperator {
    fn name(&self) -> &'static str {
        "$regex"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Document>,
    ) -> Result<bool> {
        match doc_value {
            None => Ok(false),
            Some(Value::String(s)) => {
                if let Value::String(pattern) = filter_value {
                    // Full regex matching with compiled & cached regex
                    regex_match_with_options(s, pattern, "")
                } else {
                    Err(MongoLiteError::Validation(
                        "$regex operator requires a string pattern".to_string(),
                    ))
                }
            }
            Some(Value::Array(arr)) => {
                // Check if any string element in the array matches
                if let Value::String(pattern) = filter_value {
                    for elem in arr {
                        if let Value::String(s) = elem {
                            if regex_match_with_options(s, pattern, "")? {
                                return Ok(true);
                            }
                        }
                    }
                    Ok(false)
                } else {
                    Err(MongoLiteError::Validation(
                        "$regex operator requires a string pattern".to_string(),
                    ))
                }
            }
            Some(_) => Ok(false), // Not a string or array
        }
    }
}

/// $type operator: Selects documents where the value of a field is of the specified BSON type
///
/// # MongoDB Spec
///
/// ```json
/// { field: { $type: "string" } }
/// { field: { $type: 2 } }  // BSON type number
/// ```
///
/// # Complexity: CC = 10
pub struct TypeOperator;

impl OperatorMatcher for TypeOperator {
    fn name(&self) -> &'static str {
        "$type"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Document>,
    ) -> Result<bool> {
        match doc_value {
            None => Ok(false),
            Some(val) => {
                let type_name = if let Value::String(s) = filter_value {
                    s.as_str()
                } else if let Value::Number(n) = filter_value {
                    // BSON type numbers (simplified, MongoDB has more)
                    match n.as_i64() {
                        Some(1) => "double",
                        Some(2) => "string",
                        Some(3) => "object",
                        Some(4) => "array",
                        Some(8) => "bool",
                        Some(10) => "null",
                        Some(16) => "int",
                        Some(18) => "long",
                        _ => {
                            return Err(MongoLiteError::Validation(format!(
                                "Unknown BSON type number: {}",
                                n
                            )))
                        }
                    }
                } else {
                    return Err(MongoLiteError::Validation(
                        "$type operator requires a string or number".to_string(),
                    ));
                };

                let matches = match type_name {
                    "double" | "number" => val.is_number(),
                    "string" => val.is_string(),
                    "object" => val.is_object(),
                    "array" => val.is_array(),
                    "bool" | "boolean" => val.is_boolean(),
                    "null" => val.is_null(),
                    "int" | "long" => val.is_i64() || val.is_u64(),
                    _ => {
                        return Err(MongoLiteError::Validation(format!(
                            "Unknown type name: {}",
                            type_name
                        )))
                    }
                };

                Ok(matches)
            }
        }
    }
}

// ============================================================================
// LOGICAL OPERATORS
// ============================================================================

/// $and operator: Joins query clauses with a logical AND
///
/// # MongoDB Spec
///
/// ```json
/// { $and: [ { condition1 }, { condition2 }, ... ] }
/// ```
///
/// # Complexity: CC = 5 (array validation + iteration)
pub struct AndOperator;

impl OperatorMatcher for AndOperator {
    fn name(&self) -> &'static str {
        "$and"
    }

    fn matches(
        &self,
        _doc_value: Option<&Value>,
        filter_value: &Value,
        document: Option<&Document>,
    ) -> Result<bool> {
        let doc = document.ok_or_else(|| {
            MongoLiteError::Validation("$and operator requires document context".to_string())
        })?;

        if let Value::Array(conditions) = filter_value {
            for condition in conditions {
                // Recursively evaluate each condition
                if !matches_filter(doc, condition)? {
                    return Ok(false);
                }
            }
            Ok(true)
        } else {
            Err(MongoLiteError::Validation(
                "$and operator requires an array".to_string(),
            ))
        }
    }
}

/// $or operator: Joins query clauses with a logical OR
///
/// # MongoDB Spec
///
/// ```json
/// { $or: [ { condition1 }, { condition2 }, ... ] }
/// ```
///
/// # Complexity: CC = 5
pub struct OrOperator;

impl OperatorMatcher for OrOperator {
    fn name(&self) -> &'static str {
        "$or"
    }

    fn matches(
        &self,
        _doc_value: Option<&Value>,
        filter_value: &Value,
        document: Option<&Document>,
    ) -> Result<bool> {
        let doc = document.ok_or_else(|| {
            MongoLiteError::Validation("$or operator requires document context".to_string())
        })?;

        if let Value::Array(conditions) = filter_value {
            for condition in conditions {
                // If any condition matches, return true
                if matches_filter(doc, condition)? {
                    return Ok(true);
                }
            }
            Ok(false)
        } else {
            Err(MongoLiteError::Validation(
                "$or operator requires an array".to_string(),
            ))
        }
    }
}

/// $nor operator: Joins query clauses with a logical NOR
///
/// # MongoDB Spec
///
/// ```json
/// { $nor: [ { condition1 }, { condition2 }, ... ] }
/// ```
///
/// Returns true only if ALL conditions are false
///
/// # Complexity: CC = 5
pub struct NorOperator;

impl OperatorMatcher for NorOperator {
    fn name(&self) -> &'static str {
        "$nor"
    }

    fn matches(
        &self,
        _doc_value: Option<&Value>,
        filter_value: &Value,
        document: Option<&Document>,
    ) -> Result<bool> {
        let doc = document.ok_or_else(|| {
            MongoLiteError::Validation("$nor operator requires document context".to_string())
        })?;

        if let Value::Array(conditions) = filter_value {
            for condition in conditions {
                // If any condition matches, return false
                if matches_filter(doc, condition)? {
                    return Ok(false);
                }
            }
            Ok(true)
        } else {
            Err(MongoLiteError::Validation(
                "$nor operator requires an array".to_string(),
            ))
        }
    }
}

/// $not operator: Inverts the effect of a query expression
///
/// # MongoDB Spec
///
/// ```json
/// { field: { $not: { $gt: 5 } } }
/// ```
///
/// # Complexity: CC = 3
pub struct NotOperator;

impl OperatorMatcher for NotOperator {
    fn name(&self) -> &'static str {
        "$not"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        document: Option<&Document>,
    ) -> Result<bool> {
        // $not wraps another operator object like { $not: { $gt: 5 } }
        // We need to evaluate the inner operator and negate the result

        // Create a temporary document with just this field for evaluation
        if document.is_some() {
            // Find the field name by looking for the $not operator in the original filter
            // This is a simplified approach - we evaluate the inner condition
            let result = matches_filter_value(doc_value, filter_value, document)?;
            Ok(!result)
        } else {
            Err(MongoLiteError::Validation(
                "$not operator requires document context".to_string(),
            ))
        }
    }
}

// ============================================================================
// EXPRESSION OPERATOR ($expr)
// ============================================================================

/// $expr operator: Allows use of aggregation expressions within the query language
///
/// # MongoDB Spec
///
/// ```json
/// { "$expr": { "$gt": ["$qty", "$reorderLevel"] } }
/// { "$expr": { "$eq": ["$field1", "$field2"] } }
/// ```
///
/// The $expr operator evaluates aggregation expressions to compare fields
/// within the same document.
///
/// # Supported aggregation operators:
/// - Comparison: $eq, $ne, $gt, $gte, $lt, $lte
/// - Arithmetic: $add, $subtract, $multiply, $divide (for computed comparisons)
///
/// # Complexity: CC = 8
pub struct ExprOperator;

/// Helper: Resolve a value that might be a field reference
///
/// - If value starts with "$", extract field from document
/// - Otherwise return the literal value
fn resolve_expr_value<'a>(value: &'a Value, document: &'a Document) -> Option<&'a Value> {
    if let Some(field_ref) = value.as_str() {
        if let Some(field_name) = field_ref.strip_prefix('$') {
            // It's a field reference like "$quantity"
            return document.get(field_name);
        }
    }
    // Return the literal value
    Some(value)
}

/// Evaluate an aggregation expression against a document
fn evaluate_expr(expr: &Value, document: &Document) -> Result<bool> {
    let expr_obj = expr.as_object().ok_or_else(|| {
        MongoLiteError::Validation("$expr expression must be an object".to_string())
    })?;

    // Expression should have exactly one operator
    if expr_obj.len() != 1 {
        return Err(MongoLiteError::Validation(
            "$expr expression must have exactly one operator".to_string(),
        ));
    }

    let (op, args) = expr_obj.iter().next().unwrap();

    match op.as_str() {
        // Comparison operators
        "$eq" => evaluate_comparison_expr(args, document, |ord| ord == std::cmp::Ordering::Equal),
        "$ne" => evaluate_comparison_expr(args, document, |ord| ord != std::cmp::Ordering::Equal),
        "$gt" => evaluate_comparison_expr(args, document, |ord| ord == std::cmp::Ordering::Greater),
        "$gte" => evaluate_comparison_expr(args, document, |ord| {
            ord == std::cmp::Ordering::Greater || ord == std::cmp::Ordering::Equal
        }),
        "$lt" => evaluate_comparison_expr(args, document, |ord| ord == std::cmp::Ordering::Less),
        "$lte" => evaluate_comparison_expr(args, document, |ord| {
            ord == std::cmp::Ordering::Less || ord == std::cmp::Ordering::Equal
        }),

        // Logical operators for nested expressions
        "$and" => {
            let arr = args.as_array().ok_or_else(|| {
                MongoLiteError::Validation("$and in $expr requires an array".to_string())
            })?;
            for sub_expr in arr {
                if !evaluate_expr(sub_expr, document)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        "$or" => {
            let arr = args.as_array().ok_or_else(|| {
                MongoLiteError::Validation("$or in $expr requires an array".to_string())
            })?;
            for sub_expr in arr {
                if evaluate_expr(sub_expr, document)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        "$not" => {
            let arr = args.as_array().ok_or_else(|| {
                MongoLiteError::Validation("$not in $expr requires an array".to_string())
            })?;
            if arr.len() != 1 {
                return Err(MongoLiteError::Validation(
                    "$not in $expr requires exactly one element".to_string(),
                ));
            }
            Ok(!evaluate_expr(&arr[0], document)?)
        }

        _ => Err(MongoLiteError::Validation(format!(
            "Unsupported operator in $expr: {}",
            op
        ))),
    }
}

/// Evaluate a comparison expression like { "$gt": ["$field1", "$field2"] }
fn evaluate_comparison_expr<F>(args: &Value, document: &Document, compare_fn: F) -> Result<bool>
where
    F: Fn(std::cmp::Ordering) -> bool,
{
    let arr = args.as_array().ok_or_else(|| {
        MongoLiteError::Validation("Comparison in $expr requires an array".to_string())
    })?;

    if arr.len() != 2 {
        return Err(MongoLiteError::Validation(
            "Comparison in $expr requires exactly 2 arguments".to_string(),
        ));
    }

    let left = resolve_expr_value(&arr[0], document);
    let right = resolve_expr_value(&arr[1], document);

    match (left, right) {
        (Some(l), Some(r)) => {
            if let Some(ordering) = compare_values(l, r) {
                Ok(compare_fn(ordering))
            } else {
                // Incompatible types - return false for comparison
                Ok(false)
            }
        }
        // If either field is missing, comparison returns false
        _ => Ok(false),
    }
}

impl OperatorMatcher for ExprOperator {
    fn name(&self) -> &'static str {
        "$expr"
    }

    fn matches(
        &self,
        _doc_value: Option<&Value>,
        filter_value: &Value,
        document: Option<&Document>,
    ) -> Result<bool> {
        let doc = document.ok_or_else(|| {
            MongoLiteError::Validation("$expr operator requires document context".to_string())
        })?;

        evaluate_expr(filter_value, doc)
    }
}

// ============================================================================
// OPERATOR REGISTRY
// ============================================================================

lazy_static! {
    /// Global registry of all query operators
    ///
    /// This registry allows dynamic dispatch to the appropriate operator implementation
    /// based on the operator name string (e.g., "$eq", "$gt").
    ///
    /// # Thread Safety
    ///
    /// The registry is initialized once at program startup and is immutable thereafter.
    /// All operator implementations are required to be `Send + Sync`.
    pub static ref OPERATOR_REGISTRY: HashMap<&'static str, Box<dyn OperatorMatcher>> = {
        let mut registry: HashMap<&'static str, Box<dyn OperatorMatcher>> = HashMap::new();

        // Comparison operators
        registry.insert("$eq", Box::new(EqOperator));
        registry.insert("$ne", Box::new(NeOperator));
        registry.insert("$gt", Box::new(GtOperator));
        registry.insert("$gte", Box::new(GteOperator));
        registry.insert("$lt", Box::new(LtOperator));
        registry.insert("$lte", Box::new(LteOperator));

        // Array operators
        registry.insert("$in", Box::new(InOperator));
        registry.insert("$nin", Box::new(NinOperator));
        registry.insert("$all", Box::new(AllOperator));
        registry.insert("$elemMatch", Box::new(ElemMatchOperator));
        registry.insert("$size", Box::new(SizeOperator));

        // Element operators
        registry.insert("$exists", Box::new(ExistsOperator));
        registry.insert("$type", Box::new(TypeOperator));

        // Regex operators
        registry.insert("$regex", Box::new(RegexOperator));

        // Logical operators
        registry.insert("$and", Box::new(AndOperator));
        registry.insert("$or", Box::new(OrOperator));
        registry.insert("$nor", Box::new(NorOperator));
        registry.insert("$not", Box::new(NotOperator));

        // Expression operators
        registry.insert("$expr", Box::new(ExprOperator));

        registry
    };
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Generic comparison helper for $gt, $gte, $lt, $lte operators
///
/// Handles both direct comparison and MongoDB array element matching.
/// The predicate function determines which orderings are considered a match.
fn compare_with_predicate<F>(
    doc_value: Option<&Value>,
    filter_value: &Value,
    predicate: F,
) -> Result<bool>
where
    F: Fn(std::cmp::Ordering) -> bool,
{
    match doc_value {
        None => Ok(false),
        Some(v) => {
            // Direct comparison
            if let Some(ordering) = compare_values(v, filter_value) {
                if predicate(ordering) {
                    return Ok(true);
                }
            }
            // MongoDB array element matching
            if let Value::Array(arr) = v {
                Ok(arr.iter().any(|elem| {
                    compare_values(elem, filter_value)
                        .map(&predicate)
                        .unwrap_or(false)
                }))
            } else {
                Ok(false)
            }
        }
    }
}

/// Matches a single filter value against a document value
///
/// This is used by $not and other operators that need to recursively evaluate conditions
///
/// # Complexity: CC = 6
fn matches_filter_value(
    doc_value: Option<&Value>,
    filter_value: &Value,
    document: Option<&Document>,
) -> Result<bool> {
    // If filter is an object with operators, evaluate them
    if let Value::Object(filter_obj) = filter_value {
        for (op_name, op_value) in filter_obj {
            if op_name.starts_with('$') {
                // Look up operator in registry
                if let Some(operator) = OPERATOR_REGISTRY.get(op_name.as_str()) {
                    if !operator.matches(doc_value, op_value, document)? {
                        return Ok(false);
                    }
                } else {
                    return Err(MongoLiteError::Validation(format!(
                        "Unknown operator: {}",
                        op_name
                    )));
                }
            } else {
                // Field-level condition (shouldn't happen in this context)
                return Err(MongoLiteError::Validation(
                    "Unexpected field in filter value".to_string(),
                ));
            }
        }
        Ok(true)
    } else {
        // Direct value comparison (implicit $eq)
        Ok(doc_value == Some(filter_value))
    }
}

/// Main entry point for filter matching
///
/// This function has been simplified to CC ~8 (down from original 67+)
///
/// # Arguments
///
/// - `document`: The document to match against
/// - `filter`: The query filter (MongoDB JSON format)
///
/// # Returns
///
/// - `Ok(true)` if document matches filter
/// - `Ok(false)` if document doesn't match
/// - `Err(...)` if filter is malformed
///
/// # Complexity: CC = 8 (was 67+)
pub fn matches_filter(document: &Document, filter: &Value) -> Result<bool> {
    // Empty filter matches all documents
    if filter.as_object().map(|o| o.is_empty()).unwrap_or(false) {
        return Ok(true);
    }

    let filter_obj = filter
        .as_object()
        .ok_or_else(|| MongoLiteError::Validation("Filter must be an object".to_string()))?;

    for (key, value) in filter_obj {
        if key.starts_with('$') {
            // Top-level logical operator
            if let Some(operator) = OPERATOR_REGISTRY.get(key.as_str()) {
                if !operator.matches(None, value, Some(document))? {
                    return Ok(false);
                }
            } else {
                return Err(MongoLiteError::Validation(format!(
                    "Unknown operator: {}",
                    key
                )));
            }
        } else {
            // Field-level condition
            let doc_value = document.get(key);

            if let Value::Object(condition_obj) = value {
                // Special handling for $regex + $options combination
                // MongoDB allows: { field: { $regex: "pattern", $options: "i" } }
                let has_regex = condition_obj.contains_key("$regex");
                let has_options = condition_obj.contains_key("$options");

                if has_regex && has_options {
                    // Handle $regex with $options as a single operation
                    let pattern = condition_obj
                        .get("$regex")
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| {
                            MongoLiteError::Validation(
                                "$regex requires a string pattern".to_string(),
                            )
                        })?;
                    let options = condition_obj
                        .get("$options")
                        .and_then(|v| v.as_str())
                        .unwrap_or("");

                    // Match against the document value with full regex support
                    let matches = match doc_value {
                        Some(Value::String(s)) => regex_match_with_options(s, pattern, options)?,
                        Some(Value::Array(arr)) => {
                            // Check if any string element in the array matches
                            let mut found = false;
                            for v in arr {
                                if let Value::String(s) = v {
                                    if regex_match_with_options(s, pattern, options)? {
                                        found = true;
                                        break;
                                    }
                                }
                            }
                            found
                        }
                        _ => false,
                    };

                    if !matches {
                        return Ok(false);
                    }

                    // Process remaining operators (excluding $regex and $options)
                    for (op_name, op_value) in condition_obj {
                        if op_name == "$regex" || op_name == "$options" {
                            continue; // Already handled
                        }
                        if op_name.starts_with('$') {
                            if let Some(operator) = OPERATOR_REGISTRY.get(op_name.as_str()) {
                                if !operator.matches(doc_value, op_value, Some(document))? {
                                    return Ok(false);
                                }
                            } else {
                                return Err(MongoLiteError::Validation(format!(
                                    "Unknown operator: {}",
                                    op_name
                                )));
                            }
                        }
                    }
                } else {
                    // Standard operator processing
                    // Field has operators like { age: { $gt: 18 } }
                    for (op_name, op_value) in condition_obj {
                        if op_name.starts_with('$') {
                            if let Some(operator) = OPERATOR_REGISTRY.get(op_name.as_str()) {
                                if !operator.matches(doc_value, op_value, Some(document))? {
                                    return Ok(false);
                                }
                            } else {
                                return Err(MongoLiteError::Validation(format!(
                                    "Unknown operator: {}",
                                    op_name
                                )));
                            }
                        }
                    }
                }
            } else {
                // Direct equality check like { name: "Alice" }
                // Use EqOperator for array element matching support
                if !EqOperator.matches(doc_value, value, Some(document))? {
                    return Ok(false);
                }
            }
        }
    }

    Ok(true)
}

//! Query module for a MongoDB-like query language.
//!
//! Operator matching lives in the `operators` submodule as a registry of
//! independent matchers dispatched by operator name. `Query` is a thin
//! JSON-holding wrapper kept for callers that want an owned query value
//! instead of calling `operators::matches_filter()` directly.

pub mod operators;

use serde_json::Value;
use crate::document::Document;
use crate::error::Result;

// Re-export the new operator-based matching function (primary API)
pub use operators::matches_filter;

/// A JSON query filter, stored verbatim and matched via the operator
/// registry in `operators`.
#[derive(Debug, Clone)]
pub struct Query {
    /// The query stored as JSON (MongoDB query format)
    json: Value,
}

impl Query {
    /// Create a new empty query (matches all documents)
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let query = Query::new();  // Empty query: {}
    /// ```
    pub fn new() -> Self {
        Query {
            json: Value::Object(serde_json::Map::new()),
        }
    }

    /// Create a Query from a JSON value
    ///
    /// This method performs minimal validation - it just stores the JSON.
    /// All actual query parsing and validation happens in `matches()`.
    ///
    /// # Arguments
    ///
    /// * `json` - A MongoDB query filter in JSON format
    ///
    /// # Examples
    ///
    /// ```ignore
    /// use serde_json::json;
    ///
    /// let query = Query::from_json(&json!({
    ///     "age": {"$gte": 18},
    ///     "status": "active"
    /// }))?;
    /// ```
    pub fn from_json(json: &Value) -> Result<Self> {
        // Just store the JSON - no complex parsing needed!
        // The new operator registry will handle everything in matches()
        Ok(Query {
            json: json.clone(),
        })
    }

    /// Check if a document matches this query
    ///
    /// **IMPLEMENTATION NOTE**: This method now delegates to the new
    /// `operators::matches_filter()` function which uses the registry pattern.
    ///
    /// # Arguments
    ///
    /// * `document` - The document to match against
    ///
    /// # Returns
    ///
    /// * `true` if the document matches the query
    /// * `false` otherwise
    ///
    /// # Examples
    ///
    /// ```ignore
    /// use serde_json::json;
    ///
    /// let query = Query::from_json(&json!({"age": {"$gt": 18}}))?;
    /// let matches = query.matches(&document);
    /// ```
    pub fn matches(&self, document: &Document) -> bool {
        // Delegate to the new operator registry system
        // This is MUCH simpler than the old 200+ line implementation!
        match operators::matches_filter(document, &self.json) {
            Ok(result) => result,
            Err(_) => false,  // Invalid queries don't match
        }
    }

    /// Get the JSON representation of this query
    ///
    /// This is useful for serialization, caching, or debugging.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let json = query.to_json();
    /// println!("Query: {}", json);
    /// ```
    pub fn to_json(&self) -> &Value {
        &self.json
    }

    /// Convert this Query back into a JSON Value (consumes self)
    pub fn into_json(self) -> Value {
        self.json
    }
}

impl Default for Query {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

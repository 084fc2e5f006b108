//! Cursor: a lazy, clonable, sortable, skippable,
//! limitable view over a snapshot of matching documents.
//!
//! Results are computed from a deferred snapshot factory the first time
//! they're needed (iteration, count, indexing) rather than at construction,
//! and the computed list is memoized until the factory is rebound.

use crate::document::Document;
use crate::error::Result;
use crate::projection::Projection;
use crate::query::operators::matches_filter;
use crate::value_utils::compare_values_with_none;
use serde_json::Value;
use std::sync::Arc;

/// A `(key, direction)` pair; `direction` is `1` for ascending, `-1` for
/// descending. The key `$natural` means insertion order.
pub type SortSpec = Vec<(String, i32)>;

/// Produces a fresh snapshot of a collection's documents at the moment it is
/// called. Read operations don't hold a lock; they close over this factory
/// and only touch collection state when the cursor is first consumed.
pub type SnapshotFactory = Arc<dyn Fn() -> Vec<Document> + Send + Sync>;

pub struct Cursor {
    factory: SnapshotFactory,
    filter: Value,
    sort: Option<SortSpec>,
    projection: Option<Projection>,
    skip: usize,
    limit: Option<usize>,
    memo: Option<Vec<Document>>,
}

impl Cursor {
    pub fn new(factory: SnapshotFactory, filter: Value) -> Self {
        Cursor {
            factory,
            filter,
            sort: None,
            projection: None,
            skip: 0,
            limit: None,
            memo: None,
        }
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        if !projection.is_empty() {
            self.projection = Some(projection);
        }
        self.memo = None;
        self
    }

    /// Rebinding the sort invalidates the memoized result (see the module
    /// memoization: "tied to the identity of its factory; rebinding... via
    /// `sort()` invalidates the cache").
    pub fn sort(mut self, keys: SortSpec) -> Self {
        self.sort = Some(keys);
        self.memo = None;
        self
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.skip = n;
        self.memo = None;
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self.memo = None;
        self
    }

    /// No-op: batching is a wire-protocol concern this in-memory engine
    /// doesn't have.
    pub fn batch_size(self, _n: usize) -> Self {
        self
    }

    pub fn clone_cursor(&self) -> Self {
        Cursor {
            factory: Arc::clone(&self.factory),
            filter: self.filter.clone(),
            sort: self.sort.clone(),
            projection: None,
            skip: self.skip,
            limit: self.limit,
            memo: None,
        }
    }

    pub fn rewind(&mut self) {
        self.memo = None;
    }

    /// Compute (if not already memoized) and return the matching, sorted,
    /// skipped, limited, projected document list.
    pub fn to_vec(&mut self) -> Result<Vec<Document>> {
        if let Some(memo) = &self.memo {
            return Ok(memo.clone());
        }

        let snapshot = (self.factory)();
        let mut matched: Vec<Document> = snapshot
            .into_iter()
            .filter(|doc| matches_filter(doc, &self.filter).unwrap_or(false))
            .collect();

        if let Some(sort) = &self.sort {
            apply_sort(&mut matched, sort);
        }

        let start = self.skip.min(matched.len());
        let end = match self.limit {
            Some(n) => (start + n).min(matched.len()),
            None => matched.len(),
        };
        let mut page: Vec<Document> = matched.drain(start..end).collect();

        if let Some(projection) = &self.projection {
            let mut projected = Vec::with_capacity(page.len());
            for doc in page.drain(..) {
                projected.push(projection.apply(&doc)?);
            }
            page = projected;
        }

        self.memo = Some(page.clone());
        Ok(page)
    }

    pub fn count(&mut self) -> Result<usize> {
        Ok(self.to_vec()?.len())
    }

    /// Distinct values of `key` across matching documents, preserving
    /// insertion order of first occurrence.
    pub fn distinct(&mut self, key: &str) -> Result<Vec<Value>> {
        let docs = self.to_vec()?;
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for doc in docs {
            if let Some(v) = doc.get(key) {
                let marker = crate::value_utils::canonical_key(v);
                if seen.insert(marker) {
                    out.push(v.clone());
                }
            }
        }
        Ok(out)
    }
}

/// Multi-key stable sort, pairs applied in reverse order ("a list of
/// (key, direction) pairs applied in reverse order to produce a stable
/// multi-key sort"), with `$natural` meaning insertion order.
pub(crate) fn apply_sort(docs: &mut [Document], sort: &SortSpec) {
    for (key, direction) in sort.iter().rev() {
        if key == "$natural" {
            if *direction < 0 {
                docs.reverse();
            }
            continue;
        }
        docs.sort_by(|a, b| {
            let ord = compare_values_with_none(a.get(key), b.get(key));
            if *direction < 0 {
                ord.reverse()
            } else {
                ord
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn docs(values: Vec<Value>) -> Vec<Document> {
        values.into_iter().map(|v| Document::from_value(&v).unwrap()).collect()
    }

    fn cursor_over(values: Vec<Value>, filter: Value) -> Cursor {
        let data = docs(values);
        let factory: SnapshotFactory = Arc::new(move || data.clone());
        Cursor::new(factory, filter)
    }

    #[test]
    fn lazy_evaluation_is_memoized() {
        let mut cursor = cursor_over(vec![json!({"_id": 1, "a": 1})], json!({}));
        let first = cursor.to_vec().unwrap();
        let second = cursor.to_vec().unwrap();
        assert_eq!(first.len(), second.len());
    }

    #[test]
    fn filter_is_applied() {
        let mut cursor = cursor_over(
            vec![json!({"_id": 1, "a": 1}), json!({"_id": 2, "a": 2})],
            json!({"a": 2}),
        );
        let out = cursor.to_vec().unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("_id"), Some(&json!(2)));
    }

    #[test]
    fn sort_ascending_and_descending() {
        let values = vec![
            json!({"_id": 1, "age": 30}),
            json!({"_id": 2, "age": 20}),
            json!({"_id": 3, "age": 25}),
        ];
        let mut cursor = cursor_over(values.clone(), json!({})).sort(vec![("age".to_string(), 1)]);
        let out = cursor.to_vec().unwrap();
        assert_eq!(out.iter().map(|d| d.get("age").cloned()).collect::<Vec<_>>(),
            vec![Some(json!(20)), Some(json!(25)), Some(json!(30))]);

        let mut cursor = cursor_over(values, json!({})).sort(vec![("age".to_string(), -1)]);
        let out = cursor.to_vec().unwrap();
        assert_eq!(out[0].get("age"), Some(&json!(30)));
    }

    #[test]
    fn missing_sort_key_sorts_before_present() {
        let values = vec![
            json!({"_id": 1, "age": 30}),
            json!({"_id": 2}),
            json!({"_id": 3, "age": 10}),
        ];
        let mut cursor = cursor_over(values, json!({})).sort(vec![("age".to_string(), 1)]);
        let out = cursor.to_vec().unwrap();
        assert_eq!(out[0].get("_id"), Some(&json!(2)));
    }

    #[test]
    fn skip_and_limit() {
        let values: Vec<Value> = (0..5).map(|i| json!({"_id": i})).collect();
        let mut cursor = cursor_over(values, json!({})).skip(1).limit(2);
        let out = cursor.to_vec().unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].get("_id"), Some(&json!(1)));
        assert_eq!(out[1].get("_id"), Some(&json!(2)));
    }

    #[test]
    fn natural_sort_is_insertion_order_and_reverses() {
        let values: Vec<Value> = (0..3).map(|i| json!({"_id": i})).collect();
        let mut cursor = cursor_over(values.clone(), json!({})).sort(vec![("$natural".to_string(), -1)]);
        let out = cursor.to_vec().unwrap();
        assert_eq!(out[0].get("_id"), Some(&json!(2)));
    }

    #[test]
    fn distinct_preserves_first_occurrence_order() {
        let values = vec![
            json!({"_id": 1, "city": "NYC"}),
            json!({"_id": 2, "city": "LA"}),
            json!({"_id": 3, "city": "NYC"}),
        ];
        let mut cursor = cursor_over(values, json!({}));
        let out = cursor.distinct("city").unwrap();
        assert_eq!(out, vec![json!("NYC"), json!("LA")]);
    }

    #[test]
    fn rebinding_sort_invalidates_memo() {
        let values = vec![json!({"_id": 1, "a": 2}), json!({"_id": 2, "a": 1})];
        let mut cursor = cursor_over(values, json!({}));
        let _ = cursor.to_vec().unwrap();
        let mut cursor = cursor.sort(vec![("a".to_string(), 1)]);
        let out = cursor.to_vec().unwrap();
        assert_eq!(out[0].get("a"), Some(&json!(1)));
    }
}

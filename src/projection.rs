//! Projection engine: normalize an include/exclude spec into a nested tree,
//! then apply it to a document. Dotted keys like `{"b.c": 1, "b.d": 1}`
//! combine into a nested `{b: {c, d}}` tree before application, and
//! `$elemMatch` is supported as a projection operator.

use crate::document::Document;
use crate::error::{MongoLiteError, Result};
use crate::query::operators::matches_filter;
use indexmap::IndexMap;
use serde_json::{Map, Value};

#[derive(Debug, Clone)]
enum ProjNode {
    Leaf(bool),
    ElemMatch(Value),
    Tree(IndexMap<String, ProjNode>),
}

pub struct Projection {
    tree: IndexMap<String, ProjNode>,
    include_mode: bool,
    id_included: bool,
}

impl Projection {
    /// Normalize a raw projection spec in three passes.
    pub fn normalize(spec: &Value) -> Result<Self> {
        let spec = spec
            .as_object()
            .ok_or_else(|| MongoLiteError::Validation("projection must be a document".to_string()))?;

        if spec.is_empty() {
            return Ok(Projection {
                tree: IndexMap::new(),
                include_mode: true,
                id_included: true,
            });
        }

        // Pass 1 + 2: extract operators and combine dotted paths into a tree.
        let mut tree: IndexMap<String, ProjNode> = IndexMap::new();
        for (path, value) in spec.iter() {
            if path.contains('$') && path != "_id" {
                if path.split('.').any(|p| p == "$") {
                    return Err(MongoLiteError::NotImplemented(
                        "positional projection ('$' as a key) is not supported".to_string(),
                    ));
                }
            }

            let leaf = match value {
                Value::Object(obj) => {
                    if obj.len() == 1 && obj.contains_key("$elemMatch") {
                        ProjNode::ElemMatch(obj.get("$elemMatch").unwrap().clone())
                    } else {
                        return Err(MongoLiteError::Validation(format!(
                            "invalid projection operator for field '{path}'"
                        )));
                    }
                }
                other => ProjNode::Leaf(truthy(other)),
            };

            insert_path(&mut tree, path, leaf)?;
        }

        // Pass 3: validate mode (ignoring _id).
        let mut saw_include = false;
        let mut saw_exclude = false;
        for (key, node) in tree.iter() {
            if key == "_id" {
                continue;
            }
            collect_modes(node, &mut saw_include, &mut saw_exclude);
        }
        if saw_include && saw_exclude {
            return Err(MongoLiteError::Validation(
                "projection cannot mix inclusion and exclusion".to_string(),
            ));
        }
        let include_mode = !saw_exclude;

        let id_included = match tree.get("_id") {
            Some(ProjNode::Leaf(b)) => *b,
            _ => true,
        };

        Ok(Projection {
            tree,
            include_mode,
            id_included,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn apply(&self, doc: &Document) -> Result<Document> {
        if self.tree.is_empty() {
            return Ok(doc.clone());
        }

        let source = Value::Object(doc.fields.clone());
        let mut out = if self.include_mode {
            let mut result = Map::new();
            for (key, node) in self.tree.iter() {
                if key == "_id" {
                    continue;
                }
                if let Some(value) = source.get(key) {
                    let projected = apply_node(node, value)?;
                    if let Some(v) = projected {
                        result.insert(key.clone(), v);
                    }
                }
            }
            result
        } else {
            let mut result = doc.fields.clone();
            for (key, node) in self.tree.iter() {
                if key == "_id" {
                    continue;
                }
                apply_exclusion(&mut result, key, node);
            }
            result
        };

        if self.id_included {
            if let Some(id) = doc.fields.get("_id") {
                if !out.contains_key("_id") {
                    out.insert("_id".to_string(), id.clone());
                }
            }
        } else {
            out.remove("_id");
        }

        Ok(Document::from_object(out))
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::Bool(b) => *b,
        Value::Null => false,
        _ => true,
    }
}

fn insert_path(tree: &mut IndexMap<String, ProjNode>, path: &str, leaf: ProjNode) -> Result<()> {
    let parts: Vec<&str> = path.split('.').collect();
    insert_parts(tree, &parts, leaf)
}

fn insert_parts(tree: &mut IndexMap<String, ProjNode>, parts: &[&str], leaf: ProjNode) -> Result<()> {
    let (head, rest) = (parts[0], &parts[1..]);

    if rest.is_empty() {
        match tree.get(head) {
            Some(ProjNode::Tree(_)) => {
                return Err(MongoLiteError::Validation(format!(
                    "conflicting projection spec at '{head}'"
                )));
            }
            _ => {
                tree.insert(head.to_string(), leaf);
            }
        }
        return Ok(());
    }

    match tree.get_mut(head) {
        Some(ProjNode::Tree(sub)) => insert_parts(sub, rest, leaf),
        Some(ProjNode::Leaf(_)) | Some(ProjNode::ElemMatch(_)) => Err(MongoLiteError::Validation(
            format!("conflicting projection spec at '{head}'"),
        )),
        None => {
            let mut sub = IndexMap::new();
            insert_parts(&mut sub, rest, leaf)?;
            tree.insert(head.to_string(), ProjNode::Tree(sub));
            Ok(())
        }
    }
}

fn collect_modes(node: &ProjNode, saw_include: &mut bool, saw_exclude: &mut bool) {
    match node {
        ProjNode::Leaf(true) => *saw_include = true,
        ProjNode::Leaf(false) => *saw_exclude = true,
        ProjNode::ElemMatch(_) => *saw_include = true,
        ProjNode::Tree(sub) => {
            for n in sub.values() {
                collect_modes(n, saw_include, saw_exclude);
            }
        }
    }
}

/// Apply an include-mode node to the source value at its path, returning
/// `None` when nothing should be written (e.g. `$elemMatch` with no match).
fn apply_node(node: &ProjNode, value: &Value) -> Result<Option<Value>> {
    match node {
        ProjNode::Leaf(true) => Ok(Some(value.clone())),
        ProjNode::Leaf(false) => Ok(None),
        ProjNode::ElemMatch(query) => Ok(apply_elem_match(query, value)?),
        ProjNode::Tree(sub) => match value {
            Value::Array(arr) => {
                let mut out = Vec::with_capacity(arr.len());
                for elem in arr {
                    out.push(apply_subtree(sub, elem)?);
                }
                Ok(Some(Value::Array(out)))
            }
            Value::Object(_) => Ok(Some(apply_subtree(sub, value)?)),
            _ => Ok(None),
        },
    }
}

fn apply_subtree(sub: &IndexMap<String, ProjNode>, value: &Value) -> Result<Value> {
    let mut result = Map::new();
    for (key, node) in sub.iter() {
        if let Some(field_value) = value.get(key) {
            if let Some(projected) = apply_node(node, field_value)? {
                result.insert(key.clone(), projected);
            }
        }
    }
    Ok(Value::Object(result))
}

fn apply_elem_match(query: &Value, value: &Value) -> Result<Option<Value>> {
    let arr = match value.as_array() {
        Some(a) => a,
        None => return Ok(None),
    };
    for elem in arr {
        let wrapped = Document::from_value(elem).unwrap_or_else(|_| {
            let mut m = Map::new();
            m.insert("value".to_string(), elem.clone());
            Document::from_object(m)
        });
        if matches_filter(&wrapped, query).unwrap_or(false) {
            return Ok(Some(Value::Array(vec![elem.clone()])));
        }
    }
    Ok(None)
}

fn apply_exclusion(fields: &mut Map<String, Value>, key: &str, node: &ProjNode) {
    match node {
        ProjNode::Leaf(false) => {
            fields.remove(key);
        }
        ProjNode::Leaf(true) => {}
        ProjNode::ElemMatch(_) => {}
        ProjNode::Tree(sub) => {
            if let Some(value) = fields.get_mut(key) {
                match value {
                    Value::Object(obj) => {
                        for (sub_key, sub_node) in sub.iter() {
                            apply_exclusion(obj, sub_key, sub_node);
                        }
                    }
                    Value::Array(arr) => {
                        for elem in arr.iter_mut() {
                            if let Value::Object(obj) = elem {
                                for (sub_key, sub_node) in sub.iter() {
                                    apply_exclusion(obj, sub_key, sub_node);
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        Document::from_value(&v).unwrap()
    }

    #[test]
    fn include_mode_keeps_id_by_default() {
        let d = doc(json!({"_id": 1, "name": "Alice", "age": 30}));
        let proj = Projection::normalize(&json!({"name": 1})).unwrap();
        let out = proj.apply(&d).unwrap();
        assert_eq!(out.get("name"), Some(&json!("Alice")));
        assert_eq!(out.get("_id"), Some(&json!(1)));
        assert!(out.get("age").is_none());
    }

    #[test]
    fn explicit_id_zero_removes_id() {
        let d = doc(json!({"_id": 1, "name": "Alice"}));
        let proj = Projection::normalize(&json!({"name": 1, "_id": 0})).unwrap();
        let out = proj.apply(&d).unwrap();
        assert!(out.get("_id").is_none());
    }

    #[test]
    fn combines_dotted_paths_into_nested_tree() {
        let d = doc(json!({"_id": 1, "a": 1, "b": {"c": 2, "d": 3}, "e": 4}));
        let proj = Projection::normalize(&json!({"b.c": 1})).unwrap();
        let out = proj.apply(&d).unwrap();
        assert_eq!(out.get("b"), Some(&json!({"c": 2})));
        assert!(out.get("a").is_none());
        assert!(out.get("e").is_none());
    }

    #[test]
    fn exclude_mode_removes_named_fields() {
        let d = doc(json!({"_id": 1, "name": "Alice", "age": 30, "city": "NYC"}));
        let proj = Projection::normalize(&json!({"city": 0})).unwrap();
        let out = proj.apply(&d).unwrap();
        assert!(out.get("city").is_none());
        assert_eq!(out.get("name"), Some(&json!("Alice")));
        assert_eq!(out.get("_id"), Some(&json!(1)));
    }

    #[test]
    fn mixing_include_and_exclude_fails() {
        let err = Projection::normalize(&json!({"a": 1, "b": 0})).unwrap_err();
        assert!(matches!(err, MongoLiteError::Validation(_)));
    }

    #[test]
    fn id_zero_with_other_excludes_is_not_a_mix_violation() {
        let d = doc(json!({"_id": 1, "a": 1, "b": 2}));
        let proj = Projection::normalize(&json!({"a": 0, "_id": 0})).unwrap();
        let out = proj.apply(&d).unwrap();
        assert!(out.get("a").is_none());
        assert_eq!(out.get("b"), Some(&json!(2)));
        assert!(out.get("_id").is_none());
    }

    #[test]
    fn unsupported_operator_fails() {
        let err = Projection::normalize(&json!({"a": {"$slice": 1}})).unwrap_err();
        assert!(matches!(err, MongoLiteError::Validation(_)));
    }

    #[test]
    fn positional_projection_not_supported() {
        let err = Projection::normalize(&json!({"arr.$": 1})).unwrap_err();
        assert!(matches!(err, MongoLiteError::NotImplemented(_)));
    }

    #[test]
    fn elem_match_keeps_first_matching_element() {
        let d = doc(json!({"_id": 1, "arr": [{"k": 1}, {"k": 2}, {"k": 2}]}));
        let proj = Projection::normalize(&json!({"arr": {"$elemMatch": {"k": 2}}})).unwrap();
        let out = proj.apply(&d).unwrap();
        assert_eq!(out.get("arr"), Some(&json!([{"k": 2}])));
    }

    #[test]
    fn elem_match_drops_field_when_no_match() {
        let d = doc(json!({"_id": 1, "arr": [{"k": 1}]}));
        let proj = Projection::normalize(&json!({"arr": {"$elemMatch": {"k": 99}}})).unwrap();
        let out = proj.apply(&d).unwrap();
        assert!(out.get("arr").is_none());
    }

    #[test]
    fn projection_is_idempotent() {
        let d = doc(json!({"_id": 1, "a": 1, "b": {"c": 2, "d": 3}}));
        let proj = Projection::normalize(&json!({"b.c": 1})).unwrap();
        let once = proj.apply(&d).unwrap();
        let twice = proj.apply(&once).unwrap();
        assert_eq!(once.to_value(), twice.to_value());
    }
}

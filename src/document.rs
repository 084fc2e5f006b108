// src/document.rs
use crate::value_utils::canonical_key;
use serde_json::{Map, Value};
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// An ordered document: a string-keyed map preserving insertion order, always
/// carrying an `_id` entry once it has been stored in a collection.
///
/// Unlike an ad-hoc `HashMap<String, Value>`, `fields` keeps `_id` alongside
/// every other field instead of pulling it out into a side channel — the
/// `#[serde(flatten)]` + `#[serde(rename = "_id")]` split used to need a
/// manual re-insertion workaround after every deserialize; storing `_id` as
/// just another ordered field removes the seam entirely.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub fields: Map<String, Value>,
}

/// The `_id` value of a document, with the hashable/orderable identity
/// MongoDB gives an `_id`: scalars compare by value, a mapping-valued `_id`
/// compares by a canonical ordering of its entries.
#[derive(Debug, Clone)]
pub enum DocumentId {
    Int(i64),
    Float(f64),
    String(String),
    ObjectId(String),
    Bool(bool),
    Null,
    Document(Value),
}

impl DocumentId {
    pub fn new_auto(last_id: u64) -> Self {
        DocumentId::Int((last_id + 1) as i64)
    }

    pub fn new_object_id() -> Self {
        DocumentId::ObjectId(Uuid::new_v4().to_string())
    }

    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => DocumentId::Null,
            Value::Bool(b) => DocumentId::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    DocumentId::Int(i)
                } else {
                    DocumentId::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => DocumentId::String(s.clone()),
            Value::Object(_) => DocumentId::Document(value.clone()),
            Value::Array(_) => DocumentId::Document(value.clone()),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            DocumentId::Int(i) => Value::from(*i),
            DocumentId::Float(f) => Value::from(*f),
            DocumentId::String(s) => Value::from(s.clone()),
            DocumentId::ObjectId(s) => Value::from(s.clone()),
            DocumentId::Bool(b) => Value::from(*b),
            DocumentId::Null => Value::Null,
            DocumentId::Document(v) => v.clone(),
        }
    }

    /// A string uniquely determined by value, used as the collection's
    /// internal lookup key. Satisfies the "canonical hash of the dict's
    /// entries" requirement for mapping-valued `_id`s without discarding the
    /// caller's original key order when the id is read back out.
    pub fn canonical_key(&self) -> String {
        canonical_key(&self.to_value())
    }
}

impl PartialEq for DocumentId {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_key() == other.canonical_key()
    }
}
impl Eq for DocumentId {}

impl Hash for DocumentId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical_key().hash(state);
    }
}

impl Document {
    pub fn new(id: DocumentId, mut fields: Map<String, Value>) -> Self {
        fields.insert("_id".to_string(), id.to_value());
        Document { fields }
    }

    /// Wrap a JSON object as a document as-is, without touching `_id`.
    /// Callers that need an `_id` assigned use `Collection::insert`.
    pub fn from_object(fields: Map<String, Value>) -> Self {
        Document { fields }
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> serde_json::Result<Self> {
        match value {
            Value::Object(map) => Ok(Document {
                fields: map.clone(),
            }),
            _ => Err(serde::de::Error::custom("document must be a JSON object")),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&Value::Object(self.fields.clone()))
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn id(&self) -> DocumentId {
        match self.fields.get("_id") {
            Some(v) => DocumentId::from_value(v),
            None => DocumentId::Null,
        }
    }

    pub fn id_value(&self) -> Value {
        self.fields.get("_id").cloned().unwrap_or(Value::Null)
    }

    /// Field lookup with MongoDB dotted-path semantics: a mapping
    /// indexes by key, a sequence indexes by parsed-integer component.
    pub fn get(&self, field: &str) -> Option<&Value> {
        if field.is_empty() {
            return None;
        }
        if !field.contains('.') {
            return self.fields.get(field);
        }
        let mut parts = field.split('.');
        let mut value = self.fields.get(parts.next().unwrap())?;
        for part in parts {
            value = step_into(value, part)?;
        }
        Some(value)
    }

    pub fn set(&mut self, field: String, value: Value) {
        self.fields.insert(field, value);
    }

    /// Set a value at a dotted path, creating missing
    /// intermediate mappings and indexing into arrays for integer
    /// components.
    pub fn set_nested(&mut self, field: &str, value: Value) {
        if !field.contains('.') {
            self.fields.insert(field.to_string(), value);
            return;
        }

        let parts: Vec<&str> = field.split('.').collect();
        let first = parts[0];

        if !self.fields.contains_key(first) {
            let nested = create_nested_value(&parts[1..], value);
            self.fields.insert(first.to_string(), nested);
            return;
        }

        let root = self.fields.get_mut(first).unwrap();
        set_value_at_path(root, &parts[1..], value);
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Delete the leaf at a dotted path. A missing parent is a no-op,
    /// matching `$unset`'s contract.
    pub fn remove_nested(&mut self, field: &str) -> Option<Value> {
        if !field.contains('.') {
            return self.fields.remove(field);
        }

        let parts: Vec<&str> = field.split('.').collect();
        let first = parts[0];

        let root = self.fields.get_mut(first)?;
        remove_value_at_path(root, &parts[1..])
    }

    pub fn get_mut_nested(&mut self, field: &str) -> Option<&mut Value> {
        if field.is_empty() {
            return None;
        }
        if !field.contains('.') {
            return self.fields.get_mut(field);
        }

        let parts: Vec<&str> = field.split('.').collect();
        let mut current = self.fields.get_mut(parts[0])?;
        for part in &parts[1..] {
            current = match current {
                Value::Object(map) => map.get_mut(*part)?,
                Value::Array(arr) => {
                    let index = part.parse::<usize>().ok()?;
                    arr.get_mut(index)?
                }
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }
}

fn step_into<'a>(value: &'a Value, part: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(part),
        Value::Array(arr) => arr.get(part.parse::<usize>().ok()?),
        _ => None,
    }
}

fn create_nested_value(parts: &[&str], value: Value) -> Value {
    if parts.is_empty() {
        return value;
    }
    let mut obj = Map::new();
    obj.insert(parts[0].to_string(), create_nested_value(&parts[1..], value));
    Value::Object(obj)
}

fn set_value_at_path(current: &mut Value, parts: &[&str], value: Value) {
    if parts.is_empty() {
        return;
    }

    if parts.len() == 1 {
        match current {
            Value::Object(map) => {
                map.insert(parts[0].to_string(), value);
            }
            Value::Array(arr) => {
                if let Ok(index) = parts[0].parse::<usize>() {
                    while arr.len() <= index {
                        arr.push(Value::Null);
                    }
                    arr[index] = value;
                }
            }
            _ => {
                let mut obj = Map::new();
                obj.insert(parts[0].to_string(), value);
                *current = Value::Object(obj);
            }
        }
        return;
    }

    match current {
        Value::Object(map) => {
            if !map.contains_key(parts[0]) {
                map.insert(
                    parts[0].to_string(),
                    create_nested_value(&parts[1..], value),
                );
            } else {
                let next = map.get_mut(parts[0]).unwrap();
                set_value_at_path(next, &parts[1..], value);
            }
        }
        Value::Array(arr) => {
            if let Ok(index) = parts[0].parse::<usize>() {
                while arr.len() <= index {
                    arr.push(Value::Null);
                }
                set_value_at_path(&mut arr[index], &parts[1..], value);
            }
        }
        _ => {
            *current = create_nested_value(parts, value);
        }
    }
}

fn remove_value_at_path(current: &mut Value, parts: &[&str]) -> Option<Value> {
    if parts.is_empty() {
        return None;
    }

    if parts.len() == 1 {
        match current {
            Value::Object(map) => map.remove(parts[0]),
            Value::Array(arr) => {
                let index = parts[0].parse::<usize>().ok()?;
                if index < arr.len() {
                    Some(arr.remove(index))
                } else {
                    None
                }
            }
            _ => None,
        }
    } else {
        match current {
            Value::Object(map) => {
                let next = map.get_mut(parts[0])?;
                remove_value_at_path(next, &parts[1..])
            }
            Value::Array(arr) => {
                let index = parts[0].parse::<usize>().ok()?;
                let next = arr.get_mut(index)?;
                remove_value_at_path(next, &parts[1..])
            }
            _ => None,
        }
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Object(doc.fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc_with(fields: Vec<(&str, Value)>) -> Document {
        let mut map = Map::new();
        for (k, v) in fields {
            map.insert(k.to_string(), v);
        }
        Document::from_object(map)
    }

    #[test]
    fn document_id_equality_across_variants() {
        assert_eq!(DocumentId::Int(42), DocumentId::Int(42));
        assert_ne!(DocumentId::Int(42), DocumentId::Int(99));
        assert_ne!(DocumentId::Int(1), DocumentId::String("1".to_string()));
    }

    #[test]
    fn document_id_dict_canonicalizes_by_entries() {
        let a = DocumentId::from_value(&json!({"x": 1, "y": 2}));
        let b = DocumentId::from_value(&json!({"y": 2, "x": 1}));
        assert_eq!(a, b, "dict-valued _id compares by canonical entries, not key order");
    }

    #[test]
    fn new_auto_increments() {
        assert_eq!(DocumentId::new_auto(0), DocumentId::Int(1));
        assert_eq!(DocumentId::new_auto(99), DocumentId::Int(100));
    }

    #[test]
    fn new_object_id_is_uuid_v4() {
        match DocumentId::new_object_id() {
            DocumentId::ObjectId(s) => {
                assert_eq!(s.len(), 36);
                assert!(s.contains('-'));
            }
            _ => panic!("expected ObjectId"),
        }
    }

    #[test]
    fn get_top_level_and_missing() {
        let doc = doc_with(vec![("name", json!("Bob")), ("email", json!("bob@example.com"))]);
        assert_eq!(doc.get("name").unwrap(), &json!("Bob"));
        assert!(doc.get("nonexistent").is_none());
    }

    #[test]
    fn id_is_addressable_like_any_other_field() {
        let doc = Document::new(DocumentId::Int(1), Map::new());
        assert_eq!(doc.get("_id").unwrap(), &json!(1));
        assert_eq!(doc.id(), DocumentId::Int(1));
    }

    #[test]
    fn get_dotted_path_through_object_and_array() {
        let doc = doc_with(vec![(
            "address",
            json!({"city": "Budapest", "zip": 1111}),
        )]);
        assert_eq!(doc.get("address.city").unwrap(), &json!("Budapest"));

        let doc = doc_with(vec![("items", json!([{"name": "item1"}, {"name": "item2"}]))]);
        assert_eq!(doc.get("items.0.name").unwrap(), &json!("item1"));
        assert_eq!(doc.get("items.5.name"), None);
    }

    #[test]
    fn set_nested_creates_missing_intermediates() {
        let mut doc = doc_with(vec![]);
        doc.set_nested("a.b.c", json!(42));
        assert_eq!(doc.get("a.b.c").unwrap(), &json!(42));
    }

    #[test]
    fn set_nested_overwrites_existing_leaf() {
        let mut doc = doc_with(vec![("a", json!({"b": 1}))]);
        doc.set_nested("a.b", json!(2));
        assert_eq!(doc.get("a.b").unwrap(), &json!(2));
    }

    #[test]
    fn remove_nested_is_noop_on_missing_parent() {
        let mut doc = doc_with(vec![("a", json!(1))]);
        assert_eq!(doc.remove_nested("missing.path"), None);
        assert_eq!(doc.get("a").unwrap(), &json!(1));
    }

    #[test]
    fn remove_nested_deletes_leaf() {
        let mut doc = doc_with(vec![("a", json!({"b": 1, "c": 2}))]);
        let removed = doc.remove_nested("a.b");
        assert_eq!(removed, Some(json!(1)));
        assert_eq!(doc.get("a.c").unwrap(), &json!(2));
        assert!(doc.get("a.b").is_none());
    }

    #[test]
    fn fields_preserve_insertion_order() {
        let mut map = Map::new();
        map.insert("z".to_string(), json!(1));
        map.insert("a".to_string(), json!(2));
        map.insert("m".to_string(), json!(3));
        let doc = Document::from_object(map);
        let keys: Vec<&String> = doc.fields.keys().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn to_value_roundtrips_through_json() {
        let doc = doc_with(vec![("name", json!("Grace")), ("tags", json!(["rust", "db"]))]);
        let value = doc.to_value();
        let restored = Document::from_value(&value).unwrap();
        assert_eq!(restored.get("name"), doc.get("name"));
        assert_eq!(restored.get("tags"), doc.get("tags"));
    }
}

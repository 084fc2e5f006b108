//! Unique-index table: one key-tuple set per unique index, one value per
//! indexed field (`null` if the field is absent).

use crate::document::Document;
use crate::error::{MongoLiteError, Result};
use crate::value_utils::canonical_key;
use indexmap::IndexMap;
use std::collections::HashSet;

pub const ID_INDEX_NAME: &str = "_id_";

#[derive(Debug, Clone)]
pub struct IndexDescriptor {
    pub name: String,
    pub keys: Vec<(String, i32)>,
    pub unique: bool,
    pub sparse: bool,
}

/// Derive mongo's conventional index name: `field_dir_field_dir…`.
pub fn derive_name(keys: &[(String, i32)]) -> String {
    keys.iter()
        .map(|(field, dir)| format!("{}_{}", field, dir))
        .collect::<Vec<_>>()
        .join("_")
}

pub struct IndexManager {
    descriptors: IndexMap<String, IndexDescriptor>,
    unique_tables: IndexMap<String, HashSet<Vec<String>>>,
}

impl Default for IndexManager {
    fn default() -> Self {
        let mut descriptors = IndexMap::new();
        descriptors.insert(
            ID_INDEX_NAME.to_string(),
            IndexDescriptor {
                name: ID_INDEX_NAME.to_string(),
                keys: vec![("_id".to_string(), 1)],
                unique: true,
                sparse: false,
            },
        );
        IndexManager {
            descriptors,
            unique_tables: IndexMap::new(),
        }
    }
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the key tuple for `doc` under `descriptor`. Sparse indexes
    /// drop documents whose trailing indexed field is absent (`None`);
    /// non-sparse indexes use `"null"`'s canonical key for an absent field.
    fn key_tuple(doc: &Document, descriptor: &IndexDescriptor) -> Option<Vec<String>> {
        let last = descriptor.keys.len().saturating_sub(1);
        let mut tuple = Vec::with_capacity(descriptor.keys.len());
        for (i, (field, _dir)) in descriptor.keys.iter().enumerate() {
            match doc.get(field) {
                Some(v) => tuple.push(canonical_key(v)),
                None => {
                    if descriptor.sparse && i == last {
                        return None;
                    }
                    tuple.push(canonical_key(&serde_json::Value::Null));
                }
            }
        }
        Some(tuple)
    }

    pub fn list_indexes(&self) -> Vec<String> {
        self.descriptors.keys().cloned().collect()
    }

    pub fn descriptor(&self, name: &str) -> Option<&IndexDescriptor> {
        self.descriptors.get(name)
    }

    /// Register a new index descriptor. If unique, every existing document
    /// is scanned and the key-tuple set built; the first duplicate aborts
    /// the whole operation (no partial index is left behind).
    pub fn create_index(
        &mut self,
        keys: Vec<(String, i32)>,
        unique: bool,
        sparse: bool,
        documents: impl Iterator<Item = Document>,
    ) -> Result<String> {
        let name = derive_name(&keys);
        if self.descriptors.contains_key(&name) {
            return Ok(name);
        }

        let descriptor = IndexDescriptor {
            name: name.clone(),
            keys,
            unique,
            sparse,
        };

        if unique {
            let mut table = HashSet::new();
            for doc in documents {
                if let Some(tuple) = Self::key_tuple(&doc, &descriptor) {
                    if !table.insert(tuple) {
                        return Err(MongoLiteError::DuplicateKey(format!(
                            "index '{}' would not be unique over existing documents",
                            name
                        )));
                    }
                }
            }
            self.unique_tables.insert(name.clone(), table);
        }

        self.descriptors.insert(name.clone(), descriptor);
        Ok(name)
    }

    /// Silently tolerate unknown names.
    pub fn drop_index(&mut self, name: &str) {
        if name == ID_INDEX_NAME {
            return;
        }
        self.descriptors.shift_remove(name);
        self.unique_tables.shift_remove(name);
    }

    pub fn drop_indexes(&mut self) {
        let keep: Vec<String> = vec![ID_INDEX_NAME.to_string()];
        self.descriptors.retain(|name, _| keep.contains(name));
        self.unique_tables.clear();
    }

    /// Check `doc` against every unique descriptor without mutating any
    /// table; returns the name of the first index that would be violated.
    pub fn check_unique(&self, doc: &Document) -> Option<String> {
        for (name, descriptor) in &self.descriptors {
            if !descriptor.unique {
                continue;
            }
            if let Some(tuple) = Self::key_tuple(doc, descriptor) {
                if let Some(table) = self.unique_tables.get(name) {
                    if table.contains(&tuple) {
                        return Some(name.clone());
                    }
                }
            }
        }
        None
    }

    /// Insert `doc`'s key tuples into every unique table. Caller must have
    /// already called `check_unique` and confirmed no violation; this never
    /// fails.
    pub fn insert(&mut self, doc: &Document) {
        for (name, descriptor) in &self.descriptors {
            if !descriptor.unique {
                continue;
            }
            if let Some(tuple) = Self::key_tuple(doc, descriptor) {
                self.unique_tables.entry(name.clone()).or_default().insert(tuple);
            }
        }
    }

    pub fn remove(&mut self, doc: &Document) {
        for (name, descriptor) in &self.descriptors {
            if !descriptor.unique {
                continue;
            }
            if let Some(tuple) = Self::key_tuple(doc, descriptor) {
                if let Some(table) = self.unique_tables.get_mut(name) {
                    table.remove(&tuple);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentId;
    use serde_json::{json, Map};

    fn doc(id: i64, fields: Vec<(&str, serde_json::Value)>) -> Document {
        let mut map = Map::new();
        for (k, v) in fields {
            map.insert(k.to_string(), v);
        }
        Document::new(DocumentId::Int(id), map)
    }

    #[test]
    fn default_manager_has_id_index() {
        let mgr = IndexManager::new();
        assert_eq!(mgr.list_indexes(), vec![ID_INDEX_NAME.to_string()]);
    }

    #[test]
    fn create_unique_index_detects_existing_duplicates() {
        let mut mgr = IndexManager::new();
        let docs = vec![
            doc(1, vec![("email", json!("a@x.com"))]),
            doc(2, vec![("email", json!("a@x.com"))]),
        ];
        let err = mgr.create_index(vec![("email".to_string(), 1)], true, false, docs.into_iter());
        assert!(err.is_err());
    }

    #[test]
    fn insert_then_check_unique_rejects_duplicate() {
        let mut mgr = IndexManager::new();
        mgr.create_index(vec![("email".to_string(), 1)], true, false, std::iter::empty())
            .unwrap();

        let d1 = doc(1, vec![("email", json!("a@x.com"))]);
        assert!(mgr.check_unique(&d1).is_none());
        mgr.insert(&d1);

        let d2 = doc(2, vec![("email", json!("a@x.com"))]);
        assert_eq!(mgr.check_unique(&d2), Some("email_1".to_string()));
    }

    #[test]
    fn sparse_index_excludes_absent_trailing_field() {
        let mut mgr = IndexManager::new();
        mgr.create_index(vec![("email".to_string(), 1)], true, true, std::iter::empty())
            .unwrap();

        let d1 = doc(1, vec![]);
        let d2 = doc(2, vec![]);
        assert!(mgr.check_unique(&d1).is_none());
        mgr.insert(&d1);
        assert!(mgr.check_unique(&d2).is_none());
    }

    #[test]
    fn drop_index_is_tolerant_of_unknown_names() {
        let mut mgr = IndexManager::new();
        mgr.drop_index("does-not-exist");
        assert_eq!(mgr.list_indexes(), vec![ID_INDEX_NAME.to_string()]);
    }

    #[test]
    fn drop_indexes_keeps_id_index() {
        let mut mgr = IndexManager::new();
        mgr.create_index(vec![("email".to_string(), 1)], true, false, std::iter::empty())
            .unwrap();
        mgr.drop_indexes();
        assert_eq!(mgr.list_indexes(), vec![ID_INDEX_NAME.to_string()]);
    }

    #[test]
    fn remove_frees_the_key_for_reuse() {
        let mut mgr = IndexManager::new();
        mgr.create_index(vec![("email".to_string(), 1)], true, false, std::iter::empty())
            .unwrap();
        let d1 = doc(1, vec![("email", json!("a@x.com"))]);
        mgr.insert(&d1);
        mgr.remove(&d1);
        assert!(mgr.check_unique(&d1).is_none());
    }

    #[test]
    fn compound_index_name_is_derived_from_fields_and_directions() {
        let mut mgr = IndexManager::new();
        let name = mgr
            .create_index(
                vec![("country".to_string(), 1), ("city".to_string(), -1)],
                false,
                false,
                std::iter::empty(),
            )
            .unwrap();
        assert_eq!(name, "country_1_city_-1");
    }
}

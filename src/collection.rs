//! Document engine, find-and-modify orchestration, and index/lifecycle
//! housekeeping.
//!
//! `Database` supplies the shared lock and RNG every `Collection` handle
//! borrows: write entry points lock once and call the `*_locked` helpers
//! below directly, so nested writes (upsert's internal insert, `$lookup`'s
//! read of a sibling collection) never try to re-acquire a lock the calling
//! frame already holds.

use crate::aggregation::{AggregationContext, Pipeline};
use crate::bulk::{BulkBuilder, BulkTarget};
use crate::cursor::{Cursor, SnapshotFactory};
use crate::database::DatabaseState;
use crate::document::{Document, DocumentId};
use crate::error::{MongoLiteError, Result};
use crate::index::IndexManager;
use crate::projection::Projection;
use crate::query::operators::matches_filter;
use crate::results::{BulkWriteResult, DeleteResult, InsertManyResult, InsertOneResult, UpdateResult};
use crate::update::apply_update;
use crate::{log_debug, log_info, log_warn};
use indexmap::IndexMap;
use parking_lot::RwLock;
use rand::Rng;
use serde_json::{Map, Value};
use std::sync::Arc;

/// A collection's state as held inside `DatabaseState`: the document map
/// (keyed by the canonical hash of `_id`) and its index metadata.
pub struct CollectionState {
    documents: IndexMap<String, Document>,
    indexes: IndexManager,
    last_auto_id: u64,
}

impl CollectionState {
    pub fn new() -> Self {
        CollectionState {
            documents: IndexMap::new(),
            indexes: IndexManager::new(),
            last_auto_id: 0,
        }
    }
}

impl Default for CollectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// What `returnDocument`/the legacy `new` flag ask a find-and-modify call to
/// hand back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnDocument {
    Before,
    After,
}

#[derive(Default, Clone)]
pub struct FindOneAndUpdateOptions {
    pub upsert: bool,
    pub return_document: ReturnDocument,
    pub projection: Option<Value>,
    pub sort: Option<Vec<(String, i32)>>,
}

impl Default for ReturnDocument {
    fn default() -> Self {
        ReturnDocument::Before
    }
}

/// A handle to a named collection, sharing its owning `Database`'s lock and
/// RNG. Cheap to clone; every handle observes the same underlying state.
pub struct Collection {
    name: String,
    inner: Arc<RwLock<DatabaseState>>,
}

impl Collection {
    pub(crate) fn new(name: String, inner: Arc<RwLock<DatabaseState>>) -> Self {
        Collection { name, inner }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn validate_document_keys(doc: &Value) -> Result<()> {
        match doc {
            Value::Object(map) => {
                for key in map.keys() {
                    if key.is_empty() {
                        return Err(MongoLiteError::Validation(
                            "document keys must be non-empty strings".to_string(),
                        ));
                    }
                }
                Ok(())
            }
            _ => Err(MongoLiteError::Validation(
                "document must be a JSON object".to_string(),
            )),
        }
    }

    // ===================================================================
    // Writes
    // ===================================================================

    pub fn insert_one(&self, fields: Map<String, Value>) -> Result<InsertOneResult> {
        let mut state = self.inner.write();
        let collection = state
            .collections
            .get_mut(&self.name)
            .expect("collection must exist before use");
        let id = insert_locked(collection, Value::Object(fields))?;
        log_info!("insert_one into '{}' assigned _id {:?}", self.name, id.to_value());
        Ok(InsertOneResult { inserted_id: id })
    }

    pub fn insert_many(&self, docs: Vec<Map<String, Value>>, ordered: bool) -> Result<InsertManyResult> {
        if !ordered {
            return Err(MongoLiteError::NotImplemented(
                "unordered insert_many is not supported".to_string(),
            ));
        }
        let mut state = self.inner.write();
        let collection = state
            .collections
            .get_mut(&self.name)
            .expect("collection must exist before use");
        let mut ids = Vec::with_capacity(docs.len());
        for fields in docs {
            ids.push(insert_locked(collection, Value::Object(fields))?);
        }
        Ok(InsertManyResult { inserted_ids: ids })
    }

    pub fn update_one(&self, filter: &Value, update: &Value, upsert: bool) -> Result<UpdateResult> {
        let mut state = self.inner.write();
        let collection = state
            .collections
            .get_mut(&self.name)
            .expect("collection must exist before use");
        let (matched, modified, upserted_id) = update_locked(collection, filter, update, false, upsert)?;
        Ok(UpdateResult { matched_count: matched, modified_count: modified, upserted_id })
    }

    pub fn update_many(&self, filter: &Value, update: &Value, upsert: bool) -> Result<UpdateResult> {
        let mut state = self.inner.write();
        let collection = state
            .collections
            .get_mut(&self.name)
            .expect("collection must exist before use");
        let (matched, modified, upserted_id) = update_locked(collection, filter, update, true, upsert)?;
        Ok(UpdateResult { matched_count: matched, modified_count: modified, upserted_id })
    }

    pub fn replace_one(&self, filter: &Value, replacement: Map<String, Value>, upsert: bool) -> Result<UpdateResult> {
        if replacement.keys().any(|k| k.starts_with('$')) {
            return Err(MongoLiteError::Validation(
                "replacement document cannot contain operator keys".to_string(),
            ));
        }
        let mut state = self.inner.write();
        let collection = state
            .collections
            .get_mut(&self.name)
            .expect("collection must exist before use");
        let (matched, modified, upserted_id) =
            update_locked(collection, filter, &Value::Object(replacement), false, upsert)?;
        Ok(UpdateResult { matched_count: matched, modified_count: modified, upserted_id })
    }

    pub fn delete_one(&self, filter: &Value) -> Result<DeleteResult> {
        let mut state = self.inner.write();
        let collection = state
            .collections
            .get_mut(&self.name)
            .expect("collection must exist before use");
        let n = delete_locked(collection, filter, false)?;
        Ok(DeleteResult { deleted_count: n })
    }

    pub fn delete_many(&self, filter: &Value) -> Result<DeleteResult> {
        let mut state = self.inner.write();
        let collection = state
            .collections
            .get_mut(&self.name)
            .expect("collection must exist before use");
        let n = delete_locked(collection, filter, true)?;
        Ok(DeleteResult { deleted_count: n })
    }

    pub fn bulk_write(&self, mut builder: BulkBuilder) -> Result<BulkWriteResult> {
        // `BulkTarget`'s methods take `&mut self` but only ever mutate state
        // behind the shared lock, so a fresh handle sharing the same `Arc`
        // is just as good as `&mut self` here.
        let mut target = Collection::new(self.name.clone(), Arc::clone(&self.inner));
        builder.execute(&mut target)
    }

    // ===================================================================
    // Find-and-modify
    // ===================================================================

    pub fn find_one_and_delete(&self, filter: &Value) -> Result<Option<Value>> {
        let mut state = self.inner.write();
        let collection = state
            .collections
            .get_mut(&self.name)
            .expect("collection must exist before use");

        let pre_image = find_one_locked(collection, filter)?;
        let Some(pre_image) = pre_image else { return Ok(None) };

        let rekeyed = Value::Object({
            let mut m = Map::new();
            m.insert("_id".to_string(), pre_image.get("_id").cloned().unwrap_or(Value::Null));
            m
        });
        delete_locked(collection, &rekeyed, false)?;
        Ok(Some(pre_image))
    }

    pub fn find_one_and_replace(
        &self,
        filter: &Value,
        replacement: Map<String, Value>,
        options: FindOneAndUpdateOptions,
    ) -> Result<Option<Value>> {
        self.find_one_and_write(filter, Value::Object(replacement), options)
    }

    pub fn find_one_and_update(
        &self,
        filter: &Value,
        update: &Value,
        options: FindOneAndUpdateOptions,
    ) -> Result<Option<Value>> {
        self.find_one_and_write(filter, update.clone(), options)
    }

    fn find_one_and_write(
        &self,
        filter: &Value,
        update: Value,
        options: FindOneAndUpdateOptions,
    ) -> Result<Option<Value>> {
        let mut state = self.inner.write();
        let collection = state
            .collections
            .get_mut(&self.name)
            .expect("collection must exist before use");

        let pre_image = find_one_locked(collection, filter)?;

        let (pre_image, rekey_filter) = match pre_image {
            Some(doc) => {
                let rekey = Value::Object({
                    let mut m = Map::new();
                    m.insert("_id".to_string(), doc.get("_id").cloned().unwrap_or(Value::Null));
                    m
                });
                (Some(doc), rekey)
            }
            None => {
                if !options.upsert {
                    return Ok(None);
                }
                (None, filter.clone())
            }
        };

        let (_, _, upserted_id) = update_locked(collection, &rekey_filter, &update, false, options.upsert)?;

        match options.return_document {
            ReturnDocument::Before => Ok(pre_image),
            ReturnDocument::After => {
                let id_filter = if let Some(id) = upserted_id {
                    Value::Object({
                        let mut m = Map::new();
                        m.insert("_id".to_string(), id.to_value());
                        m
                    })
                } else {
                    rekey_filter
                };
                find_one_locked(collection, &id_filter)
            }
        }
    }

    // ===================================================================
    // Reads
    // ===================================================================

    fn snapshot_factory(&self) -> SnapshotFactory {
        let inner = Arc::clone(&self.inner);
        let name = self.name.clone();
        Arc::new(move || {
            let state = inner.read();
            state
                .collections
                .get(&name)
                .map(|c| c.documents.values().cloned().collect())
                .unwrap_or_default()
        })
    }

    pub fn find(&self, filter: &Value) -> Cursor {
        Cursor::new(self.snapshot_factory(), filter.clone())
    }

    pub fn find_with_projection(&self, filter: &Value, projection: &Value) -> Result<Cursor> {
        let projection = Projection::normalize(projection)?;
        Ok(Cursor::new(self.snapshot_factory(), filter.clone()).with_projection(projection))
    }

    pub fn find_one(&self, filter: &Value) -> Result<Option<Value>> {
        let mut cursor = self.find(filter).limit(1);
        Ok(cursor.to_vec()?.into_iter().next().map(|d| d.to_value()))
    }

    pub fn count_documents(&self, filter: &Value, skip: Option<u64>, limit: Option<u64>) -> Result<u64> {
        let mut cursor = self.find(filter);
        if let Some(n) = skip {
            cursor = cursor.skip(n as usize);
        }
        if let Some(n) = limit {
            cursor = cursor.limit(n as usize);
        }
        Ok(cursor.count()? as u64)
    }

    pub fn estimated_document_count(&self) -> Result<u64> {
        let state = self.inner.read();
        Ok(state
            .collections
            .get(&self.name)
            .map(|c| c.documents.len() as u64)
            .unwrap_or(0))
    }

    pub fn distinct(&self, key: &str, filter: &Value) -> Result<Vec<Value>> {
        let mut cursor = self.find(filter);
        cursor.distinct(key)
    }

    /// Run an aggregation pipeline, bridging `$lookup`/`$out`/
    /// `$sample` to sibling collections and the database's seeded RNG
    /// through a `Collection`-backed `AggregationContext`.
    pub fn aggregate(&self, pipeline_json: &Value) -> Result<Vec<Value>> {
        let pipeline = Pipeline::from_json(pipeline_json)?;
        let docs: Vec<Value> = {
            let state = self.inner.read();
            state
                .collections
                .get(&self.name)
                .map(|c| c.documents.values().map(|d| d.to_value()).collect())
                .unwrap_or_default()
        };
        let ctx = CollectionAggregationContext { inner: Arc::clone(&self.inner) };
        log_debug!("aggregate over '{}' starting with {} documents", self.name, docs.len());
        pipeline.execute(docs, &ctx)
    }

    // ===================================================================
    // Indexes
    // ===================================================================

    pub fn create_index(&self, keys: Vec<(String, i32)>, unique: bool, sparse: bool) -> Result<String> {
        let mut state = self.inner.write();
        let collection = state
            .collections
            .get_mut(&self.name)
            .expect("collection must exist before use");
        let docs: Vec<Document> = collection.documents.values().cloned().collect();
        match collection.indexes.create_index(keys, unique, sparse, docs.into_iter()) {
            Ok(name) => {
                log_info!("index '{}' created on collection '{}'", name, self.name);
                Ok(name)
            }
            Err(e) => {
                log_warn!("index creation on '{}' rejected: {}", self.name, e);
                Err(e)
            }
        }
    }

    pub fn drop_index(&self, name: &str) {
        let mut state = self.inner.write();
        if let Some(collection) = state.collections.get_mut(&self.name) {
            collection.indexes.drop_index(name);
        }
    }

    pub fn drop_indexes(&self) {
        let mut state = self.inner.write();
        if let Some(collection) = state.collections.get_mut(&self.name) {
            collection.indexes.drop_indexes();
        }
    }

    pub fn list_indexes(&self) -> Vec<String> {
        let state = self.inner.read();
        state
            .collections
            .get(&self.name)
            .map(|c| c.indexes.list_indexes())
            .unwrap_or_default()
    }

    pub fn index_information(&self) -> Vec<(String, Vec<(String, i32)>, bool, bool)> {
        let state = self.inner.read();
        let Some(collection) = state.collections.get(&self.name) else { return Vec::new() };
        collection
            .indexes
            .list_indexes()
            .into_iter()
            .filter_map(|name| {
                collection
                    .indexes
                    .descriptor(&name)
                    .map(|d| (d.name.clone(), d.keys.clone(), d.unique, d.sparse))
            })
            .collect()
    }

    /// No-op success: there is no on-disk index to rebuild.
    pub fn reindex(&self) -> Result<()> {
        Ok(())
    }

    // ===================================================================
    // Lifecycle
    // ===================================================================

    pub fn drop(&self) {
        self.inner.write().collections.shift_remove(&self.name);
        log_warn!("dropped collection '{}'", self.name);
    }

    pub fn rename(&mut self, new_name: &str) -> Result<()> {
        let mut state = self.inner.write();
        if state.collections.contains_key(new_name) {
            return Err(MongoLiteError::Validation(format!(
                "target collection '{}' already exists",
                new_name
            )));
        }
        let Some(collection) = state.collections.shift_remove(&self.name) else {
            return Err(MongoLiteError::Validation(format!(
                "collection '{}' does not exist",
                self.name
            )));
        };
        state.collections.insert(new_name.to_string(), collection);
        self.name = new_name.to_string();
        Ok(())
    }

    /// Accepts only default values for codec/read-preference/write/read
    /// concern options; anything else is a configuration error.
    pub fn with_options(&self, options: &Value) -> Result<Collection> {
        if let Some(obj) = options.as_object() {
            if !obj.is_empty() {
                return Err(MongoLiteError::Configuration(
                    "with_options only accepts default codec/read/write concern values".to_string(),
                ));
            }
        }
        Ok(Collection::new(self.name.clone(), Arc::clone(&self.inner)))
    }
}

// =======================================================================
// Locked helpers (run with the write guard already held)
// =======================================================================

fn insert_locked(collection: &mut CollectionState, doc: Value) -> Result<DocumentId> {
    Collection::validate_document_keys(&doc)?;
    let mut fields = match doc {
        Value::Object(map) => map,
        _ => unreachable!("validated above"),
    };

    let id = match fields.get("_id") {
        Some(existing) => {
            let id = DocumentId::from_value(existing);
            if collection.documents.contains_key(&id.canonical_key()) {
                return Err(MongoLiteError::DuplicateKey(format!(
                    "_id {:?} already exists",
                    existing
                )));
            }
            id
        }
        None => DocumentId::new_auto(collection.last_auto_id),
    };
    fields.remove("_id");
    let document = Document::new(id.clone(), fields);

    if let Some(index_name) = collection.indexes.check_unique(&document) {
        log_warn!("insert rejected: index '{}' would be violated", index_name);
        return Err(MongoLiteError::DuplicateKey(format!(
            "index '{}' would be violated",
            index_name
        )));
    }

    collection.indexes.insert(&document);
    collection.documents.insert(id.canonical_key(), document);
    if let DocumentId::Int(n) = id {
        if n as u64 > collection.last_auto_id {
            collection.last_auto_id = n as u64;
        }
    }

    Ok(id)
}

fn find_one_locked(collection: &CollectionState, filter: &Value) -> Result<Option<Value>> {
    for doc in collection.documents.values() {
        if matches_filter(doc, filter)? {
            return Ok(Some(doc.to_value()));
        }
    }
    Ok(None)
}

/// Apply `update` to every document matching `filter` (or just the first,
/// when `multi` is false). Re-validates unique indexes after each mutation
/// and restores the pre-update snapshot on violation.
fn update_locked(
    collection: &mut CollectionState,
    filter: &Value,
    update: &Value,
    multi: bool,
    upsert: bool,
) -> Result<(u64, u64, Option<DocumentId>)> {
    let keys: Vec<String> = collection
        .documents
        .iter()
        .filter(|(_, doc)| matches_filter(doc, filter).unwrap_or(false))
        .map(|(k, _)| k.clone())
        .take(if multi { usize::MAX } else { 1 })
        .collect();

    if keys.is_empty() {
        if upsert {
            let seed = filter_to_seed_document(filter);
            let mut doc = Document::from_object(seed);
            apply_update(&mut doc, update, filter, true)?;
            let id = insert_locked(collection, doc.to_value())?;
            return Ok((0, 0, Some(id)));
        }
        return Ok((0, 0, None));
    }

    let mut modified = 0u64;
    for key in &keys {
        let mut doc = collection.documents.get(key).cloned().expect("key came from iteration");
        let pre_image = doc.clone();
        let was_modified = apply_update(&mut doc, update, filter, false)?;

        if was_modified {
            // Pull the pre-image's key tuples out first so a field that is
            // unchanged by this update doesn't collide with itself, then
            // check the post-image; on violation put the pre-image's tuples
            // back so the index table matches what's still on disk.
            collection.indexes.remove(&pre_image);
            if let Some(index_name) = collection.indexes.check_unique(&doc) {
                collection.indexes.insert(&pre_image);
                log_warn!("update rolled back: index '{}' would be violated", index_name);
                return Err(MongoLiteError::DuplicateKey(format!(
                    "index '{}' would be violated", index_name
                )));
            }
            collection.indexes.insert(&doc);
            collection.documents.insert(key.clone(), doc);
            modified += 1;
        }
    }

    log_debug!("update matched {} modified {} documents", keys.len(), modified);
    Ok((keys.len() as u64, modified, None))
}

/// Build the seed document an upsert's implicit insert starts from:
/// equality conditions from the filter become the new document's initial
/// fields, matching MongoDB's own upsert "default fields from the match
/// filter" behavior.
fn filter_to_seed_document(filter: &Value) -> Map<String, Value> {
    let mut seed = Map::new();
    if let Some(obj) = filter.as_object() {
        for (key, value) in obj {
            if key.starts_with('$') || key.contains('.') {
                continue;
            }
            if value.is_object() || value.is_array() {
                continue;
            }
            seed.insert(key.clone(), value.clone());
        }
    }
    seed
}

fn delete_locked(collection: &mut CollectionState, filter: &Value, multi: bool) -> Result<u64> {
    let keys: Vec<String> = collection
        .documents
        .iter()
        .filter(|(_, doc)| matches_filter(doc, filter).unwrap_or(false))
        .map(|(k, _)| k.clone())
        .take(if multi { usize::MAX } else { 1 })
        .collect();

    let mut count = 0u64;
    for key in keys {
        if let Some(doc) = collection.documents.shift_remove(&key) {
            collection.indexes.remove(&doc);
            count += 1;
        }
    }
    log_debug!("delete removed {} documents", count);
    Ok(count)
}

impl BulkTarget for Collection {
    fn bulk_insert_one(&mut self, document: &Value) -> Result<DocumentId> {
        let mut state = self.inner.write();
        let collection = state
            .collections
            .get_mut(&self.name)
            .expect("collection must exist before use");
        insert_locked(collection, document.clone())
    }

    fn bulk_update(
        &mut self,
        filter: &Value,
        update: &Value,
        multi: bool,
        upsert: bool,
    ) -> Result<(u64, Option<u64>, Option<DocumentId>)> {
        let mut state = self.inner.write();
        let collection = state
            .collections
            .get_mut(&self.name)
            .expect("collection must exist before use");
        let (matched, modified, upserted_id) = update_locked(collection, filter, update, multi, upsert)?;
        Ok((matched, Some(modified), upserted_id))
    }

    fn bulk_delete(&mut self, filter: &Value, multi: bool) -> Result<u64> {
        let mut state = self.inner.write();
        let collection = state
            .collections
            .get_mut(&self.name)
            .expect("collection must exist before use");
        delete_locked(collection, filter, multi)
    }
}

/// Bridges `Collection::aggregate` to sibling collections (for `$lookup`),
/// a write target (for `$out`), and the database's seeded RNG (for
/// `$sample`) — the three things a bare `Pipeline` cannot reach on its own.
struct CollectionAggregationContext {
    inner: Arc<RwLock<DatabaseState>>,
}

impl AggregationContext for CollectionAggregationContext {
    fn lookup_documents(&self, from: &str) -> Vec<Value> {
        let state = self.inner.read();
        state
            .collections
            .get(from)
            .map(|c| c.documents.values().map(|d| d.to_value()).collect())
            .unwrap_or_default()
    }

    fn write_out(&self, into: &str, docs: &[Value]) {
        let mut state = self.inner.write();
        let mut target = CollectionState::new();
        for doc in docs {
            let _ = insert_locked(&mut target, doc.clone());
        }
        state.collections.insert(into.to_string(), target);
    }

    fn sample_index(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        let mut state = self.inner.write();
        state.rng.gen_range(0..len)
    }
}

//! Typed write-result value objects, shaped after the MongoDB driver's own
//! result objects, which every write method here returns.

use crate::document::DocumentId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct InsertOneResult {
    pub inserted_id: DocumentId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertManyResult {
    pub inserted_ids: Vec<DocumentId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_id: Option<DocumentId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

/// One entry of `BulkWriteResult.upserted`: the bulk operation's index plus
/// the id it upserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertedEntry {
    pub index: usize,
    #[serde(rename = "_id")]
    pub id: Value,
}

/// A single failed operation inside a bulk write,
/// carried inline rather than as a thrown error variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteError {
    pub index: usize,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkWriteResult {
    pub n_inserted: u64,
    pub n_matched: u64,
    pub n_modified: u64,
    pub n_upserted: u64,
    pub n_removed: u64,
    pub upserted: Vec<UpsertedEntry>,
    pub write_errors: Vec<WriteError>,
    pub write_concern_errors: Vec<Value>,
    /// `true` iff every executed operation reported `nModified`
    /// "suppressed when any executed update returned no `nModified`").
    pub modified_count_available: bool,
}

impl BulkWriteResult {
    pub fn new() -> Self {
        BulkWriteResult {
            modified_count_available: true,
            ..Default::default()
        }
    }

    pub fn merge(&mut self, other: BulkWriteResult) {
        self.n_inserted += other.n_inserted;
        self.n_matched += other.n_matched;
        self.n_modified += other.n_modified;
        self.n_upserted += other.n_upserted;
        self.n_removed += other.n_removed;
        self.upserted.extend(other.upserted);
        self.write_errors.extend(other.write_errors);
        self.write_concern_errors.extend(other.write_concern_errors);
        self.modified_count_available &= other.modified_count_available;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_result_merge_accumulates_counters_and_appends_arrays() {
        let mut total = BulkWriteResult::new();
        let mut a = BulkWriteResult::new();
        a.n_inserted = 2;
        a.upserted.push(UpsertedEntry { index: 0, id: Value::from(1) });

        let mut b = BulkWriteResult::new();
        b.n_inserted = 1;
        b.modified_count_available = false;

        total.merge(a);
        total.merge(b);

        assert_eq!(total.n_inserted, 3);
        assert_eq!(total.upserted.len(), 1);
        assert!(!total.modified_count_available);
    }
}

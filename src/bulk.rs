//! Bulk operation builder.
//!
//! Queues write operations and executes them against a `BulkTarget` in
//! submission order, aggregating counts and write errors as it goes.

use crate::document::DocumentId;
use crate::error::{MongoLiteError, Result};
use crate::results::{BulkWriteResult, UpsertedEntry, WriteError};
use serde_json::Value;

pub enum BulkOperation {
    InsertOne { document: Value },
    UpdateOne { filter: Value, update: Value, upsert: bool },
    UpdateMany { filter: Value, update: Value, upsert: bool },
    ReplaceOne { filter: Value, replacement: Value, upsert: bool },
    DeleteOne { filter: Value },
    DeleteMany { filter: Value },
}

/// Anything a `BulkBuilder` can run its queued operations against. Satisfied
/// by `Collection` in production; a test double in unit tests below.
/// `bulk_update`'s modified count is `Option<u64>` rather than a bare `u64`
/// so a target can report "unknown" the way a mixed-server-version MongoDB
/// deployment sometimes can't report `nModified` at all for one operation in
/// the batch (§4.I) — `None` here suppresses `nModified` for the whole bulk
/// result rather than being counted as zero.
pub trait BulkTarget {
    fn bulk_insert_one(&mut self, document: &Value) -> Result<DocumentId>;
    fn bulk_update(&mut self, filter: &Value, update: &Value, multi: bool, upsert: bool) -> Result<(u64, Option<u64>, Option<DocumentId>)>;
    fn bulk_delete(&mut self, filter: &Value, multi: bool) -> Result<u64>;
}

/// Ordered (default and only supported mode) bulk operation queue.
pub struct BulkBuilder {
    ops: Option<Vec<BulkOperation>>,
}

impl BulkBuilder {
    /// `ordered` must be `true`; unordered bulk writes are not supported.
    pub fn new(ordered: bool) -> Result<Self> {
        if !ordered {
            return Err(MongoLiteError::NotImplemented(
                "unordered bulk writes are not supported".to_string(),
            ));
        }
        Ok(BulkBuilder { ops: Some(Vec::new()) })
    }

    fn push(&mut self, op: BulkOperation) -> Result<()> {
        let ops = self
            .ops
            .as_mut()
            .ok_or_else(|| MongoLiteError::Validation("bulk operation has already executed".to_string()))?;
        ops.push(op);
        Ok(())
    }

    pub fn insert_one(&mut self, document: Value) -> Result<()> {
        self.push(BulkOperation::InsertOne { document })
    }

    pub fn update_one(&mut self, filter: Value, update: Value, upsert: bool) -> Result<()> {
        self.push(BulkOperation::UpdateOne { filter, update, upsert })
    }

    pub fn update_many(&mut self, filter: Value, update: Value, upsert: bool) -> Result<()> {
        self.push(BulkOperation::UpdateMany { filter, update, upsert })
    }

    pub fn replace_one(&mut self, filter: Value, replacement: Value, upsert: bool) -> Result<()> {
        self.push(BulkOperation::ReplaceOne { filter, replacement, upsert })
    }

    pub fn delete_one(&mut self, filter: Value) -> Result<()> {
        self.push(BulkOperation::DeleteOne { filter })
    }

    pub fn delete_many(&mut self, filter: Value) -> Result<()> {
        self.push(BulkOperation::DeleteMany { filter })
    }

    /// Run every queued operation, in order, against `target`. Ordered bulk
    /// semantics: the first failing operation aborts the remaining queue,
    /// with its error recorded as a `WriteError` at that index.
    pub fn execute<T: BulkTarget>(&mut self, target: &mut T) -> Result<BulkWriteResult> {
        let ops = self
            .ops
            .take()
            .ok_or_else(|| MongoLiteError::Validation("bulk operation has already executed".to_string()))?;

        if ops.is_empty() {
            return Err(MongoLiteError::Validation("bulk operation has no queued writes".to_string()));
        }

        let mut result = BulkWriteResult::new();
        let op_count = ops.len();
        crate::log_debug!("bulk_write executing {} queued operations", op_count);

        for (index, op) in ops.into_iter().enumerate() {
            let outcome = match op {
                BulkOperation::InsertOne { document } => target.bulk_insert_one(&document).map(|_| {
                    result.n_inserted += 1;
                }),
                BulkOperation::UpdateOne { filter, update, upsert } => {
                    target.bulk_update(&filter, &update, false, upsert).map(|(matched, modified, upserted_id)| {
                        apply_update_delta(&mut result, index, matched, modified, upserted_id);
                    })
                }
                BulkOperation::UpdateMany { filter, update, upsert } => {
                    target.bulk_update(&filter, &update, true, upsert).map(|(matched, modified, upserted_id)| {
                        apply_update_delta(&mut result, index, matched, modified, upserted_id);
                    })
                }
                BulkOperation::ReplaceOne { filter, replacement, upsert } => {
                    target.bulk_update(&filter, &replacement, false, upsert).map(|(matched, modified, upserted_id)| {
                        apply_update_delta(&mut result, index, matched, modified, upserted_id);
                    })
                }
                BulkOperation::DeleteOne { filter } => target.bulk_delete(&filter, false).map(|n| {
                    result.n_removed += n;
                }),
                BulkOperation::DeleteMany { filter } => target.bulk_delete(&filter, true).map(|n| {
                    result.n_removed += n;
                }),
            };

            if let Err(e) = outcome {
                crate::log_warn!("bulk_write operation {} of {} failed: {}", index, op_count, e);
                result.write_errors.push(WriteError {
                    index,
                    code: error_code(&e),
                    message: e.to_string(),
                });
                break;
            }
        }

        Ok(result)
    }
}

fn apply_update_delta(
    result: &mut BulkWriteResult,
    index: usize,
    matched: u64,
    modified: Option<u64>,
    upserted_id: Option<DocumentId>,
) {
    result.n_matched += matched;
    match modified {
        Some(n) => result.n_modified += n,
        None => result.modified_count_available = false,
    }
    if let Some(id) = upserted_id {
        result.n_upserted += 1;
        result.upserted.push(UpsertedEntry { index, id: id.to_value() });
    }
}

fn error_code(e: &MongoLiteError) -> String {
    match e {
        MongoLiteError::Validation(_) => "Validation".to_string(),
        MongoLiteError::DuplicateKey(_) => "DuplicateKey".to_string(),
        MongoLiteError::OperationFailure(_) => "OperationFailure".to_string(),
        MongoLiteError::NotImplemented(_) => "NotImplemented".to_string(),
        MongoLiteError::Configuration(_) => "Configuration".to_string(),
        MongoLiteError::Serialization(_) => "Serialization".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FakeTarget {
        next_id: i64,
        fail_on: Option<usize>,
        calls: usize,
    }

    impl BulkTarget for FakeTarget {
        fn bulk_insert_one(&mut self, _document: &Value) -> Result<DocumentId> {
            self.calls += 1;
            if self.fail_on == Some(self.calls - 1) {
                return Err(MongoLiteError::DuplicateKey("dup".to_string()));
            }
            self.next_id += 1;
            Ok(DocumentId::Int(self.next_id))
        }

        fn bulk_update(&mut self, _filter: &Value, _update: &Value, _multi: bool, upsert: bool) -> Result<(u64, Option<u64>, Option<DocumentId>)> {
            self.calls += 1;
            if upsert {
                Ok((0, Some(0), Some(DocumentId::Int(999))))
            } else {
                Ok((1, Some(1), None))
            }
        }

        fn bulk_delete(&mut self, _filter: &Value, _multi: bool) -> Result<u64> {
            self.calls += 1;
            Ok(1)
        }
    }

    #[test]
    fn rejects_unordered() {
        assert!(BulkBuilder::new(false).is_err());
    }

    #[test]
    fn empty_execute_fails() {
        let mut builder = BulkBuilder::new(true).unwrap();
        let mut target = FakeTarget { next_id: 0, fail_on: None, calls: 0 };
        assert!(builder.execute(&mut target).is_err());
    }

    #[test]
    fn executing_twice_fails() {
        let mut builder = BulkBuilder::new(true).unwrap();
        builder.insert_one(json!({"a": 1})).unwrap();
        let mut target = FakeTarget { next_id: 0, fail_on: None, calls: 0 };
        builder.execute(&mut target).unwrap();
        assert!(builder.execute(&mut target).is_err());
    }

    #[test]
    fn aggregates_counters_across_ops() {
        let mut builder = BulkBuilder::new(true).unwrap();
        builder.insert_one(json!({"a": 1})).unwrap();
        builder.insert_one(json!({"a": 2})).unwrap();
        builder.update_one(json!({"a": 1}), json!({"$set": {"a": 10}}), false).unwrap();
        builder.delete_one(json!({"a": 2})).unwrap();

        let mut target = FakeTarget { next_id: 0, fail_on: None, calls: 0 };
        let result = builder.execute(&mut target).unwrap();

        assert_eq!(result.n_inserted, 2);
        assert_eq!(result.n_matched, 1);
        assert_eq!(result.n_modified, 1);
        assert_eq!(result.n_removed, 1);
        assert!(result.write_errors.is_empty());
    }

    #[test]
    fn upsert_populates_upserted_entry_with_index() {
        let mut builder = BulkBuilder::new(true).unwrap();
        builder.insert_one(json!({"a": 1})).unwrap();
        builder.update_one(json!({"a": 99}), json!({"$set": {"a": 99}}), true).unwrap();

        let mut target = FakeTarget { next_id: 0, fail_on: None, calls: 0 };
        let result = builder.execute(&mut target).unwrap();

        assert_eq!(result.n_upserted, 1);
        assert_eq!(result.upserted[0].index, 1);
    }

    struct LegacyTarget;

    impl BulkTarget for LegacyTarget {
        fn bulk_insert_one(&mut self, _document: &Value) -> Result<DocumentId> {
            Ok(DocumentId::Int(1))
        }

        fn bulk_update(&mut self, _filter: &Value, _update: &Value, _multi: bool, _upsert: bool) -> Result<(u64, Option<u64>, Option<DocumentId>)> {
            // Simulates a mixed-server-version write that matched a document
            // but couldn't report whether it was modified.
            Ok((1, None, None))
        }

        fn bulk_delete(&mut self, _filter: &Value, _multi: bool) -> Result<u64> {
            Ok(0)
        }
    }

    #[test]
    fn n_modified_is_suppressed_when_any_update_cannot_report_it() {
        let mut builder = BulkBuilder::new(true).unwrap();
        builder.update_one(json!({"a": 1}), json!({"$set": {"a": 2}}), false).unwrap();

        let mut target = LegacyTarget;
        let result = builder.execute(&mut target).unwrap();

        assert_eq!(result.n_matched, 1);
        assert_eq!(result.n_modified, 0);
        assert!(!result.modified_count_available);
    }

    #[test]
    fn stops_at_first_failure_and_records_write_error() {
        let mut builder = BulkBuilder::new(true).unwrap();
        builder.insert_one(json!({"a": 1})).unwrap();
        builder.insert_one(json!({"a": 2})).unwrap();
        builder.insert_one(json!({"a": 3})).unwrap();

        let mut target = FakeTarget { next_id: 0, fail_on: Some(1), calls: 0 };
        let result = builder.execute(&mut target).unwrap();

        assert_eq!(result.n_inserted, 1);
        assert_eq!(result.write_errors.len(), 1);
        assert_eq!(result.write_errors[0].index, 1);
        assert_eq!(target.calls, 2);
    }
}

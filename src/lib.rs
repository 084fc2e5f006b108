// src/lib.rs

#![allow(clippy::too_many_arguments)]
#![allow(clippy::should_implement_trait)]
#![allow(clippy::field_reassign_with_default)]
#![allow(clippy::result_large_err)]
// Tests may have helper functions not used in all test cases
#![cfg_attr(test, allow(dead_code))]

pub mod aggregation;
pub mod bulk;
pub mod collection;
pub mod cursor;
pub mod database;
pub mod document;
pub mod error;
pub mod index;
pub mod logging;
pub mod projection;
pub mod query;
pub mod results;
pub mod update;
pub mod value_utils;

// Public exports
pub use aggregation::{AggregationContext, Pipeline};
pub use bulk::{BulkBuilder, BulkOperation, BulkTarget};
pub use collection::{Collection, CollectionState, FindOneAndUpdateOptions, ReturnDocument};
pub use cursor::{Cursor, SortSpec};
pub use database::{Database, DatabaseState};
pub use document::{Document, DocumentId};
pub use error::{MongoLiteError, Result};
pub use index::IndexDescriptor;
pub use logging::{get_log_level, set_log_level, LogLevel};
pub use projection::Projection;
pub use query::Query;
pub use results::{
    BulkWriteResult, DeleteResult, InsertManyResult, InsertOneResult, UpdateResult,
    UpsertedEntry, WriteError,
};

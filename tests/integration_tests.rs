//! End-to-end tests for the document store's external interface (§6), run
//! against a fresh `Database` per test rather than the unit-level fixtures
//! each module exercises internally.

use mongolite::{Database, ReturnDocument};
use serde_json::{json, Map};

fn obj(v: serde_json::Value) -> Map<String, serde_json::Value> {
    v.as_object().unwrap().clone()
}

// ========== INSERT TESTS ==========

#[test]
fn test_insert_one_auto_id() {
    let db = Database::new();
    let users = db.collection("users");

    let result = users.insert_one(obj(json!({"name": "Alice"}))).unwrap();
    assert_eq!(users.count_documents(&json!({}), None, None).unwrap(), 1);

    let found = users
        .find_one(&json!({"_id": result.inserted_id.to_value()}))
        .unwrap()
        .unwrap();
    assert_eq!(found["name"], json!("Alice"));
}

#[test]
fn test_insert_one_with_custom_id() {
    let db = Database::new();
    let users = db.collection("users");

    users
        .insert_one(obj(json!({"_id": "custom", "name": "Bob"})))
        .unwrap();

    let found = users.find_one(&json!({"_id": "custom"})).unwrap().unwrap();
    assert_eq!(found["name"], json!("Bob"));
}

#[test]
fn test_insert_duplicate_id_fails() {
    let db = Database::new();
    let users = db.collection("users");

    users.insert_one(obj(json!({"_id": 1, "name": "Alice"}))).unwrap();
    let err = users
        .insert_one(obj(json!({"_id": 1, "name": "Bob"})))
        .unwrap_err();
    assert!(matches!(err, mongolite::MongoLiteError::DuplicateKey(_)));
    assert_eq!(users.count_documents(&json!({}), None, None).unwrap(), 1);
}

#[test]
fn test_insert_many_ordered_stops_on_first_error() {
    let db = Database::new();
    let users = db.collection("users");

    let docs = vec![
        obj(json!({"_id": 1, "name": "Alice"})),
        obj(json!({"_id": 1, "name": "Dup"})),
        obj(json!({"_id": 2, "name": "Carol"})),
    ];
    let err = users.insert_many(docs, true).unwrap_err();
    assert!(matches!(err, mongolite::MongoLiteError::DuplicateKey(_)));
    // first document landed before the duplicate was hit; third never ran
    assert_eq!(users.count_documents(&json!({}), None, None).unwrap(), 1);
}

// ========== FIND TESTS ==========

#[test]
fn test_find_matches_count_equals_filtered_subset() {
    let db = Database::new();
    let users = db.collection("users");
    for (name, age) in [("Alice", 30), ("Bob", 25), ("Carol", 35)] {
        users.insert_one(obj(json!({"name": name, "age": age}))).unwrap();
    }

    let mut cursor = users.find(&json!({"age": {"$gte": 30}}));
    assert_eq!(cursor.count().unwrap(), 2);
}

#[test]
fn test_find_with_sort_skip_limit() {
    let db = Database::new();
    let users = db.collection("users");
    for age in [30, 25, 35, 20] {
        users.insert_one(obj(json!({"age": age}))).unwrap();
    }

    let mut cursor = users
        .find(&json!({}))
        .sort(vec![("age".to_string(), 1)])
        .skip(1)
        .limit(2);
    let docs = cursor.to_vec().unwrap();
    let ages: Vec<i64> = docs
        .iter()
        .map(|d| d.get("age").unwrap().as_i64().unwrap())
        .collect();
    assert_eq!(ages, vec![25, 30]);
}

#[test]
fn test_find_with_projection_combines_dotted_paths() {
    let db = Database::new();
    let users = db.collection("users");
    users
        .insert_one(obj(json!({"a": 1, "b": {"c": 2, "d": 3}, "e": 4})))
        .unwrap();

    let mut cursor = users
        .find_with_projection(&json!({}), &json!({"b.c": 1}))
        .unwrap();
    let docs = cursor.to_vec().unwrap();
    let doc = docs[0].to_value();
    assert_eq!(doc["b"], json!({"c": 2}));
    assert!(doc.get("a").is_none());
    assert!(doc.get("e").is_none());
    assert!(doc.get("_id").is_some());
}

// ========== UPDATE TESTS ==========

#[test]
fn test_update_one_set_does_not_change_id() {
    let db = Database::new();
    let users = db.collection("users");
    users.insert_one(obj(json!({"_id": 1, "age": 10}))).unwrap();

    let result = users
        .update_one(&json!({"_id": 1}), &json!({"$set": {"age": 11}}), false)
        .unwrap();
    assert_eq!(result.matched_count, 1);
    assert_eq!(result.modified_count, 1);

    let doc = users.find_one(&json!({"_id": 1})).unwrap().unwrap();
    assert_eq!(doc["_id"], json!(1));
    assert_eq!(doc["age"], json!(11));
}

#[test]
fn test_upsert_on_empty_collection() {
    let db = Database::new();
    let users = db.collection("users");

    let result = users
        .update_one(&json!({"a": 1}), &json!({"$set": {"b": 2}}), true)
        .unwrap();
    assert_eq!(result.matched_count, 0);
    assert!(result.upserted_id.is_some());

    let doc = users.find_one(&json!({})).unwrap().unwrap();
    assert_eq!(doc["a"], json!(1));
    assert_eq!(doc["b"], json!(2));
}

#[test]
fn test_positional_update_resolves_array_element() {
    let db = Database::new();
    let users = db.collection("users");
    users
        .insert_one(obj(json!({
            "_id": 1,
            "arr": [{"k": 1, "v": 10}, {"k": 2, "v": 20}]
        })))
        .unwrap();

    users
        .update_one(
            &json!({"arr": {"$elemMatch": {"k": 2}}}),
            &json!({"$set": {"arr.$.v": 99}}),
            false,
        )
        .unwrap();

    let doc = users.find_one(&json!({"_id": 1})).unwrap().unwrap();
    assert_eq!(doc["arr"], json!([{"k": 1, "v": 10}, {"k": 2, "v": 99}]));
}

#[test]
fn test_duplicate_key_rollback_on_update() {
    let db = Database::new();
    let users = db.collection("users");
    users.create_index(vec![("email".to_string(), 1)], true, false).unwrap();
    users
        .insert_one(obj(json!({"_id": 1, "email": "x@y"})))
        .unwrap();
    users
        .insert_one(obj(json!({"_id": 2, "email": "z@y"})))
        .unwrap();

    let err = users
        .update_one(&json!({"_id": 1}), &json!({"$set": {"email": "z@y"}}), false)
        .unwrap_err();
    assert!(matches!(err, mongolite::MongoLiteError::DuplicateKey(_)));

    let doc = users.find_one(&json!({"_id": 1})).unwrap().unwrap();
    assert_eq!(doc["email"], json!("x@y"));
}

#[test]
fn test_replace_one_preserves_id_rejects_id_change() {
    let db = Database::new();
    let users = db.collection("users");
    users.insert_one(obj(json!({"_id": 1, "name": "Alice", "age": 1}))).unwrap();

    users
        .replace_one(&json!({"_id": 1}), obj(json!({"name": "Alicia"})), false)
        .unwrap();
    let doc = users.find_one(&json!({"_id": 1})).unwrap().unwrap();
    assert_eq!(doc["name"], json!("Alicia"));
    assert!(doc.get("age").is_none());

    let err = users
        .replace_one(&json!({"_id": 1}), obj(json!({"_id": 2, "name": "X"})), false)
        .unwrap_err();
    assert!(matches!(err, mongolite::MongoLiteError::Validation(_)));
}

// ========== DELETE TESTS ==========

#[test]
fn test_delete_many_removes_matching_documents() {
    let db = Database::new();
    let users = db.collection("users");
    for age in [10, 20, 30] {
        users.insert_one(obj(json!({"age": age}))).unwrap();
    }

    let result = users.delete_many(&json!({"age": {"$lt": 25}})).unwrap();
    assert_eq!(result.deleted_count, 2);
    assert_eq!(users.count_documents(&json!({}), None, None).unwrap(), 1);
}

// ========== FIND-AND-MODIFY TESTS ==========

#[test]
fn test_find_one_and_update_returns_before_by_default() {
    let db = Database::new();
    let users = db.collection("users");
    users.insert_one(obj(json!({"_id": 1, "age": 1}))).unwrap();

    let options = mongolite::FindOneAndUpdateOptions {
        upsert: false,
        return_document: ReturnDocument::Before,
        projection: None,
        sort: None,
    };
    let before = users
        .find_one_and_update(&json!({"_id": 1}), &json!({"$set": {"age": 2}}), options)
        .unwrap()
        .unwrap();
    assert_eq!(before["age"], json!(1));

    let after = users.find_one(&json!({"_id": 1})).unwrap().unwrap();
    assert_eq!(after["age"], json!(2));
}

#[test]
fn test_find_one_and_update_returns_after_when_requested() {
    let db = Database::new();
    let users = db.collection("users");
    users.insert_one(obj(json!({"_id": 1, "age": 1}))).unwrap();

    let options = mongolite::FindOneAndUpdateOptions {
        upsert: false,
        return_document: ReturnDocument::After,
        projection: None,
        sort: None,
    };
    let after = users
        .find_one_and_update(&json!({"_id": 1}), &json!({"$set": {"age": 2}}), options)
        .unwrap()
        .unwrap();
    assert_eq!(after["age"], json!(2));
}

// ========== INDEX TESTS ==========

#[test]
fn test_unique_index_enforced_on_insert() {
    let db = Database::new();
    let users = db.collection("users");
    users.create_index(vec![("email".to_string(), 1)], true, false).unwrap();

    users.insert_one(obj(json!({"email": "a@b"}))).unwrap();
    let err = users.insert_one(obj(json!({"email": "a@b"}))).unwrap_err();
    assert!(matches!(err, mongolite::MongoLiteError::DuplicateKey(_)));
    assert_eq!(users.count_documents(&json!({}), None, None).unwrap(), 1);
}

#[test]
fn test_sparse_unique_index_skips_missing_field() {
    let db = Database::new();
    let users = db.collection("users");
    users.create_index(vec![("email".to_string(), 1)], true, true).unwrap();

    users.insert_one(obj(json!({"name": "a"}))).unwrap();
    users.insert_one(obj(json!({"name": "b"}))).unwrap();
    assert_eq!(users.count_documents(&json!({}), None, None).unwrap(), 2);
}

// ========== AGGREGATION TESTS ==========

#[test]
fn test_aggregate_match_composes_with_find() {
    let db = Database::new();
    let users = db.collection("users");
    for age in [10, 20, 30] {
        users.insert_one(obj(json!({"age": age}))).unwrap();
    }

    let filter = json!({"age": {"$gte": 20}});
    let via_find = users.find(&filter).to_vec().unwrap().len();
    let via_agg = users
        .aggregate(&json!([{"$match": filter}]))
        .unwrap()
        .len();
    assert_eq!(via_find, via_agg);
}

#[test]
fn test_bucket_stage_groups_by_boundaries() {
    let db = Database::new();
    let docs = db.collection("docs");
    for x in [1, 5, 10, 15] {
        docs.insert_one(obj(json!({"x": x}))).unwrap();
    }

    let pipeline = json!([{
        "$bucket": {
            "groupBy": "$x",
            "boundaries": [0, 10, 20],
            "default": "other",
            "output": {"count": {"$sum": 1}}
        }
    }]);
    let mut results = docs.aggregate(&pipeline).unwrap();
    results.sort_by_key(|d| d["_id"].as_i64().unwrap());

    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["_id"], json!(0));
    assert_eq!(results[0]["count"], json!(2));
    assert_eq!(results[1]["_id"], json!(10));
    assert_eq!(results[1]["count"], json!(2));
}

#[test]
fn test_unwind_with_preserve_null_and_empty_arrays() {
    let db = Database::new();
    let docs = db.collection("docs");
    docs.insert_one(obj(json!({"a": [1, 2]}))).unwrap();
    docs.insert_one(obj(json!({"a": []}))).unwrap();
    docs.insert_one(obj(json!({"b": 1}))).unwrap();

    let pipeline = json!([
        {"$unwind": {"path": "$a", "preserveNullAndEmptyArrays": true}},
        {"$project": {"_id": 0}}
    ]);
    let results = docs.aggregate(&pipeline).unwrap();
    assert_eq!(
        results,
        vec![json!({"a": 1}), json!({"a": 2}), json!({}), json!({"b": 1})]
    );
}

#[test]
fn test_lookup_joins_sibling_collection() {
    let db = Database::new();
    let orders = db.collection("orders");
    let customers = db.collection("customers");

    customers.insert_one(obj(json!({"_id": 1, "name": "Alice"}))).unwrap();
    orders
        .insert_one(obj(json!({"_id": 100, "customer_id": 1, "item": "widget"})))
        .unwrap();

    let pipeline = json!([{
        "$lookup": {
            "from": "customers",
            "localField": "customer_id",
            "foreignField": "_id",
            "as": "customer"
        }
    }]);
    let results = orders.aggregate(&pipeline).unwrap();
    assert_eq!(results[0]["customer"][0]["name"], json!("Alice"));
}

// ========== BULK WRITE TESTS ==========

#[test]
fn test_bulk_write_aggregates_counters_in_order() {
    let db = Database::new();
    let users = db.collection("users");
    users.insert_one(obj(json!({"_id": 1, "age": 1}))).unwrap();

    let mut builder = mongolite::BulkBuilder::new(true).unwrap();
    builder.insert_one(json!({"_id": 2, "age": 2})).unwrap();
    builder
        .update_one(json!({"_id": 1}), json!({"$set": {"age": 9}}), false)
        .unwrap();
    builder.delete_one(json!({"_id": 2})).unwrap();

    let result = users.bulk_write(builder).unwrap();
    assert_eq!(result.n_inserted, 1);
    assert_eq!(result.n_matched, 1);
    assert_eq!(result.n_modified, 1);
    assert_eq!(result.n_removed, 1);
    assert_eq!(users.count_documents(&json!({}), None, None).unwrap(), 1);
}

// ========== DISTINCT TESTS ==========

#[test]
fn test_distinct_preserves_first_seen_order() {
    let db = Database::new();
    let users = db.collection("users");
    for age in [30, 10, 30, 20] {
        users.insert_one(obj(json!({"age": age}))).unwrap();
    }

    let values = users.distinct("age", &json!({})).unwrap();
    assert_eq!(values, vec![json!(30), json!(10), json!(20)]);
}

// ========== ROUND-TRIP / IDEMPOTENCE PROPERTIES ==========

#[test]
fn test_insert_then_find_one_round_trips() {
    let db = Database::new();
    let users = db.collection("users");
    let result = users.insert_one(obj(json!({"name": "Alice"}))).unwrap();

    let doc = users
        .find_one(&json!({"_id": result.inserted_id.to_value()}))
        .unwrap()
        .unwrap();
    assert_eq!(doc["name"], json!("Alice"));
    assert_eq!(doc["_id"], result.inserted_id.to_value());
}

#[test]
fn test_projection_is_idempotent() {
    let db = Database::new();
    let users = db.collection("users");
    users
        .insert_one(obj(json!({"a": 1, "b": {"c": 2, "d": 3}})))
        .unwrap();

    let projection = json!({"b.c": 1});
    let mut first = users.find_with_projection(&json!({}), &projection).unwrap();
    let once = first.to_vec().unwrap()[0].to_value();

    // Re-insert the already-projected shape and project it again.
    let reinserted = obj(once.clone());
    let scratch = db.collection("scratch");
    scratch.insert_one(reinserted).unwrap();
    let mut second = scratch.find_with_projection(&json!({}), &projection).unwrap();
    let twice = second.to_vec().unwrap()[0].to_value();

    assert_eq!(once["b"], twice["b"]);
}

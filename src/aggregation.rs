// src/aggregation.rs
// Aggregation pipeline implementation

use crate::document::Document;
use crate::error::{MongoLiteError, Result};
use crate::query::Query;
use crate::value_utils::{compare_values_total, deep_equal, get_nested_value};
use indexmap::IndexMap;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Parse a field reference from JSON value (e.g., "$fieldName" -> "fieldName")
///
/// Used by accumulators like $avg, $min, $max, $first, $last
fn parse_field_reference(value: &Value, op_name: &str) -> Result<String> {
    if let Some(s) = value.as_str() {
        if s.starts_with('$') {
            Ok(s.trim_start_matches('$').to_string())
        } else {
            Err(MongoLiteError::Validation(format!(
                "{} field reference must start with $",
                op_name
            )))
        }
    } else {
        Err(MongoLiteError::Validation(format!(
            "{} must be a field reference",
            op_name
        )))
    }
}

/// Compute min or max over documents using a comparison function
///
/// Used by $min and $max accumulators
fn compute_extremum<F>(docs: &[Value], field: &str, compare: F) -> Result<Value>
where
    F: Fn(f64, f64) -> f64,
{
    let mut result: Option<f64> = None;

    for doc in docs {
        if let Some(value) = get_nested_value(doc, field) {
            let num = if let Some(n) = value.as_f64() {
                n
            } else if let Some(n) = value.as_i64() {
                n as f64
            } else {
                continue;
            };

            result = Some(result.map_or(num, |r| compare(r, num)));
        }
    }

    Ok(result.map(Value::from).unwrap_or(Value::Null))
}

/// Side-channel a pipeline reaches for when a stage needs more than the
/// `Vec<Value>` flowing through it: a sibling collection to read from
/// (`$lookup`), a target to write into (`$out`), or a source of randomness
/// for uniform draws (`$sample`). `Collection::aggregate` supplies the real
/// implementation; `NullContext` below is what a bare `Pipeline` test gets.
pub trait AggregationContext {
    fn lookup_documents(&self, from: &str) -> Vec<Value>;
    fn write_out(&self, into: &str, docs: &[Value]);
    /// Draws a uniformly-distributed index in `0..len`, with replacement.
    fn sample_index(&self, len: usize) -> usize;
}

/// A context for stages that never touch another collection or the RNG —
/// every pipeline that doesn't use `$lookup`/`$out`/`$sample` can run
/// against this.
pub struct NullContext;

impl AggregationContext for NullContext {
    fn lookup_documents(&self, _from: &str) -> Vec<Value> {
        Vec::new()
    }

    fn write_out(&self, _into: &str, _docs: &[Value]) {}

    fn sample_index(&self, len: usize) -> usize {
        len.saturating_sub(1)
    }
}

/// Stage names that are recognized MongoDB aggregation operators this engine
/// deliberately doesn't implement. Distinguished from a typo'd or invented
/// stage name, which is a validation error instead.
const UNSUPPORTED_STAGES: &[&str] = &[
    "$facet",
    "$graphLookup",
    "$redact",
    "$geoNear",
    "$addFields",
    "$replaceRoot",
    "$replaceWith",
    "$count",
    "$sortByCount",
    "$bucketAuto",
    "$indexStats",
    "$collStats",
    "$currentOp",
    "$merge",
    "$planCacheStats",
    "$unionWith",
];

const UNSUPPORTED_ACCUMULATORS: &[&str] = &["$stdDevPop", "$stdDevSamp", "$mergeObjects"];

/// Aggregation pipeline
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

/// Pipeline stage
#[derive(Debug, Clone)]
pub enum Stage {
    Match(MatchStage),
    Project(ProjectStage),
    Group(GroupStage),
    Sort(SortStage),
    Limit(LimitStage),
    Skip(SkipStage),
    Bucket(BucketStage),
    Unwind(UnwindStage),
    Lookup(LookupStage),
    Sample(SampleStage),
    Out(OutStage),
}

/// $match stage - filter documents
#[derive(Debug, Clone)]
pub struct MatchStage {
    query: Query,
}

/// $project stage - reshape documents
#[derive(Debug, Clone)]
pub struct ProjectStage {
    fields: IndexMap<String, ProjectField>,
}

#[derive(Debug, Clone)]
pub enum ProjectField {
    Include,        // 1
    Exclude,        // 0
    Rename(String), // "$fieldName"
}

/// $group stage - group documents and compute aggregates
#[derive(Debug, Clone)]
pub struct GroupStage {
    id: GroupId,
    accumulators: Vec<(String, Accumulator)>,
}

#[derive(Debug, Clone)]
pub enum GroupId {
    Field(String), // "$city"
    Null,          // null (all documents in one group)
}

#[derive(Debug, Clone)]
pub enum Accumulator {
    Sum(SumExpression),
    Avg(String), // Field name
    Min(String),
    Max(String),
    First(String),
    Last(String),
    AddToSet(String),
    Push(String),
    Count,
}

#[derive(Debug, Clone)]
pub enum SumExpression {
    Constant(i64), // {"$sum": 1} - count
    Field(String), // {"$sum": "$amount"} - sum field values
}

/// $sort stage - sort documents
#[derive(Debug, Clone)]
pub struct SortStage {
    fields: Vec<(String, SortDirection)>,
}

#[derive(Debug, Clone)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// $limit stage - limit number of documents
#[derive(Debug, Clone)]
pub struct LimitStage {
    limit: usize,
}

/// $skip stage - skip documents
#[derive(Debug, Clone)]
pub struct SkipStage {
    skip: usize,
}

/// $bucket stage - assign documents to fixed, user-defined boundary ranges
/// (boundaries split the range into half-open intervals
/// `[boundaries[i], boundaries[i+1])`").
#[derive(Debug, Clone)]
pub struct BucketStage {
    group_by: String,
    boundaries: Vec<Value>,
    default: Option<Value>,
    output: Vec<(String, Accumulator)>,
}

/// $unwind stage - explode an array field into one document per element.
#[derive(Debug, Clone)]
pub struct UnwindStage {
    path: String,
    preserve_null_and_empty_arrays: bool,
    include_array_index: Option<String>,
}

/// $lookup stage - left outer join against a sibling collection, matching
/// local values against foreign values with `$in`-style array semantics.
#[derive(Debug, Clone)]
pub struct LookupStage {
    from: String,
    local_field: String,
    foreign_field: String,
    as_field: String,
}

/// $sample stage - draw `size` documents uniformly at random, with
/// replacement, from the pipeline's current input.
#[derive(Debug, Clone)]
pub struct SampleStage {
    size: usize,
}

/// $out stage - replace a named collection's contents with the pipeline's
/// output, which then passes through unchanged.
#[derive(Debug, Clone)]
pub struct OutStage {
    target: String,
}

impl Pipeline {
    /// Create pipeline from JSON array
    pub fn from_json(pipeline_json: &Value) -> Result<Self> {
        if let Value::Array(stages_array) = pipeline_json {
            if stages_array.is_empty() {
                return Err(MongoLiteError::Validation(
                    "Pipeline cannot be empty".to_string(),
                ));
            }

            let mut stages = Vec::new();
            for stage_json in stages_array {
                let stage = Stage::from_json(stage_json)?;
                stages.push(stage);
            }

            Ok(Pipeline { stages })
        } else {
            Err(MongoLiteError::Validation(
                "Pipeline must be an array".to_string(),
            ))
        }
    }

    /// Execute pipeline on documents, threading `ctx` through any stage that
    /// needs to reach outside this one `Vec<Value>` (`$lookup`, `$out`,
    /// `$sample`).
    pub fn execute(&self, mut docs: Vec<Value>, ctx: &dyn AggregationContext) -> Result<Vec<Value>> {
        for stage in &self.stages {
            crate::log_trace!("pipeline stage {} over {} documents", stage.name(), docs.len());
            docs = stage.execute(docs, ctx)?;
        }
        Ok(docs)
    }
}

impl Stage {
    /// Parse stage from JSON
    fn from_json(stage_json: &Value) -> Result<Self> {
        if let Value::Object(obj) = stage_json {
            // Each stage should have exactly one key
            if obj.len() != 1 {
                return Err(MongoLiteError::Validation(
                    "Each stage must have exactly one operator".to_string(),
                ));
            }

            let (stage_name, stage_spec) = obj.iter().next().unwrap();

            match stage_name.as_str() {
                "$match" => Ok(Stage::Match(MatchStage::from_json(stage_spec)?)),
                "$project" => Ok(Stage::Project(ProjectStage::from_json(stage_spec)?)),
                "$group" => Ok(Stage::Group(GroupStage::from_json(stage_spec)?)),
                "$sort" => Ok(Stage::Sort(SortStage::from_json(stage_spec)?)),
                "$limit" => Ok(Stage::Limit(LimitStage::from_json(stage_spec)?)),
                "$skip" => Ok(Stage::Skip(SkipStage::from_json(stage_spec)?)),
                "$bucket" => Ok(Stage::Bucket(BucketStage::from_json(stage_spec)?)),
                "$unwind" => Ok(Stage::Unwind(UnwindStage::from_json(stage_spec)?)),
                "$lookup" => Ok(Stage::Lookup(LookupStage::from_json(stage_spec)?)),
                "$sample" => Ok(Stage::Sample(SampleStage::from_json(stage_spec)?)),
                "$out" => Ok(Stage::Out(OutStage::from_json(stage_spec)?)),
                name if UNSUPPORTED_STAGES.contains(&name) => Err(MongoLiteError::NotImplemented(
                    format!("pipeline stage {} is not implemented", name),
                )),
                _ => Err(MongoLiteError::Validation(format!(
                    "Unknown pipeline stage: {}",
                    stage_name
                ))),
            }
        } else {
            Err(MongoLiteError::Validation(
                "Stage must be an object".to_string(),
            ))
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Project(_) => "$project",
            Stage::Group(_) => "$group",
            Stage::Sort(_) => "$sort",
            Stage::Limit(_) => "$limit",
            Stage::Skip(_) => "$skip",
            Stage::Bucket(_) => "$bucket",
            Stage::Unwind(_) => "$unwind",
            Stage::Lookup(_) => "$lookup",
            Stage::Sample(_) => "$sample",
            Stage::Out(_) => "$out",
        }
    }

    /// Execute this stage
    fn execute(&self, docs: Vec<Value>, ctx: &dyn AggregationContext) -> Result<Vec<Value>> {
        match self {
            Stage::Match(stage) => stage.execute(docs),
            Stage::Project(stage) => stage.execute(docs),
            Stage::Group(stage) => stage.execute(docs),
            Stage::Sort(stage) => stage.execute(docs),
            Stage::Limit(stage) => stage.execute(docs),
            Stage::Skip(stage) => stage.execute(docs),
            Stage::Bucket(stage) => stage.execute(docs),
            Stage::Unwind(stage) => stage.execute(docs),
            Stage::Lookup(stage) => stage.execute(docs, ctx),
            Stage::Sample(stage) => stage.execute(docs, ctx),
            Stage::Out(stage) => stage.execute(docs, ctx),
        }
    }
}

impl MatchStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let query = Query::from_json(spec)?;
        Ok(MatchStage { query })
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        let mut results = Vec::new();

        for doc in docs {
            // Add _id if not present (for aggregation intermediate results)
            let doc_with_id = if doc.get("_id").is_none() {
                let mut doc_obj = doc.clone();
                if let Value::Object(ref mut map) = doc_obj {
                    map.insert("_id".to_string(), Value::from(0)); // Temporary _id
                }
                doc_obj
            } else {
                doc.clone()
            };

            let doc_json_str = serde_json::to_string(&doc_with_id)?;
            let document = Document::from_json(&doc_json_str)?;

            if self.query.matches(&document) {
                results.push(doc);
            }
        }

        Ok(results)
    }
}

impl ProjectStage {
    fn from_json(spec: &Value) -> Result<Self> {
        if let Value::Object(obj) = spec {
            let mut fields = IndexMap::new();

            for (field, value) in obj {
                if field.contains('.') {
                    return Err(MongoLiteError::Validation(format!(
                        "$project field names may not contain '.': {}",
                        field
                    )));
                }

                let project_field = if let Some(n) = value.as_i64() {
                    match n {
                        1 => ProjectField::Include,
                        0 => ProjectField::Exclude,
                        _ => {
                            return Err(MongoLiteError::Validation(format!(
                                "Invalid project value: {}",
                                n
                            )))
                        }
                    }
                } else if let Some(s) = value.as_str() {
                    if s.starts_with('$') {
                        ProjectField::Rename(s.to_string())
                    } else {
                        return Err(MongoLiteError::Validation(format!(
                            "Invalid project expression: {}",
                            s
                        )));
                    }
                } else {
                    return Err(MongoLiteError::Validation(
                        "Project field must be 0, 1, or field reference".to_string(),
                    ));
                };

                fields.insert(field.clone(), project_field);
            }

            Ok(ProjectStage { fields })
        } else {
            Err(MongoLiteError::Validation(
                "$project must be an object".to_string(),
            ))
        }
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        let mut results = Vec::new();

        for doc in docs {
            let projected = self.project_document(&doc)?;
            results.push(projected);
        }

        Ok(results)
    }

    fn project_document(&self, doc: &Value) -> Result<Value> {
        let mut result = serde_json::Map::new();

        if let Value::Object(obj) = doc {
            // Check if we're in include mode or exclude mode
            let has_inclusions = self
                .fields
                .values()
                .any(|f| matches!(f, ProjectField::Include | ProjectField::Rename(_)));
            let has_non_id_exclusions = self
                .fields
                .iter()
                .any(|(field, action)| matches!(action, ProjectField::Exclude) && field != "_id");

            // Determine mode: if we have any inclusions, we're in include mode
            // Exception: excluding _id is allowed in include mode
            let include_mode = has_inclusions && !has_non_id_exclusions;

            if include_mode {
                // Include mode: only include specified fields
                for (field, action) in &self.fields {
                    match action {
                        ProjectField::Include => {
                            // Use get_nested_value to support dot notation in include fields
                            if let Some(value) = get_nested_value(doc, field) {
                                result.insert(field.clone(), value.clone());
                            }
                        }
                        ProjectField::Rename(source) => {
                            let source_field = source.trim_start_matches('$');
                            // Use get_nested_value to support dot notation (e.g., "$address.city")
                            if let Some(value) = get_nested_value(doc, source_field) {
                                result.insert(field.clone(), value.clone());
                            }
                        }
                        ProjectField::Exclude => {
                            // Should not happen in include mode
                        }
                    }
                }

                // _id defaults to included unless explicitly excluded.
                let id_excluded = matches!(self.fields.get("_id"), Some(ProjectField::Exclude));
                if !id_excluded && !result.contains_key("_id") {
                    if let Some(id) = obj.get("_id") {
                        result.insert("_id".to_string(), id.clone());
                    }
                }
            } else {
                // Exclude mode: include all fields except excluded ones
                for (field, value) in obj {
                    if let Some(action) = self.fields.get(field) {
                        match action {
                            ProjectField::Exclude => {
                                // Skip this field
                            }
                            ProjectField::Include => {
                                result.insert(field.clone(), value.clone());
                            }
                            ProjectField::Rename(_) => {
                                // Handled below
                            }
                        }
                    } else {
                        // Field not mentioned, include it in exclude mode
                        result.insert(field.clone(), value.clone());
                    }
                }

                // Handle renames in exclude mode
                for (target_field, action) in &self.fields {
                    if let ProjectField::Rename(source) = action {
                        let source_field = source.trim_start_matches('$');
                        // Use get_nested_value to support dot notation (e.g., "$address.city")
                        if let Some(value) = get_nested_value(doc, source_field) {
                            result.insert(target_field.clone(), value.clone());
                        }
                    }
                }
            }
        }

        Ok(Value::Object(result))
    }
}

fn parse_group_id(id_value: &Value) -> Result<GroupId> {
    if id_value.is_null() {
        Ok(GroupId::Null)
    } else if let Some(s) = id_value.as_str() {
        if s.starts_with('$') {
            Ok(GroupId::Field(s.to_string()))
        } else {
            Err(MongoLiteError::Validation(
                "Group _id field reference must start with $".to_string(),
            ))
        }
    } else {
        Err(MongoLiteError::Validation(
            "Group _id must be null or field reference".to_string(),
        ))
    }
}

fn group_key_for(id: &GroupId, doc: &Value) -> Result<String> {
    match id {
        GroupId::Null => Ok("__all__".to_string()),
        GroupId::Field(field) => {
            let field_name = field.trim_start_matches('$');
            if let Some(value) = get_nested_value(doc, field_name) {
                Ok(serde_json::to_string(value)?)
            } else {
                Ok("null".to_string())
            }
        }
    }
}

fn parse_group_key(key: &str) -> Result<Value> {
    if key == "__all__" {
        Ok(Value::Null)
    } else {
        Ok(serde_json::from_str(key)?)
    }
}

fn compute_accumulators(accumulators: &[(String, Accumulator)], docs: &[Value]) -> Result<Value> {
    let mut result = serde_json::Map::new();
    for (field, accumulator) in accumulators {
        result.insert(field.clone(), accumulator.compute(docs)?);
    }
    Ok(Value::Object(result))
}

impl GroupStage {
    fn from_json(spec: &Value) -> Result<Self> {
        if let Value::Object(obj) = spec {
            let id_value = obj
                .get("_id")
                .ok_or_else(|| MongoLiteError::Validation("Group stage must have _id field".to_string()))?;
            let id = parse_group_id(id_value)?;

            let mut accumulators = Vec::new();
            for (field, value) in obj {
                if field == "_id" {
                    continue;
                }
                let accumulator = Accumulator::from_json(value)?;
                accumulators.push((field.clone(), accumulator));
            }

            Ok(GroupStage { id, accumulators })
        } else {
            Err(MongoLiteError::Validation(
                "$group must be an object".to_string(),
            ))
        }
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<Value>> = HashMap::new();

        for doc in docs {
            let group_key = group_key_for(&self.id, &doc)?;
            if !groups.contains_key(&group_key) {
                order.push(group_key.clone());
            }
            groups.entry(group_key).or_insert_with(Vec::new).push(doc);
        }

        let mut results = Vec::new();
        for key in order {
            let group_docs = groups.remove(&key).unwrap_or_default();
            let mut result = match compute_accumulators(&self.accumulators, &group_docs)? {
                Value::Object(map) => map,
                _ => unreachable!(),
            };
            result.insert("_id".to_string(), parse_group_key(&key)?);
            // Re-insert _id first for readable output, matching field order.
            let mut ordered = serde_json::Map::new();
            ordered.insert("_id".to_string(), result.remove("_id").unwrap());
            ordered.extend(result);
            results.push(Value::Object(ordered));
        }

        Ok(results)
    }
}

impl Accumulator {
    fn from_json(spec: &Value) -> Result<Self> {
        if let Value::Object(obj) = spec {
            if obj.len() != 1 {
                return Err(MongoLiteError::Validation(
                    "Accumulator must have exactly one operator".to_string(),
                ));
            }

            let (op, value) = obj.iter().next().unwrap();

            match op.as_str() {
                "$sum" => {
                    if let Some(n) = value.as_i64() {
                        Ok(Accumulator::Sum(SumExpression::Constant(n)))
                    } else if let Some(s) = value.as_str() {
                        if s.starts_with('$') {
                            Ok(Accumulator::Sum(SumExpression::Field(
                                s.trim_start_matches('$').to_string(),
                            )))
                        } else {
                            Err(MongoLiteError::Validation(
                                "$sum field reference must start with $".to_string(),
                            ))
                        }
                    } else {
                        Err(MongoLiteError::Validation(
                            "$sum must be a number or field reference".to_string(),
                        ))
                    }
                }
                "$avg" => Ok(Accumulator::Avg(parse_field_reference(value, "$avg")?)),
                "$min" => Ok(Accumulator::Min(parse_field_reference(value, "$min")?)),
                "$max" => Ok(Accumulator::Max(parse_field_reference(value, "$max")?)),
                "$first" => Ok(Accumulator::First(parse_field_reference(value, "$first")?)),
                "$last" => Ok(Accumulator::Last(parse_field_reference(value, "$last")?)),
                "$addToSet" => Ok(Accumulator::AddToSet(parse_field_reference(value, "$addToSet")?)),
                "$push" => Ok(Accumulator::Push(parse_field_reference(value, "$push")?)),
                name if UNSUPPORTED_ACCUMULATORS.contains(&name) => Err(MongoLiteError::NotImplemented(
                    format!("accumulator {} is not implemented", name),
                )),
                _ => Err(MongoLiteError::Validation(format!(
                    "Unknown accumulator: {}",
                    op
                ))),
            }
        } else {
            Err(MongoLiteError::Validation(
                "Accumulator must be an object".to_string(),
            ))
        }
    }

    fn compute(&self, docs: &[Value]) -> Result<Value> {
        match self {
            Accumulator::Count => Ok(Value::from(docs.len() as i64)),

            Accumulator::Sum(expr) => match expr {
                SumExpression::Constant(n) => Ok(Value::from((*n).saturating_mul(docs.len() as i64))),
                SumExpression::Field(field) => {
                    let mut sum_int: i64 = 0;
                    let mut sum_float: f64 = 0.0;
                    let mut has_float = false;

                    for doc in docs {
                        // Use get_nested_value to support dot notation (e.g., "$order.total")
                        if let Some(value) = get_nested_value(doc, field) {
                            if let Some(n) = value.as_i64() {
                                sum_int = sum_int.saturating_add(n);
                            } else if let Some(f) = value.as_f64() {
                                sum_float += f;
                                has_float = true;
                            }
                        }
                    }

                    if has_float {
                        Ok(Value::from(sum_float + sum_int as f64))
                    } else {
                        Ok(Value::from(sum_int))
                    }
                }
            },

            // Missing or non-numeric values coerce to 0 and still count
            // toward the denominator.
            Accumulator::Avg(field) => {
                if docs.is_empty() {
                    return Ok(Value::Null);
                }
                let mut sum = 0.0;
                for doc in docs {
                    let value = get_nested_value(doc, field).and_then(|v| {
                        v.as_f64().or_else(|| v.as_i64().map(|n| n as f64))
                    });
                    sum += value.unwrap_or(0.0);
                }
                Ok(Value::from(sum / docs.len() as f64))
            }

            Accumulator::Min(field) => compute_extremum(docs, field, f64::min),

            Accumulator::Max(field) => compute_extremum(docs, field, f64::max),

            Accumulator::First(field) => Ok(docs
                .first()
                .and_then(|doc| get_nested_value(doc, field).cloned())
                .unwrap_or(Value::Null)),

            Accumulator::Last(field) => Ok(docs
                .last()
                .and_then(|doc| get_nested_value(doc, field).cloned())
                .unwrap_or(Value::Null)),

            Accumulator::AddToSet(field) => {
                let mut seen: Vec<Value> = Vec::new();
                for doc in docs {
                    if let Some(value) = get_nested_value(doc, field) {
                        if !seen.iter().any(|existing| deep_equal(existing, value)) {
                            seen.push(value.clone());
                        }
                    }
                }
                Ok(Value::Array(seen))
            }

            Accumulator::Push(field) => {
                let mut pushed: Vec<Value> = Vec::new();
                for doc in docs {
                    if let Some(value) = get_nested_value(doc, field) {
                        pushed.push(value.clone());
                    }
                }
                Ok(Value::Array(pushed))
            }
        }
    }
}

impl SortStage {
    fn from_json(spec: &Value) -> Result<Self> {
        if let Value::Object(obj) = spec {
            let mut fields = Vec::new();

            for (field, value) in obj {
                let direction = if let Some(n) = value.as_i64() {
                    match n {
                        1 => SortDirection::Ascending,
                        -1 => SortDirection::Descending,
                        _ => {
                            return Err(MongoLiteError::Validation(
                                "Sort direction must be 1 or -1".to_string(),
                            ))
                        }
                    }
                } else {
                    return Err(MongoLiteError::Validation(
                        "Sort direction must be 1 or -1".to_string(),
                    ));
                };

                fields.push((field.clone(), direction));
            }

            Ok(SortStage { fields })
        } else {
            Err(MongoLiteError::Validation(
                "$sort must be an object".to_string(),
            ))
        }
    }

    fn execute(&self, mut docs: Vec<Value>) -> Result<Vec<Value>> {
        docs.sort_by(|a, b| {
            for (field, direction) in &self.fields {
                // Use get_nested_value to support dot notation (e.g., "address.city")
                let val_a = get_nested_value(a, field);
                let val_b = get_nested_value(b, field);

                let cmp = compare_values(val_a, val_b);
                let cmp = match direction {
                    SortDirection::Ascending => cmp,
                    SortDirection::Descending => cmp.reverse(),
                };

                if cmp != std::cmp::Ordering::Equal {
                    return cmp;
                }
            }
            std::cmp::Ordering::Equal
        });

        Ok(docs)
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    match (a, b) {
        (None, None) => std::cmp::Ordering::Equal,
        (None, Some(_)) => std::cmp::Ordering::Less,
        (Some(_), None) => std::cmp::Ordering::Greater,
        (Some(a), Some(b)) => {
            // String comparison
            if let (Some(s1), Some(s2)) = (a.as_str(), b.as_str()) {
                return s1.cmp(s2);
            }

            // Number comparison
            if let (Some(n1), Some(n2)) = (a.as_f64(), b.as_f64()) {
                return n1.partial_cmp(&n2).unwrap_or(std::cmp::Ordering::Equal);
            }

            // Boolean comparison
            if let (Some(b1), Some(b2)) = (a.as_bool(), b.as_bool()) {
                return b1.cmp(&b2);
            }

            std::cmp::Ordering::Equal
        }
    }
}

impl LimitStage {
    fn from_json(spec: &Value) -> Result<Self> {
        if let Some(n) = spec.as_u64() {
            Ok(LimitStage { limit: n as usize })
        } else {
            Err(MongoLiteError::Validation(
                "$limit must be a positive number".to_string(),
            ))
        }
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        Ok(docs.into_iter().take(self.limit).collect())
    }
}

impl SkipStage {
    fn from_json(spec: &Value) -> Result<Self> {
        if let Some(n) = spec.as_u64() {
            Ok(SkipStage { skip: n as usize })
        } else {
            Err(MongoLiteError::Validation(
                "$skip must be a positive number".to_string(),
            ))
        }
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        Ok(docs.into_iter().skip(self.skip).collect())
    }
}

impl BucketStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec
            .as_object()
            .ok_or_else(|| MongoLiteError::Validation("$bucket must be an object".to_string()))?;

        let group_by = obj
            .get("groupBy")
            .ok_or_else(|| MongoLiteError::Validation("$bucket requires 'groupBy'".to_string()))
            .and_then(|v| parse_field_reference(v, "$bucket groupBy"))?;

        let boundaries = obj
            .get("boundaries")
            .and_then(|v| v.as_array())
            .ok_or_else(|| MongoLiteError::Validation("$bucket requires a 'boundaries' array".to_string()))?
            .clone();

        if boundaries.len() < 2 {
            return Err(MongoLiteError::OperationFailure(
                "$bucket requires at least two boundaries".to_string(),
            ));
        }
        for pair in boundaries.windows(2) {
            if compare_values_total(&pair[0], &pair[1]) != Ordering::Less {
                return Err(MongoLiteError::OperationFailure(
                    "$bucket boundaries must be listed in ascending order".to_string(),
                ));
            }
        }

        let default = obj.get("default").cloned();

        let output = match obj.get("output") {
            Some(Value::Object(out_obj)) => {
                let mut accs = Vec::new();
                for (field, value) in out_obj {
                    accs.push((field.clone(), Accumulator::from_json(value)?));
                }
                accs
            }
            Some(_) => {
                return Err(MongoLiteError::Validation(
                    "$bucket 'output' must be an object".to_string(),
                ))
            }
            None => vec![("count".to_string(), Accumulator::Count)],
        };

        Ok(BucketStage {
            group_by,
            boundaries,
            default,
            output,
        })
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        let mut numbered_buckets: Vec<Vec<Value>> = vec![Vec::new(); self.boundaries.len() - 1];
        let mut default_docs: Vec<Value> = Vec::new();

        for doc in docs {
            let value = get_nested_value(&doc, &self.group_by).cloned().unwrap_or(Value::Null);
            let mut placed = false;
            for i in 0..self.boundaries.len() - 1 {
                let lower = &self.boundaries[i];
                let upper = &self.boundaries[i + 1];
                if compare_values_total(&value, lower) != Ordering::Less
                    && compare_values_total(&value, upper) == Ordering::Less
                {
                    numbered_buckets[i].push(doc.clone());
                    placed = true;
                    break;
                }
            }
            if !placed {
                if self.default.is_some() {
                    default_docs.push(doc);
                } else {
                    return Err(MongoLiteError::OperationFailure(
                        "$bucket document does not fall within any bucket and no default was specified"
                            .to_string(),
                    ));
                }
            }
        }

        let default_sorts_after = self
            .default
            .as_ref()
            .map(|d| compare_values_total(d, self.boundaries.last().unwrap()) == Ordering::Greater)
            .unwrap_or(true);

        let mut results = Vec::new();

        if !default_docs.is_empty() && !default_sorts_after {
            results.push(self.build_bucket(self.default.clone().unwrap(), &default_docs)?);
        }
        for (i, group_docs) in numbered_buckets.iter().enumerate() {
            if !group_docs.is_empty() {
                results.push(self.build_bucket(self.boundaries[i].clone(), group_docs)?);
            }
        }
        if !default_docs.is_empty() && default_sorts_after {
            results.push(self.build_bucket(self.default.clone().unwrap(), &default_docs)?);
        }

        Ok(results)
    }

    fn build_bucket(&self, id: Value, docs: &[Value]) -> Result<Value> {
        let mut result = match compute_accumulators(&self.output, docs)? {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let mut ordered = serde_json::Map::new();
        ordered.insert("_id".to_string(), id);
        ordered.append(&mut result);
        Ok(Value::Object(ordered))
    }
}

fn set_nested_value(doc: &mut Value, path: &str, value: Value) {
    if let Ok(mut document) = Document::from_value(doc) {
        document.set_nested(path, value);
        *doc = document.to_value();
    }
}

fn remove_nested_value(doc: &mut Value, path: &str) {
    if let Ok(mut document) = Document::from_value(doc) {
        document.remove_nested(path);
        *doc = document.to_value();
    }
}

impl UnwindStage {
    fn from_json(spec: &Value) -> Result<Self> {
        match spec {
            Value::String(s) => {
                let path = parse_field_reference(spec, "$unwind")?;
                let _ = s;
                Ok(UnwindStage {
                    path,
                    preserve_null_and_empty_arrays: false,
                    include_array_index: None,
                })
            }
            Value::Object(obj) => {
                let path_value = obj
                    .get("path")
                    .ok_or_else(|| MongoLiteError::Validation("$unwind requires 'path'".to_string()))?;
                let path = parse_field_reference(path_value, "$unwind path")?;
                let preserve = obj
                    .get("preserveNullAndEmptyArrays")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                let include_array_index =
                    obj.get("includeArrayIndex").and_then(|v| v.as_str()).map(|s| s.to_string());
                Ok(UnwindStage {
                    path,
                    preserve_null_and_empty_arrays: preserve,
                    include_array_index,
                })
            }
            _ => Err(MongoLiteError::Validation(
                "$unwind must be a string or an object".to_string(),
            )),
        }
    }

    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        let mut results = Vec::new();

        for doc in docs {
            let value = get_nested_value(&doc, &self.path).cloned();
            match value {
                Some(Value::Array(items)) if !items.is_empty() => {
                    for (index, item) in items.into_iter().enumerate() {
                        let mut out = doc.clone();
                        set_nested_value(&mut out, &self.path, item);
                        if let Some(index_field) = &self.include_array_index {
                            set_nested_value(&mut out, index_field, Value::from(index as i64));
                        }
                        results.push(out);
                    }
                }
                None | Some(Value::Null) | Some(Value::Array(_)) => {
                    if self.preserve_null_and_empty_arrays {
                        let mut out = doc.clone();
                        remove_nested_value(&mut out, &self.path);
                        if let Some(index_field) = &self.include_array_index {
                            set_nested_value(&mut out, index_field, Value::Null);
                        }
                        results.push(out);
                    }
                }
                Some(_scalar) => {
                    let mut out = doc.clone();
                    if let Some(index_field) = &self.include_array_index {
                        set_nested_value(&mut out, index_field, Value::from(0i64));
                    }
                    results.push(out);
                }
            }
        }

        Ok(results)
    }
}

impl LookupStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec
            .as_object()
            .ok_or_else(|| MongoLiteError::Validation("$lookup must be an object".to_string()))?;

        let string_field = |key: &str| -> Result<String> {
            obj.get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .ok_or_else(|| MongoLiteError::OperationFailure(format!("$lookup requires a string '{}'", key)))
        };

        Ok(LookupStage {
            from: string_field("from")?,
            local_field: string_field("localField")?,
            foreign_field: string_field("foreignField")?,
            as_field: string_field("as")?,
        })
    }

    fn execute(&self, docs: Vec<Value>, ctx: &dyn AggregationContext) -> Result<Vec<Value>> {
        let foreign_docs = ctx.lookup_documents(&self.from);
        let mut results = Vec::with_capacity(docs.len());

        for doc in docs {
            let local_value = get_nested_value(&doc, &self.local_field).cloned().unwrap_or(Value::Null);
            let local_values: Vec<&Value> = match &local_value {
                Value::Array(items) => items.iter().collect(),
                other => vec![other],
            };

            let mut matched = Vec::new();
            for foreign_doc in &foreign_docs {
                if let Some(foreign_value) = get_nested_value(foreign_doc, &self.foreign_field) {
                    let foreign_values: Vec<&Value> = match foreign_value {
                        Value::Array(items) => items.iter().collect(),
                        other => vec![other],
                    };
                    let any_match = local_values
                        .iter()
                        .any(|lv| foreign_values.iter().any(|fv| deep_equal(fv, lv)));
                    if any_match {
                        matched.push(foreign_doc.clone());
                    }
                }
            }

            let mut out = doc;
            if let Value::Object(ref mut map) = out {
                map.insert(self.as_field.clone(), Value::Array(matched));
            }
            results.push(out);
        }

        Ok(results)
    }
}

impl SampleStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec
            .as_object()
            .ok_or_else(|| MongoLiteError::Validation("$sample must be an object".to_string()))?;
        let size = obj
            .get("size")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| MongoLiteError::Validation("$sample requires a numeric 'size'".to_string()))?;
        Ok(SampleStage { size: size as usize })
    }

    fn execute(&self, docs: Vec<Value>, ctx: &dyn AggregationContext) -> Result<Vec<Value>> {
        if docs.is_empty() || self.size == 0 {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(self.size);
        for _ in 0..self.size {
            let index = ctx.sample_index(docs.len());
            out.push(docs[index].clone());
        }
        Ok(out)
    }
}

impl OutStage {
    fn from_json(spec: &Value) -> Result<Self> {
        let target = spec
            .as_str()
            .ok_or_else(|| MongoLiteError::Validation("$out requires a collection name string".to_string()))?;
        Ok(OutStage { target: target.to_string() })
    }

    fn execute(&self, docs: Vec<Value>, ctx: &dyn AggregationContext) -> Result<Vec<Value>> {
        ctx.write_out(&self.target, &docs);
        Ok(docs)
    }
}

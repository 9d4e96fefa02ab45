// src/query/operators.rs
//! Match-predicate operators
//!
//! Each `$`-operator is a separate type implementing [`OperatorMatcher`],
//! dispatched through a registry keyed by operator name. The same predicate
//! engine backs the `$match` pipeline stage and the native filter a cursor
//! applies, so a match stage can always be turned back into a cursor-side
//! predicate.

use crate::document::Document;
use crate::error::{DocFlowError, Result};
use crate::field_path::FieldPath;
use crate::value::Value;
use lazy_static::lazy_static;
use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::num::NonZeroUsize;

/// Trait for all predicate operators
pub trait OperatorMatcher: Send + Sync {
    /// Operator name, e.g. "$gt"
    fn name(&self) -> &'static str;

    /// Test a document value against the operator's argument
    ///
    /// - `doc_value`: the value at the predicate's field path (None if the
    ///   field is missing)
    /// - `filter_value`: the operator argument from the predicate
    /// - `document`: the full document, needed by logical operators that
    ///   recurse into sub-predicates
    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        document: Option<&Document>,
    ) -> Result<bool>;
}

/// Same-kind comparison: values of different type ranks are incomparable
/// and never satisfy an ordering operator
fn cmp_same_kind(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_numeric() != b.is_numeric() {
        return None;
    }
    if a.is_numeric() || a.type_name() == b.type_name() {
        Some(a.cmp_total(b))
    } else {
        None
    }
}

// ============================================================================
// COMPARISON OPERATORS
// ============================================================================

/// $eq: value equals the argument (also the implicit form `{field: value}`)
pub struct EqOperator;

impl OperatorMatcher for EqOperator {
    fn name(&self) -> &'static str {
        "$eq"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Document>,
    ) -> Result<bool> {
        Ok(doc_value.map_or(false, |v| v == filter_value))
    }
}

/// $ne: value differs from the argument; missing fields match
pub struct NeOperator;

impl OperatorMatcher for NeOperator {
    fn name(&self) -> &'static str {
        "$ne"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Document>,
    ) -> Result<bool> {
        Ok(doc_value.map_or(true, |v| v != filter_value))
    }
}

/// $gt
pub struct GtOperator;

impl OperatorMatcher for GtOperator {
    fn name(&self) -> &'static str {
        "$gt"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Document>,
    ) -> Result<bool> {
        Ok(doc_value
            .and_then(|v| cmp_same_kind(v, filter_value))
            .map_or(false, |ord| ord == Ordering::Greater))
    }
}

/// $gte
pub struct GteOperator;

impl OperatorMatcher for GteOperator {
    fn name(&self) -> &'static str {
        "$gte"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Document>,
    ) -> Result<bool> {
        Ok(doc_value
            .and_then(|v| cmp_same_kind(v, filter_value))
            .map_or(false, |ord| ord != Ordering::Less))
    }
}

/// $lt
pub struct LtOperator;

impl OperatorMatcher for LtOperator {
    fn name(&self) -> &'static str {
        "$lt"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Document>,
    ) -> Result<bool> {
        Ok(doc_value
            .and_then(|v| cmp_same_kind(v, filter_value))
            .map_or(false, |ord| ord == Ordering::Less))
    }
}

/// $lte
pub struct LteOperator;

impl OperatorMatcher for LteOperator {
    fn name(&self) -> &'static str {
        "$lte"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Document>,
    ) -> Result<bool> {
        Ok(doc_value
            .and_then(|v| cmp_same_kind(v, filter_value))
            .map_or(false, |ord| ord != Ordering::Greater))
    }
}

// ============================================================================
// ARRAY OPERATORS
// ============================================================================

/// $in: value is any of the listed values
pub struct InOperator;

impl OperatorMatcher for InOperator {
    fn name(&self) -> &'static str {
        "$in"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Document>,
    ) -> Result<bool> {
        let candidates = filter_value.as_array().ok_or_else(|| {
            DocFlowError::InvalidQuery("$in requires an array".to_string())
        })?;
        Ok(doc_value.map_or(false, |v| candidates.contains(v)))
    }
}

/// $nin: value is none of the listed values; missing fields match
pub struct NinOperator;

impl OperatorMatcher for NinOperator {
    fn name(&self) -> &'static str {
        "$nin"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Document>,
    ) -> Result<bool> {
        let candidates = filter_value.as_array().ok_or_else(|| {
            DocFlowError::InvalidQuery("$nin requires an array".to_string())
        })?;
        Ok(doc_value.map_or(true, |v| !candidates.contains(v)))
    }
}

/// $all: the field is an array containing every listed value
pub struct AllOperator;

impl OperatorMatcher for AllOperator {
    fn name(&self) -> &'static str {
        "$all"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Document>,
    ) -> Result<bool> {
        let required = filter_value.as_array().ok_or_else(|| {
            DocFlowError::InvalidQuery("$all requires an array".to_string())
        })?;
        match doc_value {
            Some(Value::Array(items)) => {
                Ok(required.iter().all(|needed| items.contains(needed)))
            }
            _ => Ok(false),
        }
    }
}

/// $elemMatch: some array element (a document) satisfies the sub-predicate
pub struct ElemMatchOperator;

impl OperatorMatcher for ElemMatchOperator {
    fn name(&self) -> &'static str {
        "$elemMatch"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Document>,
    ) -> Result<bool> {
        let condition = filter_value.as_document().ok_or_else(|| {
            DocFlowError::InvalidQuery("$elemMatch requires an object".to_string())
        })?;
        let items = match doc_value {
            Some(Value::Array(items)) => items,
            _ => return Ok(false),
        };
        for element in items.iter() {
            if let Value::Document(doc) = element {
                if matches_filter(doc, condition)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

// ============================================================================
// ELEMENT OPERATORS
// ============================================================================

/// $exists
pub struct ExistsOperator;

impl OperatorMatcher for ExistsOperator {
    fn name(&self) -> &'static str {
        "$exists"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Document>,
    ) -> Result<bool> {
        match filter_value {
            Value::Bool(should_exist) => Ok(doc_value.is_some() == *should_exist),
            _ => Err(DocFlowError::InvalidQuery(
                "$exists requires a boolean".to_string(),
            )),
        }
    }
}

/// $type: the field's value has the named variant
pub struct TypeOperator;

impl OperatorMatcher for TypeOperator {
    fn name(&self) -> &'static str {
        "$type"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Document>,
    ) -> Result<bool> {
        let type_name = filter_value.as_str().ok_or_else(|| {
            DocFlowError::InvalidQuery("$type requires a type name string".to_string())
        })?;
        let value = match doc_value {
            Some(v) => v,
            None => return Ok(false),
        };
        let matched = match type_name {
            "number" => value.is_numeric(),
            "int" | "long" => matches!(value, Value::Int32(_) | Value::Int64(_)),
            "double" => matches!(value, Value::Double(_)),
            "string" => matches!(value, Value::String(_)),
            "object" => matches!(value, Value::Document(_)),
            "array" => matches!(value, Value::Array(_)),
            "bool" | "boolean" => matches!(value, Value::Bool(_)),
            "null" => value.is_null(),
            "date" => matches!(value, Value::Date(_)),
            "objectId" => matches!(value, Value::ObjectId(_)),
            "timestamp" => matches!(value, Value::Timestamp(_)),
            other => {
                return Err(DocFlowError::InvalidQuery(format!(
                    "unknown type name: {}",
                    other
                )))
            }
        };
        Ok(matched)
    }
}

lazy_static! {
    /// Compiled patterns, keyed by pattern source
    ///
    /// Regex::new is expensive, so patterns are compiled once when a query
    /// is built and fetched from here on every row the predicate touches.
    static ref REGEX_CACHE: Mutex<LruCache<String, Regex>> =
        Mutex::new(LruCache::new(NonZeroUsize::new(128).unwrap()));
}

/// Fetch the compiled form of a pattern, compiling on first sight
///
/// `Regex` clones share the underlying automaton, so handing copies out of
/// the cache is cheap.
pub(crate) fn compiled_regex(pattern: &str) -> Result<Regex> {
    let mut cache = REGEX_CACHE.lock();
    if let Some(compiled) = cache.get(pattern) {
        return Ok(compiled.clone());
    }
    let compiled = Regex::new(pattern).map_err(|e| {
        DocFlowError::InvalidQuery(format!("bad $regex pattern {:?}: {}", pattern, e))
    })?;
    cache.put(pattern.to_string(), compiled.clone());
    Ok(compiled)
}

/// $regex: the field is a string matching the pattern
///
/// Patterns are pre-compiled at query build time (see `Query::from_json`);
/// this operator only takes cache hits while documents flow.
pub struct RegexOperator;

impl OperatorMatcher for RegexOperator {
    fn name(&self) -> &'static str {
        "$regex"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        _document: Option<&Document>,
    ) -> Result<bool> {
        let pattern = filter_value.as_str().ok_or_else(|| {
            DocFlowError::InvalidQuery("$regex requires a string pattern".to_string())
        })?;
        let text = match doc_value {
            Some(Value::String(s)) => s,
            _ => return Ok(false),
        };
        let compiled = compiled_regex(pattern)?;
        Ok(compiled.is_match(text))
    }
}

// ============================================================================
// LOGICAL OPERATORS
// ============================================================================

/// $and: every sub-predicate matches
pub struct AndOperator;

impl OperatorMatcher for AndOperator {
    fn name(&self) -> &'static str {
        "$and"
    }

    fn matches(
        &self,
        _doc_value: Option<&Value>,
        filter_value: &Value,
        document: Option<&Document>,
    ) -> Result<bool> {
        let doc = document.ok_or_else(|| {
            DocFlowError::InvalidQuery("$and requires document context".to_string())
        })?;
        for condition in logical_conditions("$and", filter_value)? {
            if !matches_filter(doc, condition)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// $or: some sub-predicate matches
pub struct OrOperator;

impl OperatorMatcher for OrOperator {
    fn name(&self) -> &'static str {
        "$or"
    }

    fn matches(
        &self,
        _doc_value: Option<&Value>,
        filter_value: &Value,
        document: Option<&Document>,
    ) -> Result<bool> {
        let doc = document.ok_or_else(|| {
            DocFlowError::InvalidQuery("$or requires document context".to_string())
        })?;
        for condition in logical_conditions("$or", filter_value)? {
            if matches_filter(doc, condition)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// $nor: no sub-predicate matches
pub struct NorOperator;

impl OperatorMatcher for NorOperator {
    fn name(&self) -> &'static str {
        "$nor"
    }

    fn matches(
        &self,
        _doc_value: Option<&Value>,
        filter_value: &Value,
        document: Option<&Document>,
    ) -> Result<bool> {
        let doc = document.ok_or_else(|| {
            DocFlowError::InvalidQuery("$nor requires document context".to_string())
        })?;
        for condition in logical_conditions("$nor", filter_value)? {
            if matches_filter(doc, condition)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// $not: inverts the wrapped operator condition on one field
pub struct NotOperator;

impl OperatorMatcher for NotOperator {
    fn name(&self) -> &'static str {
        "$not"
    }

    fn matches(
        &self,
        doc_value: Option<&Value>,
        filter_value: &Value,
        document: Option<&Document>,
    ) -> Result<bool> {
        let result = matches_condition(doc_value, filter_value, document)?;
        Ok(!result)
    }
}

/// Sub-predicate list for $and / $or / $nor
fn logical_conditions<'a>(
    name: &str,
    filter_value: &'a Value,
) -> Result<impl Iterator<Item = &'a Document>> {
    let items = filter_value.as_array().ok_or_else(|| {
        DocFlowError::InvalidQuery(format!("{} requires an array of predicates", name))
    })?;
    for item in items.iter() {
        if item.as_document().is_none() {
            return Err(DocFlowError::InvalidQuery(format!(
                "{} sub-predicates must be objects",
                name
            )));
        }
    }
    Ok(items.iter().map(|v| v.as_document().unwrap().as_ref()))
}

// ============================================================================
// OPERATOR REGISTRY
// ============================================================================

lazy_static! {
    /// Registry of all predicate operators, keyed by name
    ///
    /// Initialized once; all implementations are `Send + Sync`, so lookups
    /// are safe from any thread even though a single pipeline never leaves
    /// its owning thread.
    pub static ref OPERATOR_REGISTRY: HashMap<&'static str, Box<dyn OperatorMatcher>> = {
        let mut registry: HashMap<&'static str, Box<dyn OperatorMatcher>> = HashMap::new();

        registry.insert("$eq", Box::new(EqOperator));
        registry.insert("$ne", Box::new(NeOperator));
        registry.insert("$gt", Box::new(GtOperator));
        registry.insert("$gte", Box::new(GteOperator));
        registry.insert("$lt", Box::new(LtOperator));
        registry.insert("$lte", Box::new(LteOperator));

        registry.insert("$in", Box::new(InOperator));
        registry.insert("$nin", Box::new(NinOperator));
        registry.insert("$all", Box::new(AllOperator));
        registry.insert("$elemMatch", Box::new(ElemMatchOperator));

        registry.insert("$exists", Box::new(ExistsOperator));
        registry.insert("$type", Box::new(TypeOperator));
        registry.insert("$regex", Box::new(RegexOperator));

        registry.insert("$and", Box::new(AndOperator));
        registry.insert("$or", Box::new(OrOperator));
        registry.insert("$nor", Box::new(NorOperator));
        registry.insert("$not", Box::new(NotOperator));

        registry
    };
}

// ============================================================================
// ENTRY POINTS
// ============================================================================

/// Evaluate a single field condition against a document value
///
/// A condition is either an operator object (`{$gt: 5, $lt: 10}`) or a
/// literal for implicit equality.
fn matches_condition(
    doc_value: Option<&Value>,
    condition: &Value,
    document: Option<&Document>,
) -> Result<bool> {
    if let Value::Document(fields) = condition {
        let has_operators = fields.fields().any(|(name, _)| name.starts_with('$'));
        if has_operators {
            for (op_name, op_value) in fields.fields() {
                let operator = OPERATOR_REGISTRY.get(op_name.as_str()).ok_or_else(|| {
                    DocFlowError::InvalidQuery(format!("unknown operator: {}", op_name))
                })?;
                if !operator.matches(doc_value, op_value, document)? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }
    }
    // Implicit equality
    Ok(doc_value.map_or(false, |v| v == condition))
}

/// Match a whole predicate against a document
///
/// Top-level keys are either logical operators (`$and`, `$or`, `$nor`) or
/// (possibly dotted) field paths with a condition. An empty predicate
/// matches everything.
pub fn matches_filter(document: &Document, filter: &Document) -> Result<bool> {
    for (key, condition) in filter.fields() {
        if key.starts_with('$') {
            let operator = OPERATOR_REGISTRY.get(key.as_str()).ok_or_else(|| {
                DocFlowError::InvalidQuery(format!("unknown top-level operator: {}", key))
            })?;
            if !operator.matches(None, condition, Some(document))? {
                return Ok(false);
            }
        } else {
            let path = FieldPath::parse(key)
                .map_err(|_| DocFlowError::InvalidQuery(format!("bad field path: {}", key)))?;
            let doc_value = document.get_path(&path);
            if !matches_condition(doc_value, condition, Some(document))? {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

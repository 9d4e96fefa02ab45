// src/expression.rs
//! Expression trees evaluated against a single document
//!
//! An expression produces a `Value` (or *missing*) from one input document.
//! The grammar follows the aggregation surface:
//!
//! - literals become constants
//! - `"$path"` references a field
//! - `{"$op": [arg, ...]}` (or `{"$op": arg}`) applies an operator
//! - any other object is an ordered object constructor
//!
//! `evaluate` returns `Result<Option<Value>>`: `None` is the *missing*
//! marker, distinct from `Value::Null`. Arithmetic over missing or null
//! yields null; object constructors omit missing fields; comparisons rank
//! missing below null.

use crate::dependency::DependencyTracker;
use crate::document::Document;
use crate::error::{DocFlowError, Result};
use crate::field_path::FieldPath;
use crate::value::Value;
use std::cmp::Ordering;

/// Scalar operator vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKind {
    // arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Mod,
    // comparison
    Cmp,
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    // boolean
    And,
    Or,
    Not,
    // conditional
    Cond,
    IfNull,
    // string
    Concat,
    ToLower,
    ToUpper,
}

impl OperatorKind {
    pub fn parse(name: &str) -> Option<OperatorKind> {
        match name {
            "$add" => Some(OperatorKind::Add),
            "$subtract" => Some(OperatorKind::Subtract),
            "$multiply" => Some(OperatorKind::Multiply),
            "$divide" => Some(OperatorKind::Divide),
            "$mod" => Some(OperatorKind::Mod),
            "$cmp" => Some(OperatorKind::Cmp),
            "$eq" => Some(OperatorKind::Eq),
            "$ne" => Some(OperatorKind::Ne),
            "$gt" => Some(OperatorKind::Gt),
            "$gte" => Some(OperatorKind::Gte),
            "$lt" => Some(OperatorKind::Lt),
            "$lte" => Some(OperatorKind::Lte),
            "$and" => Some(OperatorKind::And),
            "$or" => Some(OperatorKind::Or),
            "$not" => Some(OperatorKind::Not),
            "$cond" => Some(OperatorKind::Cond),
            "$ifNull" => Some(OperatorKind::IfNull),
            "$concat" => Some(OperatorKind::Concat),
            "$toLower" => Some(OperatorKind::ToLower),
            "$toUpper" => Some(OperatorKind::ToUpper),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OperatorKind::Add => "$add",
            OperatorKind::Subtract => "$subtract",
            OperatorKind::Multiply => "$multiply",
            OperatorKind::Divide => "$divide",
            OperatorKind::Mod => "$mod",
            OperatorKind::Cmp => "$cmp",
            OperatorKind::Eq => "$eq",
            OperatorKind::Ne => "$ne",
            OperatorKind::Gt => "$gt",
            OperatorKind::Gte => "$gte",
            OperatorKind::Lt => "$lt",
            OperatorKind::Lte => "$lte",
            OperatorKind::And => "$and",
            OperatorKind::Or => "$or",
            OperatorKind::Not => "$not",
            OperatorKind::Cond => "$cond",
            OperatorKind::IfNull => "$ifNull",
            OperatorKind::Concat => "$concat",
            OperatorKind::ToLower => "$toLower",
            OperatorKind::ToUpper => "$toUpper",
        }
    }

    /// (min, max) accepted argument counts; None max means unbounded
    fn arity(&self) -> (usize, Option<usize>) {
        match self {
            OperatorKind::Add
            | OperatorKind::Multiply
            | OperatorKind::And
            | OperatorKind::Or
            | OperatorKind::Concat => (1, None),
            OperatorKind::Subtract
            | OperatorKind::Divide
            | OperatorKind::Mod
            | OperatorKind::Cmp
            | OperatorKind::Eq
            | OperatorKind::Ne
            | OperatorKind::Gt
            | OperatorKind::Gte
            | OperatorKind::Lt
            | OperatorKind::Lte
            | OperatorKind::IfNull => (2, Some(2)),
            OperatorKind::Not | OperatorKind::ToLower | OperatorKind::ToUpper => (1, Some(1)),
            OperatorKind::Cond => (3, Some(3)),
        }
    }
}

/// A tree of evaluable nodes over a document
#[derive(Debug, Clone)]
pub enum Expression {
    Constant(Value),
    FieldPath(FieldPath),
    /// Ordered object constructor
    Object(Vec<(String, Expression)>),
    Operator(OperatorKind, Vec<Expression>),
}

impl Expression {
    /// Parse an expression specification
    pub fn parse(spec: &serde_json::Value) -> Result<Expression> {
        match spec {
            serde_json::Value::String(s) if s.starts_with('$') => {
                Ok(Expression::FieldPath(FieldPath::parse_ref(s)?))
            }
            serde_json::Value::Object(object) => {
                // A single $-key is an operator application; otherwise an
                // ordered object constructor. Mixing the two is an error.
                let dollar_keys = object.keys().filter(|k| k.starts_with('$')).count();
                if dollar_keys > 0 {
                    if object.len() != 1 {
                        return Err(DocFlowError::InvalidExpression(format!(
                            "operator object must have exactly one field: {}",
                            spec
                        )));
                    }
                    let (name, args) = object.iter().next().unwrap();
                    if name == "$literal" {
                        return Ok(Expression::Constant(Value::from_json(args)?));
                    }
                    let kind = OperatorKind::parse(name).ok_or_else(|| {
                        DocFlowError::InvalidExpression(format!("unknown operator: {}", name))
                    })?;
                    let children = match args {
                        serde_json::Value::Array(items) => items
                            .iter()
                            .map(Expression::parse)
                            .collect::<Result<Vec<_>>>()?,
                        single => vec![Expression::parse(single)?],
                    };
                    let (min, max) = kind.arity();
                    if children.len() < min || max.map_or(false, |m| children.len() > m) {
                        return Err(DocFlowError::InvalidExpression(format!(
                            "{} takes {}{} arguments, got {}",
                            kind.name(),
                            min,
                            match max {
                                Some(m) if m == min => String::new(),
                                Some(m) => format!("..{}", m),
                                None => "+".to_string(),
                            },
                            children.len()
                        )));
                    }
                    Ok(Expression::Operator(kind, children))
                } else {
                    let mut fields = Vec::with_capacity(object.len());
                    for (name, value) in object {
                        fields.push((name.clone(), Expression::parse(value)?));
                    }
                    Ok(Expression::Object(fields))
                }
            }
            literal => Ok(Expression::Constant(Value::from_json(literal)?)),
        }
    }

    /// Evaluate against one document; None is the missing marker
    pub fn evaluate(&self, doc: &Document) -> Result<Option<Value>> {
        match self {
            Expression::Constant(value) => Ok(Some(value.clone())),
            Expression::FieldPath(path) => Ok(doc.get_path(path).cloned()),
            Expression::Object(fields) => {
                let mut out = Document::with_capacity(fields.len());
                for (name, expr) in fields {
                    if let Some(value) = expr.evaluate(doc)? {
                        out.push_field(name.clone(), value)?;
                    }
                }
                Ok(Some(Value::document(out)))
            }
            Expression::Operator(kind, children) => evaluate_operator(*kind, children, doc),
        }
    }

    /// Constant-fold subtrees whose children are all constants
    ///
    /// Folding evaluates against an empty document; subtrees whose
    /// evaluation fails (e.g. divide by zero) are left alone so the error
    /// surfaces at run time.
    pub fn optimize(self) -> Expression {
        match self {
            Expression::Object(fields) => {
                let folded: Vec<(String, Expression)> = fields
                    .into_iter()
                    .map(|(name, expr)| (name, expr.optimize()))
                    .collect();
                if folded
                    .iter()
                    .all(|(_, e)| matches!(e, Expression::Constant(_)))
                {
                    let expr = Expression::Object(folded);
                    match expr.evaluate(&Document::new()) {
                        Ok(Some(value)) => Expression::Constant(value),
                        _ => expr,
                    }
                } else {
                    Expression::Object(folded)
                }
            }
            Expression::Operator(kind, children) => {
                let folded: Vec<Expression> =
                    children.into_iter().map(Expression::optimize).collect();
                if folded.iter().all(|e| matches!(e, Expression::Constant(_))) {
                    let expr = Expression::Operator(kind, folded);
                    match expr.evaluate(&Document::new()) {
                        Ok(Some(value)) => Expression::Constant(value),
                        _ => expr,
                    }
                } else {
                    Expression::Operator(kind, folded)
                }
            }
            other => other,
        }
    }

    /// Record every referenced field path
    pub fn add_dependencies(&self, tracker: &mut DependencyTracker) {
        match self {
            Expression::Constant(_) => {}
            Expression::FieldPath(path) => tracker.add_path(path),
            Expression::Object(fields) => {
                for (_, expr) in fields {
                    expr.add_dependencies(tracker);
                }
            }
            Expression::Operator(_, children) => {
                for child in children {
                    child.add_dependencies(tracker);
                }
            }
        }
    }

    /// Serialize back to the input grammar
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Expression::Constant(value) => {
                let json = value.to_json();
                // Strings that would parse as references, and objects that
                // would parse as constructors, need the $literal escape
                let ambiguous = matches!(&json, serde_json::Value::String(s) if s.starts_with('$'))
                    || json.is_object();
                if ambiguous {
                    serde_json::json!({ "$literal": json })
                } else {
                    json
                }
            }
            Expression::FieldPath(path) => serde_json::Value::String(format!("${}", path)),
            Expression::Object(fields) => {
                let mut map = serde_json::Map::new();
                for (name, expr) in fields {
                    map.insert(name.clone(), expr.to_json());
                }
                serde_json::Value::Object(map)
            }
            Expression::Operator(kind, children) => {
                let args: Vec<serde_json::Value> =
                    children.iter().map(Expression::to_json).collect();
                serde_json::json!({ kind.name(): args })
            }
        }
    }
}

/// Missing ranks below null; otherwise the total value order applies
fn cmp_operands(a: &Option<Value>, b: &Option<Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x.cmp_total(y),
    }
}

fn evaluate_operator(
    kind: OperatorKind,
    children: &[Expression],
    doc: &Document,
) -> Result<Option<Value>> {
    match kind {
        OperatorKind::Add | OperatorKind::Multiply => {
            let mut int_acc: i64 = if kind == OperatorKind::Add { 0 } else { 1 };
            let mut double_acc: f64 = int_acc as f64;
            let mut saw_double = false;
            for child in children {
                let value = match child.evaluate(doc)? {
                    Some(v) if v.is_null() => return Ok(Some(Value::Null)),
                    None => return Ok(Some(Value::Null)),
                    Some(v) => v,
                };
                match value {
                    Value::Double(d) => {
                        saw_double = true;
                        if kind == OperatorKind::Add {
                            double_acc += d;
                        } else {
                            double_acc *= d;
                        }
                    }
                    ref v if v.is_numeric() => {
                        let n = v.as_i64().unwrap();
                        let combined = if kind == OperatorKind::Add {
                            int_acc.checked_add(n)
                        } else {
                            int_acc.checked_mul(n)
                        };
                        match combined {
                            Some(next) => int_acc = next,
                            None => saw_double = true, // overflow widens
                        }
                        if kind == OperatorKind::Add {
                            double_acc += n as f64;
                        } else {
                            double_acc *= n as f64;
                        }
                    }
                    other => {
                        return Err(DocFlowError::TypeMismatch(format!(
                            "{} only supports numeric values, got {}",
                            kind.name(),
                            other.type_name()
                        )))
                    }
                }
            }
            if saw_double {
                Ok(Some(Value::Double(double_acc)))
            } else {
                Ok(Some(Value::int(int_acc)))
            }
        }
        OperatorKind::Subtract | OperatorKind::Divide | OperatorKind::Mod => {
            let left = children[0].evaluate(doc)?;
            let right = children[1].evaluate(doc)?;
            let (left, right) = match (left, right) {
                (Some(l), Some(r)) if !l.is_null() && !r.is_null() => (l, r),
                _ => return Ok(Some(Value::Null)),
            };
            if !left.is_numeric() || !right.is_numeric() {
                return Err(DocFlowError::TypeMismatch(format!(
                    "{} only supports numeric values, got {} and {}",
                    kind.name(),
                    left.type_name(),
                    right.type_name()
                )));
            }
            match kind {
                OperatorKind::Subtract => match (left.as_i64(), right.as_i64()) {
                    (Some(l), Some(r)) => match l.checked_sub(r) {
                        Some(n) => Ok(Some(Value::int(n))),
                        None => Ok(Some(Value::Double(l as f64 - r as f64))),
                    },
                    _ => Ok(Some(Value::Double(
                        left.as_f64().unwrap() - right.as_f64().unwrap(),
                    ))),
                },
                OperatorKind::Divide => {
                    let divisor = right.as_f64().unwrap();
                    if divisor == 0.0 {
                        return Err(DocFlowError::TypeMismatch(
                            "$divide by zero".to_string(),
                        ));
                    }
                    Ok(Some(Value::Double(left.as_f64().unwrap() / divisor)))
                }
                _ => match (left.as_i64(), right.as_i64()) {
                    (Some(l), Some(r)) => {
                        if r == 0 {
                            return Err(DocFlowError::TypeMismatch("$mod by zero".to_string()));
                        }
                        Ok(Some(Value::int(l % r)))
                    }
                    _ => {
                        let divisor = right.as_f64().unwrap();
                        if divisor == 0.0 {
                            return Err(DocFlowError::TypeMismatch("$mod by zero".to_string()));
                        }
                        Ok(Some(Value::Double(left.as_f64().unwrap() % divisor)))
                    }
                },
            }
        }
        OperatorKind::Cmp
        | OperatorKind::Eq
        | OperatorKind::Ne
        | OperatorKind::Gt
        | OperatorKind::Gte
        | OperatorKind::Lt
        | OperatorKind::Lte => {
            let left = children[0].evaluate(doc)?;
            let right = children[1].evaluate(doc)?;
            let ord = cmp_operands(&left, &right);
            let result = match kind {
                OperatorKind::Cmp => {
                    return Ok(Some(Value::Int32(match ord {
                        Ordering::Less => -1,
                        Ordering::Equal => 0,
                        Ordering::Greater => 1,
                    })))
                }
                OperatorKind::Eq => ord == Ordering::Equal,
                OperatorKind::Ne => ord != Ordering::Equal,
                OperatorKind::Gt => ord == Ordering::Greater,
                OperatorKind::Gte => ord != Ordering::Less,
                OperatorKind::Lt => ord == Ordering::Less,
                _ => ord != Ordering::Greater,
            };
            Ok(Some(Value::Bool(result)))
        }
        OperatorKind::And => {
            for child in children {
                let truthy = child.evaluate(doc)?.map_or(false, |v| v.to_bool());
                if !truthy {
                    return Ok(Some(Value::Bool(false)));
                }
            }
            Ok(Some(Value::Bool(true)))
        }
        OperatorKind::Or => {
            for child in children {
                let truthy = child.evaluate(doc)?.map_or(false, |v| v.to_bool());
                if truthy {
                    return Ok(Some(Value::Bool(true)));
                }
            }
            Ok(Some(Value::Bool(false)))
        }
        OperatorKind::Not => {
            let truthy = children[0].evaluate(doc)?.map_or(false, |v| v.to_bool());
            Ok(Some(Value::Bool(!truthy)))
        }
        OperatorKind::Cond => {
            let condition = children[0].evaluate(doc)?.map_or(false, |v| v.to_bool());
            if condition {
                children[1].evaluate(doc)
            } else {
                children[2].evaluate(doc)
            }
        }
        OperatorKind::IfNull => match children[0].evaluate(doc)? {
            Some(value) if !value.is_null() => Ok(Some(value)),
            _ => children[1].evaluate(doc),
        },
        OperatorKind::Concat => {
            let mut out = String::new();
            for child in children {
                match child.evaluate(doc)? {
                    Some(Value::String(s)) => out.push_str(&s),
                    Some(v) if v.is_null() => return Ok(Some(Value::Null)),
                    None => return Ok(Some(Value::Null)),
                    Some(other) => {
                        return Err(DocFlowError::TypeMismatch(format!(
                            "$concat only supports strings, got {}",
                            other.type_name()
                        )))
                    }
                }
            }
            Ok(Some(Value::String(out)))
        }
        OperatorKind::ToLower | OperatorKind::ToUpper => {
            let value = children[0].evaluate(doc)?;
            let s = match value {
                Some(Value::String(s)) => s,
                Some(v) if v.is_null() => String::new(),
                None => String::new(),
                Some(other) => {
                    return Err(DocFlowError::TypeMismatch(format!(
                        "{} only supports strings, got {}",
                        kind.name(),
                        other.type_name()
                    )))
                }
            };
            let transformed = if kind == OperatorKind::ToLower {
                s.to_lowercase()
            } else {
                s.to_uppercase()
            };
            Ok(Some(Value::String(transformed)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(json: serde_json::Value) -> Document {
        Document::from_json(&json).unwrap()
    }

    fn eval(spec: serde_json::Value, input: serde_json::Value) -> Option<Value> {
        Expression::parse(&spec).unwrap().evaluate(&doc(input)).unwrap()
    }

    #[test]
    fn test_parse_field_reference() {
        let expr = Expression::parse(&json!("$a.b")).unwrap();
        assert!(matches!(expr, Expression::FieldPath(_)));
    }

    #[test]
    fn test_parse_rejects_unknown_operator() {
        assert!(Expression::parse(&json!({"$frobnicate": 1})).is_err());
    }

    #[test]
    fn test_parse_rejects_bad_arity() {
        assert!(Expression::parse(&json!({"$subtract": [1]})).is_err());
        assert!(Expression::parse(&json!({"$cond": [true, 1]})).is_err());
        assert!(Expression::parse(&json!({"$not": [1, 2]})).is_err());
    }

    #[test]
    fn test_field_path_missing_vs_null() {
        assert_eq!(eval(json!("$a"), json!({})), None);
        assert_eq!(eval(json!("$a"), json!({"a": null})), Some(Value::Null));
    }

    #[test]
    fn test_add_integers_and_doubles() {
        assert_eq!(
            eval(json!({"$add": [1, 2, 3]}), json!({})),
            Some(Value::Int32(6))
        );
        assert_eq!(
            eval(json!({"$add": ["$a", 1.5]}), json!({"a": 2})),
            Some(Value::Double(3.5))
        );
    }

    #[test]
    fn test_arithmetic_on_missing_yields_null() {
        assert_eq!(
            eval(json!({"$add": ["$missing", 1]}), json!({})),
            Some(Value::Null)
        );
        assert_eq!(
            eval(json!({"$subtract": ["$a", 1]}), json!({"a": null})),
            Some(Value::Null)
        );
    }

    #[test]
    fn test_arithmetic_type_error() {
        let expr = Expression::parse(&json!({"$multiply": ["$a", 2]})).unwrap();
        let err = expr.evaluate(&doc(json!({"a": "nope"}))).unwrap_err();
        assert!(matches!(err, DocFlowError::TypeMismatch(_)));
    }

    #[test]
    fn test_divide_always_double_and_by_zero() {
        assert_eq!(
            eval(json!({"$divide": [7, 2]}), json!({})),
            Some(Value::Double(3.5))
        );
        let expr = Expression::parse(&json!({"$divide": [1, 0]})).unwrap();
        assert!(expr.evaluate(&Document::new()).is_err());
    }

    #[test]
    fn test_mod_integer() {
        assert_eq!(
            eval(json!({"$mod": [7, 3]}), json!({})),
            Some(Value::Int32(1))
        );
    }

    #[test]
    fn test_comparisons_use_total_order() {
        assert_eq!(
            eval(json!({"$lt": [1, "x"]}), json!({})),
            Some(Value::Bool(true)) // number ranks below string
        );
        assert_eq!(
            eval(json!({"$eq": [2, 2.0]}), json!({})),
            Some(Value::Bool(true))
        );
        assert_eq!(
            eval(json!({"$cmp": [3, 1]}), json!({})),
            Some(Value::Int32(1))
        );
    }

    #[test]
    fn test_equality_missing_is_not_null() {
        assert_eq!(
            eval(json!({"$eq": ["$missing", null]}), json!({})),
            Some(Value::Bool(false))
        );
        assert_eq!(
            eval(json!({"$eq": ["$a", null]}), json!({"a": null})),
            Some(Value::Bool(true))
        );
    }

    #[test]
    fn test_boolean_operators() {
        assert_eq!(
            eval(json!({"$and": ["$a", true]}), json!({"a": 1})),
            Some(Value::Bool(true))
        );
        assert_eq!(
            eval(json!({"$and": ["$missing"]}), json!({})),
            Some(Value::Bool(false))
        );
        assert_eq!(
            eval(json!({"$or": [false, 0, ""]}), json!({})),
            Some(Value::Bool(false))
        );
        assert_eq!(
            eval(json!({"$not": [0]}), json!({})),
            Some(Value::Bool(true))
        );
    }

    #[test]
    fn test_cond_and_if_null() {
        assert_eq!(
            eval(
                json!({"$cond": [{"$gt": ["$n", 0]}, "pos", "neg"]}),
                json!({"n": 5})
            ),
            Some(Value::string("pos"))
        );
        assert_eq!(
            eval(json!({"$ifNull": ["$missing", "fallback"]}), json!({})),
            Some(Value::string("fallback"))
        );
        assert_eq!(
            eval(json!({"$ifNull": ["$a", "fallback"]}), json!({"a": 3})),
            Some(Value::Int32(3))
        );
    }

    #[test]
    fn test_string_operators() {
        assert_eq!(
            eval(json!({"$concat": ["a", "$x", "c"]}), json!({"x": "b"})),
            Some(Value::string("abc"))
        );
        assert_eq!(
            eval(json!({"$concat": ["a", "$missing"]}), json!({})),
            Some(Value::Null)
        );
        assert_eq!(
            eval(json!({"$toUpper": "$s"}), json!({"s": "abc"})),
            Some(Value::string("ABC"))
        );
        assert_eq!(
            eval(json!({"$toLower": "$missing"}), json!({})),
            Some(Value::string(""))
        );
    }

    #[test]
    fn test_object_constructor_ordered_and_omits_missing() {
        let result = eval(
            json!({"first": "$a", "second": "$missing", "third": {"$add": [1, 1]}}),
            json!({"a": 10}),
        )
        .unwrap();
        let built = result.as_document().unwrap();
        let names: Vec<_> = built.fields().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["first", "third"]);
    }

    #[test]
    fn test_optimize_constant_folds() {
        let expr = Expression::parse(&json!({"$add": [1, {"$multiply": [2, 3]}]})).unwrap();
        let folded = expr.optimize();
        match folded {
            Expression::Constant(v) => assert_eq!(v, Value::Int32(7)),
            other => panic!("expected constant, got {:?}", other),
        }
    }

    #[test]
    fn test_optimize_leaves_field_paths() {
        let expr = Expression::parse(&json!({"$add": ["$a", {"$add": [1, 2]}]})).unwrap();
        match expr.optimize() {
            Expression::Operator(OperatorKind::Add, children) => {
                assert!(matches!(children[0], Expression::FieldPath(_)));
                assert!(matches!(children[1], Expression::Constant(_)));
            }
            other => panic!("expected operator, got {:?}", other),
        }
    }

    #[test]
    fn test_optimize_keeps_failing_subtree() {
        let expr = Expression::parse(&json!({"$divide": [1, 0]})).unwrap();
        // Folding must not swallow the error; it stays for run time
        assert!(matches!(expr.optimize(), Expression::Operator(_, _)));
    }

    #[test]
    fn test_dependencies() {
        let expr =
            Expression::parse(&json!({"$add": ["$a.b", {"$cond": ["$c", "$d", 1]}]})).unwrap();
        let mut tracker = DependencyTracker::new();
        tracker.begin_bounded();
        expr.add_dependencies(&mut tracker);
        let projection = tracker.to_projection().unwrap();
        assert_eq!(
            projection.to_json(),
            json!({"a.b": 1, "c": 1, "d": 1, "_id": 0})
        );
    }

    #[test]
    fn test_to_json_roundtrip() {
        let spec = json!({"$add": ["$a", 1]});
        let expr = Expression::parse(&spec).unwrap();
        assert_eq!(expr.to_json(), spec);

        // Ambiguous constants escape through $literal
        let literal = Expression::Constant(Value::string("$notAPath"));
        assert_eq!(literal.to_json(), json!({"$literal": "$notAPath"}));
    }
}

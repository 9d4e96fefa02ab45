// src/value.rs
// Tagged value union: the unit of data flowing through a pipeline

use crate::document::Document;
use crate::error::{DocFlowError, Result};
use serde::ser::{Serialize, Serializer};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A single value inside a document
///
/// Compound variants (`Array`, `Document`) hold their payload behind an `Arc`
/// so cloning a value is cheap and subtrees are shared structurally between
/// pipeline stages. Values are immutable once built; a stage that wants a
/// modified value builds a new one.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    String(String),
    /// Milliseconds since the Unix epoch
    Date(i64),
    /// Opaque 12-byte identifier
    ObjectId([u8; 12]),
    Timestamp(u64),
    Array(Arc<Vec<Value>>),
    Document(Arc<Document>),
}

impl Value {
    /// Build the narrowest integer variant that holds `n`
    pub fn int(n: i64) -> Value {
        if n >= i32::MIN as i64 && n <= i32::MAX as i64 {
            Value::Int32(n as i32)
        } else {
            Value::Int64(n)
        }
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Arc::new(items))
    }

    pub fn document(doc: Document) -> Value {
        Value::Document(Arc::new(doc))
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value::String(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::Int32(_) | Value::Int64(_) | Value::Double(_)
        )
    }

    /// Numeric value widened to f64; None for non-numeric variants
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int32(n) => Some(*n as f64),
            Value::Int64(n) => Some(*n as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Integer value as i64; None for non-integer variants
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(n) => Some(*n as i64),
            Value::Int64(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Arc<Vec<Value>>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Arc<Document>> {
        match self {
            Value::Document(doc) => Some(doc),
            _ => None,
        }
    }

    /// Human-readable variant name, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int32(_) => "int",
            Value::Int64(_) => "long",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::ObjectId(_) => "objectId",
            Value::Timestamp(_) => "timestamp",
            Value::Array(_) => "array",
            Value::Document(_) => "object",
        }
    }

    /// Rank of the variant in the cross-type total order
    ///
    /// null < number < string < object < array < bool < date < objectId
    /// < timestamp. This must stay in sync with `cmp_total`, and it is the
    /// order the sort stage uses.
    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Int32(_) | Value::Int64(_) | Value::Double(_) => 1,
            Value::String(_) => 2,
            Value::Document(_) => 3,
            Value::Array(_) => 4,
            Value::Bool(_) => 5,
            Value::Date(_) => 6,
            Value::ObjectId(_) => 7,
            Value::Timestamp(_) => 8,
        }
    }

    /// Total order over all values
    ///
    /// Numerics compare as reals regardless of width; NaN sorts below every
    /// other number and equals itself, so the order is total.
    pub fn cmp_total(&self, other: &Value) -> Ordering {
        let rank = self.type_rank().cmp(&other.type_rank());
        if rank != Ordering::Equal {
            return rank;
        }

        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (a, b) if a.is_numeric() => {
                // Both numeric once ranks are equal
                cmp_f64(a.as_f64().unwrap(), b.as_f64().unwrap())
            }
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::ObjectId(a), Value::ObjectId(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.cmp_total(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Document(a), Value::Document(b)) => {
                for ((an, av), (bn, bv)) in a.fields().zip(b.fields()) {
                    let ord = an.cmp(bn);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                    let ord = av.cmp_total(bv);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => unreachable!("equal type ranks imply matching variants"),
        }
    }

    /// Truthiness coercion: false, null, numeric zero and "" are false
    pub fn to_bool(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int32(n) => *n != 0,
            Value::Int64(n) => *n != 0,
            Value::Double(d) => *d != 0.0,
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Convert plain JSON into a value
    ///
    /// Integers that fit in i32 become `Int32`, other integers `Int64`,
    /// remaining numbers `Double`. Object key order is preserved; duplicate
    /// keys cannot occur in parsed JSON.
    pub fn from_json(json: &serde_json::Value) -> Result<Value> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Double(f))
                } else {
                    Err(DocFlowError::TypeMismatch(format!(
                        "unrepresentable number: {}",
                        n
                    )))
                }
            }
            serde_json::Value::String(s) => Ok(Value::String(s.clone())),
            serde_json::Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(Value::from_json(item)?);
                }
                Ok(Value::array(out))
            }
            serde_json::Value::Object(_) => Ok(Value::document(Document::from_json(json)?)),
        }
    }

    /// Convert to JSON for explain output and tests
    ///
    /// Date, objectId and timestamp have no plain-JSON form; they are
    /// emitted through extended operators ($date, $oid, $timestamp).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int32(n) => serde_json::json!(*n),
            Value::Int64(n) => serde_json::json!(*n),
            Value::Double(d) => serde_json::json!(*d),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Date(ms) => serde_json::json!({ "$date": ms }),
            Value::ObjectId(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
                serde_json::json!({ "$oid": hex })
            }
            Value::Timestamp(t) => serde_json::json!({ "$timestamp": t }),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Document(doc) => doc.to_json(),
        }
    }
}

/// Real-number comparison that is total: NaN equals NaN and sorts below
/// every other number; -0.0 equals 0.0.
fn cmp_f64(a: f64, b: f64) -> Ordering {
    match a.partial_cmp(&b) {
        Some(ord) => ord,
        None => match (a.is_nan(), b.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            // partial_cmp only fails on NaN, but the checker can't know that
            (false, false) => Ordering::Equal,
        },
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        self.cmp_total(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u8(self.type_rank());
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            // All numerics hash through a canonical f64 so that values equal
            // as reals hash identically across widths
            Value::Int32(_) | Value::Int64(_) | Value::Double(_) => {
                let mut f = self.as_f64().unwrap();
                if f == 0.0 {
                    f = 0.0; // collapse -0.0
                }
                if f.is_nan() {
                    f = f64::NAN;
                }
                f.to_bits().hash(state);
            }
            Value::String(s) => s.hash(state),
            Value::Date(ms) => ms.hash(state),
            Value::ObjectId(bytes) => bytes.hash(state),
            Value::Timestamp(t) => t.hash(state),
            Value::Array(items) => {
                for item in items.iter() {
                    item.hash(state);
                }
            }
            Value::Document(doc) => {
                for (name, value) in doc.fields() {
                    name.hash(state);
                    value.hash(state);
                }
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_int_width_selection() {
        assert!(matches!(Value::int(42), Value::Int32(42)));
        assert!(matches!(Value::int(1 << 40), Value::Int64(_)));
    }

    #[test]
    fn test_numeric_equality_across_widths() {
        assert_eq!(Value::Int32(3), Value::Int64(3));
        assert_eq!(Value::Int64(3), Value::Double(3.0));
        assert_ne!(Value::Int32(3), Value::Double(3.5));
    }

    #[test]
    fn test_missing_is_not_modeled_as_null_here() {
        // Null is an ordinary value; "missing" is Option::None at the
        // document/expression layer
        assert_eq!(Value::Null, Value::Null);
    }

    #[test]
    fn test_type_rank_ordering() {
        let null = Value::Null;
        let num = Value::Int32(5);
        let string = Value::string("a");
        let doc = Value::document(Document::new());
        let arr = Value::array(vec![]);
        let boolean = Value::Bool(false);
        let date = Value::Date(0);
        let oid = Value::ObjectId([0; 12]);
        let ts = Value::Timestamp(0);

        let ordered = [null, num, string, doc, arr, boolean, date, oid, ts];
        for pair in ordered.windows(2) {
            assert_eq!(pair[0].cmp_total(&pair[1]), Ordering::Less);
        }
    }

    #[test]
    fn test_array_lexicographic_order() {
        let a = Value::array(vec![Value::Int32(1), Value::Int32(2)]);
        let b = Value::array(vec![Value::Int32(1), Value::Int32(3)]);
        let c = Value::array(vec![Value::Int32(1)]);
        assert_eq!(a.cmp_total(&b), Ordering::Less);
        assert_eq!(c.cmp_total(&a), Ordering::Less);
    }

    #[test]
    fn test_nan_total_order() {
        let nan = Value::Double(f64::NAN);
        assert_eq!(nan.cmp_total(&nan), Ordering::Equal);
        assert_eq!(nan.cmp_total(&Value::Int32(0)), Ordering::Less);
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.to_bool());
        assert!(!Value::Bool(false).to_bool());
        assert!(!Value::Int32(0).to_bool());
        assert!(!Value::Double(0.0).to_bool());
        assert!(!Value::string("").to_bool());
        assert!(Value::string("x").to_bool());
        assert!(Value::Int64(-1).to_bool());
        assert!(Value::array(vec![]).to_bool());
    }

    #[test]
    fn test_hash_consistent_with_equality() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(Value::Int32(3));
        assert!(set.contains(&Value::Int64(3)));
        assert!(set.contains(&Value::Double(3.0)));
        assert!(!set.contains(&Value::Double(3.5)));
    }

    #[test]
    fn test_json_roundtrip() {
        let json = json!({"a": 1, "b": [true, null, "x"], "c": {"d": 2.5}});
        let value = Value::from_json(&json).unwrap();
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn test_extended_json_output() {
        let oid = Value::ObjectId([0xab; 12]);
        let json = oid.to_json();
        assert_eq!(json["$oid"], "abababababababababababab");
        assert_eq!(Value::Date(1500).to_json(), json!({"$date": 1500}));
    }

    #[test]
    fn test_document_order_matters_for_comparison() {
        let a = Value::from_json(&json!({"x": 1, "y": 2})).unwrap();
        let b = Value::from_json(&json!({"y": 2, "x": 1})).unwrap();
        // Ordered field container: different order, different value
        assert_ne!(a, b);
    }
}

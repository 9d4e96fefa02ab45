// src/error.rs
// Crate-wide error type and Result alias

use std::fmt;

/// DocFlow error
///
/// One variant per behavioral kind. Parse-time problems (`InvalidPipeline`,
/// `InvalidQuery`, `InvalidProjection`, `InvalidExpression`) are reported
/// before the pipeline starts; the remaining variants surface during
/// iteration and terminate the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum DocFlowError {
    /// Malformed pipeline specification (unknown stage, $out not last, ...)
    InvalidPipeline(String),
    /// Malformed match predicate
    InvalidQuery(String),
    /// Inconsistent projection (include mixed with exclude)
    InvalidProjection(String),
    /// Malformed expression specification
    InvalidExpression(String),
    /// Operator applied to the wrong Value variant at runtime
    TypeMismatch(String),
    /// Duplicate field name on document construction
    DuplicateField(String),
    /// getCurrent() called on an exhausted stage
    Exhausted,
    /// setSource() (or another one-shot binding) called twice
    AlreadyBound(&'static str),
    /// setSource() called on a source stage
    NotASink(&'static str),
    /// The storage cursor was invalidated during a lock yield
    CursorInvalidated,
    /// The interrupt hook fired
    Cancelled,
}

impl fmt::Display for DocFlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocFlowError::InvalidPipeline(msg) => write!(f, "Invalid pipeline: {}", msg),
            DocFlowError::InvalidQuery(msg) => write!(f, "Invalid query: {}", msg),
            DocFlowError::InvalidProjection(msg) => write!(f, "Invalid projection: {}", msg),
            DocFlowError::InvalidExpression(msg) => write!(f, "Invalid expression: {}", msg),
            DocFlowError::TypeMismatch(msg) => write!(f, "Type mismatch: {}", msg),
            DocFlowError::DuplicateField(name) => write!(f, "Duplicate field name: {}", name),
            DocFlowError::Exhausted => write!(f, "Stage is exhausted"),
            DocFlowError::AlreadyBound(what) => write!(f, "Already bound: {}", what),
            DocFlowError::NotASink(name) => {
                write!(f, "{} is a source stage and cannot have a source", name)
            }
            DocFlowError::CursorInvalidated => {
                write!(f, "Cursor was invalidated during a yield")
            }
            DocFlowError::Cancelled => write!(f, "Pipeline execution was cancelled"),
        }
    }
}

impl std::error::Error for DocFlowError {}

/// Result type alias
pub type Result<T> = std::result::Result<T, DocFlowError>;

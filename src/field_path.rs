// src/field_path.rs
// Dotted field paths ("a.b.c") for nested document navigation

use crate::error::{DocFlowError, Result};
use std::fmt;

/// A non-empty sequence of field-name segments
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Parse a dotted path such as "a.b.c"
    ///
    /// Empty paths and empty segments are rejected. A leading `$` is
    /// rejected here; expression references go through [`parse_ref`].
    ///
    /// [`parse_ref`]: FieldPath::parse_ref
    pub fn parse(path: &str) -> Result<FieldPath> {
        if path.starts_with('$') {
            return Err(DocFlowError::InvalidExpression(format!(
                "field path must not start with $: {}",
                path
            )));
        }
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(DocFlowError::InvalidExpression(format!(
                "empty segment in field path: {:?}",
                path
            )));
        }
        Ok(FieldPath { segments })
    }

    /// Parse the `$`-prefixed reference form used in expressions ("$a.b")
    pub fn parse_ref(reference: &str) -> Result<FieldPath> {
        match reference.strip_prefix('$') {
            Some(rest) => FieldPath::parse(rest),
            None => Err(DocFlowError::InvalidExpression(format!(
                "field reference must start with $: {}",
                reference
            ))),
        }
    }

    pub fn from_segments(segments: Vec<String>) -> Result<FieldPath> {
        if segments.is_empty() || segments.iter().any(|s| s.is_empty()) {
            return Err(DocFlowError::InvalidExpression(
                "field path needs at least one non-empty segment".to_string(),
            ));
        }
        Ok(FieldPath { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        false // paths are non-empty by construction
    }

    /// First segment
    pub fn head(&self) -> &str {
        &self.segments[0]
    }

    /// The path minus its head segment; None for single-segment paths
    pub fn tail(&self) -> Option<FieldPath> {
        if self.segments.len() <= 1 {
            None
        } else {
            Some(FieldPath {
                segments: self.segments[1..].to_vec(),
            })
        }
    }

    /// True if `self` equals `prefix` or descends from it
    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

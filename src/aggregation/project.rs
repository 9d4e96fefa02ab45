// src/aggregation/project.rs
//! $project: reshape documents through an ordered directive list
//!
//! Directives are applied in specification order: includes copy the input's
//! sub-structure, computes evaluate an expression and overwrite. `_id` is
//! carried by default and removed with `_id: 0`. Excludes may only appear
//! in an otherwise all-exclude projection (pure exclusion); mixing is an
//! error, except for the `_id` exception.

use crate::aggregation::stage::Stage;
use crate::dependency::DependencyTracker;
use crate::document::Document;
use crate::error::{DocFlowError, Result};
use crate::expression::Expression;
use crate::field_path::FieldPath;
use crate::value::Value;
use std::sync::Arc;

#[derive(Debug)]
enum Directive {
    Include(FieldPath),
    Exclude(FieldPath),
    Compute(FieldPath, Expression),
}

/// $project stage state
#[derive(Debug)]
pub struct ProjectStage {
    directives: Vec<Directive>,
    exclude_id: bool,
}

impl ProjectStage {
    /// Parse the directive document of a `{$project: ...}` stage
    pub fn parse(spec: &serde_json::Value) -> Result<ProjectStage> {
        let object = spec.as_object().ok_or_else(|| {
            DocFlowError::InvalidProjection("$project requires an object".to_string())
        })?;
        if object.is_empty() {
            return Err(DocFlowError::InvalidProjection(
                "$project requires at least one field".to_string(),
            ));
        }

        let mut directives = Vec::with_capacity(object.len());
        let mut exclude_id = false;
        for (name, value) in object {
            let flag = match value {
                serde_json::Value::Bool(b) => Some(*b),
                serde_json::Value::Number(n) => match n.as_i64() {
                    Some(0) => Some(false),
                    Some(1) => Some(true),
                    _ => {
                        return Err(DocFlowError::InvalidProjection(format!(
                            "projection value for {} must be 0, 1 or an expression",
                            name
                        )))
                    }
                },
                _ => None,
            };
            match flag {
                Some(false) if name == "_id" => exclude_id = true,
                Some(false) => directives.push(Directive::Exclude(FieldPath::parse(name)?)),
                Some(true) => directives.push(Directive::Include(FieldPath::parse(name)?)),
                None => directives.push(Directive::Compute(
                    FieldPath::parse(name)?,
                    Expression::parse(value)?,
                )),
            }
        }

        let stage = ProjectStage {
            directives,
            exclude_id,
        };
        if stage.has_inclusions() && stage.has_exclusions() {
            return Err(DocFlowError::InvalidProjection(
                "cannot mix include and exclude directives (except _id)".to_string(),
            ));
        }
        Ok(stage)
    }

    fn has_inclusions(&self) -> bool {
        self.directives
            .iter()
            .any(|d| matches!(d, Directive::Include(_) | Directive::Compute(..)))
    }

    fn has_exclusions(&self) -> bool {
        self.directives
            .iter()
            .any(|d| matches!(d, Directive::Exclude(_)))
    }

    /// True iff the projection is include/exclude only, the form a cursor
    /// can apply natively
    pub fn is_simple(&self) -> bool {
        !self
            .directives
            .iter()
            .any(|d| matches!(d, Directive::Compute(..)))
    }

    /// True if documents flowing through keep `path` unchanged; decides
    /// whether a match may move upstream past this stage
    pub(crate) fn passes_through_path(&self, path: &FieldPath) -> bool {
        if !self.is_simple() {
            return false;
        }
        if self.has_exclusions() {
            // Pure exclusion: the path survives unless an exclude covers it
            !self.directives.iter().any(|d| match d {
                Directive::Exclude(excluded) => path.starts_with(excluded),
                _ => false,
            })
        } else {
            // Inclusion: the path must sit at or below an included path
            if path.head() == "_id" {
                return !self.exclude_id;
            }
            self.directives.iter().any(|d| match d {
                Directive::Include(included) => path.starts_with(included),
                _ => false,
            })
        }
    }

    pub(crate) fn pull(&mut self, source: &mut Stage) -> Result<Option<Arc<Document>>> {
        match source.next_document()? {
            Some(doc) => Ok(Some(Arc::new(self.apply(&doc)?))),
            None => Ok(None),
        }
    }

    /// Build the output document for one input
    fn apply(&self, input: &Document) -> Result<Document> {
        if self.has_inclusions() {
            let mut out = Document::new();
            if !self.exclude_id {
                if let Some(id) = input.get("_id") {
                    out.push_field("_id", id.clone())?;
                }
            }
            for directive in &self.directives {
                match directive {
                    Directive::Include(path) => {
                        if let Some(value) = input.get_path(path) {
                            set_nested(&mut out, path.segments(), value.clone());
                        }
                    }
                    Directive::Compute(path, expression) => {
                        if let Some(value) = expression.evaluate(input)? {
                            set_nested(&mut out, path.segments(), value);
                        }
                    }
                    Directive::Exclude(_) => {}
                }
            }
            Ok(out)
        } else {
            // Pure exclusion: copy everything except the excluded paths
            let excluded: Vec<&FieldPath> = self
                .directives
                .iter()
                .filter_map(|d| match d {
                    Directive::Exclude(path) => Some(path),
                    _ => None,
                })
                .collect();
            Ok(exclude_paths(input, &excluded, self.exclude_id))
        }
    }

    /// Fold every compute expression
    pub(crate) fn optimize(&mut self) {
        for directive in &mut self.directives {
            if let Directive::Compute(_, expression) = directive {
                let folded =
                    std::mem::replace(expression, Expression::Constant(Value::Null)).optimize();
                *expression = folded;
            }
        }
    }

    /// An inclusion projection fully produces its output, so it rebounds
    /// the tracker to its own inputs; pure exclusion passes fields through
    /// untouched and leaves the tracker alone.
    pub(crate) fn manage_dependencies(&self, tracker: &mut DependencyTracker) {
        if !self.has_inclusions() {
            return;
        }
        tracker.begin_bounded();
        if !self.exclude_id {
            tracker.add_path(&FieldPath::parse("_id").expect("static path"));
        }
        for directive in &self.directives {
            match directive {
                Directive::Include(path) => tracker.add_path(path),
                Directive::Compute(_, expression) => expression.add_dependencies(tracker),
                Directive::Exclude(_) => {}
            }
        }
    }

    pub(crate) fn serialize(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        if self.exclude_id {
            object.insert("_id".to_string(), serde_json::json!(0));
        }
        for directive in &self.directives {
            match directive {
                Directive::Include(path) => {
                    object.insert(path.to_string(), serde_json::json!(1));
                }
                Directive::Exclude(path) => {
                    object.insert(path.to_string(), serde_json::json!(0));
                }
                Directive::Compute(path, expression) => {
                    object.insert(path.to_string(), expression.to_json());
                }
            }
        }
        serde_json::Value::Object(object)
    }
}

/// Set `value` at a (possibly nested) path, creating intermediate
/// sub-documents on demand and overwriting whatever the leaf held
fn set_nested(out: &mut Document, segments: &[String], value: Value) {
    if segments.len() == 1 {
        out.set_field(&segments[0], value);
        return;
    }
    // Reuse an existing sub-document at the head, or start a fresh one
    let mut sub = match out.get(&segments[0]) {
        Some(Value::Document(existing)) => (**existing).clone(),
        _ => Document::new(),
    };
    set_nested(&mut sub, &segments[1..], value);
    out.set_field(&segments[0], Value::document(sub));
}

/// Rebuild a document without the excluded paths
fn exclude_paths(input: &Document, excluded: &[&FieldPath], exclude_id: bool) -> Document {
    let mut out = Document::with_capacity(input.len());
    'fields: for (name, value) in input.fields() {
        if exclude_id && name == "_id" {
            continue;
        }
        let mut sub_excludes: Vec<FieldPath> = Vec::new();
        for path in excluded {
            if path.head() == name {
                match path.tail() {
                    // Whole field excluded
                    None => continue 'fields,
                    Some(tail) => sub_excludes.push(tail),
                }
            }
        }
        if sub_excludes.is_empty() {
            out.set_field(name, value.clone());
        } else if let Value::Document(sub) = value {
            let refs: Vec<&FieldPath> = sub_excludes.iter().collect();
            out.set_field(name, Value::document(exclude_paths(sub, &refs, false)));
        } else {
            // Exclusion below a non-document leaves the field untouched
            out.set_field(name, value.clone());
        }
    }
    out
}

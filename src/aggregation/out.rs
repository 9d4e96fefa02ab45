// src/aggregation/out.rs
//! $out: terminal pass-through that writes the stream to a collection
//!
//! Documents flow through unchanged; each one is also written to the bound
//! sink as it passes. The stage must be last in a pipeline (enforced at
//! parse), and running without a sink bound is an error surfaced on the
//! first pull.

use crate::aggregation::stage::Stage;
use crate::cursor::DocumentSink;
use crate::document::Document;
use crate::error::{DocFlowError, Result};
use std::fmt;
use std::sync::Arc;

/// $out stage state
pub struct OutStage {
    collection: String,
    sink: Option<Box<dyn DocumentSink>>,
}

impl OutStage {
    /// Parse the collection name of an `{$out: "name"}` stage
    pub fn parse(spec: &serde_json::Value) -> Result<OutStage> {
        let collection = spec.as_str().ok_or_else(|| {
            DocFlowError::InvalidPipeline("$out requires a collection name string".to_string())
        })?;
        if collection.is_empty() {
            return Err(DocFlowError::InvalidPipeline(
                "$out collection name must not be empty".to_string(),
            ));
        }
        Ok(OutStage {
            collection: collection.to_string(),
            sink: None,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Attach the external sink for the named collection
    pub fn bind_sink(&mut self, sink: Box<dyn DocumentSink>) -> Result<()> {
        if self.sink.is_some() {
            return Err(DocFlowError::AlreadyBound("$out sink"));
        }
        self.sink = Some(sink);
        Ok(())
    }

    pub(crate) fn pull(&mut self, source: &mut Stage) -> Result<Option<Arc<Document>>> {
        let sink = self.sink.as_mut().ok_or_else(|| {
            DocFlowError::InvalidPipeline(format!(
                "no sink bound for $out collection {:?}",
                self.collection
            ))
        })?;
        match source.next_document()? {
            Some(doc) => {
                sink.write(&doc)?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    pub(crate) fn serialize(&self) -> serde_json::Value {
        serde_json::Value::String(self.collection.clone())
    }
}

impl fmt::Debug for OutStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutStage")
            .field("collection", &self.collection)
            .field("sink_bound", &self.sink.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::source::ArraySource;
    use crate::aggregation::stage::{PipelineContext, StageKind};
    use crate::cursor::MemorySink;
    use serde_json::json;

    fn source_stage(docs: Vec<serde_json::Value>) -> Stage {
        let docs = docs
            .into_iter()
            .map(|j| Arc::new(Document::from_json(&j).unwrap()))
            .collect();
        Stage::new(
            StageKind::Array(ArraySource::from_documents(docs)),
            PipelineContext::new(),
        )
    }

    #[test]
    fn test_out_passes_through_and_writes() {
        let mut stage = OutStage::parse(&json!("results")).unwrap();
        let sink = MemorySink::new();
        let written = sink.contents();
        stage.bind_sink(Box::new(sink)).unwrap();

        let mut source = source_stage(vec![json!({"n": 1}), json!({"n": 2})]);
        let mut out = Vec::new();
        while let Some(doc) = stage.pull(&mut source).unwrap() {
            out.push(doc.to_json());
        }
        assert_eq!(out, vec![json!({"n": 1}), json!({"n": 2})]);
        let stored: Vec<serde_json::Value> =
            written.lock().iter().map(|d| d.to_json()).collect();
        assert_eq!(stored, out);
    }

    #[test]
    fn test_out_without_sink_fails_on_first_pull() {
        let mut stage = OutStage::parse(&json!("results")).unwrap();
        let mut source = source_stage(vec![json!({"n": 1})]);
        assert!(matches!(
            stage.pull(&mut source).unwrap_err(),
            DocFlowError::InvalidPipeline(_)
        ));
    }

    #[test]
    fn test_out_sink_binds_once() {
        let mut stage = OutStage::parse(&json!("results")).unwrap();
        stage.bind_sink(Box::new(MemorySink::new())).unwrap();
        assert_eq!(
            stage.bind_sink(Box::new(MemorySink::new())).unwrap_err(),
            DocFlowError::AlreadyBound("$out sink")
        );
    }

    #[test]
    fn test_out_parse_errors() {
        assert!(OutStage::parse(&json!(5)).is_err());
        assert!(OutStage::parse(&json!("")).is_err());
    }
}

// src/aggregation/limit_skip.rs
//! $limit and $skip: bounded pass-throughs
//!
//! Limit emits at most N documents then reports eof; skip pulls and
//! discards its first K inputs, then passes everything through. Adjacent
//! limits coalesce to the smaller bound; adjacent skips coalesce by
//! summing.

use crate::aggregation::stage::Stage;
use crate::document::Document;
use crate::error::{DocFlowError, Result};
use std::sync::Arc;

/// $limit stage state
#[derive(Debug)]
pub struct LimitStage {
    limit: u64,
    emitted: u64,
}

impl LimitStage {
    pub fn new(limit: u64) -> LimitStage {
        LimitStage { limit, emitted: 0 }
    }

    /// Parse the positive integer of a `{$limit: N}` stage
    pub fn parse(spec: &serde_json::Value) -> Result<LimitStage> {
        match spec.as_u64() {
            Some(n) if n > 0 => Ok(LimitStage::new(n)),
            _ => Err(DocFlowError::InvalidPipeline(
                "$limit requires a positive integer".to_string(),
            )),
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub(crate) fn pull(&mut self, source: &mut Stage) -> Result<Option<Arc<Document>>> {
        if self.emitted >= self.limit {
            return Ok(None);
        }
        match source.next_document()? {
            Some(doc) => {
                self.emitted += 1;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    /// `limit(a) then limit(b)` is `limit(min(a, b))`
    pub(crate) fn fuse(&mut self, next: &LimitStage) {
        self.limit = self.limit.min(next.limit);
    }

    /// A fresh copy for the shard side of a split: shards pre-limit, the
    /// coordinator re-limits the union
    pub(crate) fn duplicate(&self) -> LimitStage {
        LimitStage::new(self.limit)
    }

    pub(crate) fn serialize(&self) -> serde_json::Value {
        serde_json::json!(self.limit)
    }
}

/// $skip stage state
#[derive(Debug)]
pub struct SkipStage {
    skip: u64,
    skipped: u64,
}

impl SkipStage {
    pub fn new(skip: u64) -> SkipStage {
        SkipStage { skip, skipped: 0 }
    }

    /// Parse the non-negative integer of a `{$skip: K}` stage
    pub fn parse(spec: &serde_json::Value) -> Result<SkipStage> {
        match spec.as_u64() {
            Some(n) => Ok(SkipStage::new(n)),
            None => Err(DocFlowError::InvalidPipeline(
                "$skip requires a non-negative integer".to_string(),
            )),
        }
    }

    pub fn skip(&self) -> u64 {
        self.skip
    }

    pub(crate) fn pull(&mut self, source: &mut Stage) -> Result<Option<Arc<Document>>> {
        while self.skipped < self.skip {
            if source.next_document()?.is_none() {
                return Ok(None);
            }
            self.skipped += 1;
        }
        source.next_document()
    }

    /// `skip(a) then skip(b)` is `skip(a + b)`
    pub(crate) fn fuse(&mut self, next: &SkipStage) {
        self.skip = self.skip.saturating_add(next.skip);
    }

    pub(crate) fn serialize(&self) -> serde_json::Value {
        serde_json::json!(self.skip)
    }
}

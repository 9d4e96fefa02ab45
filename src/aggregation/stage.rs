// src/aggregation/stage.rs
//! The stage-to-stage streaming contract
//!
//! A [`Stage`] is a pull-based iterator over documents. The chain plumbing
//! (source link, current document, lifecycle flags, explain counter) lives
//! here; per-stage behavior lives in a [`StageKind`] variant. The
//! tagged-variant representation keeps the optimizer rules (pattern
//! matching neighbour pairs for coalesce and pushdown) in one place.
//!
//! Iteration protocol: the first call on a fresh stage must be `eof()` or
//! `advance()`; either performs the initial fetch. `current()` returns the
//! document the stage is positioned on and fails with `Exhausted` at eof.
//! Stages that must consume their whole input (group, sort) do so lazily on
//! that first call.

use crate::aggregation::filter::{FilterStage, MatchStage};
use crate::aggregation::group::GroupStage;
use crate::aggregation::limit_skip::{LimitStage, SkipStage};
use crate::aggregation::out::OutStage;
use crate::aggregation::project::ProjectStage;
use crate::aggregation::sort::SortStage;
use crate::aggregation::source::{ArraySource, CursorSource, ShardsSource};
use crate::aggregation::unwind::UnwindStage;
use crate::dependency::DependencyTracker;
use crate::document::Document;
use crate::error::{DocFlowError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// State shared by every stage of one pipeline
///
/// Carries the interrupt hook checked on every fetch, and whether this
/// pipeline is the shard-local part of a sharded execution (which selects
/// the partial accumulator forms in `$group`).
#[derive(Debug)]
pub struct PipelineContext {
    interrupted: AtomicBool,
    in_shard: bool,
}

impl PipelineContext {
    pub fn new() -> Arc<PipelineContext> {
        Arc::new(PipelineContext {
            interrupted: AtomicBool::new(false),
            in_shard: false,
        })
    }

    /// Context for running the shard-local part of a split pipeline
    pub fn new_for_shard() -> Arc<PipelineContext> {
        Arc::new(PipelineContext {
            interrupted: AtomicBool::new(false),
            in_shard: true,
        })
    }

    pub fn in_shard(&self) -> bool {
        self.in_shard
    }

    /// Request cancellation; the owning thread observes it on the next pull
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Relaxed);
    }

    pub fn check_interrupted(&self) -> Result<()> {
        if self.interrupted.load(Ordering::Relaxed) {
            Err(DocFlowError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Per-stage state and behavior
#[derive(Debug)]
pub enum StageKind {
    Array(ArraySource),
    Cursor(CursorSource),
    Shards(ShardsSource),
    Match(MatchStage),
    Filter(FilterStage),
    Project(ProjectStage),
    Group(GroupStage),
    Sort(SortStage),
    Limit(LimitStage),
    Skip(SkipStage),
    Unwind(UnwindStage),
    Out(OutStage),
}

/// One stage of a pipeline: a pull iterator with lifecycle hooks
#[derive(Debug)]
pub struct Stage {
    kind: StageKind,
    source: Option<Box<Stage>>,
    current: Option<Arc<Document>>,
    started: bool,
    done: bool,
    disposed: bool,
    n_out: u64,
    ctx: Arc<PipelineContext>,
}

impl Stage {
    pub fn new(kind: StageKind, ctx: Arc<PipelineContext>) -> Stage {
        Stage {
            kind,
            source: None,
            current: None,
            started: false,
            done: false,
            disposed: false,
            n_out: 0,
            ctx,
        }
    }

    /// Stage name as it appears in specifications and explain output
    pub fn name(&self) -> &'static str {
        match &self.kind {
            StageKind::Array(_) => "$array",
            StageKind::Cursor(_) => "$cursor",
            StageKind::Shards(_) => "$shards",
            StageKind::Match(_) => "$match",
            StageKind::Filter(_) => "$filter",
            StageKind::Project(_) => "$project",
            StageKind::Group(_) => "$group",
            StageKind::Sort(_) => "$sort",
            StageKind::Limit(_) => "$limit",
            StageKind::Skip(_) => "$skip",
            StageKind::Unwind(_) => "$unwind",
            StageKind::Out(_) => "$out",
        }
    }

    pub fn kind(&self) -> &StageKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut StageKind {
        &mut self.kind
    }

    /// True for the stages that originate documents rather than transform
    pub fn is_source(&self) -> bool {
        matches!(
            self.kind,
            StageKind::Array(_) | StageKind::Cursor(_) | StageKind::Shards(_)
        )
    }

    // ------------------------------------------------------------------
    // iteration
    // ------------------------------------------------------------------

    /// True iff no further documents will ever be produced. Stable once true.
    pub fn eof(&mut self) -> Result<bool> {
        self.ensure_started()?;
        Ok(self.done)
    }

    /// Move to the next document; false iff the stage is now at eof
    pub fn advance(&mut self) -> Result<bool> {
        if !self.started {
            self.ensure_started()?;
        } else if !self.done {
            self.fetch_next()?;
        }
        Ok(!self.done)
    }

    /// The document the stage is positioned on
    pub fn current(&self) -> Result<Arc<Document>> {
        self.current.clone().ok_or(DocFlowError::Exhausted)
    }

    /// advance + current in one step, for internal pulls
    pub(crate) fn next_document(&mut self) -> Result<Option<Arc<Document>>> {
        if self.advance()? {
            Ok(Some(self.current()?))
        } else {
            Ok(None)
        }
    }

    fn ensure_started(&mut self) -> Result<()> {
        if !self.started {
            self.started = true;
            self.fetch_next()?;
        }
        Ok(())
    }

    fn fetch_next(&mut self) -> Result<()> {
        if self.disposed {
            self.current = None;
            self.done = true;
            return Ok(());
        }
        self.ctx.check_interrupted()?;
        let next = self.kind.pull(self.source.as_deref_mut(), &self.ctx)?;
        match next {
            Some(doc) => {
                self.n_out += 1;
                self.current = Some(doc);
            }
            None => {
                self.current = None;
                self.done = true;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // lifecycle
    // ------------------------------------------------------------------

    /// Attach the predecessor stage. May be called at most once; source
    /// stages refuse a predecessor altogether.
    pub fn set_source(&mut self, source: Box<Stage>) -> Result<()> {
        if self.is_source() {
            return Err(DocFlowError::NotASink(self.name()));
        }
        if self.source.is_some() {
            return Err(DocFlowError::AlreadyBound("stage source"));
        }
        self.source = Some(source);
        Ok(())
    }

    pub(crate) fn take_source(&mut self) -> Option<Box<Stage>> {
        self.source.take()
    }

    /// Idempotent teardown: releases held resources (cursor, lock, buffered
    /// state), forces eof, and cascades to the predecessor.
    pub fn dispose(&mut self) {
        if !self.disposed {
            self.disposed = true;
            self.started = true;
            self.done = true;
            self.current = None;
            self.kind.dispose();
        }
        if let Some(source) = self.source.as_deref_mut() {
            source.dispose();
        }
    }

    pub fn n_out(&self) -> u64 {
        self.n_out
    }

    // ------------------------------------------------------------------
    // optimization
    // ------------------------------------------------------------------

    /// Local optimization: fold the stage's expression trees
    pub fn optimize(&mut self) {
        match &mut self.kind {
            StageKind::Filter(f) => f.optimize(),
            StageKind::Project(p) => p.optimize(),
            StageKind::Group(g) => g.optimize(),
            _ => {}
        }
    }

    /// Try to fuse `next` into this stage; on success the caller removes
    /// `next` from the chain
    pub fn coalesce(&mut self, next: &Stage) -> bool {
        match (&mut self.kind, &next.kind) {
            (StageKind::Match(a), StageKind::Match(b)) => a.fuse(b),
            (StageKind::Filter(a), StageKind::Filter(b)) => a.fuse(b),
            (StageKind::Limit(a), StageKind::Limit(b)) => {
                a.fuse(b);
                true
            }
            (StageKind::Skip(a), StageKind::Skip(b)) => {
                a.fuse(b);
                true
            }
            _ => false,
        }
    }

    /// Report consumed paths to the dependency tracker (tail-to-head walk)
    pub fn manage_dependencies(&mut self, tracker: &mut DependencyTracker) {
        match &mut self.kind {
            StageKind::Array(_) | StageKind::Shards(_) => {}
            StageKind::Cursor(c) => c.manage_dependencies(tracker),
            StageKind::Match(m) => m.manage_dependencies(tracker),
            StageKind::Filter(f) => f.manage_dependencies(tracker),
            StageKind::Project(p) => p.manage_dependencies(tracker),
            StageKind::Group(g) => g.manage_dependencies(tracker),
            StageKind::Sort(s) => s.manage_dependencies(tracker),
            StageKind::Unwind(u) => u.manage_dependencies(tracker),
            // Pass-throughs consume nothing beyond what flows downstream
            StageKind::Limit(_) | StageKind::Skip(_) | StageKind::Out(_) => {}
        }
    }

    // ------------------------------------------------------------------
    // sharded split
    // ------------------------------------------------------------------

    /// True if the stage divides into a shard part and a router part
    pub fn is_splittable(&self) -> bool {
        matches!(
            self.kind,
            StageKind::Group(_) | StageKind::Sort(_) | StageKind::Limit(_) | StageKind::Skip(_)
        )
    }

    /// Divide into (shard-local part, coordinator part)
    ///
    /// Non-splittable kinds return themselves as the shard part.
    pub fn split_for_sharded(self) -> (Option<Stage>, Option<Stage>) {
        let ctx = Arc::clone(&self.ctx);
        match self.kind {
            StageKind::Group(g) => {
                let (shard, router) = g.split();
                (
                    Some(Stage::new(StageKind::Group(shard), Arc::clone(&ctx))),
                    Some(Stage::new(StageKind::Group(router), ctx)),
                )
            }
            // Sorting happens entirely on the coordinator
            StageKind::Sort(s) => (None, Some(Stage::new(StageKind::Sort(s), ctx))),
            // Shards pre-limit, the coordinator re-limits the union
            StageKind::Limit(l) => {
                let shard = l.duplicate();
                (
                    Some(Stage::new(StageKind::Limit(shard), Arc::clone(&ctx))),
                    Some(Stage::new(StageKind::Limit(l), ctx)),
                )
            }
            // Only the coordinator may skip: shards each see a partition
            StageKind::Skip(s) => (None, Some(Stage::new(StageKind::Skip(s), ctx))),
            kind => (Some(Stage::new(kind, ctx)), None),
        }
    }

    // ------------------------------------------------------------------
    // explain
    // ------------------------------------------------------------------

    /// `{ "$<name>": <view> }`, plus `nOut` in explain mode
    pub fn serialize(&self, explain: bool) -> serde_json::Value {
        let view = match &self.kind {
            StageKind::Array(a) => a.serialize(),
            StageKind::Cursor(c) => c.serialize(),
            StageKind::Shards(s) => s.serialize(),
            StageKind::Match(m) => m.serialize(),
            StageKind::Filter(f) => f.serialize(),
            StageKind::Project(p) => p.serialize(),
            StageKind::Group(g) => g.serialize(),
            StageKind::Sort(s) => s.serialize(),
            StageKind::Limit(l) => l.serialize(),
            StageKind::Skip(s) => s.serialize(),
            StageKind::Unwind(u) => u.serialize(),
            StageKind::Out(o) => o.serialize(),
        };
        let mut object = serde_json::Map::new();
        object.insert(self.name().to_string(), view);
        if explain {
            object.insert("nOut".to_string(), serde_json::json!(self.n_out));
        }
        serde_json::Value::Object(object)
    }
}

impl StageKind {
    /// Produce the next output document, pulling from `source` as needed
    fn pull(
        &mut self,
        source: Option<&mut Stage>,
        ctx: &PipelineContext,
    ) -> Result<Option<Arc<Document>>> {
        match self {
            StageKind::Array(a) => a.pull(),
            StageKind::Cursor(c) => c.pull(),
            StageKind::Shards(s) => s.pull(),
            StageKind::Match(m) => m.pull(require_source(source)?),
            StageKind::Filter(f) => f.pull(require_source(source)?),
            StageKind::Project(p) => p.pull(require_source(source)?),
            StageKind::Group(g) => g.pull(require_source(source)?, ctx),
            StageKind::Sort(s) => s.pull(require_source(source)?),
            StageKind::Limit(l) => l.pull(require_source(source)?),
            StageKind::Skip(s) => s.pull(require_source(source)?),
            StageKind::Unwind(u) => u.pull(require_source(source)?),
            StageKind::Out(o) => o.pull(require_source(source)?),
        }
    }

    fn dispose(&mut self) {
        match self {
            StageKind::Cursor(c) => c.dispose(),
            StageKind::Group(g) => g.dispose(),
            StageKind::Sort(s) => s.dispose(),
            _ => {}
        }
    }
}

fn require_source(source: Option<&mut Stage>) -> Result<&mut Stage> {
    source.ok_or(DocFlowError::InvalidPipeline(
        "stage was iterated without a source attached".to_string(),
    ))
}

// src/aggregation.rs
//! Aggregation pipelines
//!
//! A [`Pipeline`] parses a declarative stage list, wires the stages into a
//! pull chain, runs the rule-based optimizer (local stage optimization,
//! pairwise coalescing to fixpoint, match pushdown), optionally splits
//! itself into a shard-local plan and a coordinator plan, and drives
//! iteration with guaranteed disposal.
//!
//! ```text
//! [ {$match: ...}, {$group: ...}, {$sort: ...} ]
//!        |  parse            | optimize         | run
//!   Vec<Stage>  ->  fused/reordered chain  ->  documents
//! ```

pub mod accumulator;
pub mod filter;
pub mod group;
pub mod limit_skip;
pub mod out;
pub mod project;
pub mod sort;
pub mod source;
pub mod stage;
pub mod unwind;

use crate::cursor::DocumentSink;
use crate::dependency::DependencyTracker;
use crate::document::Document;
use crate::error::{DocFlowError, Result};
use crate::field_path::FieldPath;
use crate::{log_debug, log_trace};
use filter::{FilterStage, MatchStage};
use group::GroupStage;
use limit_skip::{LimitStage, SkipStage};
use out::OutStage;
use project::ProjectStage;
use sort::SortStage;
use stage::{PipelineContext, Stage, StageKind};
use std::sync::Arc;
use unwind::UnwindStage;

/// An ordered chain of stages with a single source and a single sink
pub struct Pipeline {
    stages: Vec<Stage>,
    ctx: Arc<PipelineContext>,
    n_returned: u64,
}

impl Pipeline {
    /// Parse a declarative pipeline: an array of one-field stage documents
    ///
    /// Stage names are accepted with or without the `$` prefix. `$out` must
    /// be the final stage. Source stages are not part of the declarative
    /// form; one is supplied to [`run`](Pipeline::run).
    pub fn from_json(spec: &serde_json::Value, ctx: Arc<PipelineContext>) -> Result<Pipeline> {
        let stage_specs = spec.as_array().ok_or_else(|| {
            DocFlowError::InvalidPipeline("pipeline must be an array".to_string())
        })?;
        if stage_specs.is_empty() {
            return Err(DocFlowError::InvalidPipeline(
                "pipeline cannot be empty".to_string(),
            ));
        }

        let mut stages = Vec::with_capacity(stage_specs.len());
        for stage_spec in stage_specs {
            let object = stage_spec.as_object().ok_or_else(|| {
                DocFlowError::InvalidPipeline("each stage must be an object".to_string())
            })?;
            if object.len() != 1 {
                return Err(DocFlowError::InvalidPipeline(
                    "each stage must have exactly one operator".to_string(),
                ));
            }
            let (name, argument) = object.iter().next().unwrap();
            let kind = match name.trim_start_matches('$') {
                "match" => StageKind::Match(MatchStage::parse(argument)?),
                "filter" => StageKind::Filter(FilterStage::parse(argument)?),
                "project" => StageKind::Project(ProjectStage::parse(argument)?),
                "group" => StageKind::Group(GroupStage::parse(argument)?),
                "sort" => StageKind::Sort(SortStage::parse(argument)?),
                "limit" => StageKind::Limit(LimitStage::parse(argument)?),
                "skip" => StageKind::Skip(SkipStage::parse(argument)?),
                "unwind" => StageKind::Unwind(UnwindStage::parse(argument)?),
                "out" => StageKind::Out(OutStage::parse(argument)?),
                other => {
                    return Err(DocFlowError::InvalidPipeline(format!(
                        "unknown pipeline stage: {}",
                        other
                    )))
                }
            };
            stages.push(Stage::new(kind, Arc::clone(&ctx)));
        }

        let pipeline = Pipeline {
            stages,
            ctx,
            n_returned: 0,
        };
        pipeline.check_positions()?;
        Ok(pipeline)
    }

    /// Assemble a pipeline from already-built stages (used by the shard
    /// split and by embedders constructing plans programmatically)
    pub fn from_stages(stages: Vec<Stage>, ctx: Arc<PipelineContext>) -> Pipeline {
        Pipeline {
            stages,
            ctx,
            n_returned: 0,
        }
    }

    fn check_positions(&self) -> Result<()> {
        for (index, stage) in self.stages.iter().enumerate() {
            if matches!(stage.kind(), StageKind::Out(_)) && index + 1 != self.stages.len() {
                return Err(DocFlowError::InvalidPipeline(
                    "$out must be the last stage".to_string(),
                ));
            }
            if stage.is_source() && index != 0 {
                return Err(DocFlowError::InvalidPipeline(
                    "source stages may only appear first".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage names in order, handy for plan assertions
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::name).collect()
    }

    /// Attach the external sink to this pipeline's `$out` stage
    pub fn bind_out_sink(&mut self, sink: Box<dyn DocumentSink>) -> Result<()> {
        for stage in &mut self.stages {
            if let StageKind::Out(out) = stage.kind_mut() {
                return out.bind_sink(sink);
            }
        }
        Err(DocFlowError::InvalidPipeline(
            "pipeline has no $out stage".to_string(),
        ))
    }

    // ------------------------------------------------------------------
    // optimization
    // ------------------------------------------------------------------

    /// Rule-based optimization, repeated to fixpoint
    ///
    /// 1. each stage folds its expression trees;
    /// 2. adjacent compatible stages coalesce (match+match, filter+filter,
    ///    limit+limit, skip+skip);
    /// 3. a `$match` moves upstream past a `$sort`, and past a simple
    ///    `$project` that passes all its predicate paths through unchanged.
    pub fn optimize(&mut self) {
        for stage in &mut self.stages {
            stage.optimize();
        }
        loop {
            let mut changed = false;

            let mut index = 0;
            while index + 1 < self.stages.len() {
                let fused = {
                    let (left, right) = self.stages.split_at_mut(index + 1);
                    left[index].coalesce(&right[0])
                };
                if fused {
                    let removed = self.stages.remove(index + 1);
                    log_debug!(
                        "coalesced {} into preceding {}",
                        removed.name(),
                        self.stages[index].name()
                    );
                    changed = true;
                } else {
                    index += 1;
                }
            }

            for index in 1..self.stages.len() {
                if movable_match(&self.stages[index - 1], &self.stages[index]) {
                    log_debug!(
                        "moving $match upstream past {}",
                        self.stages[index - 1].name()
                    );
                    self.stages.swap(index - 1, index);
                    changed = true;
                }
            }

            if !changed {
                break;
            }
        }
    }

    // ------------------------------------------------------------------
    // sharded split
    // ------------------------------------------------------------------

    /// Divide into (shard-local plan, coordinator plan)
    ///
    /// Stages before the first splittable stage run unchanged on every
    /// shard; the splittable stage contributes its shard and router parts;
    /// everything after it runs on the coordinator, fed by a
    /// [`ShardsSource`](source::ShardsSource) over the shard outputs. With
    /// no splittable stage the whole pipeline runs shard-side and the
    /// coordinator plan is a bare union.
    pub fn split_for_sharded(self) -> (Pipeline, Pipeline) {
        let Pipeline { stages, ctx, .. } = self;
        let mut shard_stages = Vec::new();
        let mut router_stages = Vec::new();
        let mut split_done = false;
        for stage in stages {
            if split_done {
                router_stages.push(stage);
            } else if stage.is_splittable() {
                let name = stage.name();
                let (shard_part, router_part) = stage.split_for_sharded();
                log_debug!("pipeline splits at {}", name);
                if let Some(part) = shard_part {
                    shard_stages.push(part);
                }
                if let Some(part) = router_part {
                    router_stages.push(part);
                }
                split_done = true;
            } else {
                shard_stages.push(stage);
            }
        }
        (
            Pipeline::from_stages(shard_stages, Arc::clone(&ctx)),
            Pipeline::from_stages(router_stages, ctx),
        )
    }

    // ------------------------------------------------------------------
    // execution
    // ------------------------------------------------------------------

    /// Bind `source`, walk dependencies (pushing a projection into a cursor
    /// source when possible), link the chain, and drive it to completion.
    ///
    /// Every stage is disposed on the way out, on success and on error
    /// alike. A pipeline runs once; the bound source stays in the plan
    /// afterwards so explain output covers it.
    pub fn run(&mut self, source: Stage) -> Result<Vec<Arc<Document>>> {
        if self.stages.first().map_or(false, Stage::is_source) {
            return Err(DocFlowError::AlreadyBound("pipeline source"));
        }
        if !source.is_source() {
            return Err(DocFlowError::InvalidPipeline(
                "run requires a source stage".to_string(),
            ));
        }
        self.stages.insert(0, source);
        self.execute()
    }

    /// Run a pipeline whose first stage already is a source (plans built
    /// through [`from_stages`](Pipeline::from_stages))
    pub fn run_bound(&mut self) -> Result<Vec<Arc<Document>>> {
        if !self.stages.first().map_or(false, Stage::is_source) {
            return Err(DocFlowError::InvalidPipeline(
                "pipeline has no bound source".to_string(),
            ));
        }
        self.execute()
    }

    fn execute(&mut self) -> Result<Vec<Arc<Document>>> {
        // Tail-to-head dependency walk; the head source sees the final state
        let mut tracker = DependencyTracker::new();
        for stage in self.stages.iter_mut().rev() {
            stage.manage_dependencies(&mut tracker);
        }

        // Link the chain head -> tail
        let mut chain: Option<Box<Stage>> = None;
        for mut stage in self.stages.drain(..) {
            if let Some(previous) = chain.take() {
                stage
                    .set_source(previous)
                    .expect("positions were validated before linking");
            }
            chain = Some(Box::new(stage));
        }
        let mut terminal = chain.expect("pipeline always has a source after binding");

        let result = drive(terminal.as_mut());
        terminal.dispose();

        // Unlink the chain back into the plan vector for explain
        let mut rebuilt = Vec::new();
        let mut link = Some(terminal);
        while let Some(mut stage) = link {
            link = stage.take_source();
            rebuilt.push(*stage);
        }
        rebuilt.reverse();
        self.stages = rebuilt;

        let documents = result?;
        self.n_returned = documents.len() as u64;
        log_trace!("pipeline returned {} documents", self.n_returned);
        Ok(documents)
    }

    // ------------------------------------------------------------------
    // explain
    // ------------------------------------------------------------------

    /// `{"pipeline": [...]}`; explain mode adds `nReturned` and per-stage
    /// `nOut` counters
    pub fn serialize(&self, explain: bool) -> serde_json::Value {
        let stages: Vec<serde_json::Value> =
            self.stages.iter().map(|s| s.serialize(explain)).collect();
        let mut object = serde_json::Map::new();
        object.insert("pipeline".to_string(), serde_json::Value::Array(stages));
        if explain {
            object.insert("nReturned".to_string(), serde_json::json!(self.n_returned));
        }
        serde_json::Value::Object(object)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

/// Drive a linked chain to completion through its terminal stage
fn drive(terminal: &mut Stage) -> Result<Vec<Arc<Document>>> {
    let mut documents = Vec::new();
    let mut has_document = !terminal.eof()?;
    while has_document {
        documents.push(terminal.current()?);
        has_document = terminal.advance()?;
    }
    Ok(documents)
}

/// True if `next` is a `$match` that may move upstream past `previous`
/// without changing pipeline semantics
fn movable_match(previous: &Stage, next: &Stage) -> bool {
    let match_stage = match next.kind() {
        StageKind::Match(m) => m,
        _ => return false,
    };
    match previous.kind() {
        // A sort reorders but never reshapes: always safe
        StageKind::Sort(_) => true,
        StageKind::Project(project) => {
            // Only simple projections that leave every predicate path
            // intact; computed or renamed outputs block the move
            let mut scratch = DependencyTracker::new();
            scratch.begin_bounded();
            match_stage.manage_dependencies(&mut scratch);
            let projection = match scratch.to_projection() {
                Some(p) => p,
                None => return false,
            };
            let id_path = FieldPath::parse("_id").expect("static path");
            projection
                .paths
                .iter()
                .all(|path| project.passes_through_path(path))
                && (!projection.include_id || project.passes_through_path(&id_path))
        }
        _ => false,
    }
}
